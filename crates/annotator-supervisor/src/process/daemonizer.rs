//! Detaches work into a background process tracked by a PID file.
//!
//! The daemon runs in its own session with stdin closed and both output
//! streams redirected to a log file that is truncated on every start. Its pid
//! is persisted atomically once the spawn is confirmed, so a reader either sees
//! no PID file or a complete one.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(unix)]
use std::fs::{self, File, OpenOptions};

#[cfg(unix)]
use tracing::{info, warn};

#[cfg(unix)]
use super::PROCESS_TARGET;
#[cfg(unix)]
use super::files;

/// Work executed by a daemon process.
pub enum DaemonWork {
    /// External program followed by its arguments.
    Command(Vec<String>),
    /// Closure run in a forked child; its return value becomes the exit code.
    Function(Box<dyn FnOnce() -> i32 + Send>),
}

impl fmt::Debug for DaemonWork {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(argv) => formatter.debug_tuple("Command").field(argv).finish(),
            Self::Function(_) => formatter.write_str("Function(..)"),
        }
    }
}

/// Errors surfaced while starting a daemon.
#[derive(Debug, Error)]
pub enum DaemonStartError {
    /// The command vector did not name a program.
    #[error("daemon launch command is empty")]
    EmptyCommand,
    /// A parent directory for the PID or log file could not be created.
    #[error("failed to create daemon directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The log file could not be opened for writing.
    #[error("failed to open daemon log '{path}': {source}")]
    OpenLog {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The external program could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Forking the current process failed.
    #[error("failed to fork daemon process: {source}")]
    Fork {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The pid of the started process could not be persisted.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// This platform cannot detach processes.
    #[error("daemon processes are not supported on this platform")]
    Unsupported,
}

/// Starts `work` as a detached daemon and records its pid in `pid_path`.
///
/// Returns the pid of the daemon. The caller is responsible for checking that
/// no instance is already running.
///
/// # Errors
///
/// Returns [`DaemonStartError`] when the command is empty, the log or its
/// directory cannot be prepared, the process cannot be started, or its pid
/// cannot be written. A daemon whose pid could not be written is killed.
#[cfg(unix)]
pub fn run_as_daemon(
    work: DaemonWork,
    pid_path: &Path,
    log_path: &Path,
) -> Result<u32, DaemonStartError> {
    if let DaemonWork::Command(argv) = &work
        && argv.is_empty()
    {
        return Err(DaemonStartError::EmptyCommand);
    }
    ensure_parent(pid_path)?;
    ensure_parent(log_path)?;
    let log = open_log(log_path)?;
    let pid = match work {
        DaemonWork::Command(argv) => spawn_command(&argv, log, log_path)?,
        DaemonWork::Function(function) => fork_function(function, &log)?,
    };
    info!(
        target: PROCESS_TARGET,
        pid,
        log = %log_path.display(),
        "daemon process started"
    );

    if let Err(source) = files::write_pid_file(pid_path, pid) {
        warn!(
            target: PROCESS_TARGET,
            pid,
            error = %source,
            "pid file write failed; terminating daemon"
        );
        abandon(pid);
        if let Err(error) = files::remove_if_exists(pid_path) {
            warn!(
                target: PROCESS_TARGET,
                file = %pid_path.display(),
                error = %error,
                "failed to remove partial pid file"
            );
        }
        return Err(DaemonStartError::PidWrite {
            path: pid_path.to_path_buf(),
            source,
        });
    }
    info!(
        target: PROCESS_TARGET,
        pid,
        file = %pid_path.display(),
        "pid file written"
    );
    Ok(pid)
}

/// Daemon management is unavailable off Unix.
///
/// # Errors
///
/// Always returns [`DaemonStartError::Unsupported`].
#[cfg(not(unix))]
pub fn run_as_daemon(
    work: DaemonWork,
    pid_path: &Path,
    log_path: &Path,
) -> Result<u32, DaemonStartError> {
    let _ = (work, pid_path, log_path);
    Err(DaemonStartError::Unsupported)
}

#[cfg(unix)]
fn ensure_parent(path: &Path) -> Result<(), DaemonStartError> {
    let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(());
    };
    fs::create_dir_all(parent).map_err(|source| DaemonStartError::CreateDirectory {
        path: parent.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn open_log(path: &Path) -> Result<File, DaemonStartError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .map_err(|source| DaemonStartError::OpenLog {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(unix)]
fn spawn_command(argv: &[String], log: File, log_path: &Path) -> Result<u32, DaemonStartError> {
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    use nix::unistd::setsid;

    let (program, arguments) = argv.split_first().ok_or(DaemonStartError::EmptyCommand)?;
    let stderr = log
        .try_clone()
        .map_err(|source| DaemonStartError::OpenLog {
            path: log_path.to_path_buf(),
            source,
        })?;
    let mut command = Command::new(program);
    command
        .args(arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr));
    // SAFETY: `setsid(2)` is async-signal-safe and touches no memory shared
    // with the parent, which is all `pre_exec` requires.
    unsafe {
        command.pre_exec(|| setsid().map(drop).map_err(io::Error::from));
    }
    let child = command
        .spawn()
        .map_err(|source| DaemonStartError::Spawn {
            program: program.clone(),
            source,
        })?;
    Ok(child.id())
}

#[cfg(unix)]
fn fork_function(
    function: Box<dyn FnOnce() -> i32 + Send>,
    log: &File,
) -> Result<u32, DaemonStartError> {
    use nix::unistd::{ForkResult, fork};

    // SAFETY: the child only redirects descriptors, runs the supplied closure
    // and leaves through `_exit`, never returning into the caller's stack.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(child.as_raw().unsigned_abs()),
        Ok(ForkResult::Child) => run_forked_child(function, log),
        Err(errno) => Err(DaemonStartError::Fork {
            source: io::Error::from(errno),
        }),
    }
}

#[cfg(unix)]
fn run_forked_child(function: Box<dyn FnOnce() -> i32 + Send>, log: &File) -> ! {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use nix::unistd::setsid;

    let code = if setsid().is_ok() && redirect_standard_streams(log).is_ok() {
        catch_unwind(AssertUnwindSafe(function)).unwrap_or(101)
    } else {
        1
    };
    // SAFETY: `_exit` terminates the forked child without running the
    // parent's atexit handlers or destructors twice.
    unsafe { libc::_exit(code) }
}

#[cfg(unix)]
fn redirect_standard_streams(log: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let null = File::open("/dev/null")?;
    let redirects = [
        (null.as_raw_fd(), libc::STDIN_FILENO),
        (log.as_raw_fd(), libc::STDOUT_FILENO),
        (log.as_raw_fd(), libc::STDERR_FILENO),
    ];
    for (source, target) in redirects {
        // SAFETY: both descriptors are open for the duration of the call.
        if unsafe { libc::dup2(source, target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Kills and reaps a daemon whose start could not be recorded.
#[cfg(unix)]
fn abandon(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::sys::wait::waitpid;

    let Some(target) = super::liveness::to_pid(pid) else {
        return;
    };
    if kill(target, Signal::SIGKILL).is_ok() && waitpid(target, None).is_err() {
        warn!(
            target: PROCESS_TARGET,
            pid,
            "abandoned daemon was not a child of this process"
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::process::liveness::{is_alive, stop};

    const STOP_TIMEOUT: Duration = Duration::from_secs(5);

    #[fixture]
    fn runtime() -> TempDir {
        TempDir::new().expect("temp dir")
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| String::from(*part)).collect()
    }

    fn wait_for_log(path: &Path, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let contents = fs::read_to_string(path).unwrap_or_default();
            if contents.contains(needle) || Instant::now() > deadline {
                return contents;
            }
            thread::sleep(Duration::from_millis(25));
        }
    }

    #[rstest]
    fn command_daemon_records_pid_and_stays_alive(runtime: TempDir) {
        let pid_path = runtime.path().join("nested/daemon.pid");
        let log_path = runtime.path().join("logs/daemon.log");
        let pid = run_as_daemon(
            DaemonWork::Command(argv(&["sleep", "30"])),
            &pid_path,
            &log_path,
        )
        .expect("daemon should start");

        let recorded = fs::read_to_string(&pid_path).expect("pid file");
        assert_eq!(recorded.trim(), pid.to_string());
        assert!(log_path.exists(), "log file should be created");
        assert!(is_alive(&pid_path));

        stop(&pid_path, STOP_TIMEOUT).expect("daemon should stop");
        assert!(!pid_path.exists());
    }

    #[rstest]
    fn command_output_is_redirected_to_truncated_log(runtime: TempDir) {
        let pid_path = runtime.path().join("daemon.pid");
        let log_path = runtime.path().join("daemon.log");
        fs::write(&log_path, "previous run\n").expect("seed log");

        run_as_daemon(
            DaemonWork::Command(argv(&["sh", "-c", "echo started; echo failed >&2"])),
            &pid_path,
            &log_path,
        )
        .expect("daemon should start");

        let contents = wait_for_log(&log_path, "failed");
        assert!(contents.contains("started"), "stdout missing: {contents:?}");
        assert!(contents.contains("failed"), "stderr missing: {contents:?}");
        assert!(!contents.contains("previous run"), "log was not truncated");
        stop(&pid_path, STOP_TIMEOUT).expect("cleanup");
    }

    #[rstest]
    fn missing_program_fails_without_pid_file(runtime: TempDir) {
        let pid_path = runtime.path().join("daemon.pid");
        let log_path = runtime.path().join("daemon.log");
        let error = run_as_daemon(
            DaemonWork::Command(argv(&["/nonexistent/annotation-server"])),
            &pid_path,
            &log_path,
        )
        .expect_err("spawn should fail");
        assert!(matches!(error, DaemonStartError::Spawn { .. }));
        assert!(!pid_path.exists());
    }

    #[rstest]
    fn empty_command_is_rejected(runtime: TempDir) {
        let pid_path = runtime.path().join("daemon.pid");
        let error = run_as_daemon(
            DaemonWork::Command(Vec::new()),
            &pid_path,
            &runtime.path().join("daemon.log"),
        )
        .expect_err("empty command should fail");
        assert!(matches!(error, DaemonStartError::EmptyCommand));
        assert!(!pid_path.exists());
    }

    #[rstest]
    fn unwritable_pid_location_fails_and_kills_daemon(runtime: TempDir) {
        // A directory squatting on the pid path makes the final rename fail.
        let pid_path = runtime.path().join("daemon.pid");
        fs::create_dir(&pid_path).expect("create blocking directory");
        fs::write(pid_path.join("occupant"), b"x").expect("populate directory");
        let error = run_as_daemon(
            DaemonWork::Command(argv(&["sleep", "30"])),
            &pid_path,
            &runtime.path().join("daemon.log"),
        )
        .expect_err("pid write should fail");
        assert!(matches!(error, DaemonStartError::PidWrite { .. }));
        assert!(pid_path.is_dir(), "existing directory must be left alone");
    }

    #[rstest]
    fn function_daemon_runs_closure_in_child(runtime: TempDir) {
        let pid_path = runtime.path().join("daemon.pid");
        let log_path = runtime.path().join("daemon.log");
        let marker = runtime.path().join("marker");
        let child_marker = marker.clone();
        let pid = run_as_daemon(
            DaemonWork::Function(Box::new(move || {
                match fs::write(&child_marker, b"ran") {
                    Ok(()) => 0,
                    Err(_) => 2,
                }
            })),
            &pid_path,
            &log_path,
        )
        .expect("fork should succeed");
        assert_ne!(pid, std::process::id());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !marker.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(25));
        }
        assert!(marker.exists(), "closure should run in the daemon");
        stop(&pid_path, STOP_TIMEOUT).expect("cleanup");
        assert!(!is_alive(&pid_path));
    }
}
