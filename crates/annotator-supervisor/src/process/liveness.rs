//! Answers liveness queries from a PID file and terminates the recorded daemon.
//!
//! A PID file that points at a dead process is an ordinary stale state: it
//! reports "not alive" and is removed by [`stop`]. Missing, empty, or garbled
//! files never produce errors during a liveness query. A file that cannot be
//! read at all is reported by [`stop`] instead of being deleted, since the
//! daemon it names may still be running.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(unix)]
use std::thread;
#[cfg(unix)]
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use tracing::{debug, info, warn};

#[cfg(unix)]
use super::PROCESS_TARGET;
#[cfg(unix)]
use super::files;

#[cfg(unix)]
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Contents of a PID file as seen by a liveness query.
#[derive(Debug)]
pub enum PidFileState {
    /// No PID file exists.
    Missing,
    /// The file exists but could not be read.
    Unreadable(io::Error),
    /// The file does not hold a usable process id.
    Malformed(String),
    /// The file records this process id.
    Recorded(u32),
}

/// Errors surfaced while stopping a daemon.
#[derive(Debug, Error)]
pub enum DaemonStopError {
    /// The termination signal could not be delivered.
    #[error("failed to signal daemon pid {pid}: {source}")]
    Signal {
        /// Recorded process id.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The daemon was still running when the stop timeout elapsed.
    #[error(
        "daemon pid {pid} did not exit within {timeout_ms} ms; pid file {pid_path:?} kept so the stop can be retried"
    )]
    Timeout {
        /// Recorded process id.
        pid: u32,
        /// PID file left in place.
        pid_path: PathBuf,
        /// Budget that elapsed.
        timeout_ms: u64,
    },
    /// The PID file could not be removed after the daemon exited.
    #[error("failed to remove pid file '{path}': {source}")]
    Cleanup {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The PID file exists but could not be read, so the daemon it names is
    /// unknown. The file is left untouched.
    #[error("failed to read pid file '{path}': {source}")]
    UnreadablePidFile {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Reads and classifies the PID file at `path`.
///
/// Only ids in `1..=i32::MAX` are accepted; `0` and larger values would
/// address process groups when handed to `kill(2)`.
#[must_use]
pub fn read_pid(path: &Path) -> PidFileState {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return PidFileState::Missing,
        Err(error) => return PidFileState::Unreadable(error),
    };
    let trimmed = content.trim();
    match trimmed.parse::<u32>() {
        Ok(pid) if pid != 0 && i32::try_from(pid).is_ok() => PidFileState::Recorded(pid),
        _ => PidFileState::Malformed(String::from(trimmed)),
    }
}

#[cfg(unix)]
pub(crate) fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

/// Returns the recorded pid when that process is still running.
#[cfg(unix)]
#[must_use]
pub fn live_pid(pid_path: &Path) -> Option<u32> {
    match read_pid(pid_path) {
        PidFileState::Missing => None,
        PidFileState::Recorded(pid) => {
            let alive = to_pid(pid).is_some_and(process_exists);
            if !alive {
                debug!(
                    target: PROCESS_TARGET,
                    pid,
                    file = %pid_path.display(),
                    "pid file is stale"
                );
            }
            alive.then_some(pid)
        }
        state => {
            warn!(
                target: PROCESS_TARGET,
                file = %pid_path.display(),
                state = ?state,
                "ignoring unusable pid file"
            );
            None
        }
    }
}

/// Whether the process recorded in `pid_path` is alive.
#[cfg(unix)]
#[must_use]
pub fn is_alive(pid_path: &Path) -> bool {
    live_pid(pid_path).is_some()
}

/// Requests termination of the recorded daemon and removes its PID file.
///
/// Missing files are a no-op; stale and garbled files are removed.
///
/// # Errors
///
/// Returns [`DaemonStopError::UnreadablePidFile`] when the PID file cannot be
/// read, [`DaemonStopError::Signal`] when `SIGTERM` cannot be delivered, and
/// [`DaemonStopError::Timeout`] when the daemon outlives `timeout`; the PID
/// file is kept in all three cases. [`DaemonStopError::Cleanup`] reports a
/// PID file that could not be removed after the daemon exited.
#[cfg(unix)]
pub fn stop(pid_path: &Path, timeout: Duration) -> Result<(), DaemonStopError> {
    let pid = match read_pid(pid_path) {
        PidFileState::Missing => {
            debug!(
                target: PROCESS_TARGET,
                file = %pid_path.display(),
                "no pid file; nothing to stop"
            );
            return Ok(());
        }
        PidFileState::Recorded(pid) => pid,
        PidFileState::Malformed(content) => {
            warn!(
                target: PROCESS_TARGET,
                file = %pid_path.display(),
                content = %content,
                "discarding malformed pid file"
            );
            return remove_pid_file(pid_path);
        }
        PidFileState::Unreadable(source) => {
            return Err(DaemonStopError::UnreadablePidFile {
                path: pid_path.to_path_buf(),
                source,
            });
        }
    };
    let Some(target) = to_pid(pid).filter(|target| process_exists(*target)) else {
        info!(
            target: PROCESS_TARGET,
            pid,
            "daemon already exited; removing stale pid file"
        );
        return remove_pid_file(pid_path);
    };

    match kill(target, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return remove_pid_file(pid_path),
        Err(errno) => {
            return Err(DaemonStopError::Signal {
                pid,
                source: io::Error::from(errno),
            });
        }
    }
    info!(
        target: PROCESS_TARGET,
        pid,
        timeout_ms = timeout.as_millis(),
        "sent SIGTERM to daemon"
    );

    if !wait_for_exit(target, timeout) {
        return Err(DaemonStopError::Timeout {
            pid,
            pid_path: pid_path.to_path_buf(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        });
    }
    info!(target: PROCESS_TARGET, pid, "daemon stopped");
    remove_pid_file(pid_path)
}

#[cfg(unix)]
fn wait_for_exit(pid: Pid, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !process_exists(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Checks whether `pid` names a running process.
///
/// Children of the calling process are reaped first so an exited child does
/// not linger as a zombie that `kill(pid, 0)` would still report.
#[cfg(unix)]
fn process_exists(pid: Pid) -> bool {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => return true,
        Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => return false,
        Ok(_) | Err(_) => {}
    }
    match kill(pid, None) {
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(Errno::ESRCH) => false,
        Err(errno) => {
            warn!(
                target: PROCESS_TARGET,
                pid = pid.as_raw(),
                error = %errno,
                "process probe failed; treating as not running"
            );
            false
        }
    }
}

/// Detects exited processes still awaiting a reap by a parent other than us.
#[cfg(target_os = "linux")]
fn is_zombie(pid: Pid) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, fields) = stat.rsplit_once(')')?;
            fields.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: Pid) -> bool {
    false
}

#[cfg(unix)]
fn remove_pid_file(path: &Path) -> Result<(), DaemonStopError> {
    files::remove_if_exists(path)
        .map(drop)
        .map_err(|source| DaemonStopError::Cleanup {
            path: path.to_path_buf(),
            source,
        })
}
