//! Platform-dependent strategy for starting, stopping and observing the
//! annotation server.
//!
//! POSIX hosts detach the server and track it through its PID file. Elsewhere
//! the supervisor cannot manage processes at all, so it reports
//! [`Liveness::Unmanaged`] and tells the operator how to run the server by hand.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

#[cfg(unix)]
use tracing::debug;

use super::PROCESS_TARGET;
use super::daemonizer::DaemonStartError;
use super::liveness::DaemonStopError;

#[cfg(unix)]
use super::daemonizer::{DaemonWork, run_as_daemon};
#[cfg(unix)]
use super::liveness;

/// Observed state of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The recorded process is running.
    Running {
        /// Process id read from the PID file.
        pid: u32,
    },
    /// No live process is recorded.
    Stopped,
    /// The platform cannot observe the process; its state is unknown.
    Unmanaged,
}

/// Everything a supervisor needs to know about one daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSpec {
    /// Program and arguments that start the server.
    pub command: Vec<String>,
    /// Where the daemon's pid is recorded.
    pub pid_path: PathBuf,
    /// Destination of the daemon's standard output and error.
    pub log_path: PathBuf,
}

impl DaemonSpec {
    /// Launch command rendered for humans.
    #[must_use]
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Starts, stops and observes the annotation server process.
pub trait ProcessSupervisor {
    /// Whether this supervisor really controls processes.
    fn manages_processes(&self) -> bool;

    /// Reports the current state of the daemon described by `spec`.
    fn liveness(&self, spec: &DaemonSpec) -> Liveness;

    /// Starts the daemon. Returns once its pid has been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonStartError`] when the daemon cannot be launched or its
    /// pid cannot be recorded.
    fn start(&self, spec: &DaemonSpec) -> Result<(), DaemonStartError>;

    /// Stops the daemon and clears its PID file.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonStopError`] when the daemon cannot be signalled or
    /// does not exit in time.
    fn stop(&self, spec: &DaemonSpec) -> Result<(), DaemonStopError>;
}

impl<T: ProcessSupervisor + ?Sized> ProcessSupervisor for Box<T> {
    fn manages_processes(&self) -> bool {
        (**self).manages_processes()
    }

    fn liveness(&self, spec: &DaemonSpec) -> Liveness {
        (**self).liveness(spec)
    }

    fn start(&self, spec: &DaemonSpec) -> Result<(), DaemonStartError> {
        (**self).start(spec)
    }

    fn stop(&self, spec: &DaemonSpec) -> Result<(), DaemonStopError> {
        (**self).stop(spec)
    }
}

/// Detaches the server into its own session and tracks it by PID file.
#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
pub struct DetachingSupervisor {
    stop_timeout: Duration,
}

#[cfg(unix)]
impl DetachingSupervisor {
    /// Creates a supervisor that waits up to `stop_timeout` for a clean exit.
    #[must_use]
    pub const fn new(stop_timeout: Duration) -> Self {
        Self { stop_timeout }
    }

    /// Grace period granted to the daemon on stop.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }
}

#[cfg(unix)]
impl ProcessSupervisor for DetachingSupervisor {
    fn manages_processes(&self) -> bool {
        true
    }

    fn liveness(&self, spec: &DaemonSpec) -> Liveness {
        liveness::live_pid(&spec.pid_path).map_or(Liveness::Stopped, |pid| Liveness::Running { pid })
    }

    fn start(&self, spec: &DaemonSpec) -> Result<(), DaemonStartError> {
        debug!(
            target: PROCESS_TARGET,
            command = %spec.command_line(),
            "detaching annotation server"
        );
        run_as_daemon(
            DaemonWork::Command(spec.command.clone()),
            &spec.pid_path,
            &spec.log_path,
        )
        .map(drop)
    }

    fn stop(&self, spec: &DaemonSpec) -> Result<(), DaemonStopError> {
        liveness::stop(&spec.pid_path, self.stop_timeout)
    }
}

/// Fallback for platforms without daemon support.
///
/// Nothing is started or stopped; the operator is told what to run instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstructionalSupervisor;

impl ProcessSupervisor for InstructionalSupervisor {
    fn manages_processes(&self) -> bool {
        false
    }

    fn liveness(&self, _spec: &DaemonSpec) -> Liveness {
        Liveness::Unmanaged
    }

    fn start(&self, spec: &DaemonSpec) -> Result<(), DaemonStartError> {
        warn!(
            target: PROCESS_TARGET,
            command = %spec.command_line(),
            "this platform cannot run the annotation server in the background; \
             start it manually in a separate terminal with: {}",
            spec.command_line()
        );
        Ok(())
    }

    fn stop(&self, spec: &DaemonSpec) -> Result<(), DaemonStopError> {
        warn!(
            target: PROCESS_TARGET,
            command = %spec.command_line(),
            "this platform cannot stop the annotation server automatically; \
             terminate the process started with '{}' yourself",
            spec.command_line()
        );
        Ok(())
    }
}

/// Picks the supervisor best suited to the current platform.
#[must_use]
pub fn system_supervisor(stop_timeout: Duration) -> Box<dyn ProcessSupervisor> {
    #[cfg(unix)]
    {
        Box::new(DetachingSupervisor::new(stop_timeout))
    }
    #[cfg(not(unix))]
    {
        let _ignored = stop_timeout;
        Box::new(InstructionalSupervisor)
    }
}
