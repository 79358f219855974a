//! Background process management for the annotation server.
//!
//! [`daemonizer`] detaches work and records its pid, [`liveness`] answers
//! queries from that PID file and terminates the daemon, and [`supervisor`]
//! chooses between real management and manual instructions depending on what
//! the platform supports.

pub mod daemonizer;
pub(crate) mod files;
pub mod liveness;
pub mod supervisor;


pub use daemonizer::{DaemonStartError, DaemonWork, run_as_daemon};
#[cfg(unix)]
pub use liveness::{is_alive, live_pid, stop};
pub use liveness::{DaemonStopError, PidFileState, read_pid};
#[cfg(unix)]
pub use supervisor::DetachingSupervisor;
pub use supervisor::{
    DaemonSpec, InstructionalSupervisor, Liveness, ProcessSupervisor, system_supervisor,
};

pub(crate) const PROCESS_TARGET: &str = "annotator_supervisor::process";
