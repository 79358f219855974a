//! Error types for service lifecycle operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::port::PortCheckError;
use crate::process::{DaemonStartError, DaemonStopError};

/// Errors raised while managing the annotation server.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another process already holds the server port.
    #[error(
        "port {port} is already in use; stop the process using it or configure a different port with --port"
    )]
    PortUnavailable {
        /// Port that was requested.
        port: u16,
    },
    /// The port could not be probed.
    #[error(transparent)]
    PortCheck(#[from] PortCheckError),
    /// The server process could not be started.
    #[error("failed to start annotation server: {0}")]
    DaemonStart(#[from] DaemonStartError),
    /// The server process could not be stopped.
    #[error("failed to stop annotation server: {0}")]
    DaemonStop(#[from] DaemonStopError),
    /// The instance directory could not be created.
    #[error("failed to create service directory {path:?}: {source}")]
    Provision {
        /// Directory that was being created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A service file or the instance directory could not be removed.
    #[error("failed to remove service file {path:?}: {source}")]
    Deprovision {
        /// Path that was being removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
