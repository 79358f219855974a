//! Lifecycle management for a supervised annotation server.
//!
//! [`ServiceLifecycle`] implements provision, resume, suspend and the
//! connectivity checks on top of the process supervisor, reporting failures
//! as [`LifecycleError`].

mod error;
mod manager;

pub use error::LifecycleError;
pub use manager::{ServiceLifecycle, ServiceStatus, SystemServiceLifecycle};

pub(crate) const LIFECYCLE_TARGET: &str = "annotator_supervisor::lifecycle";
