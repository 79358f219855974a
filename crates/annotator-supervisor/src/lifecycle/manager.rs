//! Idempotent lifecycle operations for one annotation server instance.
//!
//! [`ServiceLifecycle`] ties a [`ServiceDescriptor`] to the collaborators that
//! do the actual work: a [`ProcessSupervisor`] for the process, a
//! [`HealthProbe`] for connectivity and a [`BrowserLauncher`] for the UI. Every
//! path is derived from the descriptor on demand, so the manager holds no
//! cached filesystem state between calls.

use std::fs;
use std::io;
use std::path::PathBuf;

use annotator_config::{Config, DescriptorError, ServiceDescriptor};
use tracing::{error, info, warn};

use super::LIFECYCLE_TARGET;
use super::error::LifecycleError;
use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::health::{HealthProbe, HttpHealthProbe};
use crate::port::ensure_port_available;
use crate::process::files::remove_if_exists;
use crate::process::{DaemonSpec, Liveness, ProcessSupervisor, system_supervisor};

/// Snapshot of the service reported by [`ServiceLifecycle::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Identifier of the instance.
    pub instance_id: String,
    /// Whether the instance directory exists.
    pub provisioned: bool,
    /// Whether this platform lets the supervisor start and stop the server.
    pub managed: bool,
    /// Process state reported by the supervisor.
    pub liveness: Liveness,
    /// Base URL of the server.
    pub url: String,
    /// Instance directory.
    pub root_dir: PathBuf,
    /// PID file of the background server.
    pub pid_path: PathBuf,
    /// Log receiving the server's output.
    pub log_path: PathBuf,
}

/// Lifecycle manager wired to the platform's real collaborators.
pub type SystemServiceLifecycle =
    ServiceLifecycle<Box<dyn ProcessSupervisor>, HttpHealthProbe, SystemBrowser>;

/// Manages provisioning, process state and connectivity of one service.
#[derive(Debug)]
pub struct ServiceLifecycle<S, P, B> {
    descriptor: ServiceDescriptor,
    api_key: Option<String>,
    supervisor: S,
    probe: P,
    browser: B,
}

impl SystemServiceLifecycle {
    /// Builds a manager for the instance described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the configuration does not describe a
    /// valid instance.
    pub fn from_config(config: &Config) -> Result<Self, DescriptorError> {
        let descriptor = config.descriptor()?;
        Ok(Self::new(
            descriptor,
            system_supervisor(config.stop_timeout()),
            HttpHealthProbe::default(),
            SystemBrowser::new(),
        )
        .with_api_key(config.api_key().map(String::from)))
    }
}

impl<S, P, B> ServiceLifecycle<S, P, B>
where
    S: ProcessSupervisor,
    P: HealthProbe,
    B: BrowserLauncher,
{
    /// Creates a manager for `descriptor` without an API key.
    #[must_use]
    pub const fn new(descriptor: ServiceDescriptor, supervisor: S, probe: P, browser: B) -> Self {
        Self {
            descriptor,
            api_key: None,
            supervisor,
            probe,
            browser,
        }
    }

    /// Sets the key presented to the health endpoint.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Layout and launch parameters of the managed instance.
    #[must_use]
    pub const fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn daemon_spec(&self) -> DaemonSpec {
        DaemonSpec {
            command: self.descriptor.launch_command(),
            pid_path: self.descriptor.pid_path(),
            log_path: self.descriptor.log_path(),
        }
    }

    /// Creates the instance's private directory.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Provision`] when the directory cannot be
    /// created.
    pub fn provision(&self) -> Result<(), LifecycleError> {
        let root = self.descriptor.root_dir();
        if root.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&root).map_err(|source| LifecycleError::Provision {
            path: root.clone(),
            source,
        })?;
        info!(
            target: LIFECYCLE_TARGET,
            instance = self.descriptor.instance_id(),
            dir = %root.display(),
            "provisioned service directory"
        );
        Ok(())
    }

    /// Removes the log file, and the instance directory once it is empty and
    /// the server is stopped. Succeeds when there is nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Deprovision`] when the log or the empty
    /// directory cannot be removed.
    pub fn deprovision(&self) -> Result<(), LifecycleError> {
        let log_path = self.descriptor.log_path();
        let removed = remove_if_exists(&log_path).map_err(|source| LifecycleError::Deprovision {
            path: log_path.clone(),
            source,
        })?;
        if removed {
            info!(
                target: LIFECYCLE_TARGET,
                file = %log_path.display(),
                "removed service log"
            );
        }
        if self.liveness() == Liveness::Stopped {
            self.remove_empty_root()?;
        }
        Ok(())
    }

    fn remove_empty_root(&self) -> Result<(), LifecycleError> {
        let root = self.descriptor.root_dir();
        match fs::remove_dir(&root) {
            Ok(()) => {
                info!(
                    target: LIFECYCLE_TARGET,
                    dir = %root.display(),
                    "removed empty service directory"
                );
                Ok(())
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
                ) =>
            {
                Ok(())
            }
            Err(source) => Err(LifecycleError::Deprovision { path: root, source }),
        }
    }

    /// Whether the instance directory exists, regardless of process state.
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.descriptor.root_dir().is_dir()
    }

    /// Process state as observed by the supervisor.
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.supervisor.liveness(&self.daemon_spec())
    }

    /// Whether the server should be treated as running.
    ///
    /// An unmanaged server is reported as running because this process has
    /// no way to tell otherwise; a diagnostic records the assumption.
    #[must_use]
    pub fn is_running(&self) -> bool {
        match self.liveness() {
            Liveness::Running { .. } => true,
            Liveness::Stopped => false,
            Liveness::Unmanaged => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    instance = self.descriptor.instance_id(),
                    "process state is unknown on this platform; assuming the server runs"
                );
                true
            }
        }
    }

    /// Starts the server unless it is already running.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::PortUnavailable`] when another process holds
    /// the port, [`LifecycleError::PortCheck`] when the port cannot be probed,
    /// and [`LifecycleError::DaemonStart`] when the server fails to start.
    pub fn resume(&self) -> Result<(), LifecycleError> {
        let spec = self.daemon_spec();
        match self.supervisor.liveness(&spec) {
            Liveness::Running { pid } => {
                info!(
                    target: LIFECYCLE_TARGET,
                    pid,
                    url = %self.descriptor.url(),
                    "annotation server already running"
                );
                Ok(())
            }
            Liveness::Unmanaged => {
                self.supervisor.start(&spec)?;
                Ok(())
            }
            Liveness::Stopped => {
                ensure_port_available(self.descriptor.port())?;
                self.supervisor.start(&spec)?;
                info!(
                    target: LIFECYCLE_TARGET,
                    url = %self.descriptor.url(),
                    log = %spec.log_path.display(),
                    "annotation server started; output is written to the log file"
                );
                Ok(())
            }
        }
    }

    /// Stops the server if it is running.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::DaemonStop`] when the server cannot be
    /// signalled or outlives the stop timeout.
    pub fn suspend(&self) -> Result<(), LifecycleError> {
        let spec = self.daemon_spec();
        match self.supervisor.liveness(&spec) {
            Liveness::Stopped => {
                info!(
                    target: LIFECYCLE_TARGET,
                    instance = self.descriptor.instance_id(),
                    "annotation server is not running"
                );
                Ok(())
            }
            Liveness::Running { pid } => {
                self.supervisor.stop(&spec)?;
                info!(target: LIFECYCLE_TARGET, pid, "annotation server stopped");
                Ok(())
            }
            Liveness::Unmanaged => {
                self.supervisor.stop(&spec)?;
                Ok(())
            }
        }
    }

    /// Base URL of the server.
    #[must_use]
    pub fn get_url(&self) -> String {
        self.descriptor.url()
    }

    /// Whether the server answers its health endpoint with `"UP"`.
    ///
    /// Probe failures are logged and reported as `false`.
    #[must_use]
    pub fn check_connectivity(&self) -> bool {
        let url = self.get_url();
        match self.probe.check(&url, self.api_key.as_deref()) {
            Ok(report) if report.is_up() => true,
            Ok(report) => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    url = %url,
                    status = %report.status,
                    "annotation server reported unhealthy status"
                );
                false
            }
            Err(probe_error) => {
                error!(
                    target: LIFECYCLE_TARGET,
                    url = %url,
                    error = %probe_error,
                    "annotation server is unreachable"
                );
                false
            }
        }
    }

    /// Opens the server UI in a browser when the server is healthy.
    pub fn launch_ui(&self) {
        let url = self.get_url();
        if !self.check_connectivity() {
            warn!(
                target: LIFECYCLE_TARGET,
                url = %url,
                "annotation server is not reachable; resume it before opening the UI"
            );
            return;
        }
        match self.browser.open(&url) {
            Ok(()) => info!(target: LIFECYCLE_TARGET, url = %url, "opened annotation UI"),
            Err(open_error) => warn!(
                target: LIFECYCLE_TARGET,
                url = %url,
                error = %open_error,
                "failed to open a browser; visit the URL manually"
            ),
        }
    }

    /// Collects the current state for reporting.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            instance_id: String::from(self.descriptor.instance_id()),
            provisioned: self.is_provisioned(),
            managed: self.supervisor.manages_processes(),
            liveness: self.liveness(),
            url: self.get_url(),
            root_dir: self.descriptor.root_dir(),
            pid_path: self.descriptor.pid_path(),
            log_path: self.descriptor.log_path(),
        }
    }
}
