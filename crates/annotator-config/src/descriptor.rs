//! Derives the on-disk layout of one supervised annotation server.
//!
//! The private root directory houses the daemon PID file and log. Every
//! caller that needs to find those files derives them from the same
//! [`ServiceDescriptor`] so the lifecycle commands and the liveness checks
//! agree on the layout. Paths are recomputed on each access.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::defaults::DEFAULT_LAUNCH_PROGRAM;

/// File name of the daemon PID file inside the root directory.
pub const PID_FILE_NAME: &str = "label_studio_daemon.pid";

/// File name of the daemon log inside the root directory.
pub const LOG_FILE_NAME: &str = "label_studio_daemon.log";

const ANNOTATORS_DIRECTORY: &str = "annotators";

/// Identity and launch parameters of one supervised service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    instance_id: String,
    config_root: PathBuf,
    port: u16,
    launch_program: String,
    launch_override: Option<Vec<String>>,
}

impl ServiceDescriptor {
    /// Builds a descriptor after validating the identifier and port.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when `instance_id` is not a single path
    /// component, `port` is zero, or `config_root` is empty.
    pub fn new(
        instance_id: impl Into<String>,
        config_root: impl Into<PathBuf>,
        port: u16,
    ) -> Result<Self, DescriptorError> {
        let id = instance_id.into();
        validate_instance_id(&id)?;
        if port == 0 {
            return Err(DescriptorError::InvalidPort);
        }
        let root = config_root.into();
        if root.as_os_str().is_empty() {
            return Err(DescriptorError::MissingConfigRoot);
        }
        Ok(Self {
            instance_id: id,
            config_root: root,
            port,
            launch_program: String::from(DEFAULT_LAUNCH_PROGRAM),
            launch_override: None,
        })
    }

    /// Replaces the program used by the default launch command.
    #[must_use]
    pub fn with_launch_program(mut self, program: impl Into<String>) -> Self {
        self.launch_program = program.into();
        self
    }

    /// Replaces the whole launch command with an explicit argument vector.
    #[must_use]
    pub fn with_launch_command(mut self, command: Vec<String>) -> Self {
        self.launch_override = Some(command);
        self
    }

    /// Stable identifier of the instance.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Configured server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Private directory holding the daemon artefacts.
    #[must_use]
    pub fn root_dir(&self) -> PathBuf {
        self.config_root
            .join(ANNOTATORS_DIRECTORY)
            .join(&self.instance_id)
    }

    /// Path to the daemon PID file.
    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.root_dir().join(PID_FILE_NAME)
    }

    /// Path to the daemon log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.root_dir().join(LOG_FILE_NAME)
    }

    /// Argument vector that starts the annotation server.
    #[must_use]
    pub fn launch_command(&self) -> Vec<String> {
        if let Some(command) = &self.launch_override {
            return command.clone();
        }
        vec![
            self.launch_program.clone(),
            String::from("start"),
            String::from("--no-browser"),
            String::from("--port"),
            self.port.to_string(),
        ]
    }

    /// Base URL of the annotation server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

fn validate_instance_id(instance_id: &str) -> Result<(), DescriptorError> {
    let mut components = Path::new(instance_id).components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if single_normal && !instance_id.contains(['/', '\\']) {
        Ok(())
    } else {
        Err(DescriptorError::InvalidInstanceId {
            instance_id: String::from(instance_id),
        })
    }
}

/// Errors raised while building a [`ServiceDescriptor`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// The identifier cannot name a single directory.
    #[error("instance id '{instance_id}' must be a single, non-empty path component")]
    InvalidInstanceId {
        /// Identifier that was rejected.
        instance_id: String,
    },
    /// Port zero cannot be supervised.
    #[error("port 0 is not a valid annotation server port")]
    InvalidPort,
    /// The configuration root was empty.
    #[error("configuration root directory must not be empty")]
    MissingConfigRoot,
}
