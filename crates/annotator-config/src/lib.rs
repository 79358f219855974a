//! Shared configuration for the annotation server supervisor.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! configuration file (`--config-path` or `ANNOTATOR_CONFIG_PATH`), then
//! `ANNOTATOR_*` environment variables, then command-line flags. Every field is
//! optional in the merged structure; the accessors on [`Config`] apply the
//! defaults from [`defaults`] so callers never see a missing value.

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub mod defaults;
mod descriptor;
mod logging;

pub use defaults::{
    DEFAULT_INSTANCE_ID, DEFAULT_LAUNCH_PROGRAM, DEFAULT_LOG_FILTER, DEFAULT_PORT,
    DEFAULT_STOP_TIMEOUT, default_config_root, default_log_format,
};
pub use descriptor::{DescriptorError, LOG_FILE_NAME, PID_FILE_NAME, ServiceDescriptor};
pub use logging::LogFormat;

/// Configuration for one supervised annotation server instance.
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "ANNOTATOR")]
pub struct Config {
    /// TCP port the annotation server listens on.
    pub port: Option<u16>,
    /// API key presented to the server's health endpoint.
    pub api_key: Option<String>,
    /// Identifier of the supervised instance; names its private directory.
    pub instance_id: Option<String>,
    /// Global configuration root holding the `annotators/` tree.
    pub config_root: Option<PathBuf>,
    /// Program started by the launch command.
    pub launch_program: Option<String>,
    /// Upper bound, in milliseconds, for a graceful stop.
    pub stop_timeout_ms: Option<u64>,
    /// `tracing` filter expression.
    pub log_filter: Option<String>,
    /// Log output format.
    pub log_format: Option<LogFormat>,
}

impl Config {
    /// Port the annotation server binds to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// API key for the health probe, if one was configured.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Identifier of the supervised instance.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        self.instance_id.as_deref().unwrap_or(DEFAULT_INSTANCE_ID)
    }

    /// Global configuration root.
    #[must_use]
    pub fn config_root(&self) -> PathBuf {
        self.config_root.clone().unwrap_or_else(default_config_root)
    }

    /// Program name or path used to start the annotation server.
    #[must_use]
    pub fn launch_program(&self) -> &str {
        self.launch_program
            .as_deref()
            .unwrap_or(DEFAULT_LAUNCH_PROGRAM)
    }

    /// Time allowed for the server to exit after a termination request.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout_ms
            .map_or(DEFAULT_STOP_TIMEOUT, Duration::from_millis)
    }

    /// Filter expression handed to the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Selected log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Builds the validated service descriptor for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the configured instance id, port, or
    /// configuration root cannot describe a service.
    pub fn descriptor(&self) -> Result<ServiceDescriptor, DescriptorError> {
        ServiceDescriptor::new(self.instance_id(), self.config_root(), self.port())
            .map(|descriptor| descriptor.with_launch_program(self.launch_program()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_fall_back_to_defaults() {
        let config = Config::default();
        assert_eq!(config.port(), 8093);
        assert_eq!(config.api_key(), None);
        assert_eq!(config.instance_id(), "default");
        assert_eq!(config.launch_program(), "label-studio");
        assert_eq!(config.stop_timeout(), Duration::from_secs(10));
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn descriptor_reflects_configured_values() {
        let config = Config {
            port: Some(9001),
            instance_id: Some(String::from("studio-a")),
            config_root: Some(PathBuf::from("/srv/annotator")),
            launch_program: Some(String::from("/opt/ls/bin/label-studio")),
            ..Config::default()
        };
        let descriptor = config.descriptor().expect("descriptor should build");
        assert_eq!(
            descriptor.root_dir(),
            PathBuf::from("/srv/annotator/annotators/studio-a")
        );
        assert_eq!(descriptor.url(), "http://localhost:9001");
        assert_eq!(
            descriptor.launch_command(),
            vec![
                String::from("/opt/ls/bin/label-studio"),
                String::from("start"),
                String::from("--no-browser"),
                String::from("--port"),
                String::from("9001"),
            ]
        );
    }

    #[test]
    fn descriptor_rejects_traversing_instance_ids() {
        let config = Config {
            instance_id: Some(String::from("../escape")),
            ..Config::default()
        };
        let error = config.descriptor().expect_err("instance id should be rejected");
        assert!(matches!(error, DescriptorError::InvalidInstanceId { .. }));
    }
}
