//! Built-in defaults applied when a configuration layer leaves a value unset.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dirs::config_dir;

use crate::logging::LogFormat;

/// Default port of the local annotation server.
pub const DEFAULT_PORT: u16 = 8093;

/// Instance identifier used when none is configured.
pub const DEFAULT_INSTANCE_ID: &str = "default";

/// Program started by the default launch command.
pub const DEFAULT_LAUNCH_PROGRAM: &str = "label-studio";

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Time allowed for the annotation server to exit after `SIGTERM`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

const APPLICATION_DIRECTORY: &str = "annotator";

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Global configuration root used when none is configured.
///
/// Resolves to the platform configuration directory (for example
/// `~/.config/annotator` on Linux) and falls back to the temporary directory
/// when the platform does not report one.
#[must_use]
pub fn default_config_root() -> PathBuf {
    let mut root = config_dir().unwrap_or_else(env::temp_dir);
    root.push(APPLICATION_DIRECTORY);
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_root_ends_with_application_directory() {
        let root = default_config_root();
        assert_eq!(
            root.file_name().and_then(|name| name.to_str()),
            Some(APPLICATION_DIRECTORY)
        );
    }
}
