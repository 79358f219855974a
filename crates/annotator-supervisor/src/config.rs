//! Separates configuration flags from the subcommand.
//!
//! Leading flags listed in [`CONFIG_CLI_FLAGS`](super::CONFIG_CLI_FLAGS) are
//! handed to `ortho_config`; the first token that is not one of them starts
//! the subcommand parsed by clap.

use std::ffi::{OsStr, OsString};

use annotator_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading flags in `args`.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let Some((flag, inline_value)) = text
        .strip_prefix("--")
        .map(|rest| rest.split_once('=').map_or((rest, false), |(flag, _)| (flag, true)))
    else {
        return FlagAction::Stop;
    };
    if super::CONFIG_CLI_FLAGS
        .iter()
        .any(|known| known.strip_prefix("--") == Some(flag))
    {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments destined for the configuration loader and the command parser.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

/// Splits `args` (including the program name) at the first non-configuration token.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ArgumentSplit {
            config_arguments: Vec::new(),
            command_arguments: Vec::new(),
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut remaining = rest.iter().peekable();
    while let Some(argument) = remaining.peek() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push((*argument).clone());
                remaining.next();
                if needs_value && let Some(value) = remaining.next() {
                    config_arguments.push(value.clone());
                }
            }
            FlagAction::Stop => break,
        }
    }

    let mut command_arguments = vec![program.clone()];
    command_arguments.extend(remaining.cloned());
    ArgumentSplit {
        config_arguments,
        command_arguments,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn os_args(parts: &[&str]) -> Vec<OsString> {
        parts.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case::inline("--port=9000", FlagAction::Include { needs_value: false })]
    #[case::separated("--port", FlagAction::Include { needs_value: true })]
    #[case::config_path("--config-path", FlagAction::Include { needs_value: true })]
    #[case::subcommand("resume", FlagAction::Stop)]
    #[case::unknown_flag("--verbose", FlagAction::Stop)]
    #[case::short_flag("-p", FlagAction::Stop)]
    fn classifies_arguments(#[case] argument: &str, #[case] expected: FlagAction) {
        assert_eq!(classify(OsStr::new(argument)), expected);
    }

    #[test]
    fn leading_flags_go_to_the_loader() {
        let split = split_config_arguments(&os_args(&[
            "annotator",
            "--port",
            "9000",
            "--log-format=compact",
            "status",
        ]));
        assert_eq!(
            split.config_arguments,
            os_args(&["annotator", "--port", "9000", "--log-format=compact"])
        );
        assert_eq!(split.command_arguments, os_args(&["annotator", "status"]));
    }

    #[test]
    fn flags_after_the_subcommand_stay_with_the_command() {
        let split = split_config_arguments(&os_args(&["annotator", "url", "--port", "9000"]));
        assert_eq!(split.config_arguments, os_args(&["annotator"]));
        assert_eq!(
            split.command_arguments,
            os_args(&["annotator", "url", "--port", "9000"])
        );
    }

    #[test]
    fn dangling_flag_keeps_partial_arguments() {
        let split = split_config_arguments(&os_args(&["annotator", "--instance-id"]));
        assert_eq!(
            split.config_arguments,
            os_args(&["annotator", "--instance-id"])
        );
        assert_eq!(split.command_arguments, os_args(&["annotator"]));
    }

    #[test]
    fn empty_arguments_split_to_nothing() {
        let split = split_config_arguments(&[]);
        assert!(split.config_arguments.is_empty());
        assert!(split.command_arguments.is_empty());
    }
}
