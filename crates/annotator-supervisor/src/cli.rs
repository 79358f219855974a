//! Command-line interface definitions for the `annotator` binary.

use clap::{Parser, Subcommand};

/// Supervises a local annotation server.
#[derive(Parser, Debug)]
#[command(name = "annotator", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Lifecycle operations exposed on the command line.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Creates the instance directory.
    Provision,
    /// Removes the server log and, when empty, the instance directory.
    Deprovision,
    /// Starts the server in the background unless it is already running.
    Resume,
    /// Stops the background server.
    Suspend,
    /// Prints provisioning and process state.
    Status,
    /// Prints the server URL.
    Url,
    /// Probes the server's health endpoint; exits non-zero when unhealthy.
    Check,
    /// Opens the server UI in a browser.
    Launch,
}
