//! Supervisor for a local annotation server.
//!
//! The library detaches the server into the background, tracks it through a
//! PID file, probes its health endpoint and stops it on request. The
//! [`lifecycle::ServiceLifecycle`] manager combines these pieces into
//! idempotent operations; [`run`] drives them from the command line.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use annotator_config::DescriptorError;
use clap::Parser;
use clap::error::ErrorKind;
use thiserror::Error;

pub mod browser;
mod cli;
mod config;
pub mod health;
pub mod lifecycle;
pub mod port;
pub mod process;
pub mod telemetry;

use cli::{Cli, CliCommand};
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use lifecycle::{LifecycleError, ServiceLifecycle, ServiceStatus, SystemServiceLifecycle};
use process::Liveness;
use telemetry::TelemetryError;

use browser::BrowserLauncher;
use health::HealthProbe;
use process::ProcessSupervisor;

/// CLI flags recognised by the configuration loader.
///
/// Keep in sync with the fields of `annotator_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--port",
    "--api-key",
    "--instance-id",
    "--config-root",
    "--launch-program",
    "--stop-timeout-ms",
    "--log-filter",
    "--log-format",
];

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("invalid service configuration: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Runs the CLI using the provided arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E, L>(args: I, stdout: &mut W, stderr: &mut E, loader: &L) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let arguments: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&arguments);

    let cli = match Cli::try_parse_from(&split.command_arguments) {
        Ok(cli) => cli,
        Err(error) if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return match write!(stdout, "{error}") {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            };
        }
        Err(error) => return report(stderr, &AppError::CliUsage(error)),
    };

    let result = loader.load(&split.config_arguments).and_then(|config| {
        telemetry::initialise(&config)?;
        let lifecycle = SystemServiceLifecycle::from_config(&config)?;
        execute(cli.command, &lifecycle, stdout)
    });
    match result {
        Ok(exit_code) => exit_code,
        Err(error) => report(stderr, &error),
    }
}

fn report<E: Write>(stderr: &mut E, error: &AppError) -> ExitCode {
    // An unwritable stderr leaves nowhere to report to.
    drop(writeln!(stderr, "{error}"));
    ExitCode::FAILURE
}

fn execute<S, P, B, W>(
    command: CliCommand,
    lifecycle: &ServiceLifecycle<S, P, B>,
    stdout: &mut W,
) -> Result<ExitCode, AppError>
where
    S: ProcessSupervisor,
    P: HealthProbe,
    B: BrowserLauncher,
    W: Write,
{
    let descriptor = lifecycle.descriptor();
    match command {
        CliCommand::Provision => {
            lifecycle.provision()?;
            writeln!(stdout, "provisioned {}", descriptor.root_dir().display())?;
        }
        CliCommand::Deprovision => {
            lifecycle.deprovision()?;
            writeln!(stdout, "deprovisioned {}", descriptor.instance_id())?;
        }
        CliCommand::Resume => {
            lifecycle.resume()?;
            write_resume_outcome(stdout, &lifecycle.status(), &descriptor.launch_command())?;
        }
        CliCommand::Suspend => {
            lifecycle.suspend()?;
            writeln!(stdout, "annotation server {} is stopped", descriptor.instance_id())?;
        }
        CliCommand::Status => write_status(stdout, &lifecycle.status())?,
        CliCommand::Url => writeln!(stdout, "{}", lifecycle.get_url())?,
        CliCommand::Check => {
            let url = lifecycle.get_url();
            if !lifecycle.check_connectivity() {
                writeln!(stdout, "annotation server at {url} is not healthy")?;
                return Ok(ExitCode::FAILURE);
            }
            writeln!(stdout, "annotation server at {url} is healthy")?;
        }
        CliCommand::Launch => lifecycle.launch_ui(),
    }
    Ok(ExitCode::SUCCESS)
}

fn write_resume_outcome<W: Write>(
    stdout: &mut W,
    status: &ServiceStatus,
    command: &[String],
) -> io::Result<()> {
    if !status.managed {
        return writeln!(
            stdout,
            "start the annotation server manually with: {}",
            command.join(" ")
        );
    }
    match status.liveness {
        Liveness::Running { pid } => writeln!(
            stdout,
            "annotation server running at {} (pid {pid}); output in {}",
            status.url,
            status.log_path.display()
        ),
        Liveness::Stopped | Liveness::Unmanaged => writeln!(
            stdout,
            "annotation server exited after starting; inspect {}",
            status.log_path.display()
        ),
    }
}

fn write_status<W: Write>(stdout: &mut W, status: &ServiceStatus) -> io::Result<()> {
    let state = match status.liveness {
        _ if !status.managed => String::from("unmanaged (state unknown on this platform)"),
        Liveness::Running { pid } => format!("running (pid {pid})"),
        Liveness::Stopped | Liveness::Unmanaged => String::from("stopped"),
    };
    writeln!(stdout, "instance: {}", status.instance_id)?;
    writeln!(
        stdout,
        "provisioned: {}",
        if status.provisioned { "yes" } else { "no" }
    )?;
    writeln!(stdout, "state: {state}")?;
    writeln!(stdout, "url: {}", status.url)?;
    writeln!(stdout, "directory: {}", status.root_dir.display())?;
    writeln!(stdout, "log: {}", status.log_path.display())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use annotator_config::Config;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    struct FixedLoader(Config);

    impl ConfigLoader for FixedLoader {
        fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
            Ok(self.0.clone())
        }
    }

    fn run_fixed(config: Config, args: &[&str]) -> (ExitCode, String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with_loader(
            args.iter().map(OsString::from),
            &mut stdout,
            &mut stderr,
            &FixedLoader(config),
        );
        (
            exit,
            String::from_utf8(stdout).expect("utf8 stdout"),
            String::from_utf8(stderr).expect("utf8 stderr"),
        )
    }

    fn config_in(root: &TempDir) -> Config {
        Config {
            config_root: Some(root.path().to_path_buf()),
            ..Config::default()
        }
    }

    fn status_with(liveness: Liveness) -> ServiceStatus {
        ServiceStatus {
            instance_id: String::from("default"),
            provisioned: true,
            managed: liveness != Liveness::Unmanaged,
            liveness,
            url: String::from("http://localhost:8093"),
            root_dir: PathBuf::from("/cfg/annotators/default"),
            pid_path: PathBuf::from("/cfg/annotators/default/label_studio_daemon.pid"),
            log_path: PathBuf::from("/cfg/annotators/default/label_studio_daemon.log"),
        }
    }

    #[test]
    fn url_prints_default_address() {
        let root = TempDir::new().expect("temp dir");
        let (exit, stdout, _) = run_fixed(config_in(&root), &["annotator", "url"]);
        assert_eq!(exit, ExitCode::SUCCESS);
        assert_eq!(stdout, "http://localhost:8093\n");
    }

    #[cfg(unix)]
    #[test]
    fn provision_then_deprovision_round_trips_directory() {
        let root = TempDir::new().expect("temp dir");
        let instance_dir = root.path().join("annotators/default");

        let (exit, stdout, _) = run_fixed(config_in(&root), &["annotator", "provision"]);
        assert_eq!(exit, ExitCode::SUCCESS);
        assert!(stdout.starts_with("provisioned "));
        assert!(instance_dir.is_dir());

        let (exit, _, _) = run_fixed(config_in(&root), &["annotator", "deprovision"]);
        assert_eq!(exit, ExitCode::SUCCESS);
        assert!(!instance_dir.exists());
    }

    #[test]
    fn invalid_instance_id_is_reported() {
        let root = TempDir::new().expect("temp dir");
        let config = Config {
            instance_id: Some(String::from("..")),
            ..config_in(&root)
        };
        let (exit, _, stderr) = run_fixed(config, &["annotator", "url"]);
        assert_eq!(exit, ExitCode::FAILURE);
        assert!(stderr.contains("invalid service configuration"), "{stderr}");
    }

    #[test]
    fn unknown_command_fails_with_usage() {
        let (exit, _, stderr) = run_fixed(Config::default(), &["annotator", "restart"]);
        assert_eq!(exit, ExitCode::FAILURE);
        assert!(stderr.contains("restart"), "{stderr}");
    }

    #[test]
    fn help_goes_to_stdout() {
        let (exit, stdout, _) = run_fixed(Config::default(), &["annotator", "--help"]);
        assert_eq!(exit, ExitCode::SUCCESS);
        assert!(stdout.contains("resume"), "{stdout}");
    }

    #[rstest]
    #[case::running(Liveness::Running { pid: 42 }, "running (pid 42)")]
    #[case::stopped(Liveness::Stopped, "stopped")]
    #[case::unmanaged(Liveness::Unmanaged, "unmanaged")]
    fn status_lists_state(#[case] liveness: Liveness, #[case] expected: &str) {
        let mut out = Vec::new();
        write_status(&mut out, &status_with(liveness)).expect("write status");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains(&format!("state: {expected}")), "{text}");
        assert!(text.contains("url: http://localhost:8093"), "{text}");
    }

    #[test]
    fn unmanaged_status_overrides_reported_liveness() {
        let status = ServiceStatus {
            managed: false,
            ..status_with(Liveness::Stopped)
        };
        let mut out = Vec::new();
        write_status(&mut out, &status).expect("write status");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("state: unmanaged"), "{text}");
    }

    #[test]
    fn managed_resume_reports_pid_and_log() {
        let mut out = Vec::new();
        write_resume_outcome(&mut out, &status_with(Liveness::Running { pid: 7 }), &[])
            .expect("write outcome");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("(pid 7)"), "{text}");
        assert!(text.contains("label_studio_daemon.log"), "{text}");
    }

    #[test]
    fn unmanaged_resume_prints_manual_command() {
        let mut out = Vec::new();
        let command = vec![String::from("label-studio"), String::from("start")];
        write_resume_outcome(&mut out, &status_with(Liveness::Unmanaged), &command)
            .expect("write outcome");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("label-studio start"), "{text}");
    }
}
