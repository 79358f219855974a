//! Entry point for the `annotator` command.
//!
//! All behaviour lives in [`annotator_supervisor::run`] so it can be driven
//! with substitute streams in tests.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    annotator_supervisor::run(std::env::args_os(), &mut stdout, &mut stderr)
}
