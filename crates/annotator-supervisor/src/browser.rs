//! Opens the annotation server UI in the user's browser.

use std::io;
use std::process::{Command, Stdio};

/// Opens URLs for the user.
pub trait BrowserLauncher {
    /// Opens `url` without waiting for the browser to exit.
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Delegates to the desktop's URL opener.
#[derive(Debug, Clone)]
pub struct SystemBrowser {
    opener: Vec<String>,
}

impl SystemBrowser {
    /// Uses the platform's default opener.
    #[must_use]
    pub fn new() -> Self {
        Self {
            opener: platform_opener(),
        }
    }

    /// Uses `opener` followed by the URL instead of the platform default.
    #[must_use]
    pub fn with_opener(opener: Vec<String>) -> Self {
        Self { opener }
    }
}

impl Default for SystemBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        let (program, arguments) = self.opener.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "browser opener is empty")
        })?;
        Command::new(program)
            .args(arguments)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
    }
}

fn platform_opener() -> Vec<String> {
    let parts: &[&str] = if cfg!(target_os = "macos") {
        &["open"]
    } else if cfg!(windows) {
        &["cmd", "/C", "start", ""]
    } else {
        &["xdg-open"]
    };
    parts.iter().map(|part| String::from(*part)).collect()
}
