//! PID file persistence.
//!
//! A PID file is either absent or holds one complete `"<pid>\n"` record. The
//! record is staged in a sibling temporary file and renamed over the target,
//! so a concurrent liveness query never parses half a number.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;

const STAGING_SUFFIX: &str = ".staging";

/// Records `pid` at `path`, replacing any previous record.
///
/// The staged copy is synced before the rename and is readable only by the
/// owner on POSIX hosts.
pub(crate) fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    let (Some(directory), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pid file path '{}' has no parent directory", path.display()),
        ));
    };

    let mut builder = Builder::new();
    builder.prefix(name).suffix(STAGING_SUFFIX);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o600));
    }

    let mut staged = builder.tempfile_in(directory)?;
    writeln!(staged, "{pid}")?;
    staged.as_file().sync_all()?;
    staged.persist(path).map(drop).map_err(|failure| failure.error)
}

/// Deletes `path`; a file that is already gone counts as success.
///
/// The flag reports whether anything was deleted.
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<bool> {
    fs::remove_file(path).map(|()| true).or_else(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            Ok(false)
        } else {
            Err(error)
        }
    })
}
