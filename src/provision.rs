//! Working directory layout for the managed nginx prefix
//!
//! nginx refuses to start when its log or temp directories are missing, so the
//! whole tree is created before the first configuration is written.

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Directory holding `error.log`, relative to the prefix
pub const LOG_DIR: &str = "logs";

/// Error log path, relative to the prefix
pub const ERROR_LOG: &str = "logs/error.log";

/// Parent of the request buffering directories, relative to the prefix
pub const TEMP_DIR: &str = "tmp";

/// Buffering directories under [`TEMP_DIR`], paired with the http directive that uses them
pub const TEMP_PATHS: [(&str, &str); 5] = [
    ("client_body_temp_path", "client_body"),
    ("proxy_temp_path", "proxy"),
    ("fastcgi_temp_path", "fastcgi"),
    ("uwsgi_temp_path", "uwsgi"),
    ("scgi_temp_path", "scgi"),
];

/// Ensure `path` exists as a directory, creating missing ancestors.
///
/// Succeeds silently when the directory is already there.
pub fn ensure_directory_for(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|source| Error::CreateDirectory {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Created directory");
    Ok(())
}

/// Create the prefix directory and every directory the generated config refers to
pub fn provision(prefix: &Path) -> Result<()> {
    ensure_directory_for(prefix)?;
    ensure_directory_for(&prefix.join(LOG_DIR))?;
    ensure_directory_for(&prefix.join(TEMP_DIR))?;
    for (_, dir) in TEMP_PATHS {
        ensure_directory_for(&prefix.join(TEMP_DIR).join(dir))?;
    }
    Ok(())
}

/// Temp directory for a buffering directive, relative to the prefix (e.g. `tmp/proxy`)
pub fn temp_path(dir: &str) -> String {
    format!("{}/{}", TEMP_DIR, dir)
}
