//! Writes rendered configuration to the file nginx is started with

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::conf::{self, Entry};
use crate::error::{Error, Result};

/// Writes the whole configuration file on every call; there is no patching.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    path: PathBuf,
}

impl ConfigWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render `entries` and overwrite the target file
    pub fn write(&self, entries: &[Entry]) -> Result<()> {
        let text = conf::render(entries);
        std::fs::write(&self.path, &text).map_err(|source| Error::WriteConfig {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), bytes = text.len(), "Configuration written");
        Ok(())
    }

    /// Read and parse the file currently on disk
    pub fn read(&self) -> Result<Vec<Entry>> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| Error::ReadConfig {
            path: self.path.clone(),
            source,
        })?;
        crate::parser::parse(&text)
    }
}
