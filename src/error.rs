//! Error types for configuration generation and nginx process control

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller mistake: duplicate host, TLS without certificate, malformed config text
    Configuration,
    /// Directory creation, file read or file write failed
    Filesystem,
    /// The nginx binary could not be launched or reported failure
    ProcessControl,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::ProcessControl => "process_control",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("virtual host {0} is already configured")]
    DuplicateHost(String),

    #[error("virtual host {0} enables TLS but no trusted certificate was given")]
    MissingCertificate(String),

    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[error("failed to write configuration {}: {source}", .path.display())]
    WriteConfig { path: PathBuf, source: io::Error },

    #[error("failed to read configuration {}: {source}", .path.display())]
    ReadConfig { path: PathBuf, source: io::Error },

    #[error("failed to read PID file {}: {source}", .path.display())]
    ReadPidFile { path: PathBuf, source: io::Error },

    #[error("failed to run {} for {action}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        action: &'static str,
        source: io::Error,
    },

    #[error("{} {action} exited with {status}", .binary.display())]
    CommandFailed {
        binary: PathBuf,
        action: &'static str,
        status: ExitStatus,
    },

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateHost(_) | Error::MissingCertificate(_) | Error::Parse { .. } => {
                ErrorKind::Configuration
            }
            Error::CreateDirectory { .. }
            | Error::WriteConfig { .. }
            | Error::ReadConfig { .. }
            | Error::ReadPidFile { .. } => ErrorKind::Filesystem,
            Error::Spawn { .. } | Error::CommandFailed { .. } => ErrorKind::ProcessControl,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
