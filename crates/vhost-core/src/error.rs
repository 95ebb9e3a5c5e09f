//! Error types for virtual host provisioning
//!
//! Every failure surfaced by this crate is an [`Error`]. The variants are the
//! categories callers branch on; [`Error::kind`] exposes them without matching
//! on payloads.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::process::ProcessError;

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Environment,
    Process,
    Dns,
    Io,
    Provisioning,
    Http,
}

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required external executable is missing
    #[error("Environment error: {0}")]
    Environment(String),

    /// An external command failed
    #[error("Command failed: {0}")]
    Process(String),

    /// DNS lookup, update or propagation failure
    #[error("DNS error: {0}")]
    Dns(String),

    /// Filesystem failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Provisioning could not complete (e.g. certificate retries exhausted)
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// HTTP transport error talking to an external service
    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an environment error
    pub fn environment(msg: impl Into<String>) -> Self {
        Self::Environment(msg.into())
    }

    /// Create a DNS error
    pub fn dns(msg: impl Into<String>) -> Self {
        Self::Dns(msg.into())
    }

    /// Create a provisioning error
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Wrap an I/O error with the path it concerns
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Environment(_) => ErrorKind::Environment,
            Error::Process(_) => ErrorKind::Process,
            Error::Dns(_) => ErrorKind::Dns,
            Error::Io { .. } => ErrorKind::Io,
            Error::Provisioning(_) => ErrorKind::Provisioning,
            Error::Http(_) => ErrorKind::Http,
        }
    }
}

/// A missing executable is an environment defect, everything else is a
/// command failure.
impl From<ProcessError> for Error {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound { .. } => Self::Environment(err.to_string()),
            other => Self::Process(other.to_string()),
        }
    }
}
