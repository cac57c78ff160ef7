use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type UpdateResult<T> = Result<T, UpdateError>;

/// Failure classes of an update run.
///
/// Every variant carries the URL, path or sizes involved so a single
/// rendered line is enough to act on.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("malformed manifest from {origin}: {reason}")]
    Parse { origin: String, reason: String },

    #[error("application '{app}' is not listed in manifest {origin}")]
    NotFound { app: String, origin: String },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error(
        "size mismatch, download corrupted: {} is {actual} bytes, expected {expected}",
        .path.display()
    )]
    Integrity {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("unusable archive {}: {reason}", .path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("expected executable not found: {}", .path.display())]
    Validation { path: PathBuf },

    #[error("update cancelled")]
    Cancelled,

    #[error(
        "another update of '{app}' is already running (lock file: {})",
        .path.display()
    )]
    Locked { app: String, path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Parse,
    NotFound,
    Download,
    Integrity,
    Archive,
    Io,
    Validation,
    Cancelled,
    Locked,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::NotFound => "not-found",
            Self::Download => "download",
            Self::Integrity => "integrity",
            Self::Archive => "archive",
            Self::Io => "io",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
            Self::Locked => "locked",
        }
    }
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Download { .. } => ErrorKind::Download,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Archive { .. } => ErrorKind::Archive,
            Self::Io { .. } => ErrorKind::Io,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Locked { .. } => ErrorKind::Locked,
        }
    }

    /// Builds a `map_err` adapter for a filesystem call on `path`.
    pub fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }

    pub fn archive(path: &Path, reason: impl Into<String>) -> Self {
        Self::Archive {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
