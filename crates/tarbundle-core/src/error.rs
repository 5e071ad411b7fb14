//! Error types for scanning and archive operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Errors that can occur while walking the source tree.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A directory could not be expanded by the walker.
    #[error("Walk error{}: {message}", location(.path))]
    Walk {
        path: Option<PathBuf>,
        message: String,
    },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Operation was interrupted.
    #[error("Operation interrupted")]
    Interrupted,

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

fn location(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" at {}", p.display()))
        .unwrap_or_default()
}

/// Errors produced by archive creation, inspection and mutation.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A mutation was attempted on a configuration with `modifiable = false`.
    #[error("Archive is not modifiable: {path}")]
    NotModifiable { path: PathBuf },

    /// A request is missing a field required by its operation kind.
    #[error("Invalid modification request: {message}")]
    InvalidRequest { message: String },

    /// A referenced source file could not be stat'ed or opened.
    #[error("Source file unavailable: {path}: {source}")]
    SourceFileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The named entry does not exist in the archive.
    #[error("Entry not found in archive: {name}")]
    EntryNotFound { name: String },

    /// Underlying read, write or rename failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive stream could not be parsed as gzip-compressed tar.
    #[error("Malformed archive {path}: {message}")]
    Format { path: PathBuf, message: String },

    /// Scan failure surfaced through an archive operation.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The operation was cancelled before completion.
    #[error("Operation cancelled")]
    Cancelled,

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl ArchiveError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a source-unavailable error.
    pub fn source_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceFileUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Create a format error.
    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotModifiable { .. } => ErrorKind::NotModifiable,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::SourceFileUnavailable { .. } => ErrorKind::SourceFileUnavailable,
            Self::EntryNotFound { .. } => ErrorKind::EntryNotFound,
            Self::Io { .. } | Self::Scan(_) | Self::Other { .. } => ErrorKind::Io,
            Self::Format { .. } => ErrorKind::Format,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Error taxonomy shared by outcomes and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotModifiable,
    InvalidRequest,
    SourceFileUnavailable,
    EntryNotFound,
    Io,
    Format,
    Cancelled,
}

/// Cloneable, serializable snapshot of an [`ArchiveError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeError {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl From<&ArchiveError> for OutcomeError {
    fn from(err: &ArchiveError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<ArchiveError> for OutcomeError {
    fn from(err: ArchiveError) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for OutcomeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
