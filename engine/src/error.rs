//! Error types for the transfer engine.
//!
//! There are two tiers of failure:
//! - `EngineError`: job-level errors that stop a job (or prevent it from starting).
//! - `FileError`: file-scoped errors recorded on the job result. The job keeps
//!   going to the next file when one of these occurs.
//!
//! Both carry structured fields so a presentation layer can format them
//! in its own language; the `Display` impls are for logs and the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors that stop a whole job.
///
/// I/O sources are kept behind `Arc` so the error can be both returned to the
/// caller and delivered on the event channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Destination does not have room for the planned bytes
    #[error("insufficient space: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },

    /// Free space ran out mid-job; `path` is the file that no longer fits
    #[error("destination full before {}: {required} bytes required, {available} bytes available", path.display())]
    DiskFull {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Free space at the destination could not be determined
    #[error("could not query free space at {}", path.display())]
    SpaceQueryFailed {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The job was cancelled by the caller
    #[error("transfer cancelled")]
    Cancelled,

    /// A source entry does not exist
    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// A source entry exists but cannot be inspected
    #[error("source access denied: {}", path.display())]
    SourceAccessDenied {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// Path is empty or otherwise unusable
    #[error("invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Failed to enumerate a source directory
    #[error("failed to enumerate directory: {}", path.display())]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// Failed to create a destination directory
    #[error("failed to create directory: {}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// A lifecycle function was called in the wrong job state
    #[error("job must be {expected} but is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    /// Configuration file could not be read or parsed
    #[error("configuration error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    /// History file could not be read or written
    #[error("history error in {}: {message}", path.display())]
    History { path: PathBuf, message: String },

    /// Catch-all for unexpected errors
    #[error("engine error: {message}")]
    Unknown { message: String },
}

impl EngineError {
    pub(crate) fn enumeration(path: &Path, err: io::Error) -> Self {
        Self::EnumerationFailed {
            path: path.to_path_buf(),
            source: Arc::new(err),
        }
    }

    pub(crate) fn directory_creation(path: &Path, err: io::Error) -> Self {
        Self::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source: Arc::new(err),
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::SpaceQueryFailed { source, .. }
            | Self::SourceAccessDenied { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True for errors that abort a job after it has started running.
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            Self::InsufficientSpace { .. }
                | Self::DiskFull { .. }
                | Self::SpaceQueryFailed { .. }
                | Self::Cancelled
        )
    }

    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::InsufficientSpace { .. } => JobErrorKind::InsufficientSpace,
            Self::DiskFull { .. } => JobErrorKind::DiskFull,
            Self::SpaceQueryFailed { .. } => JobErrorKind::SpaceQueryFailed,
            Self::Cancelled => JobErrorKind::Cancelled,
            Self::SourceNotFound { .. } => JobErrorKind::SourceNotFound,
            Self::SourceAccessDenied { .. } => JobErrorKind::SourceAccessDenied,
            Self::InvalidPath { .. } => JobErrorKind::InvalidPath,
            Self::EnumerationFailed { .. } => JobErrorKind::EnumerationFailed,
            Self::DirectoryCreationFailed { .. } => JobErrorKind::DirectoryCreationFailed,
            Self::InvalidState { .. } => JobErrorKind::InvalidState,
            Self::Config { .. } => JobErrorKind::Config,
            Self::History { .. } => JobErrorKind::History,
            Self::Unknown { .. } => JobErrorKind::Unknown,
        }
    }

    /// Path the error is about, if it names one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::DiskFull { path, .. }
            | Self::SpaceQueryFailed { path, .. }
            | Self::SourceNotFound { path }
            | Self::SourceAccessDenied { path, .. }
            | Self::InvalidPath { path, .. }
            | Self::EnumerationFailed { path, .. }
            | Self::DirectoryCreationFailed { path, .. }
            | Self::Config { path, .. }
            | Self::History { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Classification of a job-level failure, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    InsufficientSpace,
    DiskFull,
    SpaceQueryFailed,
    Cancelled,
    SourceNotFound,
    SourceAccessDenied,
    InvalidPath,
    EnumerationFailed,
    DirectoryCreationFailed,
    InvalidState,
    Config,
    History,
    Unknown,
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Unknown {
            message: err.to_string(),
        }
    }
}

/// Classification of a file-scoped failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileErrorKind {
    SourceOpenFailed,
    DestOpenFailed,
    ReadError,
    UnexpectedEndOfFile,
    WriteError,
    ChecksumMismatch,
    Unknown,
}

impl fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SourceOpenFailed => "source open failed",
            Self::DestOpenFailed => "destination open failed",
            Self::ReadError => "read error",
            Self::UnexpectedEndOfFile => "unexpected end of file",
            Self::WriteError => "write error",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// A failure confined to one file. Recorded, reported, never unwinds the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub kind: FileErrorKind,
    pub path: PathBuf,
    /// Diagnostic detail (usually the OS message); empty when there is none
    pub message: String,
    pub os_code: Option<i32>,
}

impl FileError {
    pub fn new(kind: FileErrorKind, path: impl Into<PathBuf>) -> Self {
        FileError {
            kind,
            path: path.into(),
            message: String::new(),
            os_code: None,
        }
    }

    pub fn from_io(kind: FileErrorKind, path: impl Into<PathBuf>, err: &io::Error) -> Self {
        FileError {
            kind,
            path: path.into(),
            message: err.to_string(),
            os_code: err.raw_os_error(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}: {}", self.kind, self.path.display())
        } else {
            write!(f, "{}: {} ({})", self.kind, self.path.display(), self.message)
        }
    }
}

impl std::error::Error for FileError {}
