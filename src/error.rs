//! Error types for TreeSync
//!
//! This module defines all error types used throughout the engine,
//! including the transient/permanent classification that drives the
//! copy retry policy and the exit-code mapping used by the CLI.

use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for TreeSync operations
#[derive(Error, Debug)]
pub enum TreeSyncError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File or directory not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Source and destination resolve to the same directory
    #[error("Source and destination are the same: {0}")]
    SameSourceAndDestination(PathBuf),

    /// Post-copy hash comparison failed
    #[error("Hash mismatch for '{path}': source {expected}, destination {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Configuration error (bad flag combination, invalid glob, unknown mode)
    #[error("Configuration error: {0}")]
    Config(String),

    /// State database is locked by another process
    #[error("State database is locked: {0}")]
    StoreLocked(PathBuf),

    /// State database was written by an incompatible version
    #[error("State database format v{found} is not supported (expected v{supported})")]
    StoreVersion { found: u64, supported: u64 },

    /// Generic state store failure
    #[error("State store error: {0}")]
    Store(String),

    /// A record lookup that must succeed found nothing
    #[error("No record for path: {0}")]
    RecordNotFound(String),

    /// Session id does not exist in the store
    #[error("Unknown session id: {0}")]
    SessionNotFound(u64),

    /// Report writing failure
    #[error("Report error: {0}")]
    Report(String),

    /// Operation cancelled by the caller or by the deadline
    #[error("Operation cancelled")]
    Cancelled,

    /// Walker could not list the source root or another unrecoverable event
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl TreeSyncError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a hash mismatch error
    pub fn hash_mismatch(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::HashMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether the copy engine should retry after this error.
    ///
    /// Transient: interrupted syscalls, temporarily unavailable resources,
    /// timeouts, short reads/writes, and post-copy hash mismatches. An
    /// unrecognized I/O kind is treated as transient so a flaky filesystem
    /// still gets its retries. Permission, missing-path, invalid-argument and
    /// exhausted-space failures are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { source, .. } => is_transient_io(source),
            Self::HashMismatch { .. } => true,
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. }
            | Self::NotFound(path)
            | Self::SameSourceAndDestination(path)
            | Self::HashMismatch { path, .. }
            | Self::StoreLocked(path) => Some(path),
            _ => None,
        }
    }

    /// Process exit code for this error when it reaches the CLI boundary.
    ///
    /// 2 = configuration or environment failure before any work began,
    /// 130 = cancelled, 1 = everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_)
            | Self::StoreLocked(_)
            | Self::StoreVersion { .. }
            | Self::NotFound(_)
            | Self::SameSourceAndDestination(_) => 2,
            Self::Cancelled => 130,
            _ => 1,
        }
    }
}

fn is_transient_io(err: &std::io::Error) -> bool {
    match err.kind() {
        ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::TimedOut
        | ErrorKind::WriteZero
        | ErrorKind::UnexpectedEof => true,
        ErrorKind::PermissionDenied
        | ErrorKind::NotFound
        | ErrorKind::InvalidInput
        | ErrorKind::InvalidData
        | ErrorKind::AlreadyExists
        | ErrorKind::Unsupported
        | ErrorKind::StorageFull
        | ErrorKind::QuotaExceeded
        | ErrorKind::ReadOnlyFilesystem => false,
        _ => true,
    }
}

/// Result type alias for TreeSync operations
pub type Result<T> = std::result::Result<T, TreeSyncError>;

impl From<std::io::Error> for TreeSyncError {
    fn from(err: std::io::Error) -> Self {
        TreeSyncError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for TreeSyncError {
    fn from(err: serde_json::Error) -> Self {
        TreeSyncError::Report(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| TreeSyncError::io(path, e))
    }
}
