//! Durable sync state
//!
//! The store owns the per-file record set and the append-only session
//! log. Everything else in the engine holds read-only snapshots or
//! submits updates through the [`StateStore`] interface; the concrete
//! backend is an embedded transactional key-value database.

mod redb_store;

pub use redb_store::RedbStore;

use crate::config::SyncMode;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle status of a file record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Seen but not yet copied (or interrupted mid-copy)
    Pending,
    /// Copied successfully
    Success,
    /// Copy failed after retries
    Failed,
    /// Deliberately not copied
    Skipped,
    /// Hash comparison passed
    Verified,
    /// Hash or size comparison failed, or destination absent
    Mismatch,
}

impl FileStatus {
    /// Lowercase label used in logs and exports
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Verified => "verified",
            Self::Mismatch => "mismatch",
        }
    }
}

/// Durable per-file entity, keyed by forward-slash relative path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the source root, forward-slash normalized
    pub path: String,
    /// Source size in bytes at last observation
    pub size: u64,
    /// Source mtime, nanoseconds since the Unix epoch
    pub mtime_ns: i64,
    /// Last observed status
    pub status: FileStatus,
    /// Lowercase hex source digest; empty until computed
    pub source_hash: String,
    /// Lowercase hex destination digest; empty until computed
    pub dest_hash: String,
    /// Copy/verify failures observed for this path
    pub fail_count: u32,
    /// Timestamp of the last mutation of this record
    pub last_sync_ns: i64,
    /// Short diagnostic from the last failure; empty on success
    pub last_error: String,
}

impl FileRecord {
    /// Fresh record for a newly discovered source entry
    pub fn new(path: impl Into<String>, size: u64, mtime_ns: i64) -> Self {
        Self {
            path: path.into(),
            size,
            mtime_ns,
            status: FileStatus::Pending,
            source_hash: String::new(),
            dest_hash: String::new(),
            fail_count: 0,
            last_sync_ns: now_ns(),
            last_error: String::new(),
        }
    }

    /// Whether the stored metadata still matches the observed source
    pub fn matches_source(&self, size: u64, mtime_ns: i64) -> bool {
        self.size == size && self.mtime_ns == mtime_ns
    }
}

/// Terminal status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// In progress
    Running,
    /// Finished normally
    Completed,
    /// Cancelled or aborted by a fatal error
    Aborted,
}

/// One engine invocation, recorded durably and append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    /// Strictly monotonic id
    pub id: u64,
    /// Start timestamp, nanoseconds since the Unix epoch
    pub started_ns: i64,
    /// End timestamp; 0 while running
    pub ended_ns: i64,
    /// Mode the session ran under
    pub mode: SyncMode,
    /// Files copied
    pub files_copied: u64,
    /// Files skipped
    pub files_skipped: u64,
    /// Files failed
    pub files_failed: u64,
    /// Bytes copied
    pub bytes_copied: u64,
    /// Terminal status
    pub status: SessionStatus,
}

/// Final counters handed to [`StateStore::end_session`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCounts {
    /// Files copied
    pub copied: u64,
    /// Files skipped
    pub skipped: u64,
    /// Files failed
    pub failed: u64,
    /// Bytes copied
    pub bytes: u64,
}

/// Record counts grouped by status, from one consistent snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)] // one counter per `FileStatus` variant
pub struct StatusCounts {
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub verified: u64,
    pub mismatch: u64,
    /// Total records
    pub total: u64,
}

/// Interface to the durable sync state.
///
/// Every mutating operation returns only after its transaction has
/// committed to stable storage. Implementations serialize writes and give
/// concurrent readers a consistent snapshot.
pub trait StateStore: Send + Sync {
    /// Insert or replace a record atomically, keyed by its path
    fn upsert(&self, record: &FileRecord) -> Result<()>;

    /// Fetch one record
    fn get(&self, path: &str) -> Result<Option<FileRecord>>;

    /// Read-modify-write of status and diagnostic; creates the record if
    /// absent and bumps `last_sync_ns` unconditionally
    fn update_status(&self, path: &str, status: FileStatus, error: &str) -> Result<()>;

    /// Read-modify-write of both digests; fails if the record is absent
    fn update_hashes(&self, path: &str, source_hash: &str, dest_hash: &str) -> Result<()>;

    /// Atomically increment the failure counter, returning the new value
    fn increment_fail_count(&self, path: &str) -> Result<u32>;

    /// All records with the given status, from one read transaction
    fn files_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>>;

    /// Failed records with `fail_count < max_fail`; 0 means unbounded
    fn failed_files(&self, max_fail: u32) -> Result<Vec<FileRecord>>;

    /// Append a running session; ids are strictly monotonic
    fn start_session(&self, mode: SyncMode) -> Result<u64>;

    /// Finalize a session; unknown ids and already-finalized sessions fail
    fn end_session(&self, id: u64, counts: SessionCounts, status: SessionStatus) -> Result<()>;

    /// Fetch one session
    fn session(&self, id: u64) -> Result<Option<SyncSession>>;

    /// Record counts grouped by status, computed in a single pass
    fn stats_snapshot(&self) -> Result<StatusCounts>;

    /// Truncate `files` and `stats`; permitted only in initial mode
    fn reset(&self) -> Result<()>;

    /// Write a structured dump of the record set with an export timestamp
    fn export_report(&self, path: &Path) -> Result<()>;
}

/// Nanoseconds since the Unix epoch for a [`SystemTime`].
///
/// Pre-epoch timestamps clamp to 0; the engine compares mtimes for
/// equality and order, both preserved by the clamp for sane filesystems.
pub fn system_time_ns(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn now_ns() -> i64 {
    system_time_ns(SystemTime::now())
}
