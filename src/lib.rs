//! # TreeSync - directory synchronization engine
//!
//! TreeSync reproduces a source directory tree at a destination with
//! parallel workers, optional cryptographic verification, and a durable
//! state database that makes incremental runs and resume-after-failure
//! possible.
//!
//! ## Quick start
//!
//! ```no_run
//! use treesync::config::{SyncMode, SyncOptions};
//! use treesync::engine::sync_once;
//! use treesync::store::{RedbStore, StateStore};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! let opts = SyncOptions {
//!     source: PathBuf::from("/data"),
//!     destination: PathBuf::from("/backup"),
//!     db_path: PathBuf::from("treesync.db"),
//!     verify_hash: true,
//!     ..SyncOptions::default()
//! };
//!
//! let store = Arc::new(RedbStore::open(&opts.db_path, opts.mode).unwrap());
//! let summary = sync_once(opts, store as Arc<dyn StateStore>).unwrap();
//! println!("copied {} files ({} bytes)", summary.files_copied, summary.bytes_copied);
//! ```
//!
//! ## Verification
//!
//! ```no_run
//! use treesync::config::SyncOptions;
//! use treesync::store::{RedbStore, StateStore};
//! use treesync::verify::{verify_once, write_report, VerifyScope};
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//!
//! let opts = SyncOptions {
//!     source: PathBuf::from("/data"),
//!     destination: PathBuf::from("/backup"),
//!     ..SyncOptions::default()
//! };
//! let store = Arc::new(RedbStore::open(&opts.db_path, opts.mode).unwrap());
//! let report = verify_once(opts, store as Arc<dyn StateStore>, VerifyScope::All).unwrap();
//! write_report(Path::new("verify.csv"), &report.rows).unwrap();
//! assert!(report.is_clean());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hash;
pub mod progress;
pub mod stats;
pub mod store;
pub mod verify;
pub mod walk;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::{HashAlgorithm, SyncMode, SyncOptions};
pub use engine::{CopyEngine, SyncSummary};
pub use error::{Result, TreeSyncError};
pub use store::{FileRecord, FileStatus, RedbStore, StateStore};
pub use verify::{Verifier, VerifyReport, VerifyScope};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use treesync::prelude::*;
    //! ```

    pub use crate::cancel::CancelToken;
    pub use crate::config::{FileConfig, HashAlgorithm, SyncMode, SyncOptions};
    pub use crate::engine::{sync_once, CopyEngine, SyncSummary};
    pub use crate::error::{Result, TreeSyncError};
    pub use crate::filter::PathFilter;
    pub use crate::hash::{hash_bytes, hash_file, StreamingHasher};
    pub use crate::progress::{ConsoleReporter, ProgressEvent, ProgressSender};
    pub use crate::stats::SyncStats;
    pub use crate::store::{FileRecord, FileStatus, RedbStore, StateStore, SyncSession};
    pub use crate::verify::{verify_once, write_report, Verifier, VerifyReport, VerifyScope};
}
