//! Verification engine
//!
//! A parallel pass that compares size and digest between source and
//! destination for either recently-synced records or the whole tree,
//! writes each verdict back to the store, and produces the rows for the
//! CSV report. Extra destination files are swept after the source pass
//! unless `ignore_extra` is set.

mod report;

pub use report::write_report;

use crate::cancel::CancelToken;
use crate::config::SyncOptions;
use crate::error::{Result, TreeSyncError};
use crate::filter::PathFilter;
use crate::hash::hash_file_with_buffer;
use crate::store::{system_time_ns, FileRecord, FileStatus, StateStore};
use crate::walk::relative_key;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// Which files the verifier considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyScope {
    /// Records whose status is `success` (recently synced)
    Changed,
    /// Every filtered-in file in the source tree
    All,
}

/// Verdict for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Size and digest both match
    Verified,
    /// Size or digest differs, or a side is absent, or the file is extra
    Mismatch,
    /// An I/O error prevented comparison
    Failed,
    /// Not compared (missing side with `ignore_missing`, or cancelled)
    Skipped,
}

/// One row of the verification report
#[derive(Debug, Clone)]
#[allow(missing_docs)] // fields map 1:1 onto the report columns
pub struct VerifyRow {
    /// Relative path
    pub path: String,
    pub source_exists: bool,
    pub dest_exists: bool,
    pub size_match: bool,
    pub hash_match: bool,
    /// Lowercase hex; empty when not computed
    pub source_hash: String,
    pub dest_hash: String,
    pub source_size: u64,
    pub dest_size: u64,
    /// Mtimes, nanoseconds since the Unix epoch; `None` when absent
    pub source_time_ns: Option<i64>,
    pub dest_time_ns: Option<i64>,
    /// Diagnostic; empty on success
    pub error: String,
    /// Verdict
    pub outcome: VerifyOutcome,
}

impl VerifyRow {
    fn absent(path: &str) -> Self {
        Self {
            path: path.to_string(),
            source_exists: false,
            dest_exists: false,
            size_match: false,
            hash_match: false,
            source_hash: String::new(),
            dest_hash: String::new(),
            source_size: 0,
            dest_size: 0,
            source_time_ns: None,
            dest_time_ns: None,
            error: String::new(),
            outcome: VerifyOutcome::Skipped,
        }
    }
}

/// Aggregated verification result
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// One row per compared or reported file
    pub rows: Vec<VerifyRow>,
}

impl VerifyReport {
    /// Count rows with the given outcome
    fn count(&self, outcome: VerifyOutcome) -> u64 {
        self.rows.iter().filter(|r| r.outcome == outcome).count() as u64
    }

    /// Files that passed
    pub fn verified(&self) -> u64 {
        self.count(VerifyOutcome::Verified)
    }

    /// Files that differ
    pub fn mismatched(&self) -> u64 {
        self.count(VerifyOutcome::Mismatch)
    }

    /// Files that could not be compared
    pub fn failed(&self) -> u64 {
        self.count(VerifyOutcome::Failed)
    }

    /// Files skipped
    pub fn skipped(&self) -> u64 {
        self.count(VerifyOutcome::Skipped)
    }

    /// Mismatches plus failures; the caller's error signal
    pub fn error_count(&self) -> u64 {
        self.mismatched() + self.failed()
    }

    /// Whether the pass found nothing wrong
    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }
}

/// The verification engine
pub struct Verifier {
    opts: Arc<SyncOptions>,
    filter: Arc<PathFilter>,
    store: Arc<dyn StateStore>,
    cancel: CancelToken,
}

impl Verifier {
    /// Create a verifier; compiles the filter, so invalid globs fail here
    pub fn new(opts: SyncOptions, store: Arc<dyn StateStore>) -> Result<Self> {
        let filter = PathFilter::new(&opts.include, &opts.exclude)?;
        Ok(Self {
            opts: Arc::new(opts),
            filter: Arc::new(filter),
            store,
            cancel: CancelToken::new(),
        })
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the pass over the given scope.
    ///
    /// Returns the report; the number of mismatches and failures is the
    /// caller's signal, not an `Err`. Only setup failures and
    /// cancellation surface as errors.
    pub fn run(&self, scope: VerifyScope) -> Result<VerifyReport> {
        let source_files = self.collect_source_files()?;

        let targets: Vec<String> = match scope {
            VerifyScope::All => source_files.iter().cloned().collect(),
            VerifyScope::Changed => {
                let records = self.store.files_by_status(FileStatus::Success)?;
                records
                    .into_iter()
                    .map(|r| r.path)
                    .filter(|p| self.filter.matches(p))
                    .collect()
            }
        };

        tracing::info!(
            scope = ?scope,
            targets = targets.len(),
            "verification pass starting"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.max_concurrent)
            .build()
            .map_err(|e| TreeSyncError::Fatal(format!("thread pool: {}", e)))?;

        let mut rows: Vec<VerifyRow> = pool.install(|| {
            targets
                .par_iter()
                .map(|path| self.verify_one(path))
                .collect()
        });

        if !self.opts.ignore_extra {
            rows.extend(self.sweep_extra(&source_files));
        }

        if self.cancel.is_cancelled() && !self.opts.fail_fast {
            return Err(TreeSyncError::Cancelled);
        }

        Ok(VerifyReport { rows })
    }

    /// Filtered-in relative file paths of the source tree
    fn collect_source_files(&self) -> Result<HashSet<String>> {
        let mut files = HashSet::new();
        let mut iter = WalkDir::new(&self.opts.source)
            .follow_links(false)
            .into_iter();

        while let Some(entry) = iter.next() {
            let entry = match entry {
                Ok(e) => e,
                Err(err) if err.depth() == 0 => {
                    return Err(TreeSyncError::Fatal(format!(
                        "cannot list source root '{}': {}",
                        self.opts.source.display(),
                        err
                    )));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "walk error during verification");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let relative = match relative_key(entry.path(), &self.opts.source) {
                Some(r) => r,
                None => continue,
            };
            if entry.file_type().is_dir() {
                if !self.filter.matches_dir(&relative) {
                    iter.skip_current_dir();
                }
                continue;
            }
            if entry.file_type().is_file() && self.filter.matches(&relative) {
                files.insert(relative);
            }
        }
        Ok(files)
    }

    /// Compare one file and write the verdict to the store
    fn verify_one(&self, relative: &str) -> VerifyRow {
        if self.cancel.is_cancelled() {
            let mut row = VerifyRow::absent(relative);
            row.error = "cancelled".to_string();
            return row;
        }

        let source_path = self.opts.source.join(Path::new(relative));
        let dest_path = self.opts.destination.join(Path::new(relative));
        let mut row = VerifyRow::absent(relative);

        let source_meta = std::fs::metadata(&source_path).ok();
        let dest_meta = std::fs::metadata(&dest_path).ok();

        if let Some(m) = &source_meta {
            row.source_exists = true;
            row.source_size = m.len();
            row.source_time_ns = m.modified().ok().map(system_time_ns);
        }
        if let Some(m) = &dest_meta {
            row.dest_exists = true;
            row.dest_size = m.len();
            row.dest_time_ns = m.modified().ok().map(system_time_ns);
        }

        if !row.source_exists || !row.dest_exists {
            if self.opts.ignore_missing {
                row.outcome = VerifyOutcome::Skipped;
                tracing::debug!(path = %relative, "missing side ignored");
            } else {
                row.outcome = VerifyOutcome::Mismatch;
                row.error = if row.source_exists {
                    "destination missing".to_string()
                } else {
                    "source missing".to_string()
                };
                self.record_verdict(&row, &source_path);
            }
            return row;
        }

        row.size_match = row.source_size == row.dest_size;
        if !row.size_match {
            // No point hashing; the sizes already disagree.
            row.outcome = VerifyOutcome::Mismatch;
            row.error = "size mismatch".to_string();
            self.record_verdict(&row, &source_path);
            return row;
        }

        let algorithm = self.opts.hash_algorithm;
        let buffer = self.opts.hash_buffer_size;
        match (
            hash_file_with_buffer(&source_path, algorithm, buffer),
            hash_file_with_buffer(&dest_path, algorithm, buffer),
        ) {
            (Ok(source_hash), Ok(dest_hash)) => {
                row.hash_match = source_hash == dest_hash;
                row.source_hash = source_hash;
                row.dest_hash = dest_hash;
                row.outcome = if row.hash_match {
                    VerifyOutcome::Verified
                } else {
                    row.error = "hash mismatch".to_string();
                    VerifyOutcome::Mismatch
                };
            }
            (source_result, dest_result) => {
                let err = source_result
                    .err()
                    .or_else(|| dest_result.err())
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                row.outcome = VerifyOutcome::Failed;
                row.error = err;
            }
        }

        self.record_verdict(&row, &source_path);

        if self.opts.fail_fast
            && matches!(row.outcome, VerifyOutcome::Mismatch | VerifyOutcome::Failed)
        {
            tracing::error!(path = %relative, error = %row.error, "fail-fast: cancelling");
            self.cancel.cancel();
        }
        row
    }

    /// Persist the verdict, creating the record if the verifier saw the
    /// file before any copy session did.
    fn record_verdict(&self, row: &VerifyRow, source_path: &Path) {
        let status = match row.outcome {
            VerifyOutcome::Verified => FileStatus::Verified,
            VerifyOutcome::Mismatch => FileStatus::Mismatch,
            VerifyOutcome::Failed => FileStatus::Failed,
            VerifyOutcome::Skipped => return,
        };

        let result = (|| -> Result<()> {
            let mut record = match self.store.get(&row.path)? {
                Some(r) => r,
                None => {
                    let mtime = std::fs::metadata(source_path)
                        .and_then(|m| m.modified())
                        .map(system_time_ns)
                        .unwrap_or(0);
                    FileRecord::new(&row.path, row.source_size, mtime)
                }
            };
            record.status = status;
            record.source_hash = row.source_hash.clone();
            record.dest_hash = row.dest_hash.clone();
            record.last_error = row.error.clone();
            record.last_sync_ns = crate::store::now_ns();
            if status != FileStatus::Verified {
                record.fail_count = record.fail_count.saturating_add(1);
            }
            self.store.upsert(&record)
        })();

        if let Err(err) = result {
            tracing::error!(path = %row.path, error = %err, "failed to persist verdict");
        } else {
            tracing::info!(path = %row.path, verdict = ?row.outcome, "verified");
        }
    }

    /// Walk the destination and report paths with no filtered-in source
    /// counterpart. Directories are reported, never deleted.
    fn sweep_extra(&self, source_files: &HashSet<String>) -> Vec<VerifyRow> {
        let mut rows = Vec::new();
        if !self.opts.destination.exists() {
            return rows;
        }

        for entry in WalkDir::new(&self.opts.destination).follow_links(false) {
            if self.cancel.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(error = %err, "walk error during extra sweep");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let relative = match relative_key(entry.path(), &self.opts.destination) {
                Some(r) => r,
                None => continue,
            };

            let is_dir = entry.file_type().is_dir();
            if is_dir {
                if !self.filter.matches_dir(&relative) {
                    continue;
                }
                // A directory is extra only when the source has no
                // corresponding directory; files beneath it report on
                // their own.
                if source_files.contains(&relative)
                    || self.opts.source.join(Path::new(&relative)).is_dir()
                {
                    continue;
                }
            } else {
                if !self.filter.matches(&relative) {
                    continue;
                }
                if source_files.contains(&relative) {
                    continue;
                }
            }

            let mut row = VerifyRow::absent(&relative);
            row.dest_exists = true;
            row.outcome = VerifyOutcome::Mismatch;
            row.error = "extra file".to_string();
            if let Ok(meta) = entry.metadata() {
                row.dest_size = meta.len();
                row.dest_time_ns = meta.modified().ok().map(system_time_ns);
            }
            tracing::info!(path = %relative, dir = is_dir, "extra destination path");
            rows.push(row);
        }
        rows
    }
}

/// Run a verification pass against the given scope
pub fn verify_once(
    opts: SyncOptions,
    store: Arc<dyn StateStore>,
    scope: VerifyScope,
) -> Result<VerifyReport> {
    Verifier::new(opts, store)?.run(scope)
}
