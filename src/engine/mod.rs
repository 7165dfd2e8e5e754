//! The copy engine
//!
//! One entry point, [`CopyEngine::copy_files`]: starts a session, walks
//! the source, dispatches per-file tasks to a bounded worker pool, waits
//! for the pool to settle, optionally runs the mirror deletion pass, and
//! finalizes the session. A single permanent file failure does not abort
//! the run; fatal events (walker cannot list the root, store write
//! failure, cancellation) do.

mod copier;
mod mirror;

pub use copier::{CopierOptions, CopyOutcome, FileCopier};
pub use mirror::{mirror_delete, MirrorOutcome};

use crate::cancel::CancelToken;
use crate::config::{SyncMode, SyncOptions};
use crate::error::{Result, TreeSyncError};
use crate::filter::PathFilter;
use crate::hash::hash_file_with_buffer;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::stats::SyncStats;
use crate::store::{
    FileRecord, FileStatus, SessionCounts, SessionStatus, StateStore,
};
use crate::walk::{FileTask, WalkOutcome, Walker};
use crossbeam::channel::bounded;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Capacity of the walker-to-workers task queue
const TASK_QUEUE_CAP: usize = 1024;

/// Why a considered file was not copied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Destination mtime strictly newer and `skip_newer` set
    Newer,
    /// Destination exists and overwriting is disabled
    Exists,
    /// Size and mtime match the stored or destination state
    Unchanged,
    /// Failed record excluded by the cross-session fail cap
    FailLimit,
}

impl SkipReason {
    fn label(&self) -> &'static str {
        match self {
            Self::Newer => "newer",
            Self::Exists => "exists",
            Self::Unchanged => "unchanged",
            Self::FailLimit => "fail-limit",
        }
    }
}

/// Per-file decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Copy,
    Skip(SkipReason),
}

/// Final accounting for one engine run
#[derive(Debug, Clone)]
pub struct SyncSummary {
    /// Durable session id
    pub session_id: u64,
    /// Files copied
    pub files_copied: u64,
    /// Files skipped
    pub files_skipped: u64,
    /// Files failed after retries
    pub files_failed: u64,
    /// Bytes copied
    pub bytes_copied: u64,
    /// Destination directories created
    pub dirs_created: u64,
    /// Paths removed by the mirror pass
    pub files_deleted: u64,
    /// Wall-clock duration
    pub duration: Duration,
}

impl SyncSummary {
    /// Whether every considered file either copied or skipped cleanly
    pub fn is_success(&self) -> bool {
        self.files_failed == 0
    }
}

/// The copy engine
pub struct CopyEngine {
    opts: Arc<SyncOptions>,
    filter: Arc<PathFilter>,
    store: Arc<dyn StateStore>,
    stats: Arc<SyncStats>,
    progress: Option<ProgressSender>,
    cancel: CancelToken,
}

impl CopyEngine {
    /// Create an engine; compiles the filter, so invalid globs fail here
    pub fn new(opts: SyncOptions, store: Arc<dyn StateStore>) -> Result<Self> {
        let filter = PathFilter::new(&opts.include, &opts.exclude)?;
        Ok(Self {
            opts: Arc::new(opts),
            filter: Arc::new(filter),
            store,
            stats: Arc::new(SyncStats::new()),
            progress: None,
            cancel: CancelToken::new(),
        })
    }

    /// Attach a progress event sender
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The engine's cancellation token
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Shared statistics, readable while the engine runs
    pub fn stats(&self) -> Arc<SyncStats> {
        Arc::clone(&self.stats)
    }

    /// Reproduce the source tree at the destination.
    ///
    /// Returns `Ok` with a summary even when individual files failed (the
    /// summary carries the count); only fatal errors and cancellation
    /// surface as `Err`. The session is finalized on every exit path, and
    /// that finalization is the engine's last write to the store.
    pub fn copy_files(&self) -> Result<SyncSummary> {
        self.check_environment()?;

        if let Some(timeout) = self.opts.timeout {
            self.cancel.arm_deadline(timeout);
        }

        let session_id = self.store.start_session(self.opts.mode)?;
        tracing::info!(
            session = session_id,
            mode = self.opts.mode.name(),
            source = %self.opts.source.display(),
            destination = %self.opts.destination.display(),
            "session started"
        );

        let run_result = self.run_session();

        let counts = SessionCounts {
            copied: self.stats.processed(),
            skipped: self.stats.skipped(),
            failed: self.stats.failed(),
            bytes: self.stats.bytes_copied(),
        };
        if let Some(progress) = &self.progress {
            progress.finish(counts.copied, counts.skipped, counts.failed, counts.bytes);
        }

        let session_status = if run_result.is_ok() {
            SessionStatus::Completed
        } else {
            SessionStatus::Aborted
        };
        let end_result = self.store.end_session(session_id, counts, session_status);

        let (dirs_created, files_deleted) = run_result?;
        end_result?;

        Ok(SyncSummary {
            session_id,
            files_copied: counts.copied,
            files_skipped: counts.skipped,
            files_failed: counts.failed,
            bytes_copied: counts.bytes,
            dirs_created,
            files_deleted,
            duration: self.stats.elapsed(),
        })
    }

    fn check_environment(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.opts.source)
            .map_err(|_| TreeSyncError::NotFound(self.opts.source.clone()))?;
        if !meta.is_dir() {
            return Err(TreeSyncError::config(format!(
                "source '{}' is not a directory",
                self.opts.source.display()
            )));
        }
        Ok(())
    }

    /// Walk, copy, and (maybe) mirror. Returns (dirs_created, files_deleted).
    fn run_session(&self) -> Result<(u64, u64)> {
        let (task_tx, task_rx) = bounded::<FileTask>(TASK_QUEUE_CAP);
        let fatal: Arc<Mutex<Option<TreeSyncError>>> = Arc::new(Mutex::new(None));

        let walker = Walker::new(
            &self.opts.source,
            &self.opts.destination,
            Arc::clone(&self.filter),
            self.opts.recursive,
            self.opts.dry_run,
            self.cancel.clone(),
        );
        let walker_handle = thread::spawn(move || walker.run(task_tx));

        let workers: Vec<_> = (0..self.opts.max_concurrent)
            .map(|worker_id| {
                let ctx = WorkerContext {
                    opts: Arc::clone(&self.opts),
                    store: Arc::clone(&self.store),
                    stats: Arc::clone(&self.stats),
                    progress: self.progress.clone(),
                    cancel: self.cancel.clone(),
                    fatal: Arc::clone(&fatal),
                    copier: FileCopier::new(CopierOptions {
                        buffer_size: self.opts.buffer_size,
                        fsync: self.opts.fsync,
                        hash_algorithm: if self.opts.verify_hash {
                            Some(self.opts.hash_algorithm)
                        } else {
                            None
                        },
                    }),
                };
                let rx = task_rx.clone();
                thread::spawn(move || {
                    while let Ok(task) = rx.recv() {
                        // After cancellation, drain and discard pending tasks.
                        if ctx.cancel.is_cancelled() {
                            continue;
                        }
                        ctx.process(task);
                    }
                    tracing::debug!(worker = worker_id, "worker shutting down");
                })
            })
            .collect();
        drop(task_rx);

        let walk_outcome: WalkOutcome = walker_handle
            .join()
            .unwrap_or_else(|_| WalkOutcome {
                fatal: Some(TreeSyncError::Fatal("walker thread panicked".into())),
                ..WalkOutcome::default()
            });
        for handle in workers {
            let _ = handle.join();
        }

        for error in &walk_outcome.errors {
            tracing::warn!(error = %error, "walk error");
        }
        if let Some(fatal_err) = walk_outcome.fatal {
            self.cancel.cancel();
            return Err(fatal_err);
        }
        if let Some(fatal_err) = fatal.lock().expect("fatal slot poisoned").take() {
            return Err(fatal_err);
        }
        if self.cancel.is_cancelled() {
            // Distinguish an abort-on-error trip from caller cancellation:
            // the former is a file-failure outcome, not exit 130.
            if self.opts.abort_on_error && self.stats.failed() > 0 {
                return Err(TreeSyncError::Fatal(format!(
                    "aborted after {} file failure(s)",
                    self.stats.failed()
                )));
            }
            return Err(TreeSyncError::Cancelled);
        }

        let mut files_deleted = 0;
        if self.opts.mirror {
            let outcome = mirror_delete(
                &self.opts.destination,
                &walk_outcome.included,
                &self.filter,
                self.opts.dry_run,
                &self.cancel,
            );
            files_deleted = outcome.files_deleted + outcome.dirs_deleted;
            for error in &outcome.errors {
                tracing::warn!(error = %error, "mirror delete failed");
            }
            if self.cancel.is_cancelled() {
                return Err(TreeSyncError::Cancelled);
            }
        }

        Ok((walk_outcome.dirs_created, files_deleted))
    }
}

/// Everything one worker needs; no back-reference to the engine
struct WorkerContext {
    opts: Arc<SyncOptions>,
    store: Arc<dyn StateStore>,
    stats: Arc<SyncStats>,
    progress: Option<ProgressSender>,
    cancel: CancelToken,
    fatal: Arc<Mutex<Option<TreeSyncError>>>,
    copier: FileCopier,
}

impl WorkerContext {
    fn process(&self, task: FileTask) {
        self.emit(ProgressEvent::FileStarted {
            path: task.relative.clone(),
            size: task.size,
        });

        let (decision, record) = match self.decide(&task) {
            Some(d) => d,
            None => return, // fatal store failure already recorded
        };

        match decision {
            Decision::Skip(reason) => self.handle_skip(&task, reason, record.as_ref()),
            Decision::Copy => {
                if self.opts.dry_run {
                    tracing::info!(path = %task.relative, size = task.size, "would copy (dry run)");
                    self.stats.add_processed(task.size);
                    self.emit(ProgressEvent::FileFinished {
                        path: task.relative,
                        outcome: "copied",
                        bytes: task.size,
                    });
                } else {
                    self.copy_with_retries(&task);
                }
            }
        }
    }

    /// Per-file state machine: filter already passed in the walker, so
    /// this is the metadata-compare step.
    fn decide(&self, task: &FileTask) -> Option<(Decision, Option<FileRecord>)> {
        let record = self.store_op(self.store.get(&task.relative))?;

        if self.opts.mode == SyncMode::Incremental {
            if let Some(r) = &record {
                if r.matches_source(task.size, task.mtime_ns) {
                    match r.status {
                        FileStatus::Pending => {}
                        FileStatus::Failed => {
                            let cap = self.opts.max_fail_count;
                            let retryable = self.opts.include_failed
                                && (cap == 0 || r.fail_count < cap);
                            if !retryable {
                                return Some((Decision::Skip(SkipReason::FailLimit), record));
                            }
                        }
                        _ => return Some((Decision::Skip(SkipReason::Unchanged), record)),
                    }
                }
            }
        }

        let dest_meta = match std::fs::metadata(&task.dest) {
            Ok(m) => Some(m),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %task.relative, error = %e, "destination stat failed");
                None
            }
        };

        let Some(dest_meta) = dest_meta else {
            return Some((Decision::Copy, record));
        };

        // A verified record whose source metadata is unchanged is never
        // recopied while its destination is still present.
        if self.opts.mode != SyncMode::Initial {
            if let Some(r) = &record {
                if r.status == FileStatus::Verified && r.matches_source(task.size, task.mtime_ns)
                {
                    return Some((Decision::Skip(SkipReason::Unchanged), record));
                }
            }
        }

        let dest_mtime_ns = crate::store::system_time_ns(
            dest_meta
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        );

        // Strictly newer only; equal timestamps do not skip.
        if self.opts.skip_newer && dest_mtime_ns > task.mtime_ns {
            return Some((Decision::Skip(SkipReason::Newer), record));
        }
        if !self.opts.overwrite {
            return Some((Decision::Skip(SkipReason::Exists), record));
        }
        if self.opts.mode != SyncMode::Initial
            && dest_meta.len() == task.size
            && dest_mtime_ns == task.mtime_ns
        {
            return Some((Decision::Skip(SkipReason::Unchanged), record));
        }

        Some((Decision::Copy, record))
    }

    fn handle_skip(&self, task: &FileTask, reason: SkipReason, record: Option<&FileRecord>) {
        tracing::info!(path = %task.relative, reason = reason.label(), "skip");
        self.stats.add_skipped();
        self.emit(ProgressEvent::FileFinished {
            path: task.relative.clone(),
            outcome: "skipped",
            bytes: 0,
        });

        if self.opts.dry_run {
            return;
        }
        // An up-to-date verified record keeps its status; everything else
        // is marked skipped so the store reflects the last decision.
        let keep_verified = reason == SkipReason::Unchanged
            && record.map(|r| r.status == FileStatus::Verified).unwrap_or(false);
        if keep_verified {
            return;
        }

        let result = match record {
            Some(_) => self
                .store
                .update_status(&task.relative, FileStatus::Skipped, ""),
            None => {
                let mut fresh = FileRecord::new(&task.relative, task.size, task.mtime_ns);
                fresh.status = FileStatus::Skipped;
                self.store.upsert(&fresh)
            }
        };
        self.store_op(result);
    }

    fn copy_with_retries(&self, task: &FileTask) {
        let max_attempts = self.opts.max_retries as u64 + 1;
        let mut attempt = 0u64;

        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                self.mark_interrupted(task);
                return;
            }

            match self.attempt_copy(task) {
                Ok((bytes, source_hash, dest_hash)) => {
                    let mut record =
                        FileRecord::new(&task.relative, task.size, task.mtime_ns);
                    record.status = FileStatus::Success;
                    record.source_hash = source_hash.unwrap_or_default();
                    record.dest_hash = dest_hash.unwrap_or_default();
                    if self.store_op(self.store.upsert(&record)).is_none() {
                        return;
                    }
                    self.stats.add_processed(bytes);
                    tracing::info!(path = %task.relative, bytes, attempt, "copied");
                    self.emit(ProgressEvent::FileFinished {
                        path: task.relative.clone(),
                        outcome: "copied",
                        bytes,
                    });
                    return;
                }
                Err(TreeSyncError::Cancelled) => {
                    self.mark_interrupted(task);
                    return;
                }
                Err(err) => {
                    let fail_count = match self
                        .store_op(self.store.increment_fail_count(&task.relative))
                    {
                        Some(n) => n,
                        None => return,
                    };
                    tracing::warn!(
                        path = %task.relative,
                        attempt,
                        fail_count,
                        error = %err,
                        transient = err.is_transient(),
                        "copy attempt failed"
                    );

                    if err.is_transient() && attempt < max_attempts {
                        if !self.cancel.sleep(self.opts.retry_delay) {
                            self.mark_interrupted(task);
                            return;
                        }
                        continue;
                    }

                    let status = if matches!(err, TreeSyncError::HashMismatch { .. }) {
                        FileStatus::Mismatch
                    } else {
                        FileStatus::Failed
                    };
                    self.store_op(self.store.update_status(
                        &task.relative,
                        status,
                        &err.to_string(),
                    ));
                    self.stats.add_failed();
                    self.emit(ProgressEvent::FileFinished {
                        path: task.relative.clone(),
                        outcome: if status == FileStatus::Mismatch {
                            "mismatch"
                        } else {
                            "failed"
                        },
                        bytes: 0,
                    });
                    if self.opts.abort_on_error {
                        tracing::error!(path = %task.relative, "aborting on first failure");
                        self.cancel.cancel();
                    }
                    return;
                }
            }
        }
    }

    /// One attempt: stream, rename, preserve mtime, then (optionally)
    /// re-read the destination and compare digests.
    fn attempt_copy(
        &self,
        task: &FileTask,
    ) -> Result<(u64, Option<String>, Option<String>)> {
        let outcome = self.copier.copy_file_with_progress(
            &task.source,
            &task.dest,
            &self.cancel,
            |bytes| {
                self.emit(ProgressEvent::BytesCopied {
                    path: task.relative.clone(),
                    bytes,
                });
            },
        )?;

        if !self.opts.verify_hash {
            return Ok((outcome.bytes_copied, None, None));
        }

        let source_hash = outcome.source_hash.clone().unwrap_or_default();
        let dest_hash = hash_file_with_buffer(
            &task.dest,
            self.opts.hash_algorithm,
            self.opts.hash_buffer_size,
        )?;
        if dest_hash != source_hash {
            return Err(TreeSyncError::hash_mismatch(
                &task.dest,
                source_hash,
                dest_hash,
            ));
        }
        Ok((outcome.bytes_copied, Some(source_hash), Some(dest_hash)))
    }

    fn mark_interrupted(&self, task: &FileTask) {
        tracing::debug!(path = %task.relative, "copy interrupted by cancellation");
        let _ = self
            .store
            .update_status(&task.relative, FileStatus::Pending, "cancelled");
    }

    /// Unwrap a store result; a failure is fatal for the whole run.
    fn store_op<T>(&self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(error = %err, "state store failure, aborting");
                let mut slot = self.fatal.lock().expect("fatal slot poisoned");
                slot.get_or_insert(err);
                self.cancel.cancel();
                None
            }
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress.emit(event);
        }
    }
}

/// Convenience wrapper: build an engine and run one session
pub fn sync_once(opts: SyncOptions, store: Arc<dyn StateStore>) -> Result<SyncSummary> {
    CopyEngine::new(opts, store)?.copy_files()
}
