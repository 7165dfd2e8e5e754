//! Source tree walker
//!
//! The walker is the engine's sole producer: it traverses the source,
//! stats each entry once, consults the filter (pruning excluded
//! directories), creates destination directories before any file beneath
//! them is enqueued, and pushes file tasks into a bounded channel for the
//! worker pool. It also accumulates the set of filtered-in relative paths
//! that the mirror pass later needs.

use crate::cancel::CancelToken;
use crate::error::{Result, TreeSyncError};
use crate::filter::PathFilter;
use crate::store::system_time_ns;
use crossbeam::channel::Sender;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// One unit of work for a copy worker
#[derive(Debug, Clone)]
pub struct FileTask {
    /// Forward-slash relative path
    pub relative: String,
    /// Absolute source path
    pub source: PathBuf,
    /// Absolute destination path
    pub dest: PathBuf,
    /// Source size in bytes
    pub size: u64,
    /// Source mtime, nanoseconds since the Unix epoch
    pub mtime_ns: i64,
}

/// What the walker saw and did
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Relative paths of every filtered-in file
    pub included: HashSet<String>,
    /// Destination directories created
    pub dirs_created: u64,
    /// Non-fatal per-entry errors
    pub errors: Vec<String>,
    /// Set when the source root itself could not be listed
    pub fatal: Option<TreeSyncError>,
}

/// Cooperative producer over the source tree
pub struct Walker {
    source_root: PathBuf,
    dest_root: PathBuf,
    filter: Arc<PathFilter>,
    recursive: bool,
    dry_run: bool,
    cancel: CancelToken,
}

impl Walker {
    /// Create a walker for one engine run
    pub fn new(
        source_root: &Path,
        dest_root: &Path,
        filter: Arc<PathFilter>,
        recursive: bool,
        dry_run: bool,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source_root: source_root.to_path_buf(),
            dest_root: dest_root.to_path_buf(),
            filter,
            recursive,
            dry_run,
            cancel,
        }
    }

    /// Traverse the source, enqueueing file tasks.
    ///
    /// Blocks on the bounded channel for backpressure. Returns early when
    /// cancelled or when all workers are gone. Dropping the sender on
    /// return is the workers' end-of-input signal.
    pub fn run(self, tx: Sender<FileTask>) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();

        if !self.dry_run {
            if let Err(e) = std::fs::create_dir_all(&self.dest_root) {
                outcome.fatal = Some(TreeSyncError::io(&self.dest_root, e));
                return outcome;
            }
        }

        let mut walker = WalkDir::new(&self.source_root).follow_links(false);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut iter = walker.into_iter();
        while let Some(entry) = iter.next() {
            if self.cancel.is_cancelled() {
                tracing::debug!("walker stopping: cancelled");
                break;
            }

            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    // Failing to list the root is fatal; everything else is
                    // recorded and the walk continues.
                    if err.depth() == 0 {
                        outcome.fatal = Some(TreeSyncError::Fatal(format!(
                            "cannot list source root '{}': {}",
                            self.source_root.display(),
                            err
                        )));
                        return outcome;
                    }
                    tracing::warn!(error = %err, "walk error");
                    outcome.errors.push(err.to_string());
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue; // the root itself
            }

            let relative = match relative_key(entry.path(), &self.source_root) {
                Some(r) => r,
                None => continue,
            };

            if entry.file_type().is_dir() {
                if !self.filter.matches_dir(&relative) {
                    tracing::debug!(path = %relative, "directory excluded, pruning subtree");
                    iter.skip_current_dir();
                    continue;
                }
                if let Err(e) = self.ensure_dir(&relative, &mut outcome) {
                    outcome.errors.push(e.to_string());
                    iter.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() {
                // Symlinks and special files are outside the sync contract.
                tracing::debug!(path = %relative, "skipping non-regular file");
                continue;
            }

            if !self.filter.matches(&relative) {
                tracing::debug!(path = %relative, reason = "filter", "skip");
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(path = %relative, error = %err, "stat failed");
                    outcome.errors.push(format!("{}: {}", relative, err));
                    continue;
                }
            };

            let mtime = metadata
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            let task = FileTask {
                source: entry.path().to_path_buf(),
                dest: self.dest_root.join(Path::new(&relative)),
                size: metadata.len(),
                mtime_ns: system_time_ns(mtime),
                relative: relative.clone(),
            };

            outcome.included.insert(relative);
            if tx.send(task).is_err() {
                // All workers are gone; nothing left to produce for.
                break;
            }
        }

        outcome
    }

    fn ensure_dir(&self, relative: &str, outcome: &mut WalkOutcome) -> Result<()> {
        outcome.included.insert(relative.to_string());
        if self.dry_run {
            return Ok(());
        }
        let dest = self.dest_root.join(Path::new(relative));
        std::fs::create_dir_all(&dest).map_err(|e| TreeSyncError::io(&dest, e))?;
        outcome.dirs_created += 1;
        Ok(())
    }
}

/// Forward-slash relative key for a path under `root`
pub fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let text = relative.to_string_lossy();
    if text.is_empty() {
        return None;
    }
    if std::path::MAIN_SEPARATOR == '/' {
        Some(text.into_owned())
    } else {
        Some(text.replace(std::path::MAIN_SEPARATOR, "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn collect_tasks(walker: Walker) -> (Vec<FileTask>, WalkOutcome) {
        let (tx, rx) = bounded(1024);
        let outcome = walker.run(tx);
        let tasks: Vec<_> = rx.try_iter().collect();
        (tasks, outcome)
    }

    fn make_tree(dir: &Path) {
        std::fs::create_dir_all(dir.join("sub/nested")).unwrap();
        File::create(dir.join("a.txt")).unwrap().write_all(b"hello").unwrap();
        File::create(dir.join("sub/b.log")).unwrap().write_all(b"world").unwrap();
        File::create(dir.join("sub/nested/c.tmp")).unwrap().write_all(b"tmp").unwrap();
    }

    #[test]
    fn test_walk_enqueues_files_and_creates_dirs() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        make_tree(src.path());

        let walker = Walker::new(
            src.path(),
            dst.path(),
            Arc::new(PathFilter::allow_all()),
            true,
            false,
            CancelToken::new(),
        );
        let (tasks, outcome) = collect_tasks(walker);

        assert_eq!(tasks.len(), 3);
        assert!(outcome.fatal.is_none());
        assert!(outcome.included.contains("a.txt"));
        assert!(outcome.included.contains("sub/nested/c.tmp"));
        // Destination directories exist before any file task is consumed
        assert!(dst.path().join("sub/nested").is_dir());
    }

    #[test]
    fn test_walk_respects_filter_and_prunes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        make_tree(src.path());

        let filter = PathFilter::new("", "sub").unwrap();
        let walker = Walker::new(
            src.path(),
            dst.path(),
            Arc::new(filter),
            true,
            false,
            CancelToken::new(),
        );
        let (tasks, outcome) = collect_tasks(walker);

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].relative, "a.txt");
        assert!(!outcome.included.contains("sub/b.log"));
        assert!(!dst.path().join("sub").exists());
    }

    #[test]
    fn test_non_recursive_stays_at_top_level() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        make_tree(src.path());

        let walker = Walker::new(
            src.path(),
            dst.path(),
            Arc::new(PathFilter::allow_all()),
            false,
            false,
            CancelToken::new(),
        );
        let (tasks, _) = collect_tasks(walker);

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].relative, "a.txt");
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dst = TempDir::new().unwrap();
        let walker = Walker::new(
            Path::new("/definitely/not/here"),
            dst.path(),
            Arc::new(PathFilter::allow_all()),
            true,
            false,
            CancelToken::new(),
        );
        let (_, outcome) = collect_tasks(walker);
        assert!(outcome.fatal.is_some());
    }

    #[test]
    fn test_cancelled_walker_stops_producing() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        make_tree(src.path());

        let cancel = CancelToken::new();
        cancel.cancel();
        let walker = Walker::new(
            src.path(),
            dst.path(),
            Arc::new(PathFilter::allow_all()),
            true,
            false,
            cancel,
        );
        let (tasks, _) = collect_tasks(walker);
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_dry_run_creates_no_directories() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        make_tree(src.path());
        let dst_path = dst.path().join("out");

        let walker = Walker::new(
            src.path(),
            &dst_path,
            Arc::new(PathFilter::allow_all()),
            true,
            true,
            CancelToken::new(),
        );
        let (tasks, outcome) = collect_tasks(walker);

        assert_eq!(tasks.len(), 3);
        assert_eq!(outcome.dirs_created, 0);
        assert!(!dst_path.exists());
    }
}
