//! Mirror-mode deletion pass
//!
//! Runs after all copy tasks have terminated: enumerates the destination
//! tree bottom-up and deletes every path that has no filtered-in source
//! counterpart. Paths the filter excludes are left in place so a mirror
//! run with excludes never reaps files the copy phase refused to manage.

use crate::cancel::CancelToken;
use crate::filter::PathFilter;
use crate::walk::relative_key;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// What the deletion pass removed
#[derive(Debug, Default)]
pub struct MirrorOutcome {
    /// Files deleted
    pub files_deleted: u64,
    /// Directories deleted
    pub dirs_deleted: u64,
    /// Per-path errors
    pub errors: Vec<String>,
}

/// Delete destination paths absent from the filtered-in source set.
///
/// `contents_first` ordering guarantees children are removed before their
/// parents, so emptied directories fall in the same sweep.
pub fn mirror_delete(
    dest_root: &Path,
    included: &HashSet<String>,
    filter: &PathFilter,
    dry_run: bool,
    cancel: &CancelToken,
) -> MirrorOutcome {
    let mut outcome = MirrorOutcome::default();

    for entry in WalkDir::new(dest_root).contents_first(true).follow_links(false) {
        if cancel.is_cancelled() {
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                outcome.errors.push(err.to_string());
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let relative = match relative_key(entry.path(), dest_root) {
            Some(r) => r,
            None => continue,
        };

        let is_dir = entry.file_type().is_dir();
        if included.contains(&relative) {
            continue;
        }
        // Filtered-out paths are unmanaged; leave them alone.
        if is_dir {
            if !filter.matches_dir(&relative) {
                continue;
            }
        } else if !filter.matches(&relative) {
            continue;
        }

        tracing::info!(path = %relative, dir = is_dir, dry_run, "mirror delete");
        if dry_run {
            continue;
        }

        let result = if is_dir {
            // Only empty directories are removed; a non-empty one still
            // holds an included or unmanaged child.
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };

        match result {
            Ok(()) => {
                if is_dir {
                    outcome.dirs_deleted += 1;
                } else {
                    outcome.files_deleted += 1;
                }
            }
            Err(e) if is_dir && e.kind() == std::io::ErrorKind::DirectoryNotEmpty => {}
            Err(e) => outcome.errors.push(format!("{}: {}", relative, e)),
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap().write_all(content).unwrap();
    }

    #[test]
    fn test_deletes_obsolete_paths_bottom_up() {
        let dst = TempDir::new().unwrap();
        touch(&dst.path().join("a"), b"keep");
        touch(&dst.path().join("b"), b"keep");
        touch(&dst.path().join("obsolete.txt"), b"old");
        touch(&dst.path().join("old/inner.txt"), b"old");

        let included: HashSet<String> = ["a", "b"].into_iter().map(String::from).collect();
        let outcome = mirror_delete(
            dst.path(),
            &included,
            &PathFilter::allow_all(),
            false,
            &CancelToken::new(),
        );

        assert_eq!(outcome.files_deleted, 2);
        assert_eq!(outcome.dirs_deleted, 1);
        assert!(dst.path().join("a").exists());
        assert!(dst.path().join("b").exists());
        assert!(!dst.path().join("obsolete.txt").exists());
        assert!(!dst.path().join("old").exists());
    }

    #[test]
    fn test_filtered_out_paths_are_protected() {
        let dst = TempDir::new().unwrap();
        touch(&dst.path().join("kept.txt"), b"x");
        touch(&dst.path().join("private.tmp"), b"x");

        let included: HashSet<String> = ["kept.txt"].into_iter().map(String::from).collect();
        let filter = PathFilter::new("", "*.tmp").unwrap();
        let outcome = mirror_delete(dst.path(), &included, &filter, false, &CancelToken::new());

        assert_eq!(outcome.files_deleted, 0);
        assert!(dst.path().join("private.tmp").exists());
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let dst = TempDir::new().unwrap();
        touch(&dst.path().join("obsolete"), b"x");

        let outcome = mirror_delete(
            dst.path(),
            &HashSet::new(),
            &PathFilter::allow_all(),
            true,
            &CancelToken::new(),
        );

        assert_eq!(outcome.files_deleted, 0);
        assert!(dst.path().join("obsolete").exists());
    }

    #[test]
    fn test_directory_kept_when_it_holds_included_children() {
        let dst = TempDir::new().unwrap();
        touch(&dst.path().join("keep/wanted.txt"), b"x");

        let included: HashSet<String> = ["keep/wanted.txt"].into_iter().map(String::from).collect();
        let outcome = mirror_delete(
            dst.path(),
            &included,
            &PathFilter::allow_all(),
            false,
            &CancelToken::new(),
        );

        // "keep" itself is not in the included set but is non-empty
        assert!(dst.path().join("keep/wanted.txt").exists());
        assert_eq!(outcome.files_deleted, 0);
        assert!(outcome.errors.is_empty());
    }
}
