//! Path filtering with include/exclude glob lists
//!
//! A pure predicate over source-relative paths. Patterns arrive as
//! comma-separated glob lists (`*.txt,*.log`); single-segment globs match
//! the base name, globs containing a path separator match the full
//! relative path. Invalid globs are configuration errors surfaced at
//! construction, never at match time.

use crate::error::{Result, TreeSyncError};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled include/exclude predicate
#[derive(Debug)]
pub struct PathFilter {
    /// Full-path include matchers (patterns containing '/')
    include_path: GlobSet,
    /// Base-name include matchers
    include_name: GlobSet,
    /// Full-path exclude matchers
    exclude_path: GlobSet,
    /// Base-name exclude matchers
    exclude_name: GlobSet,
    has_includes: bool,
}

impl PathFilter {
    /// Compile a filter from comma-separated include and exclude lists.
    ///
    /// Empty strings and empty list entries are ignored.
    pub fn new(include: &str, exclude: &str) -> Result<Self> {
        let include_patterns = split_patterns(include);
        let exclude_patterns = split_patterns(exclude);

        let (include_path, include_name) = build_matchers(&include_patterns)?;
        let (exclude_path, exclude_name) = build_matchers(&exclude_patterns)?;

        Ok(Self {
            include_path,
            include_name,
            exclude_path,
            exclude_name,
            has_includes: !include_patterns.is_empty(),
        })
    }

    /// Filter that includes everything
    pub fn allow_all() -> Self {
        Self::new("", "").expect("empty filter is always valid")
    }

    /// Whether the relative path passes the filter.
    ///
    /// Excludes win over includes; a non-empty include list must match.
    pub fn matches(&self, relative: &str) -> bool {
        let name = base_name(relative);

        if self.exclude_path.is_match(relative) || self.exclude_name.is_match(name) {
            return false;
        }
        if self.has_includes {
            return self.include_path.is_match(relative) || self.include_name.is_match(name);
        }
        true
    }

    /// Whether a directory should be descended into.
    ///
    /// Directories are filtered by the exclude list only: an excluded
    /// directory prunes its whole subtree, but include patterns such as
    /// `*.txt` must not stop the walker from entering directories that
    /// may contain matching files.
    pub fn matches_dir(&self, relative: &str) -> bool {
        let name = base_name(relative);
        !(self.exclude_path.is_match(relative) || self.exclude_name.is_match(name))
    }
}

fn split_patterns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build (full-path, base-name) matchers from a pattern list
fn build_matchers(patterns: &[String]) -> Result<(GlobSet, GlobSet)> {
    let mut path_builder = GlobSetBuilder::new();
    let mut name_builder = GlobSetBuilder::new();

    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            TreeSyncError::config(format!("invalid glob pattern '{}': {}", pattern, e))
        })?;
        if pattern.contains('/') {
            path_builder.add(glob);
        } else {
            name_builder.add(glob);
        }
    }

    let path_set = path_builder
        .build()
        .map_err(|e| TreeSyncError::config(format!("failed to build glob set: {}", e)))?;
    let name_set = name_builder
        .build()
        .map_err(|e| TreeSyncError::config(format!("failed to build glob set: {}", e)))?;
    Ok((path_set, name_set))
}

fn base_name(relative: &str) -> &str {
    relative.rsplit('/').next().unwrap_or(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_includes_everything() {
        let filter = PathFilter::allow_all();
        assert!(filter.matches("a.txt"));
        assert!(filter.matches("deep/nested/b.bin"));
        assert!(filter.matches_dir("deep/nested"));
    }

    #[test]
    fn test_include_by_extension() {
        let filter = PathFilter::new("*.txt,*.log", "").unwrap();
        assert!(filter.matches("x.txt"));
        assert!(filter.matches("sub/dir/y.log"));
        assert!(!filter.matches("z.tmp"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = PathFilter::new("*.txt", "draft*").unwrap();
        assert!(filter.matches("notes.txt"));
        assert!(!filter.matches("draft.txt"));
        assert!(!filter.matches("sub/draft.txt"));
    }

    #[test]
    fn test_full_path_patterns() {
        let filter = PathFilter::new("", "build/*").unwrap();
        assert!(!filter.matches("build/out.o"));
        assert!(filter.matches("src/build.rs"));
    }

    #[test]
    fn test_directory_pruning() {
        let filter = PathFilter::new("*.txt", ".git,target").unwrap();
        assert!(!filter.matches_dir(".git"));
        assert!(!filter.matches_dir("sub/target"));
        // Include patterns do not stop directory descent
        assert!(filter.matches_dir("docs"));
    }

    #[test]
    fn test_invalid_glob_is_construction_error() {
        let err = PathFilter::new("[", "").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_tightening_excludes_is_monotone() {
        let paths = ["a.txt", "b.log", "c.tmp", "d/e.txt"];
        let loose = PathFilter::new("", "*.tmp").unwrap();
        let tight = PathFilter::new("", "*.tmp,*.log").unwrap();

        for p in paths {
            if tight.matches(p) {
                assert!(loose.matches(p), "tightening excludes must only remove paths");
            }
        }
    }
}
