//! Configuration settings for TreeSync
//!
//! Defines the CLI surface, the option-file mapping, and the resolved
//! runtime options. Precedence is flags over file over defaults.

use crate::error::{Result, TreeSyncError};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default copy buffer size: 8 MiB
pub const DEFAULT_COPY_BUFFER: usize = 8 * 1024 * 1024;
/// Default hash read-buffer size: 32 MiB
pub const DEFAULT_HASH_BUFFER: usize = 32 * 1024 * 1024;
/// Default retry count for transient failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay between retries, in seconds
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
/// Default state database file name
pub const DEFAULT_DB_FILE: &str = "treesync.db";

/// TreeSync - high-throughput directory synchronization
#[derive(Parser, Debug, Clone)]
#[command(name = "treesync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Synchronize a directory tree with verification and resumable state")]
#[command(long_about = r#"
TreeSync reproduces a source directory tree at a destination with parallel
workers, optional cryptographic verification, and a persistent state database
that makes incremental runs and resume-after-failure possible.

Examples:
  treesync --source /data --destination /backup
  treesync --source /data --destination /backup --mode incremental --workers 8
  treesync --source /data --destination /backup --verify-hash --mirror
  treesync --source /data --destination /backup --verify-only --verify-all \
           --final-report verify.csv
"#)]
pub struct CliArgs {
    /// Source directory
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,

    /// Destination directory
    #[arg(long, value_name = "PATH")]
    pub destination: Option<PathBuf>,

    /// Number of parallel workers (default: logical CPUs)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Copy buffer size in MiB
    #[arg(long, value_name = "MB")]
    pub buffer: Option<usize>,

    /// Maximum retries for transient failures
    #[arg(long, value_name = "N")]
    pub retry: Option<u32>,

    /// Delay between retries in seconds
    #[arg(long, value_name = "SEC")]
    pub wait: Option<u64>,

    /// Comma-separated include globs (e.g. '*.txt,*.log')
    #[arg(long, value_name = "PAT")]
    pub include: Option<String>,

    /// Comma-separated exclude globs
    #[arg(long, value_name = "PAT")]
    pub exclude: Option<String>,

    /// Recurse into subdirectories
    #[arg(long, value_name = "BOOL")]
    pub recursive: Option<bool>,

    /// Delete destination paths absent from the source after copying
    #[arg(long)]
    pub mirror: bool,

    /// Decide and log, but do not write, rename, delete or fsync
    #[arg(long)]
    pub dry_run: bool,

    /// Skip files whose destination mtime is strictly newer than the source
    #[arg(long)]
    pub skip_newer: bool,

    /// Do not overwrite existing destination files
    #[arg(long)]
    pub no_overwrite: bool,

    /// Fsync destination files before renaming them into place
    #[arg(long)]
    pub fsync: bool,

    /// Cancel the run on the first permanent file failure
    #[arg(long)]
    pub abort_on_error: bool,

    /// Sync mode
    #[arg(long, value_enum, value_name = "MODE")]
    pub mode: Option<SyncMode>,

    /// State database path
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Skip the copy phase and run verification instead
    #[arg(long)]
    pub verify_only: bool,

    /// After copying, verify files synced by recent sessions
    #[arg(long)]
    pub verify_changed: bool,

    /// After copying, verify every file in the tree
    #[arg(long)]
    pub verify_all: bool,

    /// Consider previously failed records in incremental mode
    #[arg(long)]
    pub include_failed: bool,

    /// Cap cross-session retries of failed records (0 = unbounded)
    #[arg(long, value_name = "N")]
    pub max_fail_count: Option<u32>,

    /// Write the verification report CSV to this path
    #[arg(long, value_name = "PATH")]
    pub final_report: Option<PathBuf>,

    /// Digest algorithm
    #[arg(long, value_enum, value_name = "ALGO")]
    pub hash_algorithm: Option<HashAlgorithm>,

    /// Compute and compare hashes during copy
    #[arg(long)]
    pub verify_hash: bool,

    /// Treat missing files as skipped during verification
    #[arg(long)]
    pub ignore_missing: bool,

    /// Do not report destination files absent from the source
    #[arg(long)]
    pub ignore_extra: bool,

    /// Stop verification on the first mismatch or error
    #[arg(long)]
    pub fail_fast: bool,

    /// Overall deadline in seconds
    #[arg(long, value_name = "SEC")]
    pub timeout: Option<u64>,

    /// Write a JSON dump of the record set to this path after the run
    #[arg(long, value_name = "PATH")]
    pub export_state: Option<PathBuf>,

    /// Option file (JSON, snake_case keys); flags win over file values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress non-error output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Show progress bars
    #[arg(short = 'p', long)]
    pub progress: bool,
}

/// Sync mode governing the copy engine's default decisions
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Consider every file; skip unchanged destinations
    #[default]
    Normal,
    /// Clear the store first; treat every file as new
    Initial,
    /// Only changed files, plus failed/pending records
    Incremental,
}

impl SyncMode {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Initial => "initial",
            Self::Incremental => "incremental",
        }
    }
}

/// Digest algorithm for integrity verification
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5 (legacy, fastest of the set)
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Digest size in bytes
    pub fn output_size(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }
}

/// Option-file mapping: the recognized options in snake_case.
///
/// Every field is optional; absent keys fall through to the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(missing_docs)] // field meanings mirror the CLI flags of the same name
pub struct FileConfig {
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub workers: Option<usize>,
    pub buffer: Option<usize>,
    /// Hash read-buffer size in MiB (no CLI flag; option file only)
    pub hash_buffer: Option<usize>,
    pub retry: Option<u32>,
    pub wait: Option<u64>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub recursive: Option<bool>,
    pub mirror: Option<bool>,
    pub dry_run: Option<bool>,
    pub skip_newer: Option<bool>,
    pub overwrite: Option<bool>,
    pub fsync: Option<bool>,
    pub abort_on_error: Option<bool>,
    pub mode: Option<SyncMode>,
    pub db: Option<PathBuf>,
    pub verify_only: Option<bool>,
    pub verify_changed: Option<bool>,
    pub verify_all: Option<bool>,
    pub include_failed: Option<bool>,
    pub max_fail_count: Option<u32>,
    pub final_report: Option<PathBuf>,
    pub hash_algorithm: Option<HashAlgorithm>,
    pub verify_hash: Option<bool>,
    pub ignore_missing: Option<bool>,
    pub ignore_extra: Option<bool>,
    pub fail_fast: Option<bool>,
    pub timeout: Option<u64>,
    pub export_state: Option<PathBuf>,
}

impl FileConfig {
    /// Load an option file, rejecting unknown keys
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TreeSyncError::config(format!("cannot read '{}': {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| TreeSyncError::config(format!("invalid option file '{}': {}", path.display(), e)))
    }
}

/// Resolved runtime options for one engine invocation.
///
/// Constructed once in the CLI layer and passed down; the core holds no
/// global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Source root
    pub source: PathBuf,
    /// Destination root
    pub destination: PathBuf,
    /// Worker pool size for copy and verify
    pub max_concurrent: usize,
    /// Copy buffer size in bytes
    pub buffer_size: usize,
    /// Hash read-buffer size in bytes
    pub hash_buffer_size: usize,
    /// Maximum transient retries per file within a session
    pub max_retries: u32,
    /// Delay between retries
    pub retry_delay: Duration,
    /// Comma-separated include globs
    pub include: String,
    /// Comma-separated exclude globs
    pub exclude: String,
    /// Recurse into subdirectories
    pub recursive: bool,
    /// Mirror-mode deletion pass
    pub mirror: bool,
    /// Decide but do not mutate
    pub dry_run: bool,
    /// Skip strictly-newer destinations
    pub skip_newer: bool,
    /// Overwrite existing destination files
    pub overwrite: bool,
    /// Fsync before rename
    pub fsync: bool,
    /// Cancel on first permanent failure
    pub abort_on_error: bool,
    /// Sync mode
    pub mode: SyncMode,
    /// State database path
    pub db_path: PathBuf,
    /// Skip copy; run verification only
    pub verify_only: bool,
    /// Post-copy verification of recently synced files
    pub verify_changed: bool,
    /// Post-copy verification of the whole tree
    pub verify_all: bool,
    /// Retry previously failed records in incremental mode
    pub include_failed: bool,
    /// Cross-session fail cap (0 = unbounded)
    pub max_fail_count: u32,
    /// Verification report path
    pub final_report: Option<PathBuf>,
    /// Digest algorithm
    pub hash_algorithm: HashAlgorithm,
    /// Hash-verify-on-copy
    pub verify_hash: bool,
    /// Verifier: missing files are skipped, not mismatches
    pub ignore_missing: bool,
    /// Verifier: do not sweep for extra destination files
    pub ignore_extra: bool,
    /// Verifier: cancel on first mismatch or error
    pub fail_fast: bool,
    /// Overall deadline
    pub timeout: Option<Duration>,
    /// Post-run JSON dump of the record set
    pub export_state: Option<PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            destination: PathBuf::new(),
            max_concurrent: num_cpus::get(),
            buffer_size: DEFAULT_COPY_BUFFER,
            hash_buffer_size: DEFAULT_HASH_BUFFER,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            include: String::new(),
            exclude: String::new(),
            recursive: true,
            mirror: false,
            dry_run: false,
            skip_newer: false,
            overwrite: true,
            fsync: false,
            abort_on_error: false,
            mode: SyncMode::Normal,
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            verify_only: false,
            verify_changed: false,
            verify_all: false,
            include_failed: false,
            max_fail_count: 0,
            final_report: None,
            hash_algorithm: HashAlgorithm::Sha256,
            verify_hash: false,
            ignore_missing: false,
            ignore_extra: false,
            fail_fast: false,
            timeout: None,
            export_state: None,
        }
    }
}

impl SyncOptions {
    /// Resolve options from CLI arguments and an optional option file.
    ///
    /// Flags win over file values, which win over defaults. Boolean flags
    /// only enable; a file value of `true` cannot be switched back off by
    /// the CLI (there is no `--no-...` spelling except for overwrite).
    pub fn resolve(args: &CliArgs, file: Option<FileConfig>) -> Result<Self> {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        let source = args
            .source
            .clone()
            .or(file.source)
            .ok_or_else(|| TreeSyncError::config("--source is required"))?;
        let destination = args
            .destination
            .clone()
            .or(file.destination)
            .ok_or_else(|| TreeSyncError::config("--destination is required"))?;

        let workers = args.workers.or(file.workers).unwrap_or(0);
        let max_concurrent = if workers == 0 { num_cpus::get() } else { workers };

        let buffer_mib = args.buffer.or(file.buffer);
        let buffer_size = match buffer_mib {
            Some(0) => return Err(TreeSyncError::config("buffer size must be positive")),
            Some(mib) => mib * 1024 * 1024,
            None => defaults.buffer_size,
        };
        let hash_buffer_size = match file.hash_buffer {
            Some(0) => return Err(TreeSyncError::config("hash buffer size must be positive")),
            Some(mib) => mib * 1024 * 1024,
            None => defaults.hash_buffer_size,
        };

        let opts = Self {
            source,
            destination,
            max_concurrent,
            buffer_size,
            hash_buffer_size,
            max_retries: args.retry.or(file.retry).unwrap_or(defaults.max_retries),
            retry_delay: Duration::from_secs(
                args.wait.or(file.wait).unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            ),
            include: args.include.clone().or(file.include).unwrap_or_default(),
            exclude: args.exclude.clone().or(file.exclude).unwrap_or_default(),
            recursive: args.recursive.or(file.recursive).unwrap_or(true),
            mirror: args.mirror || file.mirror.unwrap_or(false),
            dry_run: args.dry_run || file.dry_run.unwrap_or(false),
            skip_newer: args.skip_newer || file.skip_newer.unwrap_or(false),
            overwrite: if args.no_overwrite {
                false
            } else {
                file.overwrite.unwrap_or(true)
            },
            fsync: args.fsync || file.fsync.unwrap_or(false),
            abort_on_error: args.abort_on_error || file.abort_on_error.unwrap_or(false),
            mode: args.mode.or(file.mode).unwrap_or_default(),
            db_path: args
                .db
                .clone()
                .or(file.db)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE)),
            verify_only: args.verify_only || file.verify_only.unwrap_or(false),
            verify_changed: args.verify_changed || file.verify_changed.unwrap_or(false),
            verify_all: args.verify_all || file.verify_all.unwrap_or(false),
            include_failed: args.include_failed || file.include_failed.unwrap_or(false),
            max_fail_count: args.max_fail_count.or(file.max_fail_count).unwrap_or(0),
            final_report: args.final_report.clone().or(file.final_report),
            hash_algorithm: args
                .hash_algorithm
                .or(file.hash_algorithm)
                .unwrap_or_default(),
            verify_hash: args.verify_hash || file.verify_hash.unwrap_or(false),
            ignore_missing: args.ignore_missing || file.ignore_missing.unwrap_or(false),
            ignore_extra: args.ignore_extra || file.ignore_extra.unwrap_or(false),
            fail_fast: args.fail_fast || file.fail_fast.unwrap_or(false),
            timeout: args
                .timeout
                .or(file.timeout)
                .map(Duration::from_secs),
            export_state: args.export_state.clone().or(file.export_state),
        };

        opts.validate()?;
        Ok(opts)
    }

    /// Reject invalid option combinations before any work begins
    pub fn validate(&self) -> Result<()> {
        if self.verify_only && self.mirror {
            return Err(TreeSyncError::config(
                "--verify-only and --mirror are mutually exclusive",
            ));
        }
        if self.verify_changed && self.verify_all {
            return Err(TreeSyncError::config(
                "--verify-changed and --verify-all are mutually exclusive",
            ));
        }
        if self.source == self.destination {
            return Err(TreeSyncError::SameSourceAndDestination(self.source.clone()));
        }
        if self.max_concurrent == 0 {
            return Err(TreeSyncError::config("worker count must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_args() -> CliArgs {
        CliArgs::parse_from(["treesync", "--source", "/src", "--destination", "/dst"])
    }

    #[test]
    fn test_defaults() {
        let opts = SyncOptions::resolve(&base_args(), None).unwrap();
        assert_eq!(opts.buffer_size, DEFAULT_COPY_BUFFER);
        assert_eq!(opts.hash_buffer_size, DEFAULT_HASH_BUFFER);
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.mode, SyncMode::Normal);
        assert_eq!(opts.hash_algorithm, HashAlgorithm::Sha256);
        assert!(opts.recursive);
        assert!(opts.overwrite);
        assert_eq!(opts.max_fail_count, 0);
    }

    #[test]
    fn test_flags_win_over_file() {
        let args = CliArgs::parse_from([
            "treesync",
            "--source",
            "/src",
            "--destination",
            "/dst",
            "--workers",
            "2",
            "--mode",
            "incremental",
        ]);
        let file = FileConfig {
            workers: Some(16),
            mode: Some(SyncMode::Initial),
            wait: Some(1),
            ..Default::default()
        };
        let opts = SyncOptions::resolve(&args, Some(file)).unwrap();
        assert_eq!(opts.max_concurrent, 2);
        assert_eq!(opts.mode, SyncMode::Incremental);
        // File value used where the flag is absent
        assert_eq!(opts.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_verify_only_and_mirror_rejected() {
        let args = CliArgs::parse_from([
            "treesync",
            "--source",
            "/src",
            "--destination",
            "/dst",
            "--verify-only",
            "--mirror",
        ]);
        let err = SyncOptions::resolve(&args, None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_same_source_and_destination_rejected() {
        let args =
            CliArgs::parse_from(["treesync", "--source", "/same", "--destination", "/same"]);
        assert!(SyncOptions::resolve(&args, None).is_err());
    }

    #[test]
    fn test_option_file_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"{{"source": "/a", "destination": "/b", "mirror": true, "wait": 2,
                "hash_algorithm": "sha512", "max_fail_count": 5}}"#
        )
        .unwrap();

        let file = FileConfig::load(tmp.path()).unwrap();
        let args = CliArgs::parse_from(["treesync"]);
        let opts = SyncOptions::resolve(&args, Some(file)).unwrap();
        assert_eq!(opts.source, PathBuf::from("/a"));
        assert!(opts.mirror);
        assert_eq!(opts.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(opts.max_fail_count, 5);
    }

    #[test]
    fn test_option_file_unknown_key_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, r#"{{"sources": "/a"}}"#).unwrap();
        assert!(FileConfig::load(tmp.path()).is_err());
    }
}
