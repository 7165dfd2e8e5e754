//! Single-file streaming copy
//!
//! Writes go to a sibling temporary file and are renamed into place, so a
//! partial destination is never visible at its final path. The copy loop
//! optionally tees the source bytes through a hasher for single-pass
//! verify-on-copy, checks the cancellation token between buffer chunks,
//! and preserves the source mtime after the rename.

use crate::cancel::CancelToken;
use crate::config::HashAlgorithm;
use crate::error::{IoResultExt, Result, TreeSyncError};
use crate::hash::StreamingHasher;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Copy behavior knobs
#[derive(Debug, Clone)]
pub struct CopierOptions {
    /// Buffer size for the read/write loop
    pub buffer_size: usize,
    /// Fsync the temporary file before renaming it into place
    pub fsync: bool,
    /// Tee the source stream through this digest while copying
    pub hash_algorithm: Option<HashAlgorithm>,
}

/// What one successful copy produced
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    /// Bytes written to the destination
    pub bytes_copied: u64,
    /// Source digest computed during the stream, if requested
    pub source_hash: Option<String>,
}

/// Streaming file copier
pub struct FileCopier {
    options: CopierOptions,
}

impl FileCopier {
    /// Create a copier with the given options
    pub fn new(options: CopierOptions) -> Self {
        Self { options }
    }

    /// Copy `source` to `dest` atomically.
    ///
    /// On cancellation the temporary file is removed and
    /// [`TreeSyncError::Cancelled`] is returned; the final path is never
    /// touched. I/O errors carry the path they occurred on.
    pub fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<CopyOutcome> {
        self.copy_file_with_progress(source, dest, cancel, |_| {})
    }

    /// Like [`copy_file`](Self::copy_file), reporting each written chunk.
    ///
    /// `on_chunk` receives the byte count of every buffer written, so a
    /// caller can surface bytes-so-far for large files.
    pub fn copy_file_with_progress(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancelToken,
        mut on_chunk: impl FnMut(u64),
    ) -> Result<CopyOutcome> {
        let mut src_file = File::open(source).with_path(source)?;
        let src_meta = src_file.metadata().with_path(source)?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }

        let tmp_path = temp_sibling(dest);
        let result =
            self.stream_to_temp(&mut src_file, &tmp_path, source, cancel, &mut on_chunk);

        let (bytes_copied, source_hash) = match result {
            Ok(ok) => ok,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        if let Err(e) = std::fs::rename(&tmp_path, dest) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(TreeSyncError::io(dest, e));
        }

        // Preserve the source mtime with nanosecond precision where the
        // filesystem allows.
        if let Ok(mtime) = src_meta.modified() {
            let _ = filetime::set_file_mtime(dest, filetime::FileTime::from_system_time(mtime));
        }

        Ok(CopyOutcome {
            bytes_copied,
            source_hash,
        })
    }

    fn stream_to_temp(
        &self,
        src_file: &mut File,
        tmp_path: &Path,
        source: &Path,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<(u64, Option<String>)> {
        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp_path)
            .with_path(tmp_path)?;

        let mut hasher = self.options.hash_algorithm.map(StreamingHasher::new);
        let mut buffer = vec![0u8; self.options.buffer_size.max(1)];
        let mut bytes_copied = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(TreeSyncError::Cancelled);
            }
            let bytes_read = src_file.read(&mut buffer).with_path(source)?;
            if bytes_read == 0 {
                break;
            }
            let chunk = &buffer[..bytes_read];
            if let Some(h) = hasher.as_mut() {
                h.process(chunk);
            }
            tmp_file.write_all(chunk).with_path(tmp_path)?;
            bytes_copied += bytes_read as u64;
            on_chunk(bytes_read as u64);
        }

        tmp_file.flush().with_path(tmp_path)?;
        if self.options.fsync {
            tmp_file.sync_all().with_path(tmp_path)?;
        }
        drop(tmp_file);

        Ok((bytes_copied, hasher.map(StreamingHasher::finalize)))
    }
}

/// Temporary sibling path in the destination's directory.
///
/// The random suffix hashes the target path and the clock, so concurrent
/// runs against the same destination never collide on temp names.
fn temp_sibling(dest: &Path) -> PathBuf {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let mut hasher = DefaultHasher::new();
    dest.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    SEQUENCE.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    let suffix = hasher.finish();

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{}.{:016x}.tmp", name, suffix))
}
