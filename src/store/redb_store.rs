//! redb-backed state store
//!
//! Single-file, transactional, crash-safe. Four tables: `files` holds
//! bincode-encoded records keyed by relative path, `sessions` the
//! append-only session log keyed by id, `stats` persistent aggregate
//! counters, and `meta` the embedded format version. redb's own file
//! lock rejects a second opener, in-process or cross-process.

use super::{
    now_ns, FileRecord, FileStatus, SessionCounts, SessionStatus, StateStore, StatusCounts,
    SyncSession,
};
use crate::config::SyncMode;
use crate::error::{Result, TreeSyncError};
use redb::{
    Database, DatabaseError, ReadableDatabase, ReadableTable, StorageError, TableDefinition,
};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
const SESSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("sessions");
const STATS: TableDefinition<&str, u64> = TableDefinition::new("stats");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Format version embedded in `meta`; readers refuse newer files
pub const FORMAT_VERSION: u64 = 1;

const META_VERSION_KEY: &str = "format_version";

/// Embedded state store backed by redb
pub struct RedbStore {
    db: Database,
    mode: SyncMode,
    path: PathBuf,
}

impl RedbStore {
    /// Create or open the database file under an exclusive lock.
    ///
    /// `Initial` mode truncates `files` and `stats`; sessions are
    /// retained. A file already held by another opener fails with
    /// [`TreeSyncError::StoreLocked`].
    pub fn open(path: &Path, mode: SyncMode) -> Result<Self> {
        let db = match Database::create(path) {
            Ok(db) => db,
            Err(DatabaseError::DatabaseAlreadyOpen) => {
                return Err(TreeSyncError::StoreLocked(path.to_path_buf()))
            }
            Err(DatabaseError::Storage(StorageError::Io(ref e)))
                if e.kind() == ErrorKind::WouldBlock =>
            {
                return Err(TreeSyncError::StoreLocked(path.to_path_buf()))
            }
            Err(e) => return Err(store_err(e)),
        };

        let store = Self {
            db,
            mode,
            path: path.to_path_buf(),
        };
        store.init(mode)?;
        Ok(store)
    }

    /// Mode this store was opened under
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init(&self, mode: SyncMode) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut meta = txn.open_table(META).map_err(store_err)?;
            let found = {
                let guard = meta.get(META_VERSION_KEY).map_err(store_err)?;
                guard.map(|g| g.value())
            };
            match found {
                Some(v) if v > FORMAT_VERSION => {
                    return Err(TreeSyncError::StoreVersion {
                        found: v,
                        supported: FORMAT_VERSION,
                    });
                }
                Some(_) => {}
                None => {
                    meta.insert(META_VERSION_KEY, FORMAT_VERSION).map_err(store_err)?;
                }
            }

            // Ensure all tables exist so later read transactions see them.
            txn.open_table(FILES).map_err(store_err)?;
            txn.open_table(SESSIONS).map_err(store_err)?;
            txn.open_table(STATS).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;

        if mode == SyncMode::Initial {
            self.truncate_files_and_stats()?;
        }
        Ok(())
    }

    fn truncate_files_and_stats(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        txn.delete_table(FILES).map_err(store_err)?;
        txn.delete_table(STATS).map_err(store_err)?;
        // Recreate empty tables in the same transaction.
        txn.open_table(FILES).map_err(store_err)?;
        txn.open_table(STATS).map_err(store_err)?;
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn read_record(
        table: &impl ReadableTable<&'static str, &'static [u8]>,
        path: &str,
    ) -> Result<Option<FileRecord>> {
        let guard = table.get(path).map_err(store_err)?;
        match guard {
            Some(g) => Ok(Some(decode_record(g.value())?)),
            None => Ok(None),
        }
    }
}

impl StateStore for RedbStore {
    fn upsert(&self, record: &FileRecord) -> Result<()> {
        let bytes = encode(record)?;
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(FILES).map_err(store_err)?;
            table
                .insert(record.path.as_str(), bytes.as_slice())
                .map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(FILES).map_err(store_err)?;
        Self::read_record(&table, path)
    }

    fn update_status(&self, path: &str, status: FileStatus, error: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(FILES).map_err(store_err)?;
            let mut record =
                Self::read_record(&table, path)?.unwrap_or_else(|| FileRecord::new(path, 0, 0));
            record.status = status;
            record.last_error = error.to_string();
            record.last_sync_ns = now_ns();
            let bytes = encode(&record)?;
            table.insert(path, bytes.as_slice()).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn update_hashes(&self, path: &str, source_hash: &str, dest_hash: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(FILES).map_err(store_err)?;
            let mut record = Self::read_record(&table, path)?
                .ok_or_else(|| TreeSyncError::RecordNotFound(path.to_string()))?;
            record.source_hash = source_hash.to_string();
            record.dest_hash = dest_hash.to_string();
            record.last_sync_ns = now_ns();
            let bytes = encode(&record)?;
            table.insert(path, bytes.as_slice()).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn increment_fail_count(&self, path: &str) -> Result<u32> {
        let txn = self.db.begin_write().map_err(store_err)?;
        let new_count;
        {
            let mut table = txn.open_table(FILES).map_err(store_err)?;
            let mut record =
                Self::read_record(&table, path)?.unwrap_or_else(|| FileRecord::new(path, 0, 0));
            record.fail_count = record.fail_count.saturating_add(1);
            record.last_sync_ns = now_ns();
            new_count = record.fail_count;
            let bytes = encode(&record)?;
            table.insert(path, bytes.as_slice()).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(new_count)
    }

    fn files_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(FILES).map_err(store_err)?;
        let mut records = Vec::new();
        for item in table.iter().map_err(store_err)? {
            let (_, value) = item.map_err(store_err)?;
            let record = decode_record(value.value())?;
            if record.status == status {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn failed_files(&self, max_fail: u32) -> Result<Vec<FileRecord>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(FILES).map_err(store_err)?;
        let mut records = Vec::new();
        for item in table.iter().map_err(store_err)? {
            let (_, value) = item.map_err(store_err)?;
            let record = decode_record(value.value())?;
            if record.status == FileStatus::Failed
                && (max_fail == 0 || record.fail_count < max_fail)
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn start_session(&self, mode: SyncMode) -> Result<u64> {
        let txn = self.db.begin_write().map_err(store_err)?;
        let id;
        {
            let mut table = txn.open_table(SESSIONS).map_err(store_err)?;
            id = {
                let last = table.last().map_err(store_err)?;
                last.map(|(k, _)| k.value() + 1).unwrap_or(1)
            };
            let session = SyncSession {
                id,
                started_ns: now_ns(),
                ended_ns: 0,
                mode,
                files_copied: 0,
                files_skipped: 0,
                files_failed: 0,
                bytes_copied: 0,
                status: SessionStatus::Running,
            };
            let bytes = encode(&session)?;
            table.insert(id, bytes.as_slice()).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(id)
    }

    fn end_session(&self, id: u64, counts: SessionCounts, status: SessionStatus) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(store_err)?;
            let mut session = {
                let guard = table.get(id).map_err(store_err)?;
                match guard {
                    Some(g) => decode_session(g.value())?,
                    None => return Err(TreeSyncError::SessionNotFound(id)),
                }
            };
            if session.status != SessionStatus::Running {
                return Err(TreeSyncError::Store(format!(
                    "session {} is already finalized",
                    id
                )));
            }
            session.ended_ns = now_ns();
            session.files_copied = counts.copied;
            session.files_skipped = counts.skipped;
            session.files_failed = counts.failed;
            session.bytes_copied = counts.bytes;
            session.status = status;
            let bytes = encode(&session)?;
            table.insert(id, bytes.as_slice()).map_err(store_err)?;

            let mut stats = txn.open_table(STATS).map_err(store_err)?;
            for (key, delta) in [
                ("files_copied", counts.copied),
                ("files_skipped", counts.skipped),
                ("files_failed", counts.failed),
                ("bytes_copied", counts.bytes),
            ] {
                let current = {
                    let guard = stats.get(key).map_err(store_err)?;
                    guard.map(|g| g.value()).unwrap_or(0)
                };
                stats
                    .insert(key, current.saturating_add(delta))
                    .map_err(store_err)?;
            }
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn session(&self, id: u64) -> Result<Option<SyncSession>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(SESSIONS).map_err(store_err)?;
        let guard = table.get(id).map_err(store_err)?;
        match guard {
            Some(g) => Ok(Some(decode_session(g.value())?)),
            None => Ok(None),
        }
    }

    fn stats_snapshot(&self) -> Result<StatusCounts> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(FILES).map_err(store_err)?;
        let mut counts = StatusCounts::default();
        for item in table.iter().map_err(store_err)? {
            let (_, value) = item.map_err(store_err)?;
            let record = decode_record(value.value())?;
            counts.total += 1;
            match record.status {
                FileStatus::Pending => counts.pending += 1,
                FileStatus::Success => counts.success += 1,
                FileStatus::Failed => counts.failed += 1,
                FileStatus::Skipped => counts.skipped += 1,
                FileStatus::Verified => counts.verified += 1,
                FileStatus::Mismatch => counts.mismatch += 1,
            }
        }
        Ok(counts)
    }

    fn reset(&self) -> Result<()> {
        if self.mode != SyncMode::Initial {
            return Err(TreeSyncError::Store(
                "reset is only permitted in initial mode".to_string(),
            ));
        }
        self.truncate_files_and_stats()
    }

    fn export_report(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct Export {
            exported_at: String,
            total: usize,
            files: Vec<FileRecord>,
        }

        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(FILES).map_err(store_err)?;
        let mut files = Vec::new();
        for item in table.iter().map_err(store_err)? {
            let (_, value) = item.map_err(store_err)?;
            files.push(decode_record(value.value())?);
        }

        let export = Export {
            exported_at: chrono::Local::now().to_rfc3339(),
            total: files.len(),
            files,
        };
        let json = serde_json::to_string_pretty(&export)
            .map_err(|e| TreeSyncError::Store(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| TreeSyncError::io(path, e))?;
        Ok(())
    }
}

fn store_err<E: std::fmt::Display>(err: E) -> TreeSyncError {
    TreeSyncError::Store(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(store_err)
}

fn decode_record(bytes: &[u8]) -> Result<FileRecord> {
    bincode::deserialize(bytes).map_err(store_err)
}

fn decode_session(bytes: &[u8]) -> Result<SyncSession> {
    bincode::deserialize(bytes).map_err(store_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, mode: SyncMode) -> RedbStore {
        RedbStore::open(&dir.path().join("state.db"), mode).unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);

        let record = FileRecord::new("a/b.txt", 42, 1234);
        store.upsert(&record).unwrap();

        let loaded = store.get("a/b.txt").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_status_creates_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);

        store
            .update_status("new.txt", FileStatus::Skipped, "")
            .unwrap();
        let record = store.get("new.txt").unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Skipped);
        assert!(record.last_sync_ns > 0);
    }

    #[test]
    fn test_update_hashes_requires_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);

        assert!(matches!(
            store.update_hashes("absent", "aa", "bb"),
            Err(TreeSyncError::RecordNotFound(_))
        ));

        store.upsert(&FileRecord::new("f", 1, 1)).unwrap();
        store.update_hashes("f", "aa", "bb").unwrap();
        let record = store.get("f").unwrap().unwrap();
        assert_eq!(record.source_hash, "aa");
        assert_eq!(record.dest_hash, "bb");
    }

    #[test]
    fn test_increment_fail_count() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);

        assert_eq!(store.increment_fail_count("f").unwrap(), 1);
        assert_eq!(store.increment_fail_count("f").unwrap(), 2);
        assert_eq!(store.get("f").unwrap().unwrap().fail_count, 2);
    }

    #[test]
    fn test_failed_files_cap() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);

        for (path, fails) in [("one", 1u32), ("three", 3), ("five", 5)] {
            let mut record = FileRecord::new(path, 0, 0);
            record.status = FileStatus::Failed;
            record.fail_count = fails;
            store.upsert(&record).unwrap();
        }

        let capped = store.failed_files(4).unwrap();
        let mut paths: Vec<_> = capped.iter().map(|r| r.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, ["one", "three"]);

        // 0 means unbounded
        assert_eq!(store.failed_files(0).unwrap().len(), 3);
    }

    #[test]
    fn test_sessions_are_monotonic_and_append_only() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);

        let a = store.start_session(SyncMode::Normal).unwrap();
        let b = store.start_session(SyncMode::Incremental).unwrap();
        assert!(b > a);

        let counts = SessionCounts {
            copied: 3,
            skipped: 1,
            failed: 0,
            bytes: 522,
        };
        store.end_session(a, counts, SessionStatus::Completed).unwrap();

        let session = store.session(a).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.files_copied, 3);
        assert!(session.ended_ns >= session.started_ns);

        // Finalizing twice or finalizing an unknown id fails
        assert!(store.end_session(a, counts, SessionStatus::Completed).is_err());
        assert!(matches!(
            store.end_session(999, counts, SessionStatus::Completed),
            Err(TreeSyncError::SessionNotFound(999))
        ));
    }

    #[test]
    fn test_initial_mode_clears_files_keeps_sessions() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state.db");

        let first_session;
        {
            let store = RedbStore::open(&db_path, SyncMode::Normal).unwrap();
            store.upsert(&FileRecord::new("f", 1, 1)).unwrap();
            first_session = store.start_session(SyncMode::Normal).unwrap();
        }

        let store = RedbStore::open(&db_path, SyncMode::Initial).unwrap();
        assert!(store.get("f").unwrap().is_none());
        assert!(store.session(first_session).unwrap().is_some());
    }

    #[test]
    fn test_second_open_fails_locked() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state.db");
        let _store = RedbStore::open(&db_path, SyncMode::Normal).unwrap();

        assert!(matches!(
            RedbStore::open(&db_path, SyncMode::Normal),
            Err(TreeSyncError::StoreLocked(_))
        ));
    }

    #[test]
    fn test_reset_requires_initial_mode() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);
        assert!(store.reset().is_err());

        let dir2 = TempDir::new().unwrap();
        let store2 = open_store(&dir2, SyncMode::Initial);
        store2.upsert(&FileRecord::new("f", 1, 1)).unwrap();
        store2.reset().unwrap();
        assert!(store2.get("f").unwrap().is_none());
    }

    #[test]
    fn test_stats_snapshot_groups_by_status() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);

        for (path, status) in [
            ("a", FileStatus::Success),
            ("b", FileStatus::Success),
            ("c", FileStatus::Failed),
            ("d", FileStatus::Verified),
        ] {
            let mut record = FileRecord::new(path, 0, 0);
            record.status = status;
            store.upsert(&record).unwrap();
        }

        let counts = store.stats_snapshot().unwrap();
        assert_eq!(counts.success, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.verified, 1);
        assert_eq!(counts.total, 4);
    }

    #[test]
    fn test_export_report() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, SyncMode::Normal);
        store.upsert(&FileRecord::new("x", 5, 10)).unwrap();

        let out = dir.path().join("export.json");
        store.export_report(&out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["files"][0]["path"], "x");
        assert!(value["exported_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state.db");
        {
            let store = RedbStore::open(&db_path, SyncMode::Normal).unwrap();
            store.upsert(&FileRecord::new("durable", 7, 8)).unwrap();
        }
        let store = RedbStore::open(&db_path, SyncMode::Normal).unwrap();
        assert_eq!(store.get("durable").unwrap().unwrap().size, 7);
    }
}
