//! Key-value backends for the local cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, Error as SqlError, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use planner_core::defaults::SQLITE_BUSY_TIMEOUT_MS;
use planner_core::{Error, KeyValueStore, Result};

// =============================================================================
// IN-MEMORY
// =============================================================================

/// In-memory key-value store.
///
/// An optional byte quota (sum of key and value lengths) simulates a device
/// whose storage is full: a write that would exceed it fails with
/// `Error::LocalStorage` and leaves the store unchanged.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit total stored bytes.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently stored.
    pub fn used_bytes(&self) -> usize {
        self.lock()
            .map(|entries| entries.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::LocalStorage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if let Some(quota) = self.quota_bytes {
            let current: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let needed = current - replaced + key.len() + value.len();
            if needed > quota {
                return Err(Error::LocalStorage(format!(
                    "quota exceeded writing '{key}': {needed} of {quota} bytes"
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// =============================================================================
// SQLITE
// =============================================================================

/// Durable key-value store in a single SQLite table.
///
/// The connection is opened once and guarded by a mutex, so every call is a
/// short synchronous statement.
pub struct SqliteKv {
    db_path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)
            .map_err(|err| sqlite_error("open local cache", &db_path, err))?;
        let store = Self::from_connection(db_path, conn)?;
        info!(
            subsystem = "store",
            component = "sqlite_kv",
            path = %store.db_path.display(),
            "Local cache opened"
        );
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db_path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory()
            .map_err(|err| sqlite_error("open local cache", &db_path, err))?;
        Self::from_connection(db_path, conn)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn from_connection(db_path: PathBuf, conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))
            .map_err(|err| sqlite_error("configure local cache", &db_path, err))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS kv (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )
        .map_err(|err| sqlite_error("initialize local cache schema", &db_path, err))?;

        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::LocalStorage("local cache connection lock poisoned".to_string()))
    }
}

impl KeyValueStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|err| sqlite_error("read key", &self.db_path, err))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )
        .map_err(|err| sqlite_error("write key", &self.db_path, err))?;
        debug!(subsystem = "store", component = "sqlite_kv", key, "kv set");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|err| sqlite_error("remove key", &self.db_path, err))?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key")
            .map_err(|err| sqlite_error("list keys", &self.db_path, err))?;
        let rows = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|err| sqlite_error("list keys", &self.db_path, err))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| sqlite_error("list keys", &self.db_path, err))
    }
}

fn sqlite_error(action: &str, db_path: &Path, err: SqlError) -> Error {
    if let SqlError::SqliteFailure(code, message) = &err {
        if code.code == ErrorCode::DatabaseCorrupt || code.code == ErrorCode::NotADatabase {
            let detail = message.as_deref().unwrap_or("sqlite reported corruption");
            return Error::LocalStorage(format!(
                "failed to {action}: local cache '{}' is corrupted ({detail}); remove the file and sign in again to restore notes from the remote",
                db_path.display()
            ));
        }
    }

    Error::LocalStorage(format!(
        "failed to {action} using local cache '{}': {err}",
        db_path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_kv_set_get_remove() {
        let kv = MemoryKv::new();
        kv.set("note_a", "1").unwrap();
        assert_eq!(kv.get("note_a").unwrap().as_deref(), Some("1"));

        kv.set("note_a", "2").unwrap();
        assert_eq!(kv.get("note_a").unwrap().as_deref(), Some("2"));

        kv.remove("note_a").unwrap();
        assert!(kv.get("note_a").unwrap().is_none());
        kv.remove("note_a").unwrap();
    }

    #[test]
    fn test_memory_kv_prefix_scan() {
        let kv = MemoryKv::new();
        kv.set("note_b", "x").unwrap();
        kv.set("note_a", "x").unwrap();
        kv.set("note_list_2025-10-06", "[]").unwrap();
        kv.set("offline_sync_queue", "[]").unwrap();

        let keys = kv.keys_with_prefix("note_").unwrap();
        assert_eq!(keys, vec!["note_a", "note_b", "note_list_2025-10-06"]);
        assert!(kv.keys_with_prefix("zzz").unwrap().is_empty());
    }

    #[test]
    fn test_memory_kv_quota_rejects_and_preserves() {
        let kv = MemoryKv::with_quota(16);
        kv.set("k1", "12345678").unwrap();
        assert_eq!(kv.used_bytes(), 10);

        let err = kv.set("k2", "12345678").unwrap_err();
        assert!(matches!(err, Error::LocalStorage(_)));
        assert!(kv.get("k2").unwrap().is_none());

        // Replacing a value only counts the difference.
        kv.set("k1", "1234567890").unwrap();
        assert_eq!(kv.used_bytes(), 12);
    }

    #[test]
    fn test_sqlite_kv_in_memory() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("note_x", "{}").unwrap();
        kv.set("note_x", "{\"id\":\"x\"}").unwrap();
        assert_eq!(kv.get("note_x").unwrap().as_deref(), Some("{\"id\":\"x\"}"));
        assert_eq!(kv.keys_with_prefix("note_").unwrap(), vec!["note_x"]);
        kv.remove("note_x").unwrap();
        assert!(kv.get("note_x").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_kv_prefix_is_literal() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("note_1", "a").unwrap();
        kv.set("noteX1", "b").unwrap();
        // `_` is a LIKE wildcard; the prefix scan must not treat it as one.
        assert_eq!(kv.keys_with_prefix("note_").unwrap(), vec!["note_1"]);
    }

    #[test]
    fn test_sqlite_error_reports_corruption_hint() {
        let err = sqlite_error(
            "read key",
            Path::new("/tmp/planner.db"),
            SqlError::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
                None,
            ),
        );
        let message = err.to_string();
        assert!(message.contains("corrupted"));
        assert!(message.contains("/tmp/planner.db"));
    }
}
