//! Local durable cache.
//!
//! A device-scoped, string-keyed get/set surface used while no session is
//! active, plus the slots the session manager persists its token into.
//! Every write is a full-blob replace; this is a fallback store, not a
//! cache in the eviction sense — no expiry, no size bound.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};

use crate::error::SyncError;

/// Well-known cache keys.
pub mod keys {
    /// Custom foods blob (JSON array of `FoodItem`).
    pub const CUSTOM_FOODS: &str = "custom_foods";
    /// Daily entries blob (JSON array of `DailyEntry`).
    pub const DAILY_ENTRIES: &str = "daily_entries";
    /// Persisted bearer token.
    pub const AUTH_TOKEN: &str = "auth_token";
    /// Persisted user identity (JSON `User`).
    pub const AUTH_USER: &str = "auth_user";
}

/// Synchronous key-value persistence. Implementations must tolerate
/// concurrent readers behind `&self`; the tracker serializes writes.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;
    fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// Sqlite-backed store: one `kv` table, upsert on conflict.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open the store at the platform data directory (`nosh.db`).
    pub fn open_default() -> Result<Self, SyncError> {
        let dirs = directories::ProjectDirs::from("", "", "nosh")
            .ok_or_else(|| SyncError::Transient("could not determine home directory".into()))?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).map_err(|e| {
            SyncError::Transient(format!(
                "failed to create data directory {}: {e}",
                data_dir.display()
            ))
        })?;
        Self::open(&data_dir.join("nosh.db"))
    }

    fn init(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let now = chrono::Local::now().to_rfc3339();
        self.lock().execute(
            "INSERT INTO kv (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_store(store: &dyn LocalStore) {
        assert!(store.get("missing").unwrap().is_none());

        store.set("k", "v1").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));

        // Full replace on rewrite.
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));

        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());

        // Removing a missing key is a no-op.
        store.remove("k").unwrap();
    }

    #[test]
    fn test_memory_store() {
        check_store(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store_in_memory() {
        check_store(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nosh.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set(keys::DAILY_ENTRIES, "[]").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get(keys::DAILY_ENTRIES).unwrap().as_deref(), Some("[]"));
    }
}
