//! Durable storage area on `SQLite` with WAL mode.
//!
//! One table, one connection. The pipeline writes a handful of small
//! records per page lifetime, so pooling would buy nothing; a mutex-guarded
//! connection keeps the area `Sync` for the trait.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::area::StorageArea;
use crate::errors::Result;

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// File-backed area surviving process teardown.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the area at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a connection-scoped in-memory area. Used by tests; real callers
    /// wanting no durability should prefer
    /// [`MemoryStorage`](crate::MemoryStorage).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};\
             PRAGMA synchronous = NORMAL;\
             CREATE TABLE IF NOT EXISTS kv (\
                 key   TEXT PRIMARY KEY,\
                 value TEXT NOT NULL\
             );"
        ))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StorageArea for SqliteStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        let _ = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
