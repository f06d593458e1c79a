//! SQLite cache backend
//!
//! A single key-value table shared by every process pointed at the same
//! database file, so a refreshed proxy pool is visible across crawl runs.

use crate::cache::traits::{Cache, CacheError, CacheResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// SQLite cache backend
pub struct SqliteCache {
    conn: Connection,
}

impl SqliteCache {
    /// Opens or creates a cache database at the given path
    pub fn new(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cache_entries (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            expires_at INTEGER,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (namespace, key)
        );
        CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
    ",
    )?;
    Ok(())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl Cache for SqliteCache {
    fn get(&mut self, namespace: &str, key: &str) -> CacheResult<Option<String>> {
        let row: Option<(String, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((_, Some(expires_at))) if expires_at <= now_millis() => {
                self.conn.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| now_millis().saturating_add(ttl.as_millis() as i64));
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT OR REPLACE INTO cache_entries (namespace, key, value, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![namespace, key, value, expires_at, now],
        )?;

        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> CacheResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(changed > 0)
    }

    fn clear_namespace(&mut self, namespace: &str) -> CacheResult<u32> {
        let changed = self.conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1",
            params![namespace],
        )?;
        Ok(changed as u32)
    }

    fn purge_expired(&mut self) -> CacheResult<u32> {
        let changed = self.conn.execute(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(changed as u32)
    }
}
