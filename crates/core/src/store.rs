// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable key-value storage.
//!
//! [`KeyValueStore`] is the small interface the messaging layer persists
//! through: offline entities, the outbound queue and sync bookkeeping. Values
//! are opaque strings (JSON in practice). Keys written with a time-to-live
//! become invisible once expired and are purged lazily.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::{ClockSource, SystemClock};
use crate::error::Result;

/// Minimal durable key-value interface.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value for `key`, if present and not expired.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, optionally expiring after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`. Returns true if it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Returns all live entries whose key starts with `prefix`, sorted by key.
    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

fn expiry(now_ms: u64, ttl: Option<Duration>) -> Option<u64> {
    ttl.map(|ttl| now_ms.saturating_add(ttl.as_millis() as u64))
}

/// SQL schema for the key-value table.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);
"#;

/// SQLite-backed [`KeyValueStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Box<dyn ClockSource>,
}

impl SqliteStore {
    /// Open a store at the given path, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn, Box::new(SystemClock))
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, Box::new(SystemClock))
    }

    /// Replace the clock used for expiry decisions.
    pub fn with_clock(mut self, clock: impl ClockSource + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn init(conn: Connection, clock: Box<dyn ClockSource>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn: Mutex::new(conn), clock })
    }

    /// Deletes expired rows. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_ms() as i64;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let removed = conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        Ok(removed)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_ms() as i64;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = expiry(self.clock.now_ms(), ttl).map(|ms| ms as i64);
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let removed = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let now = self.clock.now_ms() as i64;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv
             WHERE substr(key, 1, length(?1)) = ?1
               AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![prefix, now], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;
        Ok(rows)
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<u64>,
}

impl MemoryEntry {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at.map_or(true, |at| at > now_ms)
    }
}

/// In-memory [`KeyValueStore`], for tests and ephemeral sessions.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, MemoryEntry>>,
    clock: Box<dyn ClockSource>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore { entries: Mutex::new(BTreeMap::new()), clock: Box::new(SystemClock) }
    }

    /// Replace the clock used for expiry decisions.
    pub fn with_clock(mut self, clock: impl ClockSource + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Number of stored keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = expiry(self.clock.now_ms(), ttl);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), MemoryEntry { value: value.to_string(), expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.remove(key).is_some())
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| entry.is_live(now));
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
