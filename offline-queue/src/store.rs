//! Durable key-value store backing the offline queues
//!
//! Every queue kind is persisted as one JSON array under its own key in the
//! `offline_store` table. Writes replace the whole array in a single
//! statement, so a failed write leaves the previous value in place.

use crate::error::{QueueError, QueueResult};
use crate::models::QueueKind;
use crate::schema::init_queue_schema;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

/// Device-local store holding the pending queues
pub struct QueueStore {
    conn: Mutex<Connection>,
    quota_bytes: Option<usize>,
}

impl QueueStore {
    /// Wrap an open connection, creating the schema if needed
    pub fn new(conn: Connection) -> QueueResult<Self> {
        init_queue_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes: None,
        })
    }

    pub fn open_in_memory() -> QueueResult<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Limit the total size of all stored queues
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn quota_bytes(&self) -> Option<usize> {
        self.quota_bytes
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reads the queue for `kind`. Missing or unreadable data yields an empty list.
    pub fn read<T: DeserializeOwned>(&self, kind: QueueKind) -> Vec<T> {
        let conn = self.lock();
        read_items(&conn, kind)
    }

    /// Replaces the queue for `kind` with `items`
    pub fn write<T: Serialize>(&self, kind: QueueKind, items: &[T]) -> QueueResult<()> {
        let conn = self.lock();
        self.write_items(&conn, kind, items)
    }

    /// Read, mutate and write back a queue without releasing the store in between.
    ///
    /// The closure sees the raw JSON entries, so entries this build cannot
    /// type are written back untouched. A failed read aborts before anything
    /// is written.
    pub fn modify<R, F>(&self, kind: QueueKind, f: F) -> QueueResult<R>
    where
        F: FnOnce(&mut Vec<Value>) -> R,
    {
        let conn = self.lock();
        let raw = load_raw(&conn, kind.storage_key())?;
        let mut entries = match raw {
            Some(raw) => parse_entries(kind.storage_key(), &raw),
            None => Vec::new(),
        };
        let result = f(&mut entries);
        self.write_items(&conn, kind, &entries)?;
        Ok(result)
    }

    /// Total bytes currently used by all queues
    pub fn used_bytes(&self) -> QueueResult<usize> {
        let conn = self.lock();
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM offline_store",
            [],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as usize)
    }

    fn write_items<T: Serialize>(
        &self,
        conn: &Connection,
        kind: QueueKind,
        items: &[T],
    ) -> QueueResult<()> {
        let key = kind.storage_key();
        let json = serde_json::to_string(items)?;

        if let Some(quota) = self.quota_bytes {
            let others: i64 = conn.query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM offline_store WHERE key != ?1",
                params![key],
                |row| row.get(0),
            )?;
            if others.max(0) as usize + json.len() > quota {
                log::error!(
                    "Offline store quota exceeded writing {} ({} bytes, quota {})",
                    key,
                    json.len(),
                    quota
                );
                return Err(QueueError::StorageFull {
                    key: key.to_string(),
                    bytes: json.len(),
                });
            }
        }

        conn.execute(
            "INSERT INTO offline_store (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            params![key, &json],
        )
        .map_err(|e| map_write_error(key, json.len(), e))?;

        log::debug!("Wrote {} items to {}", items.len(), key);
        Ok(())
    }
}

fn map_write_error(key: &str, bytes: usize, err: rusqlite::Error) -> QueueError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DiskFull) => {
            log::error!("Device store full writing {}: {}", key, err);
            QueueError::StorageFull {
                key: key.to_string(),
                bytes,
            }
        }
        _ => QueueError::DatabaseError(err),
    }
}

fn load_raw(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM offline_store WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn read_items<T: DeserializeOwned>(conn: &Connection, kind: QueueKind) -> Vec<T> {
    let key = kind.storage_key();
    match load_raw(conn, key) {
        Ok(Some(raw)) => parse_items(key, &raw),
        Ok(None) => Vec::new(),
        Err(e) => {
            log::error!("Error reading {} from offline store: {}", key, e);
            Vec::new()
        }
    }
}

/// Splits a stored array into its entries. A value that is not an array
/// degrades to an empty queue.
fn parse_entries(key: &str, raw: &str) -> Vec<Value> {
    match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("Corrupt queue data under {}, treating as empty: {}", key, e);
            Vec::new()
        }
    }
}

/// Parses a stored array; entries that fail validation are dropped
fn parse_items<T: DeserializeOwned>(key: &str, raw: &str) -> Vec<T> {
    parse_entries(key, raw)
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                log::warn!("Skipping invalid entry {} in {}: {}", idx, key, e);
                None
            }
        })
        .collect()
}
