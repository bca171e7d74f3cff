//! Keyed record store over the four partitions.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{DbError, Result};

/// A logical partition of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Phi,
    Staff,
    Meta,
    Assets,
}

impl Partition {
    pub const ALL: [Partition; 4] = [Self::Phi, Self::Staff, Self::Meta, Self::Assets];

    pub fn table(self) -> &'static str {
        match self {
            Self::Phi => "phi",
            Self::Staff => "staff",
            Self::Meta => "meta",
            Self::Assets => "assets",
        }
    }
}

/// A stored value. The variant is persisted alongside the bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Record {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Bytes(_) => "bytes",
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Text(s) => Ok(s.as_bytes().to_vec()),
            Self::Json(v) => {
                serde_json::to_vec(v).map_err(|e| DbError::Serialization(e.to_string()))
            }
            Self::Bytes(b) => Ok(b.clone()),
        }
    }

    fn decode(kind: &str, raw: Vec<u8>) -> Result<Self> {
        match kind {
            "text" => String::from_utf8(raw)
                .map(Self::Text)
                .map_err(|e| DbError::Serialization(e.to_string())),
            "json" => serde_json::from_slice(&raw)
                .map(Self::Json)
                .map_err(|e| DbError::Serialization(e.to_string())),
            "bytes" => Ok(Self::Bytes(raw)),
            other => Err(DbError::UnknownKind(other.to_string())),
        }
    }

    /// Length of the value in its serialized form.
    pub fn serialized_len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Json(v) => serde_json::to_string(v).map(|s| s.len()).unwrap_or(0),
            Self::Bytes(b) => b.len(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Record store with transparent reconnect.
///
/// The underlying connection can be dropped at any time with
/// [`RecordStore::invalidate`] (or by a connection-level SQLite failure); the
/// next call reopens it. In-memory stores come back empty after a reconnect.
pub struct RecordStore {
    location: Location,
    conn: Option<Connection>,
}

impl RecordStore {
    /// Open a file-backed store.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = crate::open(path)?;
        Ok(Self {
            location: Location::File(path.to_path_buf()),
            conn: Some(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = crate::open_memory()?;
        Ok(Self {
            location: Location::Memory,
            conn: Some(conn),
        })
    }

    /// Drop the current connection. The next operation reconnects.
    pub fn invalidate(&mut self) {
        if self.conn.take().is_some() {
            debug!("Record store connection invalidated");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn connection(&mut self) -> Result<&Connection> {
        if self.conn.is_none() {
            debug!("Reopening record store connection");
            let conn = match &self.location {
                Location::File(path) => crate::open(path)?,
                Location::Memory => crate::open_memory()?,
            };
            self.conn = Some(conn);
        }
        match self.conn.as_ref() {
            Some(conn) => Ok(conn),
            None => Err(DbError::Sqlite(rusqlite::Error::InvalidQuery)),
        }
    }

    fn run<T>(&mut self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let result = op(self.connection()?);
        if let Err(DbError::Sqlite(e)) = &result {
            if is_connection_error(e) {
                warn!("Record store connection lost: {e}");
                self.conn = None;
            }
        }
        result
    }

    /// Get a record, or `None` if the key is absent.
    pub fn get(&mut self, partition: Partition, key: &str) -> Result<Option<Record>> {
        let sql = format!("SELECT kind, value FROM {} WHERE key = ?1", partition.table());
        self.run(|conn| {
            let row: Option<(String, Vec<u8>)> = conn
                .query_row(&sql, [key], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
            row.map(|(kind, raw)| Record::decode(&kind, raw)).transpose()
        })
    }

    /// Insert or replace a record.
    pub fn set(&mut self, partition: Partition, key: &str, value: &Record) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (key, kind, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            partition.table()
        );
        let encoded = value.encode()?;
        let kind = value.kind();
        self.run(|conn| {
            conn.execute(
                &sql,
                rusqlite::params![key, kind, encoded, unix_now() as i64],
            )?;
            Ok(())
        })
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete(&mut self, partition: Partition, key: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?1", partition.table());
        self.run(|conn| Ok(conn.execute(&sql, [key])? > 0))
    }

    /// All keys in a partition, sorted.
    pub fn list_keys(&mut self, partition: Partition) -> Result<Vec<String>> {
        let sql = format!("SELECT key FROM {} ORDER BY key", partition.table());
        self.run(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }

    /// Remove every record in a partition. Returns the number removed.
    pub fn clear(&mut self, partition: Partition) -> Result<usize> {
        let sql = format!("DELETE FROM {}", partition.table());
        self.run(|conn| Ok(conn.execute(&sql, [])?))
    }
}

fn is_connection_error(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => matches!(
            err.code,
            ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase
        ),
        _ => false,
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
