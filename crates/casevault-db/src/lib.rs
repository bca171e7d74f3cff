//! # casevault-db
//!
//! Record store for the casevault session core.
//! Manages the single SQLite database at `$CASEVAULT_DATA_DIR/casevault.db`.
//!
//! ## Partitions
//!
//! Four keyed partitions, one table each:
//! - `phi`: the encrypted session blob
//! - `staff`: device-wrapped staff profile, default directory handle
//! - `meta`: PIN salt, pepper, device key
//! - `assets`: mirrored copies of critical application files
//!
//! Every operation is atomic on its own; nothing here spans keys.
//! `secure_delete` is enabled so freed pages are zeroed by SQLite as well.

pub mod erase;
pub mod migrations;
pub mod queries;
pub mod schema;
pub mod store;

use rusqlite::Connection;
use std::path::Path;

pub use erase::overwrite_and_delete;
pub use store::{Partition, Record, RecordStore};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the casevault database at the given path.
///
/// Configures WAL mode and secure delete, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA secure_delete = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_wal_mode() {
        let conn = open_memory().expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        // In-memory databases use "memory" mode, not WAL
        assert!(mode == "wal" || mode == "memory");
    }

    #[test]
    fn test_secure_delete_enabled() {
        let conn = open_memory().expect("open");
        let secure: i32 = conn
            .pragma_query_value(None, "secure_delete", |row| row.get(0))
            .expect("get secure_delete");
        assert_eq!(secure, 1);
    }
}
