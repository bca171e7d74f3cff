//! SQL schema definitions.
//!
//! One table per logical partition. Every row is a single keyed record; `kind`
//! records how `value` was written so it reads back as the same shape.

/// Partition table names, in creation order.
pub const PARTITION_TABLES: [&str; 4] = ["phi", "staff", "meta", "assets"];

/// Complete schema for casevault v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Case data (PHI). Only ciphertext is ever written here.
-- ============================================================

CREATE TABLE IF NOT EXISTS phi (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('text', 'json', 'bytes')),
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Staff identity. Survives wipes.
-- ============================================================

CREATE TABLE IF NOT EXISTS staff (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('text', 'json', 'bytes')),
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Key material metadata: PIN salt, pepper, device key.
-- ============================================================

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('text', 'json', 'bytes')),
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Mirrored copies of critical application assets.
-- ============================================================

CREATE TABLE IF NOT EXISTS assets (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('text', 'json', 'bytes')),
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;
