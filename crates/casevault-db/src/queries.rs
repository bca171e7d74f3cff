//! Typed accessors for the stable record keys, organized by domain.
//!
//! Record keys are part of the on-disk format and never change.

pub mod assets;
pub mod session;
pub mod staff;

use crate::{DbError, Record, Result};

fn expect_text(key: &str, record: Option<Record>) -> Result<Option<String>> {
    match record {
        None => Ok(None),
        Some(Record::Text(s)) => Ok(Some(s)),
        Some(_) => Err(DbError::Serialization(format!("'{key}' is not a text record"))),
    }
}

fn expect_json(key: &str, record: Option<Record>) -> Result<Option<serde_json::Value>> {
    match record {
        None => Ok(None),
        Some(Record::Json(v)) => Ok(Some(v)),
        Some(_) => Err(DbError::Serialization(format!("'{key}' is not a json record"))),
    }
}

fn expect_bytes(key: &str, record: Option<Record>) -> Result<Option<Vec<u8>>> {
    match record {
        None => Ok(None),
        Some(Record::Bytes(b)) => Ok(Some(b)),
        Some(_) => Err(DbError::Serialization(format!("'{key}' is not a bytes record"))),
    }
}
