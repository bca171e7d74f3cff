//! Session blob and PIN key-derivation inputs.

use serde_json::Value;

use crate::queries::{expect_bytes, expect_json, expect_text};
use crate::{Partition, Record, RecordStore, Result};

/// Encrypted session document, `{iv, cipher}`. Lives in `phi`.
pub const SESSION_BLOB: &str = "sessionBlob";
/// Base64-encoded PBKDF2 salt. Lives in `meta`.
pub const PIN_SALT: &str = "pinSalt";
/// Raw pepper bytes. Lives in `meta`. Absent on legacy sessions.
pub const PIN_PEPPER: &str = "pinPepper";

pub fn get_blob(store: &mut RecordStore) -> Result<Option<Value>> {
    expect_json(SESSION_BLOB, store.get(Partition::Phi, SESSION_BLOB)?)
}

pub fn set_blob(store: &mut RecordStore, blob: &Value) -> Result<()> {
    store.set(Partition::Phi, SESSION_BLOB, &Record::Json(blob.clone()))
}

pub fn get_salt(store: &mut RecordStore) -> Result<Option<String>> {
    expect_text(PIN_SALT, store.get(Partition::Meta, PIN_SALT)?)
}

pub fn set_salt(store: &mut RecordStore, salt_b64: &str) -> Result<()> {
    store.set(Partition::Meta, PIN_SALT, &Record::Text(salt_b64.to_string()))
}

pub fn get_pepper(store: &mut RecordStore) -> Result<Option<Vec<u8>>> {
    expect_bytes(PIN_PEPPER, store.get(Partition::Meta, PIN_PEPPER)?)
}

pub fn set_pepper(store: &mut RecordStore, pepper: &[u8]) -> Result<()> {
    store.set(Partition::Meta, PIN_PEPPER, &Record::Bytes(pepper.to_vec()))
}

/// A session exists once a salt has been written.
pub fn has_session(store: &mut RecordStore) -> Result<bool> {
    Ok(store.get(Partition::Meta, PIN_SALT)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbError;
    use serde_json::json;

    fn test_store() -> RecordStore {
        RecordStore::open_memory().expect("open test store")
    }

    #[test]
    fn test_no_session_initially() {
        let mut store = test_store();
        assert!(!has_session(&mut store).expect("has_session"));
        assert_eq!(get_blob(&mut store).expect("blob"), None);
        assert_eq!(get_pepper(&mut store).expect("pepper"), None);
    }

    #[test]
    fn test_session_records() {
        let mut store = test_store();
        set_salt(&mut store, "c2FsdHNhbHRzYWx0c2FsdA==").expect("salt");
        set_pepper(&mut store, &[7u8; 32]).expect("pepper");
        set_blob(&mut store, &json!({"iv": "aXY=", "cipher": "Y3Q="})).expect("blob");

        assert!(has_session(&mut store).expect("has_session"));
        assert_eq!(
            get_salt(&mut store).expect("salt").as_deref(),
            Some("c2FsdHNhbHRzYWx0c2FsdA==")
        );
        assert_eq!(get_pepper(&mut store).expect("pepper"), Some(vec![7u8; 32]));
        assert_eq!(
            get_blob(&mut store).expect("blob"),
            Some(json!({"iv": "aXY=", "cipher": "Y3Q="}))
        );
    }

    #[test]
    fn test_wrong_kind_is_error() {
        let mut store = test_store();
        store
            .set(Partition::Meta, PIN_SALT, &Record::Bytes(vec![1]))
            .expect("set");
        assert!(matches!(get_salt(&mut store), Err(DbError::Serialization(_))));
    }
}
