//! Best-effort secure erase of a single record.
//!
//! The record is first overwritten in place with random bytes at least as long
//! as its serialized form, then deleted. Combined with `secure_delete`, this
//! leaves no plaintext-length hint and no stale page behind. This is not a
//! guarantee against forensic recovery on flash media.

use rand::RngCore;
use tracing::debug;

use crate::{Partition, Record, RecordStore, Result};

/// Minimum overwrite length for text records.
pub const TEXT_FLOOR: usize = 32;

/// Minimum overwrite length for structured or binary records.
pub const STRUCTURED_FLOOR: usize = 2048;

/// Overwrite then delete `key`. Returns whether a record existed.
pub fn overwrite_and_delete(store: &mut RecordStore, partition: Partition, key: &str) -> Result<bool> {
    let Some(existing) = store.get(partition, key)? else {
        return Ok(false);
    };

    let floor = match existing {
        Record::Text(_) => TEXT_FLOOR,
        Record::Json(_) | Record::Bytes(_) => STRUCTURED_FLOOR,
    };
    let len = existing.serialized_len().max(floor);
    let mut noise = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut noise);

    store.set(partition, key, &Record::Bytes(noise))?;
    store.delete(partition, key)?;
    debug!(partition = partition.table(), key, len, "Record overwritten and deleted");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_erase_existing() {
        let mut store = RecordStore::open_memory().expect("open");
        store
            .set(Partition::Phi, "sessionBlob", &Record::Json(json!({"iv": "a", "cipher": "b"})))
            .expect("set");
        assert!(overwrite_and_delete(&mut store, Partition::Phi, "sessionBlob").expect("erase"));
        assert_eq!(store.get(Partition::Phi, "sessionBlob").expect("get"), None);
    }

    #[test]
    fn test_erase_absent_is_noop() {
        let mut store = RecordStore::open_memory().expect("open");
        assert!(!overwrite_and_delete(&mut store, Partition::Meta, "pinSalt").expect("erase"));
    }

    #[test]
    fn test_erase_leaves_other_keys() {
        let mut store = RecordStore::open_memory().expect("open");
        store.set(Partition::Meta, "pinSalt", &Record::Text("s".into())).expect("set");
        store.set(Partition::Meta, "deviceKey", &Record::Bytes(vec![1; 32])).expect("set");
        overwrite_and_delete(&mut store, Partition::Meta, "pinSalt").expect("erase");
        assert!(store.get(Partition::Meta, "deviceKey").expect("get").is_some());
    }
}
