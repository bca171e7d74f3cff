//! Staff identity records. These survive wipes.

use serde_json::Value;

use crate::queries::{expect_bytes, expect_json, expect_text};
use crate::{Partition, Record, RecordStore, Result};

/// Staff profile, device-wrapped (or legacy plaintext). Lives in `staff`.
pub const PROFILE: &str = "profile";
/// Preferred export directory handle. Lives in `staff`.
pub const DEFAULT_DIR_HANDLE: &str = "defaultDirHandle";
/// Software device key bytes. Lives in `meta`.
pub const DEVICE_KEY: &str = "deviceKey";

pub fn get_profile(store: &mut RecordStore) -> Result<Option<Value>> {
    expect_json(PROFILE, store.get(Partition::Staff, PROFILE)?)
}

pub fn set_profile(store: &mut RecordStore, profile: &Value) -> Result<()> {
    store.set(Partition::Staff, PROFILE, &Record::Json(profile.clone()))
}

pub fn get_dir_handle(store: &mut RecordStore) -> Result<Option<String>> {
    expect_text(DEFAULT_DIR_HANDLE, store.get(Partition::Staff, DEFAULT_DIR_HANDLE)?)
}

pub fn set_dir_handle(store: &mut RecordStore, handle: &str) -> Result<()> {
    store.set(
        Partition::Staff,
        DEFAULT_DIR_HANDLE,
        &Record::Text(handle.to_string()),
    )
}

pub fn get_device_key(store: &mut RecordStore) -> Result<Option<Vec<u8>>> {
    expect_bytes(DEVICE_KEY, store.get(Partition::Meta, DEVICE_KEY)?)
}

pub fn set_device_key(store: &mut RecordStore, key: &[u8]) -> Result<()> {
    store.set(Partition::Meta, DEVICE_KEY, &Record::Bytes(key.to_vec()))
}
