//! Mirrored critical assets, keyed by path relative to the app root.

use crate::queries::expect_bytes;
use crate::{Partition, Record, RecordStore, Result};

pub fn put(store: &mut RecordStore, path: &str, body: &[u8]) -> Result<()> {
    store.set(Partition::Assets, path, &Record::Bytes(body.to_vec()))
}

pub fn get(store: &mut RecordStore, path: &str) -> Result<Option<Vec<u8>>> {
    expect_bytes(path, store.get(Partition::Assets, path)?)
}

pub fn has(store: &mut RecordStore, path: &str) -> Result<bool> {
    Ok(store.get(Partition::Assets, path)?.is_some())
}

pub fn list(store: &mut RecordStore) -> Result<Vec<String>> {
    store.list_keys(Partition::Assets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_asset() {
        let mut store = RecordStore::open_memory().expect("open");
        assert!(!has(&mut store, "index.html").expect("has"));
        put(&mut store, "index.html", b"<html></html>").expect("put");
        assert!(has(&mut store, "index.html").expect("has"));
        assert_eq!(
            get(&mut store, "index.html").expect("get").as_deref(),
            Some(&b"<html></html>"[..])
        );
        assert_eq!(list(&mut store).expect("list"), vec!["index.html".to_string()]);
    }
}
