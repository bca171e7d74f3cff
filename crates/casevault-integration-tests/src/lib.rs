//! Integration test crate for the CaseVault session core.
//!
//! The library holds shared fixtures only. The scenarios in `tests/` drive
//! several workspace crates together.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p casevault-integration-tests
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use casevault_cache::{AssetCacheManager, CacheConfig, CacheError, CachedResponse, Fetcher, MemoryCacheStorage};
use casevault_crypto::KdfParams;
use casevault_db::RecordStore;
use casevault_session::{SessionConfig, SessionController, SessionVault};
use casevault_types::{CacheManifest, FileSet, SessionDocument};

/// Low iteration count so PIN scenarios run in milliseconds.
pub const FAST_KDF: KdfParams = KdfParams { iterations: 1_000 };

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        kdf: FAST_KDF,
        ..SessionConfig::default()
    }
}

pub fn memory_vault() -> SessionVault {
    SessionVault::new(RecordStore::open_memory().expect("open store"), FAST_KDF)
}

/// A bootstrapped controller over an empty in-memory store.
pub fn memory_controller() -> SessionController {
    let mut controller = SessionController::new(memory_vault(), fast_config());
    controller.bootstrap();
    controller
}

/// A document holding PHI: the client's first name.
pub fn document_for(first_name: &str) -> SessionDocument {
    let mut document = SessionDocument::default();
    document.general.first_name = first_name.to_string();
    document
}

/// An origin that serves a fixed set of files and records every request.
#[derive(Default)]
pub struct FakeOrigin {
    files: Mutex<HashMap<String, CachedResponse>>,
    calls: Mutex<Vec<String>>,
}

impl FakeOrigin {
    pub fn serve(&self, url: &str, body: &str) {
        self.files.lock().expect("lock").insert(
            url.to_string(),
            CachedResponse::new(200, Some("text/plain"), body.as_bytes().to_vec()),
        );
    }

    pub fn publish(&self, config: &CacheConfig, manifest: &CacheManifest) {
        let body = serde_json::to_string(manifest).expect("manifest json");
        self.serve(&config.url_for(&config.manifest_path), &body);
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().expect("lock").iter().filter(|c| *c == url).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().expect("lock").clear();
    }
}

impl Fetcher for FakeOrigin {
    fn fetch(&self, url: &str) -> casevault_cache::Result<CachedResponse> {
        self.calls.lock().expect("lock").push(url.to_string());
        match self.files.lock().expect("lock").get(url) {
            Some(response) => Ok(response.clone()),
            None => Err(CacheError::Network(format!("{url}: not served"))),
        }
    }
}

pub fn file_set(entries: &[(&str, &str)]) -> FileSet {
    FileSet {
        files: entries
            .iter()
            .map(|(path, hash)| (path.to_string(), hash.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// A manifest with the standard vendor bundle and the given app files.
pub fn manifest(app_version: u32, vendor_version: u32, app_files: &[(&str, &str)]) -> CacheManifest {
    CacheManifest {
        app_version,
        vendor_version,
        app: file_set(app_files),
        vendor: file_set(&[("vendor/html2pdf.bundle.min.js", "vendor-hash-1")]),
    }
}

/// A cache manager over memory storage, with every file the fixtures use
/// already served by the origin.
pub fn cache_fixture() -> (AssetCacheManager, Arc<FakeOrigin>, Arc<MemoryCacheStorage>) {
    let origin = Arc::new(FakeOrigin::default());
    let storage = Arc::new(MemoryCacheStorage::new());
    let manager = AssetCacheManager::new(CacheConfig::default(), storage.clone(), origin.clone());
    let config = manager.config().clone();
    for path in ["index.html", "styles.css", "src/main.js", "vendor/html2pdf.bundle.min.js"] {
        origin.serve(&config.url_for(path), path);
    }
    (manager, origin, storage)
}
