//! # casevault-cache
//!
//! Versioned offline cache of the application's own files.
//!
//! Files live in named cache generations, one per axis: `<app_prefix>N` for
//! application files and `<vendor_prefix>M` for vendored bundles. A build-time
//! [`CacheManifest`](casevault_types::CacheManifest) lists every file with a
//! content hash; installing a new manifest refetches only what changed.
//!
//! ## Modules
//!
//! - [`storage`]: the generation store (in-memory and on-disk)
//! - [`fetcher`]: network access for manifests and files
//! - [`manager`]: install, activate, fetch and integrity protocols
//! - [`critical`]: critical asset verification and the `assets` mirror
//! - [`manifest`]: manifest generation from a source tree
//! - [`service`]: the manager running in its own execution context

pub mod critical;
pub mod fetcher;
pub mod manager;
pub mod manifest;
pub mod response;
pub mod service;
pub mod storage;

pub use critical::{CriticalReport, CRITICAL_ASSETS};
pub use fetcher::{Fetcher, HttpFetcher};
pub use manager::{ActivateReport, AssetCacheManager, CacheEvent, InstallOutcome, InstallReport};
pub use response::CachedResponse;
pub use service::{CacheHandle, CacheService};
pub use storage::{CacheStorage, FsCacheStorage, MemoryCacheStorage};

/// Reserved entry holding the installed manifest inside the app generation.
pub const MANIFEST_KEY: &str = "__manifest__";

/// Cache key for the site root.
pub const ROOT_KEY: &str = "./";

/// Error types for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Manifest or file fetch failed. The previously active generation is intact.
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("no manifest installed")]
    NotInstalled,

    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record store error: {0}")]
    Db(#[from] casevault_db::DbError),

    /// The cache service has stopped.
    #[error("cache service unavailable")]
    Unavailable,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Where the application is served from and how generations are named.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Scheme, host and port the application is served from.
    pub origin: String,
    pub manifest_path: String,
    pub app_prefix: String,
    pub vendor_prefix: String,
    /// Document served for the site root.
    pub index_path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            manifest_path: "cache-manifest.json".to_string(),
            app_prefix: "mcr-app-v".to_string(),
            vendor_prefix: "mcr-vendor-v".to_string(),
            index_path: "index.html".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn app_generation(&self, version: u32) -> String {
        format!("{}{version}", self.app_prefix)
    }

    pub fn vendor_generation(&self, version: u32) -> String {
        format!("{}{version}", self.vendor_prefix)
    }

    /// Absolute URL for a path relative to the app root.
    pub fn url_for(&self, path: &str) -> String {
        let origin = self.origin.trim_end_matches('/');
        let path = path.trim_start_matches("./").trim_start_matches('/');
        format!("{origin}/{path}")
    }

    /// Cache key for a same-origin URL, or `None` for anything cross-origin.
    pub fn same_origin_key(&self, url: &str) -> Option<String> {
        let origin = self.origin.trim_end_matches('/');
        let rest = url.strip_prefix(origin)?;
        if !(rest.is_empty() || rest.starts_with(['/', '?', '#'])) {
            return None;
        }
        let path = rest.split(['?', '#']).next().unwrap_or_default();
        let path = path.trim_start_matches('/');
        Some(if path.is_empty() {
            ROOT_KEY.to_string()
        } else {
            path.to_string()
        })
    }

    /// Version number encoded in a generation name with the given prefix.
    pub fn generation_version(name: &str, prefix: &str) -> Option<u32> {
        name.strip_prefix(prefix)?.parse().ok()
    }
}
