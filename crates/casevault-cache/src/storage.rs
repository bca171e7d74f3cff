//! Named cache generations.
//!
//! A generation maps cache keys (paths relative to the app root) to stored
//! responses. [`MemoryCacheStorage`] backs tests; [`FsCacheStorage`] keeps one
//! directory per generation under the data dir so files survive restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::response::CachedResponse;
use crate::{CacheError, Result};

/// Storage for cache generations.
pub trait CacheStorage: Send + Sync {
    /// Names of all existing generations, sorted.
    fn names(&self) -> Result<Vec<String>>;

    fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Store an entry, creating the generation if needed.
    fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()>;

    /// Delete a whole generation. Returns whether it existed.
    fn delete_cache(&self, cache: &str) -> Result<bool>;

    fn has(&self, cache: &str, key: &str) -> Result<bool> {
        Ok(self.get(cache, key)?.is_some())
    }
}

/// Delete every generation whose name marks it as holding case data.
pub fn purge_case_caches(storage: &dyn CacheStorage) -> Result<usize> {
    let mut purged = 0;
    for name in storage.names()? {
        if name.contains("phi") && storage.delete_cache(&name)? {
            debug!(cache = %name, "Case-scoped cache deleted");
            purged += 1;
        }
    }
    Ok(purged)
}

type Generations = BTreeMap<String, BTreeMap<String, CachedResponse>>;

/// In-memory generations.
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<Generations>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CacheError {
        CacheError::Storage("cache lock poisoned".to_string())
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn names(&self) -> Result<Vec<String>> {
        let caches = self.caches.read().map_err(|_| Self::poisoned())?;
        Ok(caches.keys().cloned().collect())
    }

    fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
        let caches = self.caches.read().map_err(|_| Self::poisoned())?;
        Ok(caches.get(cache).and_then(|entries| entries.get(key)).cloned())
    }

    fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()> {
        let mut caches = self.caches.write().map_err(|_| Self::poisoned())?;
        caches
            .entry(cache.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    fn delete_cache(&self, cache: &str) -> Result<bool> {
        let mut caches = self.caches.write().map_err(|_| Self::poisoned())?;
        Ok(caches.remove(cache).is_some())
    }
}

/// On-disk generations: `<root>/<generation>/<hex(key)>` holds the body and
/// `<hex(key)>.json` the status and content type.
pub struct FsCacheStorage {
    root: PathBuf,
}

impl FsCacheStorage {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn cache_dir(&self, cache: &str) -> Result<PathBuf> {
        let valid = !cache.is_empty()
            && !cache.starts_with('.')
            && cache
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CacheError::Storage(format!("invalid cache name '{cache}'")));
        }
        Ok(self.root.join(cache))
    }

    fn entry_paths(&self, cache: &str, key: &str) -> Result<(PathBuf, PathBuf)> {
        let dir = self.cache_dir(cache)?;
        let stem = hex::encode(key.as_bytes());
        Ok((dir.join(&stem), dir.join(format!("{stem}.json"))))
    }
}

impl CacheStorage for FsCacheStorage {
    fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
        let (body_path, meta_path) = self.entry_paths(cache, key)?;
        let meta = match std::fs::read(&meta_path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut response: CachedResponse = serde_json::from_slice(&meta)
            .map_err(|e| CacheError::Storage(format!("entry metadata for '{key}': {e}")))?;
        response.body = std::fs::read(&body_path)?;
        Ok(Some(response))
    }

    fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()> {
        let (body_path, meta_path) = self.entry_paths(cache, key)?;
        if let Some(dir) = body_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let meta = serde_json::to_vec(response).map_err(|e| CacheError::Storage(e.to_string()))?;
        // Metadata last: an entry without it reads as absent
        std::fs::write(&body_path, &response.body)?;
        std::fs::write(&meta_path, meta)?;
        Ok(())
    }

    fn delete_cache(&self, cache: &str) -> Result<bool> {
        let dir = self.cache_dir(cache)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
