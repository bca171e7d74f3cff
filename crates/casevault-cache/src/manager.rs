//! Install, activate, fetch and integrity protocols.
//!
//! Install fills the generations named by a freshly fetched manifest, copying
//! unchanged entries from the active generation and fetching only what
//! changed. Activate then keeps exactly one generation per axis and deletes
//! every other. A failed install leaves previously existing generations as
//! they were.

use std::collections::HashSet;
use std::sync::Arc;

use casevault_types::{AssetStatus, CacheManifest, CriticalStatus, FileSet};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::fetcher::Fetcher;
use crate::response::CachedResponse;
use crate::storage::{self, CacheStorage};
use crate::{CacheConfig, CacheError, Result, MANIFEST_KEY, ROOT_KEY};

/// Lifecycle signals for pages and the update coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEvent {
    Installed { app_version: u32, vendor_version: u32 },
    Activated { app_version: u32, vendor_version: u32 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub app_version: u32,
    pub vendor_version: u32,
    /// Files downloaded from the network.
    pub fetched: usize,
    /// Files copied from the previous generation.
    pub copied: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The published manifest matches the installed one.
    UpToDate,
    Installed(InstallReport),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub retained: Vec<String>,
    pub deleted: Vec<String>,
}

/// The asset cache manager.
pub struct AssetCacheManager {
    pub(crate) config: CacheConfig,
    pub(crate) storage: Arc<dyn CacheStorage>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    events: broadcast::Sender<CacheEvent>,
}

impl AssetCacheManager {
    pub fn new(config: CacheConfig, storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            storage,
            fetcher,
            events,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<CacheEvent> {
        self.events.clone()
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Fetch the published manifest, bypassing caches.
    pub fn fetch_manifest(&self) -> Result<CacheManifest> {
        let url = self.config.url_for(&self.config.manifest_path);
        let response = self.fetcher.fetch(&url)?;
        if !response.is_ok() {
            return Err(CacheError::Network(format!(
                "manifest fetch failed: HTTP {}",
                response.status
            )));
        }
        serde_json::from_slice(&response.body).map_err(|e| CacheError::Manifest(e.to_string()))
    }

    /// Newest generation for an axis prefix.
    pub fn latest_generation(&self, prefix: &str) -> Result<Option<String>> {
        Ok(self
            .storage
            .names()?
            .into_iter()
            .filter_map(|name| CacheConfig::generation_version(&name, prefix).map(|v| (v, name)))
            .max_by_key(|(version, _)| *version)
            .map(|(_, name)| name))
    }

    /// The manifest embedded in the newest app generation.
    pub fn stored_manifest(&self) -> Result<Option<CacheManifest>> {
        let Some(app) = self.latest_generation(&self.config.app_prefix)? else {
            return Ok(None);
        };
        match self.storage.get(&app, MANIFEST_KEY)? {
            Some(entry) => match serde_json::from_slice(&entry.body) {
                Ok(manifest) => Ok(Some(manifest)),
                Err(e) => {
                    warn!(cache = %app, "Stored manifest unreadable: {e}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Install the published manifest into its generations.
    pub fn install(&self) -> Result<InstallOutcome> {
        let manifest = self.fetch_manifest()?;
        let previous = self.stored_manifest()?;

        let app_gen = self.config.app_generation(manifest.app_version);
        let vendor_gen = self.config.vendor_generation(manifest.vendor_version);

        if previous.as_ref() == Some(&manifest) && self.storage.has(&app_gen, MANIFEST_KEY)? {
            debug!(app_version = manifest.app_version, "Cache already up to date");
            return Ok(InstallOutcome::UpToDate);
        }

        let existing: HashSet<String> = self.storage.names()?.into_iter().collect();
        let old_app = self.latest_generation(&self.config.app_prefix)?;
        let old_vendor = self.latest_generation(&self.config.vendor_prefix)?;

        let mut report = InstallReport {
            app_version: manifest.app_version,
            vendor_version: manifest.vendor_version,
            ..InstallReport::default()
        };

        let filled = self
            .fill_generation(
                &vendor_gen,
                &manifest.vendor,
                previous.as_ref().map(|m| &m.vendor),
                old_vendor.as_deref(),
                &mut report,
            )
            .and_then(|()| {
                self.fill_generation(
                    &app_gen,
                    &manifest.app,
                    previous.as_ref().map(|m| &m.app),
                    old_app.as_deref(),
                    &mut report,
                )
            })
            .and_then(|()| self.finish_app_generation(&app_gen, &manifest));

        if let Err(e) = filled {
            warn!(app_version = manifest.app_version, "Cache install aborted: {e}");
            for generation in [&app_gen, &vendor_gen] {
                if !existing.contains(generation) {
                    if let Err(cleanup) = self.storage.delete_cache(generation) {
                        warn!(cache = %generation, "Failed to drop partial generation: {cleanup}");
                    }
                }
            }
            return Err(e);
        }

        info!(
            app_version = report.app_version,
            vendor_version = report.vendor_version,
            fetched = report.fetched,
            copied = report.copied,
            "Cache generation installed"
        );
        self.emit(CacheEvent::Installed {
            app_version: report.app_version,
            vendor_version: report.vendor_version,
        });
        Ok(InstallOutcome::Installed(report))
    }

    fn fill_generation(
        &self,
        target: &str,
        files: &FileSet,
        previous: Option<&FileSet>,
        source: Option<&str>,
        report: &mut InstallReport,
    ) -> Result<()> {
        for (path, hash) in &files.files {
            let unchanged = previous.and_then(|p| p.hash_of(path)) == Some(hash.as_str());
            if unchanged {
                if let Some(source) = source {
                    if let Some(entry) = self.storage.get(source, path)? {
                        self.storage.put(target, path, &entry)?;
                        report.copied += 1;
                        continue;
                    }
                }
            }

            let response = self.fetcher.fetch(&self.config.url_for(path))?;
            if !response.is_ok() {
                return Err(CacheError::Network(format!("{path}: HTTP {}", response.status)));
            }
            self.storage.put(target, path, &response)?;
            report.fetched += 1;
        }
        Ok(())
    }

    fn finish_app_generation(&self, app_gen: &str, manifest: &CacheManifest) -> Result<()> {
        if let Some(index) = self.storage.get(app_gen, &self.config.index_path)? {
            self.storage.put(app_gen, ROOT_KEY, &index)?;
        }
        self.storage
            .put(app_gen, MANIFEST_KEY, &CachedResponse::json(manifest)?)
    }

    /// Keep only the generations named by the installed manifest.
    pub fn activate(&self) -> Result<ActivateReport> {
        let manifest = self.stored_manifest()?.ok_or(CacheError::NotInstalled)?;
        let retained = vec![
            self.config.app_generation(manifest.app_version),
            self.config.vendor_generation(manifest.vendor_version),
        ];

        let mut deleted = Vec::new();
        for name in self.storage.names()? {
            if !retained.contains(&name) && self.storage.delete_cache(&name)? {
                deleted.push(name);
            }
        }

        info!(
            app_version = manifest.app_version,
            vendor_version = manifest.vendor_version,
            deleted = deleted.len(),
            "Cache generation activated"
        );
        self.emit(CacheEvent::Activated {
            app_version: manifest.app_version,
            vendor_version: manifest.vendor_version,
        });
        Ok(ActivateReport { retained, deleted })
    }

    /// Install, then activate if anything new was installed.
    pub fn update(&self) -> Result<InstallOutcome> {
        let outcome = self.install()?;
        if let InstallOutcome::Installed(_) = outcome {
            self.activate()?;
        }
        Ok(outcome)
    }

    /// Answer a page request.
    ///
    /// Cross-origin requests get an empty 204. Same-origin requests are served
    /// from any generation, then the network; a successful network response is
    /// written into the current app generation. With neither, a 503.
    pub fn fetch(&self, url: &str) -> CachedResponse {
        let Some(key) = self.config.same_origin_key(url) else {
            return CachedResponse::no_content();
        };

        match self.lookup(&key) {
            Ok(Some(hit)) => return hit,
            Ok(None) => {}
            Err(e) => warn!(key = %key, "Cache lookup failed: {e}"),
        }

        match self.fetcher.fetch(url) {
            Ok(response) => {
                if response.is_ok() {
                    self.store_runtime_entry(&key, &response);
                }
                response
            }
            Err(e) => {
                debug!(key = %key, "Offline fallback: {e}");
                CachedResponse::offline()
            }
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
        for name in self.storage.names()? {
            if let Some(hit) = self.storage.get(&name, key)? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    fn store_runtime_entry(&self, key: &str, response: &CachedResponse) {
        let app = match self.latest_generation(&self.config.app_prefix) {
            Ok(Some(app)) => app,
            Ok(None) => return,
            Err(e) => {
                warn!("Cache lookup failed: {e}");
                return;
            }
        };
        if let Err(e) = self.storage.put(&app, key, response) {
            warn!(key, "Failed to cache network response: {e}");
        }
    }

    /// Whether every manifest file is present in a retained generation.
    pub fn integrity(&self) -> Result<CriticalStatus> {
        let Some(manifest) = self.stored_manifest()? else {
            return Ok(CriticalStatus::default());
        };
        let retained = [
            self.config.app_generation(manifest.app_version),
            self.config.vendor_generation(manifest.vendor_version),
        ];

        let mut statuses = Vec::new();
        for asset in manifest.all_files() {
            let mut cached = false;
            for generation in &retained {
                if self.storage.has(generation, asset)? {
                    cached = true;
                    break;
                }
            }
            statuses.push(AssetStatus {
                asset: asset.to_string(),
                cached,
            });
        }
        Ok(CriticalStatus { statuses })
    }

    /// Delete case-scoped generations.
    pub fn purge_case_caches(&self) -> Result<usize> {
        storage::purge_case_caches(self.storage.as_ref())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryCacheStorage;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Serves a fixed site and counts requests per URL.
    #[derive(Default)]
    pub(crate) struct FakeSite {
        pub files: Mutex<HashMap<String, CachedResponse>>,
        pub calls: Mutex<Vec<String>>,
        pub offline: AtomicBool,
    }

    impl FakeSite {
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

    impl Fetcher for FakeSite {
        fn fetch(&self, url: &str) -> Result<CachedResponse> {
            self.calls.lock().expect("lock").push(url.to_string());
            if self.offline.load(Ordering::SeqCst) {
                return Err(CacheError::Network("offline".into()));
            }
            Ok(self
                .files
                .lock()
                .expect("lock")
                .get(url)
                .cloned()
                .unwrap_or_else(|| CachedResponse::new(404, None, Vec::new())))
        }
    }

    pub(crate) fn file_set(entries: &[(&str, &str)]) -> FileSet {
        FileSet {
            files: entries
                .iter()
                .map(|(path, hash)| (path.to_string(), hash.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    pub(crate) fn manifest(app: u32, vendor: u32, app_files: &[(&str, &str)]) -> CacheManifest {
        CacheManifest {
            app_version: app,
            vendor_version: vendor,
            app: file_set(app_files),
            vendor: file_set(&[("vendor/html2pdf.bundle.min.js", "v1hash")]),
        }
    }

    pub(crate) fn setup() -> (AssetCacheManager, Arc<FakeSite>, Arc<MemoryCacheStorage>) {
        let site = Arc::new(FakeSite::default());
        let storage = Arc::new(MemoryCacheStorage::new());
        let manager = AssetCacheManager::new(CacheConfig::default(), storage.clone(), site.clone());
        let config = manager.config().clone();
        for path in ["index.html", "styles.css", "src/main.js", "vendor/html2pdf.bundle.min.js"] {
            site.serve(&config.url_for(path), path);
        }
        (manager, site, storage)
    }

    fn install_v1(manager: &AssetCacheManager, site: &FakeSite) {
        let m = manifest(1, 1, &[("index.html", "aaa"), ("styles.css", "bbb")]);
        site.publish(manager.config(), &m);
        manager.install().expect("install v1");
        manager.activate().expect("activate v1");
    }

    #[test]
    fn test_first_install_fetches_everything() {
        let (manager, site, storage) = setup();
        let m = manifest(1, 1, &[("index.html", "aaa"), ("styles.css", "bbb")]);
        site.publish(manager.config(), &m);

        let outcome = manager.install().expect("install");
        let InstallOutcome::Installed(report) = outcome else {
            panic!("expected install");
        };
        assert_eq!(report.fetched, 3);
        assert_eq!(report.copied, 0);
        assert!(storage.has("mcr-app-v1", ROOT_KEY).expect("has root"));
        assert!(storage.has("mcr-app-v1", MANIFEST_KEY).expect("has manifest"));
        assert_eq!(manager.stored_manifest().expect("stored"), Some(m));
    }

    #[test]
    fn test_delta_install_fetches_only_changed() {
        let (manager, site, _storage) = setup();
        install_v1(&manager, &site);
        site.reset_calls();

        let config = manager.config().clone();
        let m2 = manifest(2, 1, &[("index.html", "aaa"), ("styles.css", "ccc")]);
        site.publish(&config, &m2);
        let InstallOutcome::Installed(report) = manager.install().expect("install v2") else {
            panic!("expected install");
        };

        assert_eq!(site.calls_for(&config.url_for("styles.css")), 1);
        assert_eq!(site.calls_for(&config.url_for("index.html")), 0);
        assert_eq!(site.calls_for(&config.url_for("vendor/html2pdf.bundle.min.js")), 0);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.copied, 2);
    }

    #[test]
    fn test_unchanged_manifest_is_up_to_date() {
        let (manager, site, _storage) = setup();
        install_v1(&manager, &site);
        assert_eq!(manager.install().expect("install"), InstallOutcome::UpToDate);
    }

    #[test]
    fn test_activate_keeps_one_generation_per_axis() {
        let (manager, site, storage) = setup();
        install_v1(&manager, &site);
        storage
            .put("mcr-app-v0", "index.html", &CachedResponse::no_content())
            .expect("stale");
        let m2 = manifest(2, 1, &[("index.html", "aaa"), ("styles.css", "ccc")]);
        site.publish(manager.config(), &m2);
        manager.install().expect("install v2");

        let report = manager.activate().expect("activate");
        assert_eq!(report.retained, vec!["mcr-app-v2".to_string(), "mcr-vendor-v1".to_string()]);
        assert_eq!(
            storage.names().expect("names"),
            vec!["mcr-app-v2".to_string(), "mcr-vendor-v1".to_string()]
        );
        assert!(report.deleted.contains(&"mcr-app-v1".to_string()));
        assert!(report.deleted.contains(&"mcr-app-v0".to_string()));
    }

    #[test]
    fn test_failed_install_keeps_active_generation() {
        let (manager, site, storage) = setup();
        install_v1(&manager, &site);

        let m2 = manifest(2, 1, &[("index.html", "aaa"), ("missing.js", "zzz")]);
        site.publish(manager.config(), &m2);
        assert!(matches!(manager.install(), Err(CacheError::Network(_))));

        assert_eq!(
            storage.names().expect("names"),
            vec!["mcr-app-v1".to_string(), "mcr-vendor-v1".to_string()]
        );
        assert_eq!(
            manager.stored_manifest().expect("stored").map(|m| m.app_version),
            Some(1)
        );
    }

    #[test]
    fn test_offline_manifest_fetch_is_network_error() {
        let (manager, site, _storage) = setup();
        site.offline.store(true, Ordering::SeqCst);
        assert!(matches!(manager.install(), Err(CacheError::Network(_))));
    }

    #[test]
    fn test_fetch_protocol() {
        let (manager, site, storage) = setup();
        install_v1(&manager, &site);
        let config = manager.config().clone();
        site.reset_calls();

        // Cache hit, no network
        let hit = manager.fetch(&config.url_for("styles.css"));
        assert_eq!(hit.body, b"styles.css");
        assert!(site.calls.lock().expect("lock").is_empty());

        // Root navigation resolves to index
        assert_eq!(manager.fetch("http://localhost:8080/").body, b"index.html");

        // Cross-origin rejected without a network call
        let foreign = manager.fetch("https://cdn.example.com/lib.js");
        assert_eq!(foreign.status, 204);
        assert!(site.calls.lock().expect("lock").is_empty());

        // Miss goes to network and is cached for next time
        manager.fetch(&config.url_for("src/main.js"));
        assert!(storage.has("mcr-app-v1", "src/main.js").expect("has"));

        // Miss while offline is a synthetic 503
        site.offline.store(true, Ordering::SeqCst);
        let offline = manager.fetch(&config.url_for("not-cached.png"));
        assert_eq!(offline.status, 503);
        assert_eq!(manager.fetch(&config.url_for("src/main.js")).status, 200);
    }

    #[test]
    fn test_integrity_reports_missing() {
        let (manager, site, storage) = setup();
        install_v1(&manager, &site);
        assert!(manager.integrity().expect("integrity").all_cached());

        storage.delete_cache("mcr-vendor-v1").expect("delete");
        let status = manager.integrity().expect("integrity");
        assert_eq!(
            status.missing().collect::<Vec<_>>(),
            vec!["vendor/html2pdf.bundle.min.js"]
        );
    }

    #[test]
    fn test_integrity_without_install_is_empty() {
        let (manager, _site, _storage) = setup();
        assert!(manager.integrity().expect("integrity").statuses.is_empty());
    }

    #[test]
    fn test_update_activates_only_new_installs() {
        let (manager, site, _storage) = setup();
        let m = manifest(1, 1, &[("index.html", "aaa")]);
        site.publish(manager.config(), &m);
        let mut events = manager.subscribe();

        assert!(matches!(manager.update().expect("update"), InstallOutcome::Installed(_)));
        assert!(matches!(events.try_recv(), Ok(CacheEvent::Installed { .. })));
        assert!(matches!(events.try_recv(), Ok(CacheEvent::Activated { .. })));

        assert_eq!(manager.update().expect("update"), InstallOutcome::UpToDate);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_events_emitted() {
        let (manager, site, _storage) = setup();
        let mut events = manager.subscribe();
        install_v1(&manager, &site);
        assert_eq!(
            events.try_recv().expect("installed"),
            CacheEvent::Installed {
                app_version: 1,
                vendor_version: 1
            }
        );
        assert_eq!(
            events.try_recv().expect("activated"),
            CacheEvent::Activated {
                app_version: 1,
                vendor_version: 1
            }
        );
    }
}
