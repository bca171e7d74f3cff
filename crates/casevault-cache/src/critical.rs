//! Critical asset verification.
//!
//! Runs once per page load: confirms every file the app cannot start without
//! is cached, re-caches misses when online, and mirrors cached copies into the
//! record store's `assets` partition as a second line of defense.

use casevault_db::queries::assets;
use casevault_db::RecordStore;
use casevault_types::{AssetStatus, CriticalStatus};
use serde::Serialize;
use tracing::{debug, warn};

use crate::manager::AssetCacheManager;
use crate::Result;

/// Files the application cannot start without.
pub const CRITICAL_ASSETS: &[&str] = &[
    "./",
    "index.html",
    "styles.css",
    "manifest.webmanifest",
    "assets/benchmark-logo.svg",
    "sw.js",
    "src/main.js",
    "src/constants.js",
    "src/state.js",
    "src/db.js",
    "src/crypto.js",
    "src/signature-pad.js",
    "src/pdf.js",
    "src/ui.js",
];

pub const MISSING_ASSETS_WARNING: &str =
    "Some app files are missing. Connect to wifi and reload before going into the field.";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CriticalReport {
    pub status: CriticalStatus,
    /// Set when any asset is still missing after re-cache attempts.
    pub warning: Option<String>,
}

impl AssetCacheManager {
    /// Verify [`CRITICAL_ASSETS`], mirroring hits into `mirror`.
    ///
    /// Does nothing until the first install has created an app generation.
    pub fn verify_critical_assets(&self, mirror: &mut RecordStore, online: bool) -> Result<CriticalReport> {
        let Some(app) = self.latest_generation(&self.config.app_prefix)? else {
            debug!("No app generation yet, skipping critical asset check");
            return Ok(CriticalReport::default());
        };
        let mut generations = vec![app.clone()];
        if let Some(vendor) = self.latest_generation(&self.config.vendor_prefix)? {
            generations.push(vendor);
        }

        let mut statuses = Vec::with_capacity(CRITICAL_ASSETS.len());
        for asset in CRITICAL_ASSETS {
            let mut hit = None;
            for generation in &generations {
                hit = self.storage.get(generation, asset)?;
                if hit.is_some() {
                    break;
                }
            }

            if hit.is_none() && online {
                match self.fetcher.fetch(&self.config.url_for(asset)) {
                    Ok(response) if response.is_ok() => {
                        self.storage.put(&app, asset, &response)?;
                        hit = Some(response);
                    }
                    Ok(response) => debug!(asset, status = response.status, "Re-cache refused"),
                    Err(e) => debug!(asset, "Re-cache failed: {e}"),
                }
            }

            if let Some(response) = &hit {
                if !assets::has(mirror, asset)? {
                    if let Err(e) = assets::put(mirror, asset, &response.body) {
                        warn!(asset, "Failed to mirror asset: {e}");
                    }
                }
            }

            statuses.push(AssetStatus {
                asset: asset.to_string(),
                cached: hit.is_some(),
            });
        }

        let status = CriticalStatus { statuses };
        let warning = if status.all_cached() {
            None
        } else {
            warn!(missing = ?status.missing().collect::<Vec<_>>(), "Critical assets missing");
            Some(MISSING_ASSETS_WARNING.to_string())
        };
        Ok(CriticalReport { status, warning })
    }
}
