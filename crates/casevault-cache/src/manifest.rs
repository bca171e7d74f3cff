//! Build-time manifest generation.
//!
//! Hashes every listed file under a source tree, bumps each axis version only
//! when its file set changed, writes `cache-manifest.json` and stamps the
//! service script with the resulting versions.

use std::collections::BTreeMap;
use std::path::Path;

use casevault_types::{CacheManifest, FileSet};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{CacheError, Result};

/// Vendored bundles, versioned on their own axis.
pub const VENDOR_FILES: &[&str] = &["vendor/html2pdf.bundle.min.js"];

/// Application files.
pub const APP_FILES: &[&str] = &[
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

/// File whose first line carries the version stamp.
pub const STAMPED_FILE: &str = "sw.js";

pub const MANIFEST_FILE: &str = "cache-manifest.json";

const STAMP_PREFIX: &str = "/* manifest:";

/// Length of the truncated content hash, in hex characters.
const HASH_LEN: usize = 12;

/// Truncated SHA-256 of a file's contents.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut digest = hex::encode(Sha256::digest(content));
    digest.truncate(HASH_LEN);
    digest
}

/// Remove a leading stamp line, if present.
pub fn strip_stamp(source: &str) -> &str {
    if source.starts_with(STAMP_PREFIX) {
        if let Some((first, rest)) = source.split_once('\n') {
            if first.ends_with("*/") {
                return rest;
            }
        }
    }
    source
}

pub fn stamp_line(app_version: u32, vendor_version: u32) -> String {
    format!("{STAMP_PREFIX} app-v{app_version} vendor-v{vendor_version} */")
}

/// Replace or insert the stamp line.
pub fn apply_stamp(source: &str, app_version: u32, vendor_version: u32) -> String {
    format!(
        "{}\n{}",
        stamp_line(app_version, vendor_version),
        strip_stamp(source)
    )
}

/// Result of one generation run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestBuild {
    pub manifest: CacheManifest,
    pub app_changed: bool,
    pub vendor_changed: bool,
}

/// Combine freshly computed hashes with the previous manifest.
pub fn build_manifest(app: FileSet, vendor: FileSet, previous: &CacheManifest) -> ManifestBuild {
    let app_changed = app.differs_from(&previous.app);
    let vendor_changed = vendor.differs_from(&previous.vendor);
    let manifest = CacheManifest {
        app_version: previous.app_version + u32::from(app_changed),
        vendor_version: previous.vendor_version + u32::from(vendor_changed),
        app,
        vendor,
    };
    ManifestBuild {
        manifest,
        app_changed,
        vendor_changed,
    }
}

fn hash_files(root: &Path, files: &[&str]) -> Result<FileSet> {
    let mut hashes = BTreeMap::new();
    for file in files {
        let content = std::fs::read(root.join(file))
            .map_err(|e| CacheError::Manifest(format!("{file}: {e}")))?;
        let hash = if *file == STAMPED_FILE {
            let text = String::from_utf8_lossy(&content);
            hash_bytes(strip_stamp(&text).as_bytes())
        } else {
            hash_bytes(&content)
        };
        hashes.insert(file.to_string(), hash);
    }
    Ok(FileSet { files: hashes })
}

fn read_previous(root: &Path) -> CacheManifest {
    std::fs::read(root.join(MANIFEST_FILE))
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .unwrap_or_default()
}

/// Regenerate the manifest for the tree at `root` and stamp the service script.
pub fn generate(root: &Path, app_files: &[&str], vendor_files: &[&str]) -> Result<ManifestBuild> {
    let app = hash_files(root, app_files)?;
    let vendor = hash_files(root, vendor_files)?;
    let build = build_manifest(app, vendor, &read_previous(root));

    let mut json = serde_json::to_string_pretty(&build.manifest)
        .map_err(|e| CacheError::Manifest(e.to_string()))?;
    json.push('\n');
    std::fs::write(root.join(MANIFEST_FILE), json)?;

    let stamped = root.join(STAMPED_FILE);
    if stamped.exists() {
        let source = std::fs::read_to_string(&stamped)?;
        std::fs::write(
            &stamped,
            apply_stamp(&source, build.manifest.app_version, build.manifest.vendor_version),
        )?;
    }

    info!(
        app_version = build.manifest.app_version,
        app_changed = build.app_changed,
        vendor_version = build.manifest.vendor_version,
        vendor_changed = build.vendor_changed,
        "Manifest generated"
    );
    Ok(build)
}
