//! Asset cache manifest and integrity status.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Content hashes for one cache axis, keyed by relative path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct FileSet {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl FileSet {
    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// True if any file was added, removed, or re-hashed relative to `previous`.
    pub fn differs_from(&self, previous: &FileSet) -> bool {
        self.files.iter().any(|(path, hash)| previous.hash_of(path) != Some(hash.as_str()))
            || previous.files.keys().any(|path| !self.files.contains_key(path))
    }
}

/// Build-time description of every cached application file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CacheManifest {
    #[serde(default)]
    pub app_version: u32,
    #[serde(default)]
    pub vendor_version: u32,
    #[serde(default)]
    pub app: FileSet,
    #[serde(default)]
    pub vendor: FileSet,
}

impl CacheManifest {
    /// Every path in the manifest, app files first.
    pub fn all_files(&self) -> impl Iterator<Item = &str> {
        self.app
            .files
            .keys()
            .chain(self.vendor.files.keys())
            .map(String::as_str)
    }
}

/// Presence of one manifest file in the retained generations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct AssetStatus {
    pub asset: String,
    pub cached: bool,
}

/// Response to an integrity query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct CriticalStatus {
    pub statuses: Vec<AssetStatus>,
}

impl CriticalStatus {
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.statuses
            .iter()
            .filter(|s| !s.cached)
            .map(|s| s.asset.as_str())
    }

    pub fn all_cached(&self) -> bool {
        self.statuses.iter().all(|s| s.cached)
    }
}
