//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use casevault_cache::CacheConfig;
use casevault_crypto::KdfParams;
use casevault_session::SessionConfig;
use casevault_update::UpdateConfig;
use serde::{Deserialize, Serialize};

/// Complete host configuration, read from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub update: UpdateSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub advanced: AdvancedSection,
}

/// Session timing and lockout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,
    #[serde(default = "default_idle_lock")]
    pub idle_lock_minutes: u64,
    #[serde(default = "default_max_pin_attempts")]
    pub max_pin_attempts: u32,
    /// PBKDF2 iteration count. Lowering it weakens every stored session.
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
    #[serde(default = "default_hold_confirm")]
    pub hold_confirm_ms: u64,
}

/// Where the app is served from and how cache generations are named.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
    #[serde(default = "default_app_prefix")]
    pub app_prefix: String,
    #[serde(default = "default_vendor_prefix")]
    pub vendor_prefix: String,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSection {
    #[serde(default = "default_activation_timeout")]
    pub activation_timeout_secs: u64,
    /// Run the update check at startup. Off for air-gapped devices.
    #[serde(default = "default_true")]
    pub check_on_start: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedSection {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub log_file: String,
}

// Default value functions

fn default_autosave_interval() -> u64 {
    casevault_types::AUTOSAVE_INTERVAL_SECS
}

fn default_idle_lock() -> u64 {
    casevault_types::IDLE_LOCK_MINUTES
}

fn default_max_pin_attempts() -> u32 {
    casevault_types::MAX_PIN_ATTEMPTS
}

fn default_pbkdf2_iterations() -> u32 {
    KdfParams::default().iterations
}

fn default_hold_confirm() -> u64 {
    casevault_types::HOLD_CONFIRM_MS
}

fn default_origin() -> String {
    CacheConfig::default().origin
}

fn default_manifest_path() -> String {
    CacheConfig::default().manifest_path
}

fn default_app_prefix() -> String {
    CacheConfig::default().app_prefix
}

fn default_vendor_prefix() -> String {
    CacheConfig::default().vendor_prefix
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_activation_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            autosave_interval_secs: default_autosave_interval(),
            idle_lock_minutes: default_idle_lock(),
            max_pin_attempts: default_max_pin_attempts(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
            hold_confirm_ms: default_hold_confirm(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            manifest_path: default_manifest_path(),
            app_prefix: default_app_prefix(),
            vendor_prefix: default_vendor_prefix(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for UpdateSection {
    fn default() -> Self {
        Self {
            activation_timeout_secs: default_activation_timeout(),
            check_on_start: true,
        }
    }
}

impl Default for AdvancedSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: String::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            autosave_interval: Duration::from_secs(self.session.autosave_interval_secs),
            idle_lock: Duration::from_secs(self.session.idle_lock_minutes * 60),
            max_pin_attempts: self.session.max_pin_attempts,
            hold_confirm: Duration::from_millis(self.session.hold_confirm_ms),
            kdf: KdfParams {
                iterations: self.session.pbkdf2_iterations,
            },
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            origin: self.cache.origin.clone(),
            manifest_path: self.cache.manifest_path.clone(),
            app_prefix: self.cache.app_prefix.clone(),
            vendor_prefix: self.cache.vendor_prefix.clone(),
            ..CacheConfig::default()
        }
    }

    pub fn update_config(&self) -> UpdateConfig {
        UpdateConfig {
            activation_timeout: Duration::from_secs(self.update.activation_timeout_secs),
            marker_path: Some(self.data_dir().join("update-reload.marker")),
            ..UpdateConfig::default()
        }
    }

    /// Whether startup may reach the network for update and critical-asset
    /// checks. This is configuration only; an unreachable origin still
    /// degrades to the offline path when the fetch fails.
    pub fn network_checks_enabled(&self) -> bool {
        self.update.check_on_start
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        // Check env var override first
        if let Ok(dir) = std::env::var("CASEVAULT_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("CASEVAULT_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/CaseVault")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("CaseVault")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            dirs_fallback(".casevault")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/casevault"))
}
