//! # casevault-update
//!
//! Decides when a newly activated cache generation may replace the running
//! code. One page-load-time task owns both the foreground update check and the
//! listener for late activations, so exactly one party ever acts on an
//! activation.
//!
//! Reloads happen immediately while no plaintext session is open. While the
//! session is unlocked the reload is deferred until the next lock, a return
//! to no session, or an explicit user request.

pub mod coordinator;
pub mod marker;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use casevault_cache::{CacheEvent, CacheHandle, InstallOutcome};
use serde::Serialize;
use tokio::sync::broadcast;

pub use coordinator::UpdateCoordinator;
pub use marker::ReloadMarker;

/// Error types for the update coordinator.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// The coordinator task has stopped.
    #[error("update coordinator unavailable")]
    Unavailable,

    #[error("reload marker: {0}")]
    Marker(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UpdateError>;

#[derive(Clone, Debug)]
pub struct UpdateConfig {
    /// How long a load waits for an update to finish activating.
    pub activation_timeout: Duration,
    /// A reload marker older than this is ignored.
    pub marker_ttl: Duration,
    /// Where the reload marker lives. `None` disables loop protection.
    pub marker_path: Option<PathBuf>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            activation_timeout: Duration::from_secs(15),
            marker_ttl: Duration::from_secs(60),
            marker_path: None,
        }
    }
}

/// Where the coordinator is in the current load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Offline, or the check found nothing. Nothing pending.
    Idle,
    /// The previous load reloaded for an update; this load skipped the check.
    Skipped,
    /// Waiting (bounded) for a check to finish activating.
    Checking,
    /// The wait timed out; the install continues in the background.
    Background,
    /// An update activated while unlocked and waits for a safe moment.
    Deferred { app_version: u32, vendor_version: u32 },
    /// The view should reload now.
    ReloadRequested { app_version: Option<u32> },
}

impl UpdateStatus {
    pub fn is_reload_requested(&self) -> bool {
        matches!(self, Self::ReloadRequested { .. })
    }
}

pub type CheckFuture = Pin<Box<dyn Future<Output = casevault_cache::Result<InstallOutcome>> + Send>>;

/// Where updates come from: a check that installs and activates, and the
/// lifecycle events it emits.
pub trait UpdateSource: Send + Sync + 'static {
    fn check(&self) -> CheckFuture;
    fn subscribe(&self) -> broadcast::Receiver<CacheEvent>;
}

impl UpdateSource for CacheHandle {
    fn check(&self) -> CheckFuture {
        let handle = self.clone();
        Box::pin(async move { handle.update().await })
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        CacheHandle::subscribe(self)
    }
}
