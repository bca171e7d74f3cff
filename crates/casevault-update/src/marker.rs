//! Short-lived "just reloaded for an update" marker.
//!
//! Set right before an update reload; the next load consumes it and skips its
//! own update check so a reload cannot trigger another reload.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::Result;

pub struct ReloadMarker {
    path: Option<PathBuf>,
    ttl: Duration,
}

impl ReloadMarker {
    pub fn new(path: Option<PathBuf>, ttl: Duration) -> Self {
        Self { path, ttl }
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    pub fn set(&self) -> Result<()> {
        if let Some(path) = &self.path {
            std::fs::write(path, Self::now_secs().to_string())?;
        }
        Ok(())
    }

    /// Remove the marker, returning whether it was present and still fresh.
    pub fn take_fresh(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        let written = match std::fs::read_to_string(path) {
            Ok(raw) => raw.trim().parse::<u64>().ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!("Unreadable reload marker: {e}");
                None
            }
        };
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to clear reload marker: {e}");
        }

        let fresh = written
            .map(|at| Self::now_secs().saturating_sub(at) <= self.ttl.as_secs())
            .unwrap_or(false);
        debug!(fresh, "Reload marker consumed");
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("casevault-marker-{}-{tag}", std::process::id()))
    }

    #[test]
    fn test_marker_is_consumed_once() {
        let path = marker_path("once");
        let marker = ReloadMarker::new(Some(path.clone()), Duration::from_secs(60));
        assert!(!marker.take_fresh());
        marker.set().expect("set");
        assert!(marker.take_fresh());
        assert!(!marker.take_fresh());
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_marker_is_ignored() {
        let path = marker_path("stale");
        std::fs::write(&path, "1000").expect("write");
        let marker = ReloadMarker::new(Some(path.clone()), Duration::from_secs(60));
        assert!(!marker.take_fresh());
        assert!(!path.exists());
    }

    #[test]
    fn test_disabled_marker() {
        let marker = ReloadMarker::new(None, Duration::from_secs(60));
        marker.set().expect("set");
        assert!(!marker.take_fresh());
    }
}
