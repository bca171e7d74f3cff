//! Event types pushed from the host to the view layer.

use serde::{Deserialize, Serialize};

/// Envelope for all host events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

/// All event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EventType {
    // Session events
    SessionUnlocked,
    SessionLocked,
    SessionWiped,
    AutosaveFailed,
    LockSaveFailed,

    // Update events
    UpdateDeferred,
    ReloadRequested,
    AssetsMissing,

    // Host events
    HostStarted,
}

impl EventType {
    /// Wipes are irreversible and must read differently from recoverable hiccups.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::SessionWiped)
    }
}

impl Event {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::UpdateDeferred).expect("serialize");
        assert_eq!(json, "\"update_deferred\"");
    }

    #[test]
    fn test_only_wipe_is_destructive() {
        assert!(EventType::SessionWiped.is_destructive());
        assert!(!EventType::AutosaveFailed.is_destructive());
    }
}
