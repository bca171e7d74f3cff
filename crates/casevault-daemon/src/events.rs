//! Event emission system.
//!
//! Events are pushed from the host to view subscribers as JSON-RPC
//! notifications. Each subscriber has an independent buffer; a slow
//! subscriber loses the oldest events rather than blocking the host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use casevault_types::{Event, EventType};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "session", "update", "host".
    pub categories: Option<Vec<String>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn emit_new(&self, event_type: EventType, payload: serde_json::Value) {
        self.emit(Event::new(event_type, payload));
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        match &self.categories {
            Some(categories) => {
                let category = categorize_event(event.event_type);
                categories.iter().any(|c| c == category)
            }
            None => true,
        }
    }
}

/// Categorize an event type into a category.
fn categorize_event(event_type: EventType) -> &'static str {
    match event_type {
        EventType::SessionUnlocked
        | EventType::SessionLocked
        | EventType::SessionWiped
        | EventType::AutosaveFailed
        | EventType::LockSaveFailed => "session",
        EventType::UpdateDeferred | EventType::ReloadRequested | EventType::AssetsMissing => "update",
        EventType::HostStarted => "host",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit_new(EventType::HostStarted, serde_json::json!({"version": "0.1.0"}));

        let event = rx.try_recv().expect("receive event");
        assert_eq!(event.event_type, EventType::HostStarted);
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_event_filter_categories() {
        let filter = EventFilter {
            categories: Some(vec!["session".to_string()]),
        };
        assert!(filter.matches(&Event::new(EventType::SessionWiped, serde_json::json!({}))));
        assert!(!filter.matches(&Event::new(EventType::UpdateDeferred, serde_json::json!({}))));
        assert!(EventFilter::default().matches(&Event::new(EventType::HostStarted, serde_json::json!({}))));
    }

    #[test]
    fn test_categorize_event() {
        assert_eq!(categorize_event(EventType::SessionLocked), "session");
        assert_eq!(categorize_event(EventType::AutosaveFailed), "session");
        assert_eq!(categorize_event(EventType::ReloadRequested), "update");
        assert_eq!(categorize_event(EventType::HostStarted), "host");
    }
}
