//! Glue between the core components and the event bus.

use std::sync::Arc;

use casevault_cache::storage::{purge_case_caches, CacheStorage};
use casevault_session::{CaseCachePurge, SessionNotice};
use casevault_types::{EventType, WipeReason};
use casevault_update::UpdateStatus;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::EventBus;

/// Lets a session wipe drop case-scoped cache generations directly.
pub struct CachePurge {
    storage: Arc<dyn CacheStorage>,
}

impl CachePurge {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage }
    }
}

impl CaseCachePurge for CachePurge {
    fn purge_case_caches(&self) -> usize {
        match purge_case_caches(self.storage.as_ref()) {
            Ok(purged) => purged,
            Err(e) => {
                warn!("Case cache purge failed: {e}");
                0
            }
        }
    }
}

fn wipe_message(reason: WipeReason) -> &'static str {
    match reason {
        WipeReason::Lockout => "Too many incorrect PIN attempts. Case data was erased.",
        WipeReason::Unrecoverable => "The saved session could not be restored and was erased.",
        WipeReason::UserRequested => "Case data deleted.",
        WipeReason::NewClient => "Started a new client session.",
    }
}

/// Publish a session notice on the bus.
pub fn emit_notice(bus: &EventBus, notice: SessionNotice) {
    match notice {
        SessionNotice::Unlocked => bus.emit_new(EventType::SessionUnlocked, json!({})),
        SessionNotice::Locked { reason, save_error } => {
            if let Some(error) = &save_error {
                bus.emit_new(EventType::LockSaveFailed, json!({ "message": error }));
            }
            bus.emit_new(EventType::SessionLocked, json!({ "reason": reason }));
        }
        SessionNotice::Wiped { reason } => bus.emit_new(
            EventType::SessionWiped,
            json!({ "reason": reason, "message": wipe_message(reason) }),
        ),
        SessionNotice::AutosaveFailed { message } => {
            bus.emit_new(EventType::AutosaveFailed, json!({ "message": message }))
        }
    }
}

pub fn spawn_session_bridge(mut notices: broadcast::Receiver<SessionNotice>, bus: EventBus) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => emit_notice(&bus, notice),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Session notices dropped"),
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Session bridge stopped");
    })
}

/// Publish update decisions the view has to act on.
pub fn emit_update(bus: &EventBus, status: &UpdateStatus) {
    match status {
        UpdateStatus::Deferred {
            app_version,
            vendor_version,
        } => bus.emit_new(
            EventType::UpdateDeferred,
            json!({
                "app_version": app_version,
                "vendor_version": vendor_version,
                "message": "An update will apply at the next lock or reload.",
            }),
        ),
        UpdateStatus::ReloadRequested { app_version } => {
            bus.emit_new(EventType::ReloadRequested, json!({ "app_version": app_version }))
        }
        _ => {}
    }
}

pub fn spawn_update_bridge(mut status: watch::Receiver<UpdateStatus>, bus: EventBus) -> JoinHandle<()> {
    tokio::spawn(async move {
        // The coordinator may have decided before this task first ran
        let initial = status.borrow_and_update().clone();
        emit_update(&bus, &initial);
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            emit_update(&bus, &current);
        }
        debug!("Update bridge stopped");
    })
}
