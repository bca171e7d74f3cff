//! # casevault-types
//!
//! Shared domain types used across the casevault workspace.
//!
//! Everything here is plain data: the plaintext session document the view layer
//! binds to, the lock states and unlock outcomes it renders, the asset cache
//! manifest, and the host event envelope. No I/O happens in this crate.

pub mod document;
pub mod events;
pub mod manifest;
pub mod session;

pub use document::{CasePayload, GeneralInfo, NoticeForm, RoiInstance, RoiSet, SessionDocument, StaffProfile};
pub use events::{Event, EventType};
pub use manifest::{AssetStatus, CacheManifest, CriticalStatus, FileSet};
pub use session::{LockReason, LockState, UnlockOutcome, WipeReason};

/// Minimum PIN length in digits.
pub const PIN_MIN_DIGITS: usize = 4;

/// Maximum PIN length in digits.
pub const PIN_MAX_DIGITS: usize = 6;

/// Consecutive wrong PINs that force a wipe.
pub const MAX_PIN_ATTEMPTS: u32 = 5;

/// Autosave interval in seconds.
pub const AUTOSAVE_INTERVAL_SECS: u64 = 30;

/// Idle time before an unlocked session with PHI is locked.
pub const IDLE_LOCK_MINUTES: u64 = 30;

/// Minimum hold duration for the delete-case-data gesture.
pub const HOLD_CONFIRM_MS: u64 = 1500;

#[cfg(test)]
mod tests {
    #[test]
    #[ignore] // Run manually to generate bindings
    fn export_ts_bindings() {
        use ts_rs::TS;
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../bindings");
        std::fs::create_dir_all(&dir).expect("create bindings dir");
        crate::document::SessionDocument::export_all_to(&dir).expect("export document");
        crate::session::UnlockOutcome::export_all_to(&dir).expect("export outcome");
        crate::session::LockState::export_all_to(&dir).expect("export lock state");
        crate::manifest::CriticalStatus::export_all_to(&dir).expect("export status");
        crate::events::EventType::export_all_to(&dir).expect("export events");
    }
}
