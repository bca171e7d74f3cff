//! # casevault-session
//!
//! The PIN-protected session core.
//!
//! ## Modules
//!
//! - [`vault`]: encrypted session blob, PIN salt/pepper, epoch guard, wipe
//! - [`staff`]: device-wrapped staff profile and directory handle
//! - [`pin`]: PIN format checks and the hold-to-confirm gesture
//! - [`controller`]: the lock state machine and attempt counters
//! - [`runtime`]: async owner of the controller: autosave and idle lock timers

pub mod controller;
pub mod pin;
pub mod runtime;
pub mod staff;
pub mod vault;

use std::time::Duration;

use casevault_crypto::{CryptoError, KdfParams};
use casevault_db::DbError;
use casevault_types::LockState;

pub use controller::{LockReport, SessionController};
pub use pin::HoldConfirm;
pub use runtime::{SessionNotice, SessionRuntime};
pub use vault::{CaseCachePurge, PendingPersist, SealedPersist, SessionVault};

/// Error types for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Bad PIN format, mismatched confirmation, or a short confirm hold.
    #[error("{0}")]
    Validation(String),

    /// The derived key did not open the stored blob.
    #[error("incorrect PIN")]
    Authentication,

    /// No stored session artifacts.
    #[error("no stored session")]
    NotFound,

    /// Stored artifacts present but undecodable for a reason other than the key.
    #[error("stored session is corrupted: {0}")]
    Corruption(String),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    /// Encrypt-side platform failure. Nothing was written.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A blocking or background task died before finishing.
    #[error("background task failed: {0}")]
    Background(String),

    #[error("cannot {action} while {state}")]
    InvalidState {
        state: LockState,
        action: &'static str,
    },
}

impl SessionError {
    /// Classify an error raised while opening a stored blob.
    pub(crate) fn from_decrypt(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => Self::Authentication,
            other => Self::Corruption(other.to_string()),
        }
    }

    /// Stored data is gone or unreadable regardless of PIN.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::NotFound | Self::Corruption(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Session timing and lockout policy.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub autosave_interval: Duration,
    pub idle_lock: Duration,
    pub max_pin_attempts: u32,
    pub hold_confirm: Duration,
    pub kdf: KdfParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(casevault_types::AUTOSAVE_INTERVAL_SECS),
            idle_lock: Duration::from_secs(casevault_types::IDLE_LOCK_MINUTES * 60),
            max_pin_attempts: casevault_types::MAX_PIN_ATTEMPTS,
            hold_confirm: Duration::from_millis(casevault_types::HOLD_CONFIRM_MS),
            kdf: KdfParams::default(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use casevault_db::RecordStore;

    pub const FAST_KDF: KdfParams = KdfParams { iterations: 1_000 };

    pub fn fast_config() -> SessionConfig {
        SessionConfig {
            kdf: FAST_KDF,
            ..SessionConfig::default()
        }
    }

    pub fn memory_vault() -> SessionVault {
        SessionVault::new(RecordStore::open_memory().expect("open store"), FAST_KDF)
    }
}
