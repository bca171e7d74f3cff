//! Lock states and the outcomes the view layer renders.

use serde::{Deserialize, Serialize};

/// Position of the session in the PIN/lock state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum LockState {
    /// Page just loaded; no key held. A stored blob may or may not exist.
    NoSession,
    /// No case data exists; waiting for a new PIN to be set.
    AwaitingNewPin,
    /// Key held, plaintext document in memory.
    Unlocked,
    /// Key and plaintext discarded; blob still on disk.
    Locked,
    /// Secure erase in progress.
    Wiping,
}

impl LockState {
    /// Whether a plaintext document and session key may be live.
    pub fn is_unlocked(self) -> bool {
        matches!(self, Self::Unlocked)
    }

    /// States where swapping the running code cannot drop unsaved plaintext.
    pub fn is_reload_safe(self) -> bool {
        matches!(self, Self::NoSession | Self::AwaitingNewPin | Self::Locked)
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoSession => "no_session",
            Self::AwaitingNewPin => "awaiting_new_pin",
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
            Self::Wiping => "wiping",
        };
        f.write_str(name)
    }
}

/// Result of a PIN unlock attempt, as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(tag = "outcome", rename_all = "snake_case")]
#[ts(export)]
pub enum UnlockOutcome {
    /// The session key was derived and the blob decrypted.
    Unlocked,
    /// Wrong PIN; `remaining` attempts before a forced wipe.
    IncorrectPin { remaining: u32 },
    /// The stored session was missing or unreadable and has been erased.
    DataUnavailable,
    /// The attempt limit was reached and case data was deleted.
    TooManyAttempts,
}

impl UnlockOutcome {
    /// User-facing message for this outcome.
    pub fn message(&self) -> String {
        match self {
            Self::Unlocked => "Session restored.".to_string(),
            Self::IncorrectPin { remaining } => {
                let plural = if *remaining == 1 { "" } else { "s" };
                format!("Incorrect PIN. {remaining} attempt{plural} remaining.")
            }
            Self::DataUnavailable => {
                "Saved information was corrupted or lost. Start a new client session.".to_string()
            }
            Self::TooManyAttempts => {
                "For security, case data was deleted after too many failed attempts.".to_string()
            }
        }
    }

    /// Whether this outcome destroyed case data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::DataUnavailable | Self::TooManyAttempts)
    }
}

/// Why a session was locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    User,
    Idle,
}

/// Why case data was erased.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WipeReason {
    /// Explicit "delete case data" with a confirmed hold.
    UserRequested,
    /// User chose to start a new client instead of resuming.
    NewClient,
    /// Attempt limit reached.
    Lockout,
    /// Stored artifacts missing or undecodable.
    Unrecoverable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incorrect_pin_message_pluralization() {
        assert_eq!(
            UnlockOutcome::IncorrectPin { remaining: 1 }.message(),
            "Incorrect PIN. 1 attempt remaining."
        );
        assert_eq!(
            UnlockOutcome::IncorrectPin { remaining: 3 }.message(),
            "Incorrect PIN. 3 attempts remaining."
        );
    }

    #[test]
    fn test_destructive_outcomes() {
        assert!(UnlockOutcome::TooManyAttempts.is_destructive());
        assert!(UnlockOutcome::DataUnavailable.is_destructive());
        assert!(!UnlockOutcome::IncorrectPin { remaining: 4 }.is_destructive());
        assert!(!UnlockOutcome::Unlocked.is_destructive());
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let json = serde_json::to_value(UnlockOutcome::IncorrectPin { remaining: 2 })
            .expect("serialize");
        assert_eq!(json["outcome"], "incorrect_pin");
        assert_eq!(json["remaining"], 2);
    }

    #[test]
    fn test_reload_safe_states() {
        assert!(LockState::Locked.is_reload_safe());
        assert!(LockState::NoSession.is_reload_safe());
        assert!(!LockState::Unlocked.is_reload_safe());
        assert!(!LockState::Wiping.is_reload_safe());
    }
}
