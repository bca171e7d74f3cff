//! PIN format rules and the hold-to-confirm gesture.

use std::time::Duration;

use casevault_types::{PIN_MAX_DIGITS, PIN_MIN_DIGITS};

use crate::{Result, SessionError};

/// A PIN is 4 to 6 ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    (PIN_MIN_DIGITS..=PIN_MAX_DIGITS).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Check a new PIN and its confirmation entry.
pub fn validate_new_pin(pin: &str, confirm: &str) -> Result<()> {
    if !is_valid_pin(pin) {
        return Err(SessionError::Validation(format!(
            "PIN must be {PIN_MIN_DIGITS} to {PIN_MAX_DIGITS} digits."
        )));
    }
    if pin != confirm {
        return Err(SessionError::Validation("PINs do not match.".to_string()));
    }
    Ok(())
}

/// How long the user held the delete control before releasing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HoldConfirm {
    held: Duration,
}

impl HoldConfirm {
    pub fn new(held: Duration) -> Self {
        Self { held }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn held(&self) -> Duration {
        self.held
    }

    /// Accept the gesture only if it was held for at least `required`.
    pub fn check(&self, required: Duration) -> Result<()> {
        if self.held < required {
            return Err(SessionError::Validation(format!(
                "Hold for {:.1} seconds to confirm.",
                required.as_secs_f32()
            )));
        }
        Ok(())
    }
}
