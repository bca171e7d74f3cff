//! Lock state machine.
//!
//! ```text
//! NoSession ──(no blob)──────────────▶ AwaitingNewPin ──setup_pin──▶ Unlocked
//! NoSession ──(blob) unlock──────────────────────────────────────────▶ Unlocked
//! Unlocked ──lock / idle──▶ Locked ──unlock──▶ Unlocked
//! any ──delete / lockout / unrecoverable──▶ Wiping ──▶ AwaitingNewPin
//! ```
//!
//! Wrong PINs are counted separately on the resume screen and the lock screen.
//! Reaching the limit on either wipes before another attempt is possible.
//! Missing or corrupted data wipes immediately and is never counted.

use casevault_types::{LockReason, LockState, SessionDocument, StaffProfile, UnlockOutcome, WipeReason};
use tracing::{error, info, warn};

use crate::pin::{validate_new_pin, HoldConfirm};
use crate::vault::{PendingPersist, SealedPersist, SessionVault};
use crate::{Result, SessionConfig, SessionError};

/// What happened on a lock request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockReport {
    /// False when there was nothing to protect and the session stayed open.
    pub locked: bool,
    /// Set when the final save failed. Locking still happened.
    pub save_error: Option<String>,
}

/// Owner of the session key, the plaintext document, and the attempt counters.
pub struct SessionController {
    vault: SessionVault,
    config: SessionConfig,
    state: LockState,
    document: SessionDocument,
    resume_attempts: u32,
    lock_attempts: u32,
}

impl SessionController {
    /// Create a controller. Call [`SessionController::bootstrap`] before use.
    pub fn new(mut vault: SessionVault, config: SessionConfig) -> Self {
        let staff = vault.load_staff();
        Self {
            vault,
            config,
            state: LockState::NoSession,
            document: SessionDocument::with_staff(staff),
            resume_attempts: 0,
            lock_attempts: 0,
        }
    }

    /// Decide the starting state from what is on disk.
    ///
    /// A stored blob leaves the controller in `NoSession`, waiting for the
    /// resume PIN. Anything else, including a failure to read the store, ends
    /// in `AwaitingNewPin` with leftovers erased.
    pub fn bootstrap(&mut self) -> LockState {
        match self.vault.has_stored_blob() {
            Ok(true) => {
                info!("Stored session found, awaiting resume PIN");
                self.state = LockState::NoSession;
            }
            Ok(false) => {
                let leftovers = self.vault.has_session_artifacts().unwrap_or(true);
                if leftovers {
                    if let Err(e) = self.wipe(WipeReason::Unrecoverable) {
                        warn!("Failed to clear partial session: {e}");
                    }
                }
                self.state = LockState::AwaitingNewPin;
            }
            Err(e) => {
                error!("Session restore failed, starting over: {e}");
                if let Err(e) = self.wipe(WipeReason::Unrecoverable) {
                    warn!("Wipe after failed restore also failed: {e}");
                }
            }
        }
        self.state
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn vault_mut(&mut self) -> &mut SessionVault {
        &mut self.vault
    }

    /// Wrong-PIN count for the screen currently shown.
    pub fn attempts(&self) -> u32 {
        match self.state {
            LockState::Locked => self.lock_attempts,
            _ => self.resume_attempts,
        }
    }

    /// The plaintext document. Only available while unlocked.
    pub fn document(&self) -> Result<&SessionDocument> {
        self.require_unlocked("read the document")?;
        Ok(&self.document)
    }

    /// Replace the plaintext document. Staff changes are saved to their own
    /// partition; case data waits for the next persist.
    pub fn set_document(&mut self, document: SessionDocument) -> Result<()> {
        self.require_unlocked("edit the document")?;
        if document.staff != self.document.staff {
            self.vault.save_staff(&document.staff)?;
        }
        self.document = document;
        Ok(())
    }

    pub fn staff(&self) -> &StaffProfile {
        &self.document.staff
    }

    /// Update the staff profile. Allowed in any state.
    pub fn set_staff(&mut self, staff: StaffProfile) -> Result<()> {
        self.vault.save_staff(&staff)?;
        self.document.staff = staff;
        Ok(())
    }

    /// Set the PIN for a new session and unlock it.
    pub fn setup_pin(&mut self, pin: &str, confirm: &str) -> Result<()> {
        if self.state != LockState::AwaitingNewPin {
            return Err(SessionError::InvalidState {
                state: self.state,
                action: "set a new PIN",
            });
        }
        validate_new_pin(pin, confirm)?;

        self.vault.setup_new_session(pin)?;
        self.resume_attempts = 0;
        self.lock_attempts = 0;
        self.state = LockState::Unlocked;
        info!("New session started");
        Ok(())
    }

    /// Try to open the stored session with `pin`.
    ///
    /// Wrong PINs and destructive outcomes are reported in the returned
    /// [`UnlockOutcome`]. `Err` is reserved for storage failures and calls
    /// from a state with nothing to unlock.
    pub fn unlock(&mut self, pin: &str) -> Result<UnlockOutcome> {
        let on_lock_screen = match self.state {
            LockState::Locked => true,
            LockState::NoSession => false,
            state => {
                return Err(SessionError::InvalidState {
                    state,
                    action: "unlock",
                })
            }
        };

        match self.vault.unlock(pin) {
            Ok(payload) => {
                let staff = self.document.staff.clone();
                self.document = SessionDocument::from_payload(payload, staff);
                self.resume_attempts = 0;
                self.lock_attempts = 0;
                self.state = LockState::Unlocked;
                info!(lock_screen = on_lock_screen, "Session unlocked");
                Ok(UnlockOutcome::Unlocked)
            }
            Err(SessionError::Authentication) => {
                let counter = if on_lock_screen {
                    &mut self.lock_attempts
                } else {
                    &mut self.resume_attempts
                };
                *counter += 1;
                let attempts = *counter;
                warn!(attempts, lock_screen = on_lock_screen, "Incorrect PIN");

                if attempts >= self.config.max_pin_attempts {
                    self.wipe(WipeReason::Lockout)?;
                    Ok(UnlockOutcome::TooManyAttempts)
                } else {
                    Ok(UnlockOutcome::IncorrectPin {
                        remaining: self.config.max_pin_attempts - attempts,
                    })
                }
            }
            Err(e) if e.is_unrecoverable() => {
                warn!("Stored session unrecoverable: {e}");
                self.wipe(WipeReason::Unrecoverable)?;
                Ok(UnlockOutcome::DataUnavailable)
            }
            Err(e) => Err(e),
        }
    }

    /// Lock the session, saving first.
    ///
    /// A no-op unless unlocked with PHI in the document. A failed save is
    /// reported but does not stop the lock.
    pub fn lock(&mut self, reason: LockReason) -> LockReport {
        if self.state != LockState::Unlocked || !self.document.has_phi() {
            return LockReport {
                locked: false,
                save_error: None,
            };
        }

        let save_error = match self.vault.persist(&self.document) {
            Ok(_) => None,
            Err(e) => {
                warn!(?reason, "Save before lock failed: {e}");
                Some(e.to_string())
            }
        };

        self.vault.discard_key();
        self.document = SessionDocument::with_staff(self.document.staff.clone());
        self.lock_attempts = 0;
        self.state = LockState::Locked;
        info!(?reason, "Session locked");

        LockReport {
            locked: true,
            save_error,
        }
    }

    /// Whether the idle timer should lock when it fires.
    pub fn idle_lock_armed(&self) -> bool {
        self.state == LockState::Unlocked && self.vault.has_key() && self.document.has_phi()
    }

    /// Explicit "delete case data", gated on a long enough hold.
    pub fn delete_case_data(&mut self, hold: HoldConfirm) -> Result<()> {
        hold.check(self.config.hold_confirm)?;
        self.wipe(WipeReason::UserRequested)
    }

    /// Abandon any stored session and wait for a new PIN.
    pub fn start_new_client(&mut self) -> Result<()> {
        self.wipe(WipeReason::NewClient)
    }

    /// Erase case data and return to `AwaitingNewPin`.
    ///
    /// The state always ends in `AwaitingNewPin`; an erase failure is still
    /// returned to the caller.
    pub fn wipe(&mut self, reason: WipeReason) -> Result<()> {
        self.state = LockState::Wiping;
        let staff = self.document.staff.clone();
        self.document = SessionDocument::with_staff(staff);

        let result = self.vault.wipe();

        self.resume_attempts = 0;
        self.lock_attempts = 0;
        self.state = LockState::AwaitingNewPin;
        match &result {
            Ok(()) => info!(?reason, "Case data wiped"),
            Err(e) => error!(?reason, "Case data wipe incomplete: {e}"),
        }
        result
    }

    /// Capture the document for a background save, if one is due.
    pub fn begin_autosave(&mut self) -> Option<PendingPersist> {
        if self.state != LockState::Unlocked {
            return None;
        }
        self.vault.begin_persist(&self.document)
    }

    /// Finish a background save. Stale results are discarded.
    pub fn commit_autosave(&mut self, sealed: SealedPersist) -> Result<bool> {
        self.vault.commit(sealed)
    }

    /// Save synchronously. Returns whether anything was written.
    pub fn save_now(&mut self) -> Result<bool> {
        if self.state != LockState::Unlocked {
            return Ok(false);
        }
        self.vault.persist(&self.document)
    }

    fn require_unlocked(&self, action: &'static str) -> Result<()> {
        if self.state.is_unlocked() {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                state: self.state,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fast_config, memory_vault};
    use casevault_db::queries::session as keys;
    use casevault_db::Partition;
    use casevault_types::GeneralInfo;

    fn controller() -> SessionController {
        let mut c = SessionController::new(memory_vault(), fast_config());
        c.bootstrap();
        c
    }

    fn phi_document(staff: &StaffProfile) -> SessionDocument {
        SessionDocument {
            general: GeneralInfo {
                first_name: "A".into(),
                ..GeneralInfo::default()
            },
            staff: staff.clone(),
            ..SessionDocument::default()
        }
    }

    fn locked_controller() -> SessionController {
        let mut c = controller();
        c.setup_pin("1234", "1234").expect("setup");
        let doc = phi_document(c.staff());
        c.set_document(doc).expect("set document");
        assert!(c.lock(LockReason::User).locked);
        c
    }

    fn blob_present(c: &mut SessionController) -> bool {
        c.vault_mut()
            .store_mut()
            .get(Partition::Phi, keys::SESSION_BLOB)
            .expect("get")
            .is_some()
    }

    #[test]
    fn test_fresh_install_awaits_pin() {
        let c = controller();
        assert_eq!(c.state(), LockState::AwaitingNewPin);
    }

    #[test]
    fn test_setup_validation_has_no_penalty() {
        let mut c = controller();
        assert!(matches!(c.setup_pin("12", "12"), Err(SessionError::Validation(_))));
        assert!(matches!(c.setup_pin("1234", "4321"), Err(SessionError::Validation(_))));
        assert_eq!(c.state(), LockState::AwaitingNewPin);
        assert_eq!(c.attempts(), 0);
        c.setup_pin("1234", "1234").expect("setup");
        assert_eq!(c.state(), LockState::Unlocked);
    }

    #[test]
    fn test_lock_unlock_roundtrip() {
        let mut c = locked_controller();
        assert_eq!(c.state(), LockState::Locked);
        assert!(c.document().is_err());

        assert_eq!(c.unlock("1234").expect("unlock"), UnlockOutcome::Unlocked);
        assert_eq!(c.document().expect("document").general.first_name, "A");
    }

    #[test]
    fn test_lock_without_phi_is_noop() {
        let mut c = controller();
        c.setup_pin("1234", "1234").expect("setup");
        let report = c.lock(LockReason::User);
        assert!(!report.locked);
        assert_eq!(c.state(), LockState::Unlocked);
    }

    #[test]
    fn test_lock_clears_plaintext_keeps_staff() {
        let mut c = controller();
        let staff = StaffProfile {
            first_name: "Dana".into(),
            last_name: "Lee".into(),
            role: "CM".into(),
        };
        c.set_staff(staff.clone()).expect("staff");
        c.setup_pin("1234", "1234").expect("setup");
        c.set_document(phi_document(&staff)).expect("set");
        c.lock(LockReason::Idle);

        assert_eq!(c.staff(), &staff);
        assert!(!c.vault_mut().has_key());
        assert!(!c.idle_lock_armed());
    }

    #[test]
    fn test_wrong_pin_counts_down() {
        let mut c = locked_controller();
        assert_eq!(
            c.unlock("9999").expect("unlock"),
            UnlockOutcome::IncorrectPin { remaining: 4 }
        );
        assert_eq!(c.attempts(), 1);
        assert_eq!(c.state(), LockState::Locked);
        assert!(blob_present(&mut c));
    }

    #[test]
    fn test_fifth_wrong_pin_wipes() {
        let mut c = locked_controller();
        for expected in (1..=4).rev() {
            assert_eq!(
                c.unlock("0000").expect("unlock"),
                UnlockOutcome::IncorrectPin { remaining: expected }
            );
        }
        assert_eq!(c.unlock("0000").expect("unlock"), UnlockOutcome::TooManyAttempts);
        assert_eq!(c.state(), LockState::AwaitingNewPin);
        assert!(!blob_present(&mut c));
        assert!(matches!(
            c.unlock("1234"),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_success_resets_counter() {
        let mut c = locked_controller();
        c.unlock("0000").expect("unlock");
        c.unlock("0000").expect("unlock");
        c.unlock("1234").expect("unlock");
        assert_eq!(c.attempts(), 0);
    }

    #[test]
    fn test_resume_after_restart() {
        let mut c = locked_controller();
        let vault = std::mem::replace(c.vault_mut(), memory_vault());
        let mut resumed = SessionController::new(vault, fast_config());
        assert_eq!(resumed.bootstrap(), LockState::NoSession);
        assert_eq!(resumed.unlock("1234").expect("unlock"), UnlockOutcome::Unlocked);
    }

    #[test]
    fn test_corrupted_blob_wipes_without_counting() {
        let mut c = locked_controller();
        keys::set_blob(c.vault_mut().store_mut(), &serde_json::json!("garbage")).expect("set");
        assert_eq!(c.unlock("1234").expect("unlock"), UnlockOutcome::DataUnavailable);
        assert_eq!(c.state(), LockState::AwaitingNewPin);
        assert_eq!(c.attempts(), 0);
    }

    #[test]
    fn test_partial_session_cleared_on_bootstrap() {
        let mut vault = memory_vault();
        vault.setup_new_session("1234").expect("setup");
        vault.discard_key();
        let mut c = SessionController::new(vault, fast_config());
        assert_eq!(c.bootstrap(), LockState::AwaitingNewPin);
        assert!(!c.vault_mut().has_session_artifacts().expect("artifacts"));
    }

    #[test]
    fn test_delete_requires_long_hold() {
        let mut c = controller();
        c.setup_pin("1234", "1234").expect("setup");
        let doc = phi_document(c.staff());
        c.set_document(doc).expect("set");
        c.save_now().expect("save");

        assert!(matches!(
            c.delete_case_data(HoldConfirm::from_millis(400)),
            Err(SessionError::Validation(_))
        ));
        assert_eq!(c.state(), LockState::Unlocked);
        assert!(blob_present(&mut c));

        c.delete_case_data(HoldConfirm::from_millis(1500)).expect("delete");
        assert_eq!(c.state(), LockState::AwaitingNewPin);
        assert!(!blob_present(&mut c));
    }

    #[test]
    fn test_start_new_client_from_resume_screen() {
        let mut c = locked_controller();
        c.start_new_client().expect("new client");
        assert_eq!(c.state(), LockState::AwaitingNewPin);
        c.setup_pin("5678", "5678").expect("setup");
        assert!(c.document().expect("document").general.first_name.is_empty());
    }

    #[test]
    fn test_lock_save_survives_older_autosave() {
        let mut c = controller();
        c.setup_pin("1234", "1234").expect("setup");
        let mut doc = phi_document(c.staff());
        doc.general.first_name = "v1".into();
        c.set_document(doc.clone()).expect("set v1");

        // Background save captures v1, then the user edits and locks
        let pending = c.begin_autosave().expect("autosave due");
        doc.general.first_name = "v2".into();
        c.set_document(doc).expect("set v2");
        assert!(c.lock(LockReason::User).locked);

        let sealed = pending.seal().expect("seal");
        assert!(!c.commit_autosave(sealed).expect("commit"));

        assert_eq!(c.unlock("1234").expect("unlock"), UnlockOutcome::Unlocked);
        assert_eq!(c.document().expect("document").general.first_name, "v2");
    }

    #[test]
    fn test_idle_lock_arming() {
        let mut c = controller();
        assert!(!c.idle_lock_armed());
        c.setup_pin("1234", "1234").expect("setup");
        assert!(!c.idle_lock_armed());
        let doc = phi_document(c.staff());
        c.set_document(doc).expect("set");
        assert!(c.idle_lock_armed());
    }
}
