//! Async owner of the [`SessionController`].
//!
//! One `SessionRuntime` exists per host process. It runs two background
//! tasks next to the controller:
//!
//! - **autosave**: every `autosave_interval`, capture the document under the
//!   lock, seal it on the blocking pool, then commit. The commit is dropped if
//!   a wipe, a lock, or a newer save landed in between.
//! - **idle lock**: locks after `idle_lock` without [`SessionRuntime::touch`],
//!   but only while the session is unlocked with PHI in the document.
//!
//! Key derivation is slow by design, so every operation that may derive a key
//! runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use casevault_types::{
    LockReason, LockState, SessionDocument, StaffProfile, UnlockOutcome, WipeReason,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::controller::{LockReport, SessionController};
use crate::pin::HoldConfirm;
use crate::{Result, SessionError};

/// Notifications for the view layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionNotice {
    Unlocked,
    Locked {
        reason: LockReason,
        save_error: Option<String>,
    },
    Wiped {
        reason: WipeReason,
    },
    /// Transient; the next tick retries.
    AutosaveFailed {
        message: String,
    },
}

struct Shared {
    controller: Mutex<SessionController>,
    notices: broadcast::Sender<SessionNotice>,
    state: watch::Sender<LockState>,
    activity: watch::Sender<Instant>,
}

impl Shared {
    fn publish(&self, controller: &SessionController) {
        let next = controller.state();
        self.state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

/// The running session: controller plus autosave and idle timers.
pub struct SessionRuntime {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionRuntime {
    /// Bootstrap `controller` and start the timers. Must be called inside a
    /// Tokio runtime.
    pub fn start(mut controller: SessionController) -> Self {
        let initial = controller.bootstrap();
        let autosave_interval = controller.config().autosave_interval;
        let idle_lock = controller.config().idle_lock;

        let (notices, _) = broadcast::channel(64);
        let (state, _) = watch::channel(initial);
        let (activity, activity_rx) = watch::channel(Instant::now());

        let shared = Arc::new(Shared {
            controller: Mutex::new(controller),
            notices,
            state,
            activity,
        });

        let tasks = vec![
            tokio::spawn(autosave_loop(shared.clone(), autosave_interval)),
            tokio::spawn(idle_loop(shared.clone(), activity_rx, idle_lock)),
        ];

        info!(state = %initial, "Session runtime started");
        Self { shared, tasks }
    }

    pub fn state(&self) -> LockState {
        *self.shared.state.borrow()
    }

    /// Observe lock state transitions.
    pub fn watch_state(&self) -> watch::Receiver<LockState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.shared.notices.subscribe()
    }

    /// Record user activity. Rearms the idle timer; no I/O.
    pub fn touch(&self) {
        self.shared.activity.send_replace(Instant::now());
    }

    /// Direct access to the controller.
    pub fn controller(&self) -> &Mutex<SessionController> {
        &self.shared.controller
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut SessionController) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || {
            let mut controller = shared.controller.blocking_lock();
            let result = op(&mut controller);
            shared.publish(&controller);
            result
        })
        .await
        .map_err(|e| SessionError::Background(e.to_string()))?
    }

    pub async fn setup_pin(&self, pin: String, confirm: String) -> Result<()> {
        let pin = Zeroizing::new(pin);
        let confirm = Zeroizing::new(confirm);
        self.blocking(move |c| c.setup_pin(&pin, &confirm)).await?;
        self.touch();
        self.shared.notify(SessionNotice::Unlocked);
        Ok(())
    }

    pub async fn unlock(&self, pin: String) -> Result<UnlockOutcome> {
        let pin = Zeroizing::new(pin);
        let outcome = self.blocking(move |c| c.unlock(&pin)).await?;
        match outcome {
            UnlockOutcome::Unlocked => {
                self.touch();
                self.shared.notify(SessionNotice::Unlocked);
            }
            UnlockOutcome::TooManyAttempts => self.shared.notify(SessionNotice::Wiped {
                reason: WipeReason::Lockout,
            }),
            UnlockOutcome::DataUnavailable => self.shared.notify(SessionNotice::Wiped {
                reason: WipeReason::Unrecoverable,
            }),
            UnlockOutcome::IncorrectPin { .. } => {}
        }
        Ok(outcome)
    }

    pub async fn lock(&self) -> LockReport {
        let report = {
            let mut controller = self.shared.controller.lock().await;
            let report = controller.lock(LockReason::User);
            self.shared.publish(&controller);
            report
        };
        if report.locked {
            self.shared.notify(SessionNotice::Locked {
                reason: LockReason::User,
                save_error: report.save_error.clone(),
            });
        }
        report
    }

    pub async fn delete_case_data(&self, hold: HoldConfirm) -> Result<()> {
        let result = {
            let mut controller = self.shared.controller.lock().await;
            let result = controller.delete_case_data(hold);
            self.shared.publish(&controller);
            result
        };
        if !matches!(result, Err(SessionError::Validation(_))) {
            self.shared.notify(SessionNotice::Wiped {
                reason: WipeReason::UserRequested,
            });
        }
        result
    }

    pub async fn start_new_client(&self) -> Result<()> {
        let result = {
            let mut controller = self.shared.controller.lock().await;
            let result = controller.start_new_client();
            self.shared.publish(&controller);
            result
        };
        self.shared.notify(SessionNotice::Wiped {
            reason: WipeReason::NewClient,
        });
        result
    }

    pub async fn document(&self) -> Result<SessionDocument> {
        self.shared.controller.lock().await.document().cloned()
    }

    /// Replace the document. Counts as activity.
    pub async fn set_document(&self, document: SessionDocument) -> Result<()> {
        self.shared.controller.lock().await.set_document(document)?;
        self.touch();
        Ok(())
    }

    pub async fn staff(&self) -> StaffProfile {
        self.shared.controller.lock().await.staff().clone()
    }

    pub async fn set_staff(&self, staff: StaffProfile) -> Result<()> {
        self.shared.controller.lock().await.set_staff(staff)
    }

    /// Run one autosave now. Returns whether a blob was written.
    pub async fn autosave_now(&self) -> Result<bool> {
        autosave(&self.shared).await
    }

    /// Stop the timers. The controller stays usable.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!("Session timers stopped");
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn autosave(shared: &Shared) -> Result<bool> {
    let pending = shared.controller.lock().await.begin_autosave();
    let Some(pending) = pending else {
        return Ok(false);
    };
    let epoch = pending.epoch();

    let sealed = tokio::task::spawn_blocking(move || pending.seal())
        .await
        .map_err(|e| SessionError::Background(e.to_string()))??;

    let committed = shared.controller.lock().await.commit_autosave(sealed)?;
    if committed {
        debug!(epoch, "Autosave written");
    } else {
        debug!(epoch, "Autosave discarded as stale");
    }
    Ok(committed)
}

async fn autosave_loop(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = autosave(&shared).await {
            warn!("Autosave failed: {e}");
            shared.notify(SessionNotice::AutosaveFailed {
                message: e.to_string(),
            });
        }
    }
}

async fn idle_loop(shared: Arc<Shared>, mut activity: watch::Receiver<Instant>, idle: Duration) {
    loop {
        let deadline = *activity.borrow_and_update() + idle;
        tokio::select! {
            changed = activity.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                let report = {
                    let mut controller = shared.controller.lock().await;
                    if controller.idle_lock_armed() {
                        let report = controller.lock(LockReason::Idle);
                        shared.publish(&controller);
                        Some(report)
                    } else {
                        None
                    }
                };
                if let Some(report) = report.filter(|r| r.locked) {
                    shared.notify(SessionNotice::Locked {
                        reason: LockReason::Idle,
                        save_error: report.save_error,
                    });
                }
                // Nothing to do until the user comes back
                if activity.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fast_config, memory_vault};
    use casevault_types::GeneralInfo;

    fn runtime() -> SessionRuntime {
        SessionRuntime::start(SessionController::new(memory_vault(), fast_config()))
    }

    fn phi_document() -> SessionDocument {
        SessionDocument {
            general: GeneralInfo {
                first_name: "A".into(),
                ..GeneralInfo::default()
            },
            ..SessionDocument::default()
        }
    }

    async fn blob_stored(rt: &SessionRuntime) -> bool {
        rt.controller()
            .lock()
            .await
            .vault_mut()
            .has_stored_blob()
            .expect("has blob")
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_on_interval() {
        let rt = runtime();
        rt.setup_pin("1234".into(), "1234".into()).await.expect("setup");
        rt.set_document(phi_document()).await.expect("set");
        assert!(!blob_stored(&rt).await);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(blob_stored(&rt).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_skips_empty_document() {
        let rt = runtime();
        rt.setup_pin("1234".into(), "1234".into()).await.expect("setup");
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(!blob_stored(&rt).await);
        assert!(!rt.autosave_now().await.expect("autosave"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_lock_fires_with_phi() {
        let rt = runtime();
        let mut notices = rt.subscribe();
        rt.setup_pin("1234".into(), "1234".into()).await.expect("setup");
        rt.set_document(phi_document()).await.expect("set");

        tokio::time::sleep(Duration::from_secs(30 * 60 + 1)).await;
        assert_eq!(rt.state(), LockState::Locked);

        let mut saw_idle_lock = false;
        while let Ok(notice) = notices.try_recv() {
            if let SessionNotice::Locked { reason, .. } = notice {
                saw_idle_lock = reason == LockReason::Idle;
            }
        }
        assert!(saw_idle_lock);
        assert!(blob_stored(&rt).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_lock_never_fires_without_phi() {
        let rt = runtime();
        rt.setup_pin("1234".into(), "1234".into()).await.expect("setup");
        tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;
        assert_eq!(rt.state(), LockState::Unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_rearms_idle_timer() {
        let rt = runtime();
        rt.setup_pin("1234".into(), "1234".into()).await.expect("setup");
        rt.set_document(phi_document()).await.expect("set");

        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        rt.touch();
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        assert_eq!(rt.state(), LockState::Unlocked);

        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert_eq!(rt.state(), LockState::Locked);
    }

    #[tokio::test]
    async fn test_state_watch_follows_transitions() {
        let rt = runtime();
        let mut state = rt.watch_state();
        assert_eq!(*state.borrow_and_update(), LockState::AwaitingNewPin);

        rt.setup_pin("1234".into(), "1234".into()).await.expect("setup");
        assert!(state.has_changed().expect("watch open"));
        assert_eq!(*state.borrow_and_update(), LockState::Unlocked);

        rt.set_document(phi_document()).await.expect("set");
        assert!(rt.lock().await.locked);
        assert_eq!(*state.borrow(), LockState::Locked);
    }

    #[tokio::test]
    async fn test_unlock_outcomes_notify() {
        let rt = runtime();
        rt.setup_pin("1234".into(), "1234".into()).await.expect("setup");
        rt.set_document(phi_document()).await.expect("set");
        rt.lock().await;

        let mut notices = rt.subscribe();
        for _ in 0..5 {
            rt.unlock("9999".into()).await.expect("unlock");
        }
        assert_eq!(rt.state(), LockState::AwaitingNewPin);
        let mut wiped = false;
        while let Ok(notice) = notices.try_recv() {
            wiped |= notice
                == SessionNotice::Wiped {
                    reason: WipeReason::Lockout,
                };
        }
        assert!(wiped);
    }

    #[tokio::test]
    async fn test_short_hold_does_not_wipe_or_notify() {
        let rt = runtime();
        rt.setup_pin("1234".into(), "1234".into()).await.expect("setup");
        let mut notices = rt.subscribe();
        let result = rt.delete_case_data(HoldConfirm::from_millis(100)).await;
        assert!(matches!(result, Err(SessionError::Validation(_))));
        assert_eq!(rt.state(), LockState::Unlocked);
        assert!(notices.try_recv().is_err());
    }
}
