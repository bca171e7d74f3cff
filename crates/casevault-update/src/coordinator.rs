//! The update state machine.

use casevault_cache::{CacheEvent, InstallOutcome};
use casevault_types::LockState;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::marker::ReloadMarker;
use crate::{CheckFuture, Result, UpdateConfig, UpdateError, UpdateSource, UpdateStatus};

enum Request {
    Reload(oneshot::Sender<UpdateStatus>),
}

/// Cloneable handle to the coordinator task of the current load.
#[derive(Clone)]
pub struct UpdateCoordinator {
    status: watch::Receiver<UpdateStatus>,
    requests: mpsc::Sender<Request>,
}

impl UpdateCoordinator {
    /// Begin a load: check for an update if `online`, and keep listening for
    /// activations for as long as any handle is alive.
    pub fn start<S: UpdateSource>(
        config: UpdateConfig,
        source: S,
        lock_state: watch::Receiver<LockState>,
        online: bool,
    ) -> (Self, JoinHandle<()>) {
        let marker = ReloadMarker::new(config.marker_path.clone(), config.marker_ttl);
        // Subscribe before the check starts so no activation is missed
        let events = source.subscribe();

        let check = if marker.take_fresh() {
            info!("Skipping update check after an update reload");
            None
        } else if online {
            Some(source.check())
        } else {
            debug!("Offline, skipping update check");
            None
        };
        let initial = match (&check, online) {
            (Some(_), _) => UpdateStatus::Checking,
            (None, true) => UpdateStatus::Skipped,
            (None, false) => UpdateStatus::Idle,
        };

        let (status_tx, status_rx) = watch::channel(initial);
        let (requests_tx, requests_rx) = mpsc::channel(8);
        let worker = Worker {
            marker,
            config,
            status: status_tx,
            handled: None,
        };
        let task = tokio::spawn(worker.run(check, events, lock_state, requests_rx));

        (
            Self {
                status: status_rx,
                requests: requests_tx,
            },
            task,
        )
    }

    pub fn status(&self) -> UpdateStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<UpdateStatus> {
        self.status.clone()
    }

    /// User-initiated refresh. Applies a deferred update if one is waiting.
    pub async fn request_reload(&self) -> Result<UpdateStatus> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Reload(reply))
            .await
            .map_err(|_| UpdateError::Unavailable)?;
        rx.await.map_err(|_| UpdateError::Unavailable)
    }
}

struct Worker {
    config: UpdateConfig,
    marker: ReloadMarker,
    status: watch::Sender<UpdateStatus>,
    /// Versions of the last activation acted on.
    handled: Option<(u32, u32)>,
}

impl Worker {
    fn set(&self, status: UpdateStatus) {
        self.status.send_replace(status);
    }

    fn current(&self) -> UpdateStatus {
        self.status.borrow().clone()
    }

    async fn run(
        mut self,
        check: Option<CheckFuture>,
        mut events: tokio::sync::broadcast::Receiver<CacheEvent>,
        mut lock_state: watch::Receiver<LockState>,
        mut requests: mpsc::Receiver<Request>,
    ) {
        let mut checking = check.is_some();
        let mut check: CheckFuture = match check {
            Some(check) => check,
            None => Box::pin(std::future::pending()),
        };

        let mut waiting = checking;
        let deadline = tokio::time::sleep(self.config.activation_timeout);
        tokio::pin!(deadline);
        let mut events_open = true;
        let mut lock_open = true;

        loop {
            tokio::select! {
                result = &mut check, if checking => {
                    checking = false;
                    waiting = false;
                    match result {
                        Ok(InstallOutcome::Installed(report)) => {
                            let state = *lock_state.borrow();
                            self.on_activated(report.app_version, report.vendor_version, state);
                        }
                        Ok(InstallOutcome::UpToDate) => debug!("No update available"),
                        Err(e) => warn!("Update check failed: {e}"),
                    }
                    if matches!(self.current(), UpdateStatus::Checking | UpdateStatus::Background) {
                        self.set(UpdateStatus::Idle);
                    }
                }
                () = &mut deadline, if waiting => {
                    waiting = false;
                    if self.current() == UpdateStatus::Checking {
                        info!(
                            timeout_secs = self.config.activation_timeout.as_secs(),
                            "Update still installing, continuing in background"
                        );
                        self.set(UpdateStatus::Background);
                    }
                }
                event = events.recv(), if events_open => match event {
                    Ok(CacheEvent::Activated { app_version, vendor_version }) => {
                        waiting = false;
                        let state = *lock_state.borrow();
                        self.on_activated(app_version, vendor_version, state);
                    }
                    Ok(CacheEvent::Installed { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed cache events"),
                    Err(RecvError::Closed) => events_open = false,
                },
                changed = lock_state.changed(), if lock_open => {
                    if changed.is_err() {
                        lock_open = false;
                        continue;
                    }
                    let state = *lock_state.borrow_and_update();
                    if let UpdateStatus::Deferred { app_version, .. } = self.current() {
                        if state.is_reload_safe() {
                            info!(%state, "Applying deferred update");
                            self.reload(Some(app_version), true);
                        }
                    }
                }
                request = requests.recv() => match request {
                    Some(Request::Reload(reply)) => {
                        let pending = match self.current() {
                            UpdateStatus::Deferred { app_version, .. } => Some(app_version),
                            UpdateStatus::ReloadRequested { app_version } => app_version,
                            _ => None,
                        };
                        self.reload(pending, pending.is_some());
                        let _ = reply.send(self.current());
                    }
                    None => break,
                },
            }
        }
        debug!("Update coordinator stopped");
    }

    fn on_activated(&mut self, app_version: u32, vendor_version: u32, state: LockState) {
        if self.handled == Some((app_version, vendor_version)) {
            return;
        }
        self.handled = Some((app_version, vendor_version));

        if state.is_reload_safe() {
            self.reload(Some(app_version), true);
        } else {
            info!(app_version, %state, "Update deferred until the session locks");
            self.set(UpdateStatus::Deferred {
                app_version,
                vendor_version,
            });
        }
    }

    fn reload(&self, app_version: Option<u32>, mark: bool) {
        if mark {
            if let Err(e) = self.marker.set() {
                warn!("Failed to set reload marker: {e}");
            }
        }
        info!(?app_version, "Reload requested");
        self.set(UpdateStatus::ReloadRequested { app_version });
    }
}
