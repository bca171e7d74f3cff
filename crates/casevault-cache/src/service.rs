//! The cache manager in its own execution context.
//!
//! [`CacheService::spawn`] moves the manager onto a blocking worker that
//! serves commands one at a time. Pages and the update coordinator hold a
//! cloneable [`CacheHandle`]; the session core never touches it.

use casevault_db::RecordStore;
use casevault_types::CriticalStatus;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::critical::CriticalReport;
use crate::manager::{ActivateReport, AssetCacheManager, CacheEvent, InstallOutcome};
use crate::response::CachedResponse;
use crate::{CacheError, Result};

const COMMAND_BUFFER: usize = 64;

enum Command {
    Update(oneshot::Sender<Result<InstallOutcome>>),
    Install(oneshot::Sender<Result<InstallOutcome>>),
    Activate(oneshot::Sender<Result<ActivateReport>>),
    Fetch(String, oneshot::Sender<CachedResponse>),
    Integrity(oneshot::Sender<Result<CriticalStatus>>),
    VerifyCritical(bool, oneshot::Sender<Result<CriticalReport>>),
}

pub struct CacheService;

impl CacheService {
    /// Start serving `manager`. `mirror` receives critical asset copies.
    pub fn spawn(manager: AssetCacheManager, mut mirror: RecordStore) -> (CacheHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Command>(COMMAND_BUFFER);
        let events = manager.event_sender();

        let task = tokio::task::spawn_blocking(move || {
            info!("Cache service started");
            while let Some(command) = rx.blocking_recv() {
                // A dropped reply receiver just means the caller gave up
                match command {
                    Command::Update(reply) => {
                        let _ = reply.send(manager.update());
                    }
                    Command::Install(reply) => {
                        let _ = reply.send(manager.install());
                    }
                    Command::Activate(reply) => {
                        let _ = reply.send(manager.activate());
                    }
                    Command::Fetch(url, reply) => {
                        let _ = reply.send(manager.fetch(&url));
                    }
                    Command::Integrity(reply) => {
                        let _ = reply.send(manager.integrity());
                    }
                    Command::VerifyCritical(online, reply) => {
                        let _ = reply.send(manager.verify_critical_assets(&mut mirror, online));
                    }
                }
            }
            debug!("Cache service stopped");
        });

        (CacheHandle { tx, events }, task)
    }
}

/// Cloneable client of a running [`CacheService`].
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<CacheEvent>,
}

impl CacheHandle {
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CacheError::Unavailable)?;
        rx.await.map_err(|_| CacheError::Unavailable)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Install the published manifest and activate it if it was new.
    pub async fn update(&self) -> Result<InstallOutcome> {
        self.call(Command::Update).await?
    }

    pub async fn install(&self) -> Result<InstallOutcome> {
        self.call(Command::Install).await?
    }

    pub async fn activate(&self) -> Result<ActivateReport> {
        self.call(Command::Activate).await?
    }

    /// Answer a page request. A stopped service answers as if offline.
    pub async fn fetch(&self, url: impl Into<String>) -> CachedResponse {
        let url = url.into();
        self.call(|reply| Command::Fetch(url, reply))
            .await
            .unwrap_or_else(|_| CachedResponse::offline())
    }

    pub async fn integrity(&self) -> Result<CriticalStatus> {
        self.call(Command::Integrity).await?
    }

    pub async fn verify_critical(&self, online: bool) -> Result<CriticalReport> {
        self.call(|reply| Command::VerifyCritical(online, reply)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{manifest, setup};

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (manager, site, _storage) = setup();
        let m = manifest(1, 1, &[("index.html", "aaa")]);
        site.publish(manager.config(), &m);
        let origin = manager.config().origin.clone();
        let mirror = RecordStore::open_memory().expect("mirror");

        let (handle, task) = CacheService::spawn(manager, mirror);
        let mut events = handle.subscribe();

        assert!(matches!(handle.update().await.expect("update"), InstallOutcome::Installed(_)));
        assert!(matches!(events.recv().await, Ok(CacheEvent::Installed { .. })));
        assert!(matches!(events.recv().await, Ok(CacheEvent::Activated { .. })));

        let page = handle.fetch(format!("{origin}/index.html")).await;
        assert_eq!(page.body, b"index.html");
        assert_eq!(handle.fetch("https://elsewhere.test/x.js").await.status, 204);
        assert!(handle.integrity().await.expect("integrity").all_cached());

        drop(handle);
        task.await.expect("service exits when handles drop");
    }

    #[tokio::test]
    async fn test_stopped_service_is_unavailable() {
        let (manager, _site, _storage) = setup();
        let (handle, task) = CacheService::spawn(manager, RecordStore::open_memory().expect("mirror"));
        let (tx, rx) = mpsc::channel::<Command>(1);
        drop(rx);
        let closed = CacheHandle {
            tx,
            events: handle.events.clone(),
        };
        assert!(matches!(closed.install().await, Err(CacheError::Unavailable)));
        assert_eq!(closed.fetch("http://localhost:8080/").await.status, 503);

        drop(handle);
        task.await.expect("service exits");
    }
}
