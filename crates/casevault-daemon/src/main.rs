//! casevault-daemon: the offline-first session host.
//!
//! Single OS process running a Tokio async runtime. The view talks to the
//! host via JSON-RPC over a Unix socket and receives pushed events.
//!
//! `casevault-daemon generate-manifest <root>` runs the build-time manifest
//! step instead of starting the host.

mod bridge;
mod commands;
mod config;
mod events;
mod rpc;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use casevault_cache::manifest::{self, APP_FILES, VENDOR_FILES};
use casevault_cache::{AssetCacheManager, CacheHandle, CacheService, CacheStorage, FsCacheStorage, HttpFetcher};
use casevault_db::RecordStore;
use casevault_session::{SessionController, SessionRuntime, SessionVault};
use casevault_types::EventType;
use casevault_update::UpdateCoordinator;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bridge::CachePurge;
use crate::config::{AdvancedSection, DaemonConfig};
use crate::events::EventBus;
use crate::rpc::RpcServer;

/// Host-wide shared state.
pub struct DaemonState {
    pub config: DaemonConfig,
    /// Lock state machine, autosave and idle timers.
    pub session: SessionRuntime,
    /// Asset cache actor.
    pub cache: CacheHandle,
    pub update: UpdateCoordinator,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

fn init_tracing(advanced: &AdvancedSection) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(format!("casevault={}", advanced.log_level).parse()?);
    if advanced.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&advanced.log_file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

fn generate_manifest(root: PathBuf) -> anyhow::Result<()> {
    let build = manifest::generate(&root, APP_FILES, VENDOR_FILES)?;
    info!(
        app_version = build.manifest.app_version,
        vendor_version = build.manifest.vendor_version,
        app_changed = build.app_changed,
        vendor_changed = build.vendor_changed,
        "Manifest written"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("generate-manifest") {
        init_tracing(&AdvancedSection::default())?;
        let root = args.get(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        return generate_manifest(root);
    }

    // 1. Load config
    let config = DaemonConfig::load()?;
    init_tracing(&config.advanced)?;
    info!("CaseVault host starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open the record store. The critical-asset mirror gets its own connection.
    let db_path = data_dir.join("casevault.db");
    let store = RecordStore::open(&db_path)?;
    let mirror = RecordStore::open(&db_path)?;

    // 3. Cache storage is shared with the session wipe path
    let storage: Arc<dyn CacheStorage> = Arc::new(FsCacheStorage::open(&data_dir.join("cache"))?);

    // 4. Session
    let session_config = config.session_config();
    let vault =
        SessionVault::new(store, session_config.kdf).with_case_caches(Box::new(CachePurge::new(storage.clone())));
    let session = SessionRuntime::start(SessionController::new(vault, session_config));

    // 5. Asset cache and update coordinator
    let fetcher = HttpFetcher::new(Duration::from_secs(config.cache.fetch_timeout_secs));
    let manager = AssetCacheManager::new(config.cache_config(), storage, Arc::new(fetcher));
    let (cache, _cache_task) = CacheService::spawn(manager, mirror);
    let check_enabled = config.network_checks_enabled();
    let (update, _update_task) =
        UpdateCoordinator::start(config.update_config(), cache.clone(), session.watch_state(), check_enabled);

    // 6. Event bus and bridges
    let event_bus = EventBus::new(1000);
    bridge::spawn_session_bridge(session.subscribe(), event_bus.clone());
    bridge::spawn_update_bridge(update.watch_status(), event_bus.clone());

    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
    let state = Arc::new(DaemonState {
        config,
        session,
        cache,
        update,
        event_bus,
        shutdown_tx: shutdown_tx.clone(),
    });

    // 7. Check the critical assets in the background
    {
        let state = state.clone();
        tokio::spawn(async move {
            match state.cache.verify_critical(check_enabled).await {
                Ok(report) => {
                    if let Some(warning) = report.warning {
                        warn!("{warning}");
                        state.event_bus.emit_new(
                            EventType::AssetsMissing,
                            json!({
                                "message": warning,
                                "missing": report.status.missing().collect::<Vec<_>>(),
                            }),
                        );
                    }
                }
                Err(e) => warn!("Critical asset check failed: {e}"),
            }
        });
    }

    // 8. Start IPC server
    let socket_path = data_dir.join("casevault.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    state.event_bus.emit_new(
        EventType::HostStarted,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": state.session.state(),
        }),
    );

    // 9. Run the RPC server until shutdown
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Host shutting down gracefully");

    // Persist and lock before the key leaves memory
    let report = state.session.lock().await;
    if let Some(e) = report.save_error {
        warn!("Final save failed: {e}");
    }

    let _ = std::fs::remove_file(&socket_path);

    info!("Host stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_state() -> Arc<DaemonState> {
    use casevault_cache::{CacheConfig, MemoryCacheStorage};
    use casevault_crypto::KdfParams;
    use casevault_session::SessionConfig;
    use casevault_update::UpdateConfig;

    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
    let session_config = SessionConfig {
        kdf: KdfParams { iterations: 1_000 },
        ..SessionConfig::default()
    };
    let vault = SessionVault::new(RecordStore::open_memory().expect("open store"), session_config.kdf)
        .with_case_caches(Box::new(CachePurge::new(storage.clone())));
    let session = SessionRuntime::start(SessionController::new(vault, session_config));

    let cache_config = CacheConfig {
        origin: "http://127.0.0.1:9".to_string(),
        ..CacheConfig::default()
    };
    let fetcher = HttpFetcher::new(Duration::from_millis(200));
    let manager = AssetCacheManager::new(cache_config, storage, Arc::new(fetcher));
    let (cache, _task) = CacheService::spawn(manager, RecordStore::open_memory().expect("open mirror"));
    let (update, _task) = UpdateCoordinator::start(
        UpdateConfig {
            marker_path: None,
            ..UpdateConfig::default()
        },
        cache.clone(),
        session.watch_state(),
        false,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    Arc::new(DaemonState {
        config: DaemonConfig::default(),
        session,
        cache,
        update,
        event_bus: EventBus::new(64),
        shutdown_tx,
    })
}
