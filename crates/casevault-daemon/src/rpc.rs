//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC method calls to the command handlers. A
//! connection that calls `subscribe_events` also receives bus events as
//! `event` notifications.

use std::path::PathBuf;
use std::sync::Arc;

use casevault_session::SessionError;
use casevault_types::{Event, UnlockOutcome};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::events::EventFilter;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated notification carrying one bus event.
#[derive(Debug, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: &'a Event,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, "METHOD_NOT_FOUND", Some(serde_json::json!({"method": method})))
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(-32602, "INVALID_PARAMS", Some(serde_json::json!({"detail": detail})))
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(-32603, "INTERNAL_ERROR", Some(serde_json::json!({"detail": detail})))
    }

    /// Session locked (-32010).
    pub fn session_locked() -> Self {
        Self::new(-32010, "SESSION_LOCKED", None)
    }

    /// Wrong PIN (-32011).
    pub fn wrong_pin(remaining: u32, message: &str) -> Self {
        Self::new(
            -32011,
            "WRONG_PIN",
            Some(serde_json::json!({"remaining": remaining, "message": message})),
        )
    }

    /// Case data wiped after too many attempts (-32012).
    pub fn data_wiped(message: &str) -> Self {
        Self::new(-32012, "DATA_WIPED", Some(serde_json::json!({"message": message})))
    }

    /// Stored session missing or unreadable (-32013).
    pub fn data_unavailable(message: &str) -> Self {
        Self::new(-32013, "DATA_UNAVAILABLE", Some(serde_json::json!({"message": message})))
    }

    /// Bad PIN format, mismatch, or short confirm hold (-32014).
    pub fn invalid_pin(message: &str) -> Self {
        Self::new(-32014, "INVALID_PIN", Some(serde_json::json!({"message": message})))
    }

    /// Operation not allowed in the current lock state (-32015).
    pub fn invalid_state(detail: &str) -> Self {
        Self::new(-32015, "INVALID_STATE", Some(serde_json::json!({"detail": detail})))
    }

    /// Error for an unlock attempt that did not unlock.
    pub fn from_outcome(outcome: &UnlockOutcome) -> Option<Self> {
        let message = outcome.message();
        match outcome {
            UnlockOutcome::Unlocked => None,
            UnlockOutcome::IncorrectPin { remaining } => Some(Self::wrong_pin(*remaining, &message)),
            UnlockOutcome::TooManyAttempts => Some(Self::data_wiped(&message)),
            UnlockOutcome::DataUnavailable => Some(Self::data_unavailable(&message)),
        }
    }
}

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::Validation(message) => Self::invalid_pin(message),
            SessionError::Authentication => Self::wrong_pin(0, &err.to_string()),
            SessionError::NotFound | SessionError::Corruption(_) => Self::data_unavailable(&err.to_string()),
            SessionError::InvalidState { state, .. } if !state.is_unlocked() => Self::session_locked(),
            SessionError::InvalidState { .. } => Self::invalid_state(&err.to_string()),
            SessionError::Storage(_) | SessionError::Crypto(_) | SessionError::Background(_) => {
                Self::internal_error(&err.to_string())
            }
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Event stream attached to one connection.
struct Subscription {
    events: broadcast::Receiver<Event>,
    filter: EventFilter,
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<Event> {
    let Some(sub) = subscription.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match sub.events.recv().await {
            Ok(event) if sub.filter.matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Subscriber lagging, events dropped"),
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut subscription: Option<Subscription> = None;

    loop {
        // A cancelled read keeps its partial line in `line`
        let outgoing = tokio::select! {
            read = reader.read_line(&mut line) => {
                if read? == 0 {
                    break; // EOF
                }
                let response = match serde_json::from_str::<RpcRequest>(&line) {
                    Ok(request) if request.jsonrpc != "2.0" => {
                        RpcResponse::error(request.id, RpcError::invalid_request())
                    }
                    Ok(request) if request.method == "subscribe_events" => {
                        let filter: EventFilter = request
                            .params
                            .get("filter")
                            .cloned()
                            .and_then(|f| serde_json::from_value(f).ok())
                            .unwrap_or_default();
                        subscription = Some(Subscription {
                            events: state.event_bus.subscribe(),
                            filter,
                        });
                        RpcResponse::success(
                            request.id,
                            serde_json::json!({"subscribed": true, "sequence": state.event_bus.sequence()}),
                        )
                    }
                    Ok(request) if request.method == "unsubscribe_events" => {
                        subscription = None;
                        RpcResponse::success(request.id, serde_json::json!({"subscribed": false}))
                    }
                    Ok(request) => dispatch_request(&state, request).await,
                    Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
                };
                line.clear();
                serde_json::to_string(&response)?
            }
            event = next_event(&mut subscription) => match event {
                Some(event) => serde_json::to_string(&RpcNotification {
                    jsonrpc: "2.0",
                    method: "event",
                    params: &event,
                })?,
                None => {
                    subscription = None;
                    continue;
                }
            },
        };

        let mut outgoing = outgoing;
        outgoing.push('\n');
        writer.write_all(outgoing.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: &Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();

    debug!("Dispatching RPC method: {}", method);

    // Document access requires an unlocked session
    let requires_unlock = matches!(method, "get_document" | "set_document");
    if requires_unlock && !state.session.state().is_unlocked() {
        return RpcResponse::error(id, RpcError::session_locked());
    }

    let params = &request.params;
    let result = match method {
        // Session
        "get_lock_state" => commands::session::get_lock_state(state).await,
        "setup_pin" => commands::session::setup_pin(state, params).await,
        "unlock" => commands::session::unlock(state, params).await,
        "lock" => commands::session::lock(state).await,
        "delete_case_data" => commands::session::delete_case_data(state, params).await,
        "start_new_client" => commands::session::start_new_client(state).await,
        "get_document" => commands::session::get_document(state).await,
        "set_document" => commands::session::set_document(state, params).await,
        "touch" => commands::session::touch(state).await,
        "get_staff" => commands::session::get_staff(state).await,
        "set_staff" => commands::session::set_staff(state, params).await,

        // App cache and updates
        "get_critical_status" => commands::app::get_critical_status(state).await,
        "get_update_status" => commands::app::get_update_status(state).await,
        "request_reload" => commands::app::request_reload(state).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
