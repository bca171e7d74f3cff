//! App cache integrity and update command handlers.

use std::sync::Arc;

use serde_json::json;

use super::Result;
use crate::rpc::RpcError;
use crate::DaemonState;

/// Presence of every installed manifest file in the retained generations.
pub async fn get_critical_status(state: &Arc<DaemonState>) -> Result {
    let status = state
        .cache
        .integrity()
        .await
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    Ok(json!({
        "all_cached": status.all_cached(),
        "missing": status.missing().collect::<Vec<_>>(),
        "statuses": status.statuses,
    }))
}

pub async fn get_update_status(state: &Arc<DaemonState>) -> Result {
    serde_json::to_value(state.update.status()).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// User-initiated refresh.
pub async fn request_reload(state: &Arc<DaemonState>) -> Result {
    let status = state
        .update
        .request_reload()
        .await
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    serde_json::to_value(status).map_err(|e| RpcError::internal_error(&e.to_string()))
}
