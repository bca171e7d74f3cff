//! Session, document and staff command handlers.

use std::sync::Arc;

use casevault_session::HoldConfirm;
use casevault_types::{SessionDocument, StaffProfile};
use serde_json::{json, Value};
use tracing::info;

use super::{param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Current lock state and the wrong-PIN count for the shown screen.
pub async fn get_lock_state(state: &Arc<DaemonState>) -> Result {
    let attempts = state.session.controller().lock().await.attempts();
    Ok(json!({
        "state": state.session.state(),
        "attempts": attempts,
    }))
}

/// Set the PIN for a new client session.
pub async fn setup_pin(state: &Arc<DaemonState>, params: &Value) -> Result {
    let pin: String = param(params, "pin")?;
    let confirm: String = param(params, "confirm")?;
    state.session.setup_pin(pin, confirm).await?;
    info!("New client session started");
    Ok(json!({"state": state.session.state()}))
}

pub async fn unlock(state: &Arc<DaemonState>, params: &Value) -> Result {
    let pin: String = param(params, "pin")?;
    let outcome = state.session.unlock(pin).await?;
    match RpcError::from_outcome(&outcome) {
        Some(err) => Err(err),
        None => Ok(json!({"state": state.session.state(), "message": outcome.message()})),
    }
}

pub async fn lock(state: &Arc<DaemonState>) -> Result {
    let report = state.session.lock().await;
    Ok(json!({
        "locked": report.locked,
        "save_error": report.save_error,
        "state": state.session.state(),
    }))
}

/// Explicit delete. `held_ms` is how long the delete control was held.
pub async fn delete_case_data(state: &Arc<DaemonState>, params: &Value) -> Result {
    let held_ms: u64 = param(params, "held_ms")?;
    state
        .session
        .delete_case_data(HoldConfirm::from_millis(held_ms))
        .await?;
    Ok(json!({"deleted": true, "state": state.session.state()}))
}

pub async fn start_new_client(state: &Arc<DaemonState>) -> Result {
    state.session.start_new_client().await?;
    Ok(json!({"state": state.session.state()}))
}

pub async fn get_document(state: &Arc<DaemonState>) -> Result {
    let document = state.session.document().await?;
    serde_json::to_value(&document).map_err(|e| RpcError::internal_error(&e.to_string()))
}

pub async fn set_document(state: &Arc<DaemonState>, params: &Value) -> Result {
    let document: SessionDocument = param(params, "document")?;
    let has_phi = document.has_phi();
    state.session.set_document(document).await?;
    Ok(json!({"has_phi": has_phi}))
}

/// User activity from the view. Rearms the idle lock.
pub async fn touch(state: &Arc<DaemonState>) -> Result {
    state.session.touch();
    Ok(json!({}))
}

pub async fn get_staff(state: &Arc<DaemonState>) -> Result {
    let staff = state.session.staff().await;
    serde_json::to_value(&staff).map_err(|e| RpcError::internal_error(&e.to_string()))
}

pub async fn set_staff(state: &Arc<DaemonState>, params: &Value) -> Result {
    let staff: StaffProfile = param(params, "staff")?;
    state.session.set_staff(staff).await?;
    Ok(json!({"saved": true}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{dispatch_request, RpcRequest};
    use crate::test_state;

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: json!(1),
            method: method.to_string(),
            params,
        }
    }

    async fn call(state: &Arc<DaemonState>, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        let response = dispatch_request(state, request(method, params)).await;
        match response.error {
            Some(err) => Err(err),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    #[tokio::test]
    async fn test_pin_setup_and_unlock_flow() {
        let state = test_state().await;
        let fresh = call(&state, "get_lock_state", json!({})).await.expect("state");
        assert_eq!(fresh["state"], "awaiting_new_pin");

        let mismatch = call(&state, "setup_pin", json!({"pin": "1234", "confirm": "4321"}))
            .await
            .expect_err("mismatch");
        assert_eq!(mismatch.code, -32014);

        call(&state, "setup_pin", json!({"pin": "1234", "confirm": "1234"}))
            .await
            .expect("setup");
        let document = json!({"general": {"firstName": "A"}});
        call(&state, "set_document", json!({"document": document}))
            .await
            .expect("set document");
        let locked = call(&state, "lock", json!({})).await.expect("lock");
        assert_eq!(locked["locked"], true);

        let denied = call(&state, "get_document", json!({})).await.expect_err("locked");
        assert_eq!(denied.code, -32010);

        let wrong = call(&state, "unlock", json!({"pin": "9999"})).await.expect_err("wrong");
        assert_eq!(wrong.code, -32011);
        assert_eq!(wrong.data.expect("data")["remaining"], 4);

        call(&state, "unlock", json!({"pin": "1234"})).await.expect("unlock");
        let restored = call(&state, "get_document", json!({})).await.expect("document");
        assert_eq!(restored["general"]["firstName"], "A");
    }

    #[tokio::test]
    async fn test_short_hold_is_rejected() {
        let state = test_state().await;
        call(&state, "setup_pin", json!({"pin": "1234", "confirm": "1234"}))
            .await
            .expect("setup");
        let err = call(&state, "delete_case_data", json!({"held_ms": 300}))
            .await
            .expect_err("short hold");
        assert_eq!(err.code, -32014);
        assert_eq!(state.session.state(), casevault_types::LockState::Unlocked);

        call(&state, "delete_case_data", json!({"held_ms": 1500}))
            .await
            .expect("delete");
        assert_eq!(state.session.state(), casevault_types::LockState::AwaitingNewPin);
    }

    #[tokio::test]
    async fn test_unknown_method_and_missing_params() {
        let state = test_state().await;
        assert_eq!(call(&state, "init_pik", json!({})).await.expect_err("unknown").code, -32601);
        assert_eq!(call(&state, "unlock", json!({})).await.expect_err("no pin").code, -32602);
    }
}
