//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod app;
pub mod session;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::rpc::RpcError;

pub type Result = std::result::Result<Value, RpcError>;

/// Deserialize a required named parameter.
pub fn param<T: DeserializeOwned>(params: &Value, name: &str) -> std::result::Result<T, RpcError> {
    let value = params
        .get(name)
        .cloned()
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} required")))?;
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(&format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param() {
        let params = serde_json::json!({"pin": "1234", "held_ms": 1600});
        assert_eq!(param::<String>(&params, "pin").expect("pin"), "1234");
        assert_eq!(param::<u64>(&params, "held_ms").expect("held"), 1600);
        assert_eq!(param::<String>(&params, "confirm").expect_err("missing").code, -32602);
        assert_eq!(param::<u64>(&params, "pin").expect_err("wrong type").code, -32602);
    }
}
