//! Cached HTTP responses.

use serde::{Deserialize, Serialize};

use crate::{CacheError, Result};

/// A response as stored in a cache generation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body,
        }
    }

    /// 200 with a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(|e| CacheError::Manifest(e.to_string()))?;
        Ok(Self::new(200, Some("application/json"), body))
    }

    /// Empty 204, the answer to every cross-origin request.
    pub fn no_content() -> Self {
        Self::new(204, None, Vec::new())
    }

    /// Synthetic 503 for a cache miss while offline.
    pub fn offline() -> Self {
        Self::new(503, Some("text/plain"), b"Offline".to_vec())
    }

    pub fn is_ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_responses() {
        let offline = CachedResponse::offline();
        assert_eq!(offline.status, 503);
        assert_eq!(offline.content_type.as_deref(), Some("text/plain"));
        assert_eq!(offline.body, b"Offline");
        assert!(!offline.is_ok());

        let empty = CachedResponse::no_content();
        assert_eq!(empty.status, 204);
        assert!(empty.body.is_empty());
        assert!(empty.is_ok());
    }

    #[test]
    fn test_json_response() {
        let response = CachedResponse::json(&serde_json::json!({"appVersion": 3})).expect("json");
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        let back: serde_json::Value = serde_json::from_slice(&response.body).expect("parse");
        assert_eq!(back["appVersion"], 3);
    }
}
