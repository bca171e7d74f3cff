//! Base64 codec helpers (standard alphabet, padded).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::{CryptoError, Result};

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn from_base64(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}
