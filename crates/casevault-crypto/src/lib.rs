//! # casevault-crypto
//!
//! Cryptographic primitives for the casevault session core.
//!
//! The suite is fixed: PBKDF2-HMAC-SHA256 turns a short session PIN into an
//! AES-256-GCM key, and every sealed JSON document gets a fresh 96-bit IV.
//! There is no algorithm negotiation and no plaintext fallback.
//!
//! ## Modules
//!
//! - [`pbkdf2`]: PIN key derivation, salt and pepper generation
//! - [`aes_gcm`]: Authenticated sealing of JSON documents
//! - [`codec`]: Base64 helpers
//! - [`device_key`]: Device-bound key handle for non-PHI records

pub mod aes_gcm;
pub mod codec;
pub mod device_key;
pub mod pbkdf2;

pub use crate::aes_gcm::{decrypt_json, encrypt_json, EncryptedBlob};
pub use crate::device_key::{DeviceKey, KeyHandle, WrappedRecord};
pub use crate::pbkdf2::{derive_key, derive_key_with, generate_pepper, generate_salt, KdfParams, SessionKey};

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD tag check failed: wrong key or tampered ciphertext.
    #[error("authentication failed")]
    Authentication,

    /// The platform cipher refused to encrypt.
    #[error("encryption failed")]
    Encryption,

    /// Stored structure could not be decoded before decryption was attempted.
    #[error("malformed sealed blob: {0}")]
    MalformedBlob(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Invalid base64 input.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CryptoError {
    /// True only for a tag mismatch, the sole "wrong PIN" signal.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication)
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;
