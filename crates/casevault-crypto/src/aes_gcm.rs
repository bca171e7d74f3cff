//! AES-256-GCM sealing of JSON documents.
//!
//! Each call to [`encrypt_json`] draws a fresh random 96-bit IV. The stored form
//! is `{iv, cipher}` with both fields base64-encoded; the cipher field carries
//! the 16-byte tag appended by GCM.

use ::aes_gcm::aead::{Aead, KeyInit};
use ::aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::codec::{from_base64, to_base64};
use crate::pbkdf2::SessionKey;
use crate::{CryptoError, Result};

/// IV size for AES-GCM (96 bits = 12 bytes).
pub const IV_SIZE: usize = 12;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// A sealed document as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub iv: String,
    pub cipher: String,
}

/// Encrypt raw bytes under `key` with a fresh IV. Returns `(iv, ciphertext‖tag)`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<([u8; IV_SIZE], Vec<u8>)> {
    let mut iv = [0u8; IV_SIZE];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut iv);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::Encryption)?;
    Ok((iv, ciphertext))
}

/// Decrypt `ciphertext‖tag` under `key`. A tag mismatch is always
/// [`CryptoError::Authentication`].
pub fn open(key: &[u8; 32], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::MalformedBlob(format!(
            "iv must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::MalformedBlob("ciphertext shorter than tag".into()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

/// Serialize `payload` to JSON and seal it.
///
/// Fails closed: any error leaves the caller with nothing to store.
pub fn encrypt_json<T: Serialize>(key: &SessionKey, payload: &T) -> Result<EncryptedBlob> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload).map_err(|e| CryptoError::Serialization(e.to_string()))?,
    );
    let (iv, ciphertext) = seal(key.expose(), &plaintext)?;
    Ok(EncryptedBlob {
        iv: to_base64(&iv),
        cipher: to_base64(&ciphertext),
    })
}

/// Open a sealed blob and parse the JSON inside.
pub fn decrypt_json<T: DeserializeOwned>(key: &SessionKey, blob: &EncryptedBlob) -> Result<T> {
    let iv = from_base64(&blob.iv).map_err(|e| CryptoError::MalformedBlob(e.to_string()))?;
    let ciphertext =
        from_base64(&blob.cipher).map_err(|e| CryptoError::MalformedBlob(e.to_string()))?;
    let plaintext = Zeroizing::new(open(key.expose(), &iv, &ciphertext)?);
    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pbkdf2::{derive_key_with, KdfParams};
    use serde_json::json;

    const FAST: KdfParams = KdfParams { iterations: 1_000 };

    fn key(pin: &str) -> SessionKey {
        derive_key_with(pin, &[3u8; 16], Some(&[5u8; 32]), &FAST).expect("derive")
    }

    #[test]
    fn test_json_roundtrip() {
        let k = key("1234");
        let doc = json!({"general": {"firstName": "A"}});
        let blob = encrypt_json(&k, &doc).expect("encrypt");
        let back: serde_json::Value = decrypt_json(&k, &blob).expect("decrypt");
        assert_eq!(back, doc);
    }

    #[test]
    fn test_wrong_pin_is_authentication_error() {
        let blob = encrypt_json(&key("1234"), &json!({"a": 1})).expect("encrypt");
        let result: Result<serde_json::Value> = decrypt_json(&key("9999"), &blob);
        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let k = key("1234");
        let a = encrypt_json(&k, &json!({"a": 1})).expect("encrypt");
        let b = encrypt_json(&k, &json!({"a": 1})).expect("encrypt");
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.cipher, b.cipher);
    }

    #[test]
    fn test_ciphertext_has_tag() {
        let k = key("1234");
        let (iv, ciphertext) = seal(k.expose(), b"test").expect("seal");
        assert_eq!(iv.len(), IV_SIZE);
        assert_eq!(ciphertext.len(), 4 + TAG_SIZE);
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let k = key("1234");
        let (iv, mut ciphertext) = seal(k.expose(), b"test").expect("seal");
        if let Some(byte) = ciphertext.first_mut() {
            *byte ^= 0xFF;
        }
        assert!(matches!(open(k.expose(), &iv, &ciphertext), Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_bad_base64_is_malformed_not_authentication() {
        let k = key("1234");
        let blob = EncryptedBlob {
            iv: "!!!".into(),
            cipher: "AAAA".into(),
        };
        let result: Result<serde_json::Value> = decrypt_json(&k, &blob);
        assert!(matches!(result, Err(CryptoError::MalformedBlob(_))));
    }

    #[test]
    fn test_short_iv_is_malformed() {
        let k = key("1234");
        let blob = EncryptedBlob {
            iv: to_base64(&[0u8; 8]),
            cipher: to_base64(&[0u8; 32]),
        };
        let result: Result<serde_json::Value> = decrypt_json(&k, &blob);
        assert!(matches!(result, Err(CryptoError::MalformedBlob(_))));
    }

    #[test]
    fn test_blob_json_shape() {
        let blob = encrypt_json(&key("1234"), &json!({})).expect("encrypt");
        let value = serde_json::to_value(&blob).expect("serialize");
        assert!(value["iv"].is_string());
        assert!(value["cipher"].is_string());
    }
}
