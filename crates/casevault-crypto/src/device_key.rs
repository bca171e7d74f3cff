//! Device-bound key handle for non-PHI records.
//!
//! Staff profile data is wrapped with a key that belongs to the device rather
//! than to the session PIN, so it survives wipes. A platform keystore would keep
//! the key material out of process memory entirely. [`DeviceKey`] is the
//! software fallback: its bytes are persisted in the `meta` partition, which is
//! weaker and reported as such by [`KeyHandle::is_hardware_backed`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aes_gcm::{open, seal};
use crate::pbkdf2::KEY_SIZE;
use crate::{CryptoError, Result};

/// On-disk form of a device-wrapped record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedRecord {
    #[serde(rename = "_enc")]
    pub enc: bool,
    pub iv: Vec<u8>,
    pub cipher: Vec<u8>,
}

impl WrappedRecord {
    /// Whether a stored JSON value is a wrapped record rather than legacy plaintext.
    pub fn is_wrapped(value: &serde_json::Value) -> bool {
        value.get("_enc").and_then(serde_json::Value::as_bool) == Some(true)
    }
}

/// Opaque key handle: generate, wrap, unwrap.
pub trait KeyHandle {
    fn wrap(&self, plaintext: &[u8]) -> Result<WrappedRecord>;

    fn unwrap(&self, record: &WrappedRecord) -> Result<Vec<u8>>;

    /// False for software keys whose material is stored alongside the data.
    fn is_hardware_backed(&self) -> bool;

    fn wrap_json<T: Serialize>(&self, value: &T) -> Result<WrappedRecord>
    where
        Self: Sized,
    {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| CryptoError::Serialization(e.to_string()))?,
        );
        self.wrap(&plaintext)
    }

    fn unwrap_json<T: DeserializeOwned>(&self, record: &WrappedRecord) -> Result<T>
    where
        Self: Sized,
    {
        let plaintext = Zeroizing::new(self.unwrap(record)?);
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Serialization(e.to_string()))
    }
}

/// Software-backed device key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey {
    bytes: [u8; KEY_SIZE],
}

impl DeviceKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
        Self { bytes }
    }

    /// Restore a key previously produced by [`DeviceKey::to_stored`].
    pub fn from_stored(stored: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] =
            stored
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: stored.len(),
                })?;
        Ok(Self { bytes })
    }

    pub fn to_stored(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.bytes.to_vec())
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeviceKey(software)")
    }
}

impl KeyHandle for DeviceKey {
    fn wrap(&self, plaintext: &[u8]) -> Result<WrappedRecord> {
        let (iv, cipher) = seal(&self.bytes, plaintext)?;
        Ok(WrappedRecord {
            enc: true,
            iv: iv.to_vec(),
            cipher,
        })
    }

    fn unwrap(&self, record: &WrappedRecord) -> Result<Vec<u8>> {
        open(&self.bytes, &record.iv, &record.cipher)
    }

    fn is_hardware_backed(&self) -> bool {
        false
    }
}
