//! PBKDF2-HMAC-SHA256 key derivation for session PINs.
//!
//! The salt fed to PBKDF2 is `salt ‖ pepper`; sessions written before peppers
//! existed have none and derive over the salt alone.

use ::pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{CryptoError, Result};

/// Production iteration count.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// PIN salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Pepper size in bytes.
pub const PEPPER_SIZE: usize = 32;

/// Derivation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

/// A derived AES-256-GCM key.
///
/// The raw bytes never leave this crate and are zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Derive a session key with production parameters.
///
/// The PIN is not validated here; the full derivation always runs so timing
/// does not depend on the PIN's shape.
pub fn derive_key(pin: &str, salt: &[u8], pepper: Option<&[u8]>) -> Result<SessionKey> {
    derive_key_with(pin, salt, pepper, &KdfParams::default())
}

/// Derive a session key with explicit parameters.
pub fn derive_key_with(
    pin: &str,
    salt: &[u8],
    pepper: Option<&[u8]>,
    params: &KdfParams,
) -> Result<SessionKey> {
    if params.iterations == 0 {
        return Err(CryptoError::KeyDerivation("iteration count must be non-zero".into()));
    }

    let mut combined = Zeroizing::new(Vec::with_capacity(salt.len() + PEPPER_SIZE));
    combined.extend_from_slice(salt);
    if let Some(pepper) = pepper {
        combined.extend_from_slice(pepper);
    }

    let mut output = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), &combined, params.iterations, &mut output);
    let key = SessionKey::from_bytes(output);
    output.zeroize();
    Ok(key)
}

/// Generate a random 16-byte PIN salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut salt);
    salt
}

/// Generate a random 32-byte pepper.
pub fn generate_pepper() -> [u8; PEPPER_SIZE] {
    let mut pepper = [0u8; PEPPER_SIZE];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut pepper);
    pepper
}
