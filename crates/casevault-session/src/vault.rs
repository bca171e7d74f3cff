//! Session vault: the single encrypted session blob and its key material.
//!
//! The vault is the only writer of `phi/sessionBlob`, `meta/pinSalt` and
//! `meta/pinPepper`. The derived [`SessionKey`] lives here and nowhere else.
//!
//! Writes are tagged with the epoch current when the document was captured.
//! [`SessionVault::wipe`] bumps the epoch before erasing anything, so a
//! persist that was already encrypting when the wipe ran is discarded at
//! [`SessionVault::commit`] instead of resurrecting the erased session.
//!
//! Each capture also takes a sequence number. A commit, a lock, or a wipe
//! raises the floor, and captures at or below the floor never land, so an
//! older background save cannot overwrite a newer one.

use casevault_crypto::codec::{from_base64, to_base64};
use casevault_crypto::{
    decrypt_json, derive_key_with, encrypt_json, generate_pepper, generate_salt, CryptoError,
    EncryptedBlob, KdfParams, SessionKey,
};
use casevault_db::queries::session as keys;
use casevault_db::{overwrite_and_delete, Partition, RecordStore};
use casevault_types::{CasePayload, SessionDocument};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{Result, SessionError};

/// Removes case-scoped cache generations during a wipe.
pub trait CaseCachePurge: Send {
    /// Delete every cache generation holding case data. Returns how many went.
    fn purge_case_caches(&self) -> usize;
}

/// A document captured for persisting, not yet encrypted.
///
/// `Send`, so sealing can run off the async executor.
pub struct PendingPersist {
    epoch: u64,
    seq: u64,
    key: SessionKey,
    payload: CasePayload,
}

impl PendingPersist {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Encrypt the captured payload.
    pub fn seal(self) -> Result<SealedPersist> {
        let blob = encrypt_json(&self.key, &self.payload)?;
        Ok(SealedPersist {
            epoch: self.epoch,
            seq: self.seq,
            blob,
        })
    }
}

/// An encrypted document waiting to be committed.
pub struct SealedPersist {
    epoch: u64,
    seq: u64,
    blob: EncryptedBlob,
}

impl SealedPersist {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Owner of the encrypted session document.
pub struct SessionVault {
    pub(crate) store: RecordStore,
    kdf: KdfParams,
    key: Option<SessionKey>,
    epoch: u64,
    /// Last sequence number handed to a capture.
    captured: u64,
    /// Captures at or below this sequence are stale.
    floor: u64,
    case_caches: Option<Box<dyn CaseCachePurge>>,
}

impl SessionVault {
    pub fn new(store: RecordStore, kdf: KdfParams) -> Self {
        Self {
            store,
            kdf,
            key: None,
            epoch: 0,
            captured: 0,
            floor: 0,
            case_caches: None,
        }
    }

    /// Attach the hook that drops case-scoped caches on wipe.
    pub fn with_case_caches(mut self, purge: Box<dyn CaseCachePurge>) -> Self {
        self.case_caches = Some(purge);
        self
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Direct access to the underlying store.
    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    /// Whether an encrypted session blob is on disk.
    pub fn has_stored_blob(&mut self) -> Result<bool> {
        Ok(keys::get_blob(&mut self.store)?.is_some())
    }

    /// Whether any session artifact (blob, salt, pepper) remains on disk.
    pub fn has_session_artifacts(&mut self) -> Result<bool> {
        Ok(keys::has_session(&mut self.store)?
            || keys::get_blob(&mut self.store)?.is_some()
            || keys::get_pepper(&mut self.store)?.is_some())
    }

    /// Start a fresh session under `pin`.
    ///
    /// Generates a new salt and pepper, derives the key, and persists the salt
    /// and pepper. The PIN is not retained past derivation.
    pub fn setup_new_session(&mut self, pin: &str) -> Result<()> {
        let salt = generate_salt();
        let pepper = Zeroizing::new(generate_pepper());
        let key = derive_key_with(pin, &salt, Some(pepper.as_slice()), &self.kdf)?;

        keys::set_salt(&mut self.store, &to_base64(&salt))?;
        keys::set_pepper(&mut self.store, pepper.as_slice())?;
        self.key = Some(key);

        info!(epoch = self.epoch, "New session key established");
        Ok(())
    }

    /// Derive a key from `pin` and open the stored blob.
    ///
    /// On success the key is retained. A wrong PIN is always
    /// [`SessionError::Authentication`]; missing artifacts are
    /// [`SessionError::NotFound`] and undecodable ones
    /// [`SessionError::Corruption`].
    pub fn unlock(&mut self, pin: &str) -> Result<CasePayload> {
        let blob_value = keys::get_blob(&mut self.store)?;
        let salt_b64 = keys::get_salt(&mut self.store)?;
        let (Some(blob_value), Some(salt_b64)) = (blob_value, salt_b64) else {
            return Err(SessionError::NotFound);
        };
        let pepper = keys::get_pepper(&mut self.store)?.map(Zeroizing::new);

        let salt = from_base64(&salt_b64)
            .map_err(|e| SessionError::Corruption(format!("pin salt: {e}")))?;
        let blob: EncryptedBlob = serde_json::from_value(blob_value)
            .map_err(|e| SessionError::Corruption(format!("session blob: {e}")))?;

        let key = derive_key_with(pin, &salt, pepper.as_ref().map(|p| p.as_slice()), &self.kdf)?;
        let payload: CasePayload = decrypt_json(&key, &blob).map_err(SessionError::from_decrypt)?;

        self.key = Some(key);
        debug!(epoch = self.epoch, legacy = pepper.is_none(), "Session blob opened");
        Ok(payload)
    }

    /// Capture `doc` for persisting under the current epoch.
    ///
    /// `None` when there is nothing to do: no key held or no PHI in the document.
    pub fn begin_persist(&mut self, doc: &SessionDocument) -> Option<PendingPersist> {
        let key = self.key.as_ref()?.clone();
        if !doc.has_phi() {
            return None;
        }
        self.captured += 1;
        Some(PendingPersist {
            epoch: self.epoch,
            seq: self.captured,
            key,
            payload: doc.case_payload(),
        })
    }

    /// Write a sealed document if nothing newer has landed since its capture.
    ///
    /// Returns `false` when the write was discarded as stale: a wipe moved the
    /// epoch, or a later capture was committed, or the key was discarded.
    pub fn commit(&mut self, sealed: SealedPersist) -> Result<bool> {
        if sealed.epoch != self.epoch || sealed.seq <= self.floor {
            debug!(
                captured_epoch = sealed.epoch,
                current_epoch = self.epoch,
                seq = sealed.seq,
                floor = self.floor,
                "Discarding stale session write"
            );
            return Ok(false);
        }
        let value = serde_json::to_value(&sealed.blob)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        keys::set_blob(&mut self.store, &value)?;
        self.floor = sealed.seq;
        Ok(true)
    }

    /// Encrypt and write `doc` in one step. Returns whether anything was written.
    pub fn persist(&mut self, doc: &SessionDocument) -> Result<bool> {
        match self.begin_persist(doc) {
            Some(pending) => {
                let sealed = pending.seal()?;
                self.commit(sealed)
            }
            None => Ok(false),
        }
    }

    /// Forget the session key. Stored ciphertext is untouched.
    ///
    /// Captures still in flight are invalidated.
    pub fn discard_key(&mut self) {
        self.key = None;
        self.floor = self.captured;
    }

    /// Erase every trace of the current session.
    ///
    /// The epoch moves first and the key is dropped before any I/O, so even a
    /// failed erase leaves no way to write or read the old session.
    pub fn wipe(&mut self) -> Result<()> {
        self.epoch += 1;
        self.key = None;
        self.floor = self.captured;
        info!(epoch = self.epoch, "Wiping session data");

        if let Some(caches) = &self.case_caches {
            let purged = caches.purge_case_caches();
            if purged > 0 {
                debug!(purged, "Case-scoped caches deleted");
            }
        }

        let mut first_error = None;
        for (partition, key) in [
            (Partition::Phi, keys::SESSION_BLOB),
            (Partition::Meta, keys::PIN_SALT),
            (Partition::Meta, keys::PIN_PEPPER),
        ] {
            if let Err(e) = overwrite_and_delete(&mut self.store, partition, key) {
                warn!(partition = partition.table(), key, "Secure erase failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
