//! Staff identity, kept outside the PIN-protected session.
//!
//! The profile is wrapped with the device key when one can be loaded or
//! created. Older records stored as plain JSON are still read. A profile that
//! cannot be read at all degrades to an empty one rather than blocking the
//! session.

use casevault_crypto::{DeviceKey, KeyHandle, WrappedRecord};
use casevault_db::queries::staff as keys;
use casevault_types::StaffProfile;
use tracing::{debug, warn};

use crate::vault::SessionVault;
use crate::{Result, SessionError};

impl SessionVault {
    fn device_key(&mut self, create: bool) -> Result<Option<DeviceKey>> {
        if let Some(stored) = keys::get_device_key(&mut self.store)? {
            return Ok(Some(DeviceKey::from_stored(&stored)?));
        }
        if !create {
            return Ok(None);
        }
        let key = DeviceKey::generate();
        keys::set_device_key(&mut self.store, &key.to_stored())?;
        debug!(hardware = key.is_hardware_backed(), "Device key created");
        Ok(Some(key))
    }

    /// Load the staff profile. Never fails; unreadable data yields the default.
    pub fn load_staff(&mut self) -> StaffProfile {
        match self.try_load_staff() {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Staff profile unreadable, starting empty: {e}");
                StaffProfile::default()
            }
        }
    }

    fn try_load_staff(&mut self) -> Result<StaffProfile> {
        let Some(value) = keys::get_profile(&mut self.store)? else {
            return Ok(StaffProfile::default());
        };

        if !WrappedRecord::is_wrapped(&value) {
            return serde_json::from_value(value).map_err(|e| {
                SessionError::Corruption(format!("legacy staff profile: {e}"))
            });
        }

        let record: WrappedRecord = serde_json::from_value(value)
            .map_err(|e| SessionError::Corruption(format!("wrapped staff profile: {e}")))?;
        match self.device_key(false)? {
            Some(key) => Ok(key.unwrap_json(&record)?),
            None => Err(SessionError::NotFound),
        }
    }

    /// Persist the staff profile, wrapped with the device key.
    ///
    /// Falls back to plain JSON if no device key can be used.
    pub fn save_staff(&mut self, profile: &StaffProfile) -> Result<()> {
        let wrapped = self
            .device_key(true)
            .and_then(|key| match key {
                Some(key) => Ok(Some(key.wrap_json(profile)?)),
                None => Ok(None),
            });

        let value = match wrapped {
            Ok(Some(record)) => serde_json::to_value(&record),
            Ok(None) => serde_json::to_value(profile),
            Err(e) => {
                warn!("Device key unavailable, storing staff profile unwrapped: {e}");
                serde_json::to_value(profile)
            }
        }
        .map_err(|e| casevault_crypto::CryptoError::Serialization(e.to_string()))?;

        keys::set_profile(&mut self.store, &value)?;
        Ok(())
    }

    pub fn default_dir_handle(&mut self) -> Result<Option<String>> {
        Ok(keys::get_dir_handle(&mut self.store)?)
    }

    pub fn set_default_dir_handle(&mut self, handle: &str) -> Result<()> {
        Ok(keys::set_dir_handle(&mut self.store, handle)?)
    }
}
