//! os.secure - OS-native secure storage
//!
//! Backed by the `keyring` crate: Keychain on macOS, Credential Manager on
//! Windows, the kernel keyutils keyring on Linux. Built without the
//! `keyring` feature the vault reports every key as missing and refuses to
//! store.

use anyhow::Result;

use super::{require_secret, KeyrackHostVault, KeyrackHostVaultAdapter, VaultLocator};
use crate::secret::SecretValue;

const SERVICE: &str = "rhachet.keyrack";

pub struct SecureVault {
    owner: String,
}

impl SecureVault {
    pub fn new(owner: Option<&str>) -> Self {
        Self {
            owner: owner.unwrap_or(keyrack_core::paths::DEFAULT_OWNER).to_string(),
        }
    }

    /// Account name under the keyrack service entry
    fn account(&self, locator: &VaultLocator) -> String {
        format!("owner={}/{}", self.owner, locator.slug)
    }
}

#[cfg(feature = "keyring")]
impl KeyrackHostVaultAdapter for SecureVault {
    fn vault(&self) -> KeyrackHostVault {
        KeyrackHostVault::OsSecure
    }

    fn get(&self, locator: &VaultLocator) -> Result<Option<SecretValue>> {
        let entry = keyring::Entry::new(SERVICE, &self.account(locator))?;
        match entry.get_password() {
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => Ok(Some(SecretValue::new(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, locator: &VaultLocator, secret: Option<&SecretValue>) -> Result<()> {
        let secret = require_secret(self.vault(), locator.slug, secret)?;
        let entry = keyring::Entry::new(SERVICE, &self.account(locator))?;
        entry.set_password(secret.expose())?;
        tracing::debug!(slug = %locator.slug, "stored in os secure storage");
        Ok(())
    }
}

#[cfg(not(feature = "keyring"))]
impl KeyrackHostVaultAdapter for SecureVault {
    fn vault(&self) -> KeyrackHostVault {
        KeyrackHostVault::OsSecure
    }

    fn get(&self, locator: &VaultLocator) -> Result<Option<SecretValue>> {
        tracing::debug!(slug = %locator.slug, account = %self.account(locator), service = SERVICE, "built without keyring support");
        Ok(None)
    }

    fn set(&self, locator: &VaultLocator, secret: Option<&SecretValue>) -> Result<()> {
        require_secret(self.vault(), locator.slug, secret)?;
        anyhow::bail!(crate::error::KeyrackError::Validation(
            "vault os.secure is unavailable: keyrack was built without the keyring feature".into()
        ))
    }
}
