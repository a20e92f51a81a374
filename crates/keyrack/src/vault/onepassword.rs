//! 1password - read through the `op` CLI
//!
//! The exid is a secret reference (`op://vault/item/field`). Keyrack never
//! writes into 1Password; `set` only records where the value lives.

use anyhow::{bail, Context, Result};
use std::process::Command;

use super::{KeyrackHostVault, KeyrackHostVaultAdapter, VaultLocator};
use crate::error::KeyrackError;
use crate::secret::SecretValue;

pub struct OnePasswordVault {
    program: String,
}

impl Default for OnePasswordVault {
    fn default() -> Self {
        Self::new()
    }
}

impl OnePasswordVault {
    pub fn new() -> Self {
        Self {
            program: "op".to_string(),
        }
    }
}

impl KeyrackHostVaultAdapter for OnePasswordVault {
    fn vault(&self) -> KeyrackHostVault {
        KeyrackHostVault::OnePassword
    }

    fn accepts_secret(&self) -> bool {
        false
    }

    fn get(&self, locator: &VaultLocator) -> Result<Option<SecretValue>> {
        let reference = locator.require_exid(self.vault(), "op://vault/item/field")?;

        let output = Command::new(&self.program)
            .args(["read", "--no-newline", reference])
            .output()
            .with_context(|| format!("cannot run {}", self.program))?;

        if !output.status.success() {
            // Signed out or unknown reference; stderr may echo the reference, never a value
            tracing::debug!(slug = %locator.slug, code = ?output.status.code(), "op read failed");
            return Ok(None);
        }

        let value = String::from_utf8(output.stdout)
            .map_err(|_| KeyrackError::Validation("1password value is not valid UTF-8".into()))?;
        let value = value.trim_end_matches(['\r', '\n']);
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(SecretValue::new(value)))
    }

    fn set(&self, locator: &VaultLocator, secret: Option<&SecretValue>) -> Result<()> {
        locator.require_exid(self.vault(), "op://vault/item/field")?;
        if secret.is_some() {
            bail!(KeyrackError::Validation(
                "vault 1password is read-only; store the value in 1Password and pass its reference as --exid".into()
            ));
        }
        Ok(())
    }

    fn unlock_hint(&self, locator: &VaultLocator) -> String {
        match locator.exid {
            Some(reference) => format!("op signin && op read {}", reference),
            None => "op signin".to_string(),
        }
    }
}
