//! os.direct - per-owner plaintext store
//!
//! `keyrack.direct.json` maps slug to `{ "value": ... }`. The file and its
//! directory are private to the user; isolation between owners comes from
//! each owner having its own file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{require_secret, KeyrackHostVault, KeyrackHostVaultAdapter, VaultLocator};
use crate::error::KeyrackError;
use crate::fsio::{self, FileLock};
use crate::secret::SecretValue;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectStore {
    #[serde(flatten)]
    entries: BTreeMap<String, DirectEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DirectEntry {
    value: SecretValue,
}

pub struct DirectVault {
    path: PathBuf,
}

impl DirectVault {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn read_store(&self) -> Result<DirectStore> {
        match fsio::read_optional(&self.path)? {
            None => Ok(DirectStore::default()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                KeyrackError::io(&self.path, format!("malformed direct store: {}", fsio::json_error_kind(&e)))
                    .into()
            }),
        }
    }
}

impl KeyrackHostVaultAdapter for DirectVault {
    fn vault(&self) -> KeyrackHostVault {
        KeyrackHostVault::OsDirect
    }

    fn get(&self, locator: &VaultLocator) -> Result<Option<SecretValue>> {
        let store = self.read_store()?;
        Ok(store
            .entries
            .get(&locator.slug.to_string())
            .map(|entry| entry.value.clone())
            .filter(|value| !value.is_empty()))
    }

    fn set(&self, locator: &VaultLocator, secret: Option<&SecretValue>) -> Result<()> {
        let secret = require_secret(self.vault(), locator.slug, secret)?;

        let _lock = FileLock::exclusive(&self.lock_path())?;
        let mut store = self.read_store()?;
        store.entries.insert(
            locator.slug.to_string(),
            DirectEntry {
                value: secret.clone(),
            },
        );
        fsio::write_atomic(&self.path, &serde_json::to_vec_pretty(&store)?)?;

        tracing::debug!(slug = %locator.slug, path = %self.path.display(), "stored in direct vault");
        Ok(())
    }
}
