//! Host manifest: how this machine obtains each key
//!
//! Stored encrypted (see `host_store`); this module is the plaintext model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::slug::KeySlug;
use super::Effect;
use crate::error::KeyrackError;
use crate::mechanism::{self, KeyrackGrantMechanism};
use crate::vault::KeyrackHostVault;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyrackHostManifest {
    pub uri: String,
    #[serde(default)]
    pub hosts: BTreeMap<KeySlug, KeyrackKeyHost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyrackKeyHost {
    pub slug: KeySlug,
    pub mech: KeyrackGrantMechanism,
    pub vault: KeyrackHostVault,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyrackKeyHost {
    fn same_config(&self, mech: KeyrackGrantMechanism, vault: KeyrackHostVault, exid: Option<&str>) -> bool {
        self.mech == mech && self.vault == vault && self.exid.as_deref() == exid
    }
}

impl KeyrackHostManifest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            hosts: BTreeMap::new(),
        }
    }

    /// Parse plaintext JSON and check every entry
    pub fn parse(bytes: &[u8]) -> Result<Self, KeyrackError> {
        let manifest: Self = serde_json::from_slice(bytes).map_err(|e| {
            KeyrackError::Validation(format!(
                "host manifest is malformed ({})",
                crate::fsio::json_error_kind(&e)
            ))
        })?;

        for (slug, host) in &manifest.hosts {
            if &host.slug != slug {
                return Err(KeyrackError::Validation(format!(
                    "host entry {} is filed under {}",
                    host.slug, slug
                )));
            }
            check_pairing(host.mech, host.vault)?;
        }
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn get(&self, slug: &KeySlug) -> Option<&KeyrackKeyHost> {
        self.hosts.get(slug)
    }

    /// Findsert the host entry for `slug`
    ///
    /// Identical `(mech, vault, exid)` returns the entry untouched with
    /// `Found`. A different configuration is refused unless `force`, which
    /// overwrites it (keeping `createdAt`) with `Updated`.
    pub fn set_key_host(
        &mut self,
        slug: &KeySlug,
        mech: KeyrackGrantMechanism,
        vault: KeyrackHostVault,
        exid: Option<&str>,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<(KeyrackKeyHost, Effect), KeyrackError> {
        check_pairing(mech, vault)?;

        let created_at = match self.hosts.get(slug) {
            Some(existing) if existing.same_config(mech, vault, exid) => {
                return Ok((existing.clone(), Effect::Found));
            }
            Some(existing) if !force => {
                return Err(KeyrackError::Validation(format!(
                    "{} is already configured as {} via {}; pass --force to replace it",
                    slug, existing.mech, existing.vault
                )));
            }
            Some(existing) => Some(existing.created_at),
            None => None,
        };

        let host = KeyrackKeyHost {
            slug: slug.clone(),
            mech,
            vault,
            exid: exid.map(str::to_string),
            created_at: created_at.unwrap_or(now),
            updated_at: now,
        };
        self.hosts.insert(slug.clone(), host.clone());

        let effect = if created_at.is_some() {
            Effect::Updated
        } else {
            Effect::Created
        };
        Ok((host, effect))
    }
}

fn check_pairing(mech: KeyrackGrantMechanism, vault: KeyrackHostVault) -> Result<(), KeyrackError> {
    let validation = mechanism::adapter_for(mech).validate(vault);
    if validation.valid {
        Ok(())
    } else {
        Err(KeyrackError::Validation(validation.reason.unwrap_or_else(|| {
            format!("{} cannot be used with {}", mech, vault)
        })))
    }
}
