//! os.daemon - values cached by the session daemon
//!
//! An unreachable daemon or a cache miss is simply "nothing here", which the
//! resolver reports as locked.

use anyhow::Result;

use super::{require_secret, KeyrackHostVault, KeyrackHostVaultAdapter, VaultLocator};
use crate::daemon::{CachedKey, DaemonClient};
use crate::error::KeyrackError;
use crate::secret::SecretValue;

/// Session length used when `set` has to start a session itself
const SET_SESSION_HOURS: i64 = 9;

pub struct DaemonVault {
    client: DaemonClient,
    spawn_wait: std::time::Duration,
    session_ttl: chrono::Duration,
}

impl DaemonVault {
    pub fn new(client: DaemonClient) -> Self {
        Self {
            client,
            spawn_wait: std::time::Duration::from_millis(3000),
            session_ttl: chrono::Duration::hours(SET_SESSION_HOURS),
        }
    }

    pub fn with_session(mut self, session_ttl: chrono::Duration, spawn_wait: std::time::Duration) -> Self {
        self.session_ttl = session_ttl;
        self.spawn_wait = spawn_wait;
        self
    }
}

impl KeyrackHostVaultAdapter for DaemonVault {
    fn vault(&self) -> KeyrackHostVault {
        KeyrackHostVault::OsDaemon
    }

    fn get(&self, locator: &VaultLocator) -> Result<Option<SecretValue>> {
        match self.client.get(locator.slug) {
            Ok(key) => Ok(key.map(|key| key.secret).filter(|s| !s.is_empty())),
            Err(e) => match e.downcast_ref::<KeyrackError>() {
                Some(KeyrackError::DaemonUnavailable(reason)) => {
                    tracing::debug!(slug = %locator.slug, reason = %reason, "daemon unavailable");
                    Ok(None)
                }
                _ => Err(e),
            },
        }
    }

    /// Cache the value for the current session, starting the daemon if needed
    fn set(&self, locator: &VaultLocator, secret: Option<&SecretValue>) -> Result<()> {
        let secret = require_secret(self.vault(), locator.slug, secret)?;
        self.client.ensure_running(self.spawn_wait)?;

        // Join a live session without changing its expiry
        let key = CachedKey {
            slug: locator.slug.clone(),
            secret: secret.clone(),
            expires_at: None,
        };
        let live = self.client.status()?.is_some_and(|report| report.expires_at.is_some());
        let ttl = if live { None } else { Some(self.session_ttl) };
        self.client.unlock(None, vec![key], ttl)?;
        Ok(())
    }

    fn unlock_hint(&self, locator: &VaultLocator) -> String {
        format!("keyrack unlock --key {}", locator.slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::KeySlug;
    use keyrack_core::SessionAddress;

    #[test]
    fn test_unreachable_daemon_is_a_miss() {
        let dir = tempfile::TempDir::new().unwrap();
        let vault = DaemonVault::new(DaemonClient::new(SessionAddress::for_session(dir.path(), "x", None)));
        let slug: KeySlug = "o.prod.TOKEN".parse().unwrap();
        let locator = VaultLocator::new(&slug, None);

        assert!(vault.get(&locator).unwrap().is_none());
        assert_eq!(vault.unlock_hint(&locator), "keyrack unlock --key o.prod.TOKEN");
    }
}
