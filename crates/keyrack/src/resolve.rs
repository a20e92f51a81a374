//! Resolution engine
//!
//! For one key the decision runs in a fixed order and ends in exactly one
//! status:
//!
//! 1. no host entry: `absent`
//! 2. value from `$NAME` if set, else from the entry's vault; none: `locked`
//! 3. firewall on the raw value, then on the mechanism's translation; a
//!    match: `blocked`
//! 4. translation failure or an already-expired grant: `locked`
//! 5. otherwise `granted`
//!
//! Whole-repo resolution runs this for every declared key in the env and
//! always returns one attempt per key.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::KeyrackError;
use crate::firewall::Firewall;
use crate::grant::KeyrackGrantAttempt;
use crate::manifest::{KeySlug, KeyrackHostManifest, KeyrackRepoManifest, ENV_ALL};
use crate::mechanism;
use crate::secret::{Environment, SecretValue};
use crate::vault::{VaultLocator, VaultRegistry};

/// Host configuration as seen by this invocation
#[derive(Debug, Clone, Copy)]
pub enum HostView<'a> {
    Available(&'a KeyrackHostManifest),
    /// The manifest exists but cannot be decrypted right now
    Locked,
}

/// What to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantTarget {
    Key(KeySlug),
    Repo { env: Option<String> },
}

/// Everything resolution reads
pub struct KeyrackGrantContext<'a> {
    pub repo: &'a KeyrackRepoManifest,
    pub host: HostView<'a>,
    pub vaults: &'a VaultRegistry,
    pub firewall: &'a Firewall,
    pub env: &'a Environment,
    pub now: DateTime<Utc>,
}

impl KeyrackGrantContext<'_> {
    /// Resolve a target into its attempts (one for a key, N for a repo)
    pub fn resolve(&self, target: &GrantTarget) -> Result<Vec<KeyrackGrantAttempt>> {
        match target {
            GrantTarget::Key(slug) => Ok(vec![self.get_key_grant(slug)]),
            GrantTarget::Repo { env } => self.get_repo_grants(env.as_deref()),
        }
    }

    /// Every key declared for `env` (plus `all`), never short-circuited
    pub fn get_repo_grants(&self, env: Option<&str>) -> Result<Vec<KeyrackGrantAttempt>> {
        if let Some(env) = env {
            if env != ENV_ALL && !self.repo.envs.iter().any(|e| e == env) {
                return Err(KeyrackError::Validation(format!(
                    "env {:?} is not declared; declared envs are {}",
                    env,
                    self.repo.env_names().join(", ")
                ))
                .into());
            }
        }

        Ok(self
            .repo
            .keys_for_env(env)
            .into_iter()
            .map(|spec| self.get_key_grant(&spec.slug))
            .collect())
    }

    pub fn get_key_grant(&self, slug: &KeySlug) -> KeyrackGrantAttempt {
        let attempt = self.decide(slug);
        debug!(slug = %slug, status = %attempt.status, "resolved");
        attempt
    }

    fn decide(&self, slug: &KeySlug) -> KeyrackGrantAttempt {
        if self.repo.spec(slug).is_none() {
            let mut attempt = KeyrackGrantAttempt::absent(slug);
            attempt.message = format!("not declared in the {} keyrack manifest", self.repo.org);
            return attempt;
        }

        let host = match self.host {
            HostView::Available(host) => host,
            HostView::Locked => {
                return KeyrackGrantAttempt::locked(
                    slug,
                    "host manifest is locked",
                    "keyrack unlock",
                )
            }
        };

        let Some(entry) = host.get(slug) else {
            return KeyrackGrantAttempt::absent(slug);
        };

        let adapter = self.vaults.adapter(entry.vault);
        let locator = VaultLocator::new(slug, entry.exid.as_deref());

        let (raw, source) = match self.env.get(&slug.name) {
            Some(value) => (SecretValue::new(value), format!("${}", slug.name)),
            None => match adapter.get(&locator) {
                Ok(Some(value)) => (value, entry.vault.to_string()),
                Ok(None) => {
                    return KeyrackGrantAttempt::locked(
                        slug,
                        format!("{} has no value for this key", entry.vault),
                        adapter.unlock_hint(&locator),
                    )
                }
                Err(e) => {
                    warn!(slug = %slug, vault = %entry.vault, error = %e, "vault lookup failed");
                    return KeyrackGrantAttempt::locked(
                        slug,
                        format!("{} is unavailable: {}", entry.vault, e),
                        adapter.unlock_hint(&locator),
                    );
                }
            },
        };

        let verdict = self.firewall.scan(raw.expose());
        if verdict.blocked {
            return self.blocked(slug, &source, verdict.reason);
        }

        let translated = match mechanism::adapter_for(entry.mech).translate(raw) {
            Ok(translated) => translated,
            Err(e) => {
                return KeyrackGrantAttempt::locked(
                    slug,
                    format!("{} value from {} is unusable: {}", entry.mech, source, e),
                    adapter.unlock_hint(&locator),
                )
            }
        };

        let verdict = self.firewall.scan(translated.secret.expose());
        if verdict.blocked {
            return self.blocked(slug, &source, verdict.reason);
        }

        if let Some(expires_at) = translated.expires_at {
            if expires_at <= self.now {
                return KeyrackGrantAttempt::locked(
                    slug,
                    format!("credential from {} expired at {}", source, expires_at.to_rfc3339()),
                    adapter.unlock_hint(&locator),
                );
            }
        }

        KeyrackGrantAttempt::granted(slug, &source, translated)
    }

    fn blocked(&self, slug: &KeySlug, source: &str, reason: Option<String>) -> KeyrackGrantAttempt {
        warn!(slug = %slug, source, "firewall blocked a value");
        let reason = reason.unwrap_or_else(|| "value matches a blocked pattern".to_string());
        KeyrackGrantAttempt::blocked(slug, format!("{} (from {})", reason, source))
    }
}
