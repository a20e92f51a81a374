//! keyrack - Local credential resolution and secret-vault broker
//!
//! A repo declares which keys it needs (`.agent/keyrack.yml`); each host
//! records, in an age-encrypted manifest, which vault holds every key and
//! how a grant is derived from it. `get` resolves a key or a whole repo
//! into grant attempts (granted, locked, blocked, absent), scanning every
//! value against known-leaked credential patterns before it is released.
//!
//! An optional per-login-session daemon keeps the decrypted host manifest
//! and `os.daemon` values in memory until its TTL runs out.

pub mod config;
pub mod daemon;
pub mod error;
pub mod firewall;
pub mod fsio;
pub mod grant;
pub mod host_store;
pub mod manifest;
pub mod mechanism;
pub mod ops;
pub mod resolve;
pub mod secret;
pub mod vault;

pub use config::KeyrackConfig;
pub use error::KeyrackError;
pub use grant::{KeyrackGrantAttempt, KeyrackGrantStatus};
pub use manifest::{KeySlug, KeyrackHostManifest, KeyrackKeyHost, KeyrackRepoManifest};
pub use mechanism::KeyrackGrantMechanism;
pub use ops::{Keyrack, SecretPrompt};
pub use resolve::GrantTarget;
pub use secret::{Environment, SecretValue};
pub use vault::KeyrackHostVault;
