//! Wire protocol between the CLI and the session daemon
//!
//! One JSON request per connection. The client writes the request, shuts
//! down its write half, and reads one JSON response until EOF.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::{KeySlug, KeyrackHostManifest};
use crate::secret::SecretValue;

/// Largest request or response either side will read
pub const MAX_MESSAGE_BYTES: u64 = 4 * 1024 * 1024;

/// A key value held by the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedKey {
    pub slug: KeySlug,
    pub secret: SecretValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Start or extend the session; `ttl_seconds: None` keeps the current expiry
    Unlock {
        #[serde(default)]
        host: Option<KeyrackHostManifest>,
        #[serde(default)]
        keys: Vec<CachedKey>,
        #[serde(default)]
        ttl_seconds: Option<u64>,
    },
    Get {
        slug: KeySlug,
    },
    Host,
    Status,
    /// Evict one key, or everything (and stop) when `slug` is `None`
    Relock {
        #[serde(default)]
        slug: Option<KeySlug>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    Unlocked {
        expires_at: DateTime<Utc>,
    },
    Key {
        key: Option<CachedKey>,
    },
    Host {
        host: Option<KeyrackHostManifest>,
    },
    Status(DaemonStatusReport),
    Relocked {
        evicted: usize,
        stopping: bool,
    },
    Error {
        message: String,
    },
}

/// What `status` reports; slugs and expiries only, never values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatusReport {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub host_cached: bool,
    pub keys: Vec<CachedKeyStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedKeyStatus {
    pub slug: KeySlug,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DaemonStatusReport {
    /// Seconds until the session relocks itself
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|expires_at| (expires_at - now).num_seconds().max(0))
    }
}
