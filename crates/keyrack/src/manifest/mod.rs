//! Repo and host manifests
//!
//! The repo manifest (`keyrack.yml`) declares which keys a repository needs.
//! The host manifest records how this machine obtains each of them. Neither
//! ever holds secret material.

pub mod host;
pub mod repo;
pub mod slug;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use host::{KeyrackHostManifest, KeyrackKeyHost};
pub use repo::{KeyrackKeySpec, KeyrackRepoManifest};
pub use slug::{KeySlug, ENV_ALL};

/// What a findsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Created,
    Found,
    Updated,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Found => "found",
            Self::Updated => "updated",
        })
    }
}
