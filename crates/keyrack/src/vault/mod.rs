//! Host vaults
//!
//! A vault knows how to get and set the raw value of a key on this host.
//! Every vault kind maps to exactly one adapter held by `VaultRegistry`,
//! including `os.daemon`, whose adapter happens to talk to another process.

pub mod aws_sso;
pub mod daemon;
pub mod direct;
pub mod envvar;
pub mod onepassword;
pub mod secure;

use anyhow::Result;
use keyrack_core::Paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyrackError;
use crate::manifest::KeySlug;
use crate::secret::{Environment, SecretValue};

pub use aws_sso::AwsSsoVault;
pub use daemon::DaemonVault;
pub use direct::DirectVault;
pub use envvar::EnvvarVault;
pub use onepassword::OnePasswordVault;
pub use secure::SecureVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyrackHostVault {
    /// Per-owner plaintext store on local disk
    #[serde(rename = "os.direct")]
    OsDirect,
    /// OS-native secure storage (keychain, secret service, kernel keyring)
    #[serde(rename = "os.secure")]
    OsSecure,
    /// Process environment
    #[serde(rename = "os.envvar")]
    OsEnvvar,
    /// Session daemon cache
    #[serde(rename = "os.daemon")]
    OsDaemon,
    /// AWS IAM Identity Center profile
    #[serde(rename = "aws.iam.sso")]
    AwsIamSso,
    #[serde(rename = "1password")]
    OnePassword,
}

impl KeyrackHostVault {
    pub const ALL: [KeyrackHostVault; 6] = [
        Self::OsDirect,
        Self::OsSecure,
        Self::OsEnvvar,
        Self::OsDaemon,
        Self::AwsIamSso,
        Self::OnePassword,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OsDirect => "os.direct",
            Self::OsSecure => "os.secure",
            Self::OsEnvvar => "os.envvar",
            Self::OsDaemon => "os.daemon",
            Self::AwsIamSso => "aws.iam.sso",
            Self::OnePassword => "1password",
        }
    }
}

impl fmt::Display for KeyrackHostVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyrackHostVault {
    type Err = KeyrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| {
                KeyrackError::Validation(format!(
                    "unknown vault {:?}; expected one of {}",
                    s,
                    Self::ALL.map(|v| v.as_str()).join(", ")
                ))
            })
    }
}

/// Which key a vault operation is about
#[derive(Debug, Clone, Copy)]
pub struct VaultLocator<'a> {
    pub slug: &'a KeySlug,
    /// External identifier some vaults need (AWS profile, 1Password reference)
    pub exid: Option<&'a str>,
}

impl<'a> VaultLocator<'a> {
    pub fn new(slug: &'a KeySlug, exid: Option<&'a str>) -> Self {
        Self { slug, exid }
    }

    pub(crate) fn require_exid(&self, vault: KeyrackHostVault, what: &str) -> Result<&'a str> {
        match self.exid {
            Some(exid) if !exid.trim().is_empty() => Ok(exid),
            _ => Err(KeyrackError::Validation(format!(
                "vault {} needs --exid <{}> for {}",
                vault, what, self.slug
            ))
            .into()),
        }
    }
}

/// Capability contract shared by every vault
pub trait KeyrackHostVaultAdapter {
    fn vault(&self) -> KeyrackHostVault;

    /// Whether `set` stores a caller-supplied value (otherwise the vault is
    /// configuration-only and the value lives elsewhere)
    fn accepts_secret(&self) -> bool {
        true
    }

    /// Raw value for a key, `None` when the vault has nothing for it
    fn get(&self, locator: &VaultLocator) -> Result<Option<SecretValue>>;

    /// Store (or prepare) a key in this vault
    fn set(&self, locator: &VaultLocator, secret: Option<&SecretValue>) -> Result<()>;

    /// Command that makes a locked key available again
    fn unlock_hint(&self, locator: &VaultLocator) -> String {
        format!(
            "keyrack set --key {} --vault {}",
            locator.slug,
            self.vault()
        )
    }
}

/// Value a secret-storing vault must be given
pub(crate) fn require_secret<'s>(
    vault: KeyrackHostVault,
    slug: &KeySlug,
    secret: Option<&'s SecretValue>,
) -> Result<&'s SecretValue> {
    match secret {
        Some(secret) if !secret.is_empty() => Ok(secret),
        _ => Err(KeyrackError::Validation(format!(
            "vault {} needs a value for {}",
            vault, slug
        ))
        .into()),
    }
}

/// Fixed registry of vault adapters for one invocation
pub struct VaultRegistry {
    direct: DirectVault,
    secure: SecureVault,
    envvar: EnvvarVault,
    daemon: DaemonVault,
    aws_sso: AwsSsoVault,
    onepassword: OnePasswordVault,
}

impl VaultRegistry {
    pub fn new(paths: &Paths, owner: Option<&str>, env: Environment, daemon: DaemonVault) -> Self {
        Self {
            direct: DirectVault::new(paths.direct_store(owner)),
            secure: SecureVault::new(owner),
            envvar: EnvvarVault::new(env),
            daemon,
            aws_sso: AwsSsoVault::new(),
            onepassword: OnePasswordVault::new(),
        }
    }

    pub fn adapter(&self, vault: KeyrackHostVault) -> &dyn KeyrackHostVaultAdapter {
        match vault {
            KeyrackHostVault::OsDirect => &self.direct,
            KeyrackHostVault::OsSecure => &self.secure,
            KeyrackHostVault::OsEnvvar => &self.envvar,
            KeyrackHostVault::OsDaemon => &self.daemon,
            KeyrackHostVault::AwsIamSso => &self.aws_sso,
            KeyrackHostVault::OnePassword => &self.onepassword,
        }
    }
}
