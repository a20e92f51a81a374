//! Grant mechanisms
//!
//! A mechanism turns the raw value a vault hands back into the grant a
//! caller sees. Replica mechanisms pass the value through; the AWS SSO
//! mechanism reads the expiry out of a temporary credential.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyrackError;
use crate::secret::SecretValue;
use crate::vault::KeyrackHostVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyrackGrantMechanism {
    /// Secret returned unchanged
    Replica,
    /// Secret returned unchanged; long-lived, no rotation expected
    PermanentViaReplica,
    /// Temporary AWS credential obtained through an SSO login
    EphemeralViaAwsSso,
}

impl KeyrackGrantMechanism {
    pub const ALL: [KeyrackGrantMechanism; 3] = [
        Self::Replica,
        Self::PermanentViaReplica,
        Self::EphemeralViaAwsSso,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replica => "REPLICA",
            Self::PermanentViaReplica => "PERMANENT_VIA_REPLICA",
            Self::EphemeralViaAwsSso => "EPHEMERAL_VIA_AWS_SSO",
        }
    }
}

impl fmt::Display for KeyrackGrantMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyrackGrantMechanism {
    type Err = KeyrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| {
                KeyrackError::Validation(format!(
                    "unknown mechanism {:?}; expected one of {}",
                    s,
                    Self::ALL.map(|m| m.as_str()).join(", ")
                ))
            })
    }
}

/// Outcome of a static mechanism/vault compatibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechanismValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl MechanismValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// The value a caller will see, plus its expiry if it has one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedSecret {
    pub secret: SecretValue,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Capability contract shared by every mechanism
pub trait KeyrackGrantMechanismAdapter: Sync {
    fn mech(&self) -> KeyrackGrantMechanism;

    /// Whether values from `vault` can be granted through this mechanism
    fn validate(&self, vault: KeyrackHostVault) -> MechanismValidation;

    /// Turn a stored value into the value the caller sees
    fn translate(&self, secret: SecretValue) -> Result<TranslatedSecret>;
}

struct ReplicaMechanism;
struct PermanentViaReplicaMechanism;
struct EphemeralViaAwsSsoMechanism;

static REPLICA: ReplicaMechanism = ReplicaMechanism;
static PERMANENT_VIA_REPLICA: PermanentViaReplicaMechanism = PermanentViaReplicaMechanism;
static EPHEMERAL_VIA_AWS_SSO: EphemeralViaAwsSsoMechanism = EphemeralViaAwsSsoMechanism;

/// Fixed registry: each mechanism maps to exactly one adapter
pub fn adapter_for(mech: KeyrackGrantMechanism) -> &'static dyn KeyrackGrantMechanismAdapter {
    match mech {
        KeyrackGrantMechanism::Replica => &REPLICA,
        KeyrackGrantMechanism::PermanentViaReplica => &PERMANENT_VIA_REPLICA,
        KeyrackGrantMechanism::EphemeralViaAwsSso => &EPHEMERAL_VIA_AWS_SSO,
    }
}

/// Mechanism a vault implies when none is given explicitly
pub fn implied_by(vault: KeyrackHostVault) -> Option<KeyrackGrantMechanism> {
    match vault {
        KeyrackHostVault::OsSecure
        | KeyrackHostVault::OsDirect
        | KeyrackHostVault::OsEnvvar
        | KeyrackHostVault::OnePassword => Some(KeyrackGrantMechanism::PermanentViaReplica),
        KeyrackHostVault::AwsIamSso => Some(KeyrackGrantMechanism::EphemeralViaAwsSso),
        KeyrackHostVault::OsDaemon => None,
    }
}

/// Pick the mechanism for a vault, inferring it when unambiguous
///
/// An explicit mechanism the vault cannot serve is an error, never a silent
/// override.
pub fn resolve_mechanism(
    vault: KeyrackHostVault,
    explicit: Option<KeyrackGrantMechanism>,
) -> Result<KeyrackGrantMechanism, KeyrackError> {
    let mech = match (explicit, implied_by(vault)) {
        (Some(mech), _) => mech,
        (None, Some(implied)) => implied,
        (None, None) => {
            return Err(KeyrackError::Validation(format!(
                "vault {} has no implied mechanism; pass --mech",
                vault
            )))
        }
    };

    let validation = adapter_for(mech).validate(vault);
    if !validation.valid {
        return Err(KeyrackError::Validation(
            validation
                .reason
                .unwrap_or_else(|| format!("{} cannot be used with {}", mech, vault)),
        ));
    }
    Ok(mech)
}

fn validate_replica(mech: KeyrackGrantMechanism, vault: KeyrackHostVault) -> MechanismValidation {
    if vault == KeyrackHostVault::AwsIamSso {
        MechanismValidation::rejected(format!(
            "{} cannot be used with {}: sso credentials are ephemeral, use {}",
            mech,
            vault,
            KeyrackGrantMechanism::EphemeralViaAwsSso
        ))
    } else {
        MechanismValidation::ok()
    }
}

impl KeyrackGrantMechanismAdapter for ReplicaMechanism {
    fn mech(&self) -> KeyrackGrantMechanism {
        KeyrackGrantMechanism::Replica
    }

    fn validate(&self, vault: KeyrackHostVault) -> MechanismValidation {
        validate_replica(self.mech(), vault)
    }

    fn translate(&self, secret: SecretValue) -> Result<TranslatedSecret> {
        Ok(TranslatedSecret {
            secret,
            expires_at: None,
        })
    }
}

impl KeyrackGrantMechanismAdapter for PermanentViaReplicaMechanism {
    fn mech(&self) -> KeyrackGrantMechanism {
        KeyrackGrantMechanism::PermanentViaReplica
    }

    fn validate(&self, vault: KeyrackHostVault) -> MechanismValidation {
        validate_replica(self.mech(), vault)
    }

    fn translate(&self, secret: SecretValue) -> Result<TranslatedSecret> {
        Ok(TranslatedSecret {
            secret,
            expires_at: None,
        })
    }
}

/// Shape of `aws configure export-credentials --format process`
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessCredentials {
    access_key_id: String,
    expiration: Option<DateTime<Utc>>,
}

impl KeyrackGrantMechanismAdapter for EphemeralViaAwsSsoMechanism {
    fn mech(&self) -> KeyrackGrantMechanism {
        KeyrackGrantMechanism::EphemeralViaAwsSso
    }

    fn validate(&self, vault: KeyrackHostVault) -> MechanismValidation {
        match vault {
            KeyrackHostVault::AwsIamSso | KeyrackHostVault::OsDaemon => MechanismValidation::ok(),
            other => MechanismValidation::rejected(format!(
                "{} requires an expiry-capable vault ({} or {}), not {}",
                self.mech(),
                KeyrackHostVault::AwsIamSso,
                KeyrackHostVault::OsDaemon,
                other
            )),
        }
    }

    fn translate(&self, secret: SecretValue) -> Result<TranslatedSecret> {
        let creds: ProcessCredentials = serde_json::from_str(secret.expose()).map_err(|_| {
            KeyrackError::Validation("aws sso value is not a process credential document".into())
        })?;
        if creds.access_key_id.is_empty() {
            return Err(KeyrackError::Validation("aws sso credential has no access key id".into()).into());
        }
        let expires_at = creds.expiration.ok_or_else(|| {
            KeyrackError::Validation("aws sso credential has no expiration".into())
        })?;

        Ok(TranslatedSecret {
            secret,
            expires_at: Some(expires_at),
        })
    }
}
