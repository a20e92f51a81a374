//! Key slugs: `org.env.NAME`

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyrackError;

/// Env segment that matches every declared env
pub const ENV_ALL: &str = "all";

/// Fully qualified key identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeySlug {
    pub org: String,
    pub env: String,
    /// Bare name, also the environment variable that overrides the key
    pub name: String,
}

impl KeySlug {
    pub fn new(org: &str, env: &str, name: &str) -> Result<Self, KeyrackError> {
        validate_segment("org", org)?;
        validate_segment("env", env)?;
        validate_name(name)?;
        Ok(Self {
            org: org.to_string(),
            env: env.to_string(),
            name: name.to_string(),
        })
    }
}

impl FromStr for KeySlug {
    type Err = KeyrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(org), Some(env), Some(name)) => Self::new(org, env, name),
            _ => Err(KeyrackError::Validation(format!(
                "key slug {:?} must have the form org.env.NAME",
                s
            ))),
        }
    }
}

impl fmt::Display for KeySlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.org, self.env, self.name)
    }
}

impl Serialize for KeySlug {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeySlug {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub(crate) fn validate_segment(label: &str, value: &str) -> Result<(), KeyrackError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(KeyrackError::Validation(format!(
            "{} {:?} may only contain letters, digits, '-' and '_'",
            label, value
        )))
    }
}

fn validate_name(name: &str) -> Result<(), KeyrackError> {
    let ok = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(KeyrackError::Validation(format!(
            "key name {:?} must be a valid environment variable name",
            name
        )))
    }
}
