//! Secret values and the environment they may be overridden from

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A raw or granted secret
///
/// `Debug` and `Display` never show the value. The only way to read it is
/// `expose`, and the only serialized form is inside a granted attempt or a
/// daemon cache message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Snapshot of environment variables visible to resolution
///
/// Captured once per invocation so resolution never reads ambient process
/// state mid-flight, and tests can supply their own.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Non-empty value of a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretValue::new("sk-live-123");
        assert!(!format!("{:?}", secret).contains("sk-live-123"));
        assert!(!format!("{}", secret).contains("sk-live-123"));
        assert_eq!(secret.expose(), "sk-live-123");
    }

    #[test]
    fn test_serializes_transparently() {
        let secret = SecretValue::new("abc");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_environment_ignores_empty() {
        let env = Environment::from_pairs([("SET", "x"), ("EMPTY", "")]);
        assert_eq!(env.get("SET"), Some("x"));
        assert_eq!(env.get("EMPTY"), None);
        assert_eq!(env.get("MISSING"), None);
    }
}
