//! Keyrack tool configuration
//!
//! Configuration file: ~/.rhachet/keyrack/keyrack.config.yml
//!
//! Every field has a default, so a missing file is a valid configuration.

use anyhow::{bail, Context, Result};
use chrono::Duration;
use keyrack_core::Paths;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::KeyrackError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyrackConfig {
    #[serde(default)]
    pub unlock: UnlockConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub firewall: FirewallConfig,
}

impl KeyrackConfig {
    /// Load configuration from the default location
    pub fn load(paths: &Paths) -> Result<Self> {
        Self::load_from(&paths.config_file())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keyrack config from {:?}", path))?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            KeyrackError::configuration(
                format!("malformed keyrack config at {}: {}", path.display(), e),
                format!("fix or remove {}", path.display()),
            )
        })?;

        // Surface a bad duration now rather than at the first unlock
        config.unlock.default_duration()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockConfig {
    /// Default time a session unlock lasts (e.g. "9h", "30m")
    #[serde(default = "default_unlock_duration")]
    pub duration: String,
}

fn default_unlock_duration() -> String {
    "9h".to_string()
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            duration: default_unlock_duration(),
        }
    }
}

impl UnlockConfig {
    pub fn default_duration(&self) -> Result<Duration> {
        parse_duration(&self.duration)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Read/write timeout on the daemon socket
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long to wait for a freshly spawned daemon to accept connections
    #[serde(default = "default_spawn_wait_ms")]
    pub spawn_wait_ms: u64,
}

fn default_timeout_ms() -> u64 {
    1500
}

fn default_spawn_wait_ms() -> u64 {
    3000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            spawn_wait_ms: default_spawn_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Signatures appended to the built-in table
    #[serde(default)]
    pub extra: Vec<ExtraSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraSignature {
    /// Human-readable name reported when the signature matches
    pub name: String,
    /// Regular expression matched against candidate values
    pub pattern: String,
}

/// Parse a duration string like "90s", "30m", "9h", "2d", "1w"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.len() < 2 || !s.is_char_boundary(s.len() - 1) {
        bail!(KeyrackError::Validation(format!("invalid duration: {:?}", s)));
    }

    let (num, unit) = s.split_at(s.len() - 1);
    let num: i64 = num
        .parse()
        .map_err(|_| KeyrackError::Validation(format!("invalid duration: {:?}", s)))?;
    if num <= 0 {
        bail!(KeyrackError::Validation(format!("duration must be positive: {:?}", s)));
    }

    let duration = match unit {
        "s" => Duration::try_seconds(num),
        "m" => Duration::try_minutes(num),
        "h" => Duration::try_hours(num),
        "d" => Duration::try_days(num),
        "w" => Duration::try_weeks(num),
        _ => bail!(KeyrackError::Validation(format!("unknown duration unit: {}", unit))),
    };

    duration.ok_or_else(|| KeyrackError::Validation(format!("duration out of range: {:?}", s)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_duration(" 2d ").unwrap(), Duration::days(2));
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10y").is_err());
        assert!(parse_duration("-1h").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        for input in ["9999999999999999w", "9223372036854775807s", "99999999999999d"] {
            let err = parse_duration(input).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<KeyrackError>(), Some(KeyrackError::Validation(_))),
                "{}",
                input
            );
        }
        assert_eq!(parse_duration("52w").unwrap(), Duration::weeks(52));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = KeyrackConfig::load_from(&dir.path().join("nope.yml")).unwrap();
        assert_eq!(config.unlock.duration, "9h");
        assert_eq!(config.daemon.timeout_ms, 1500);
        assert!(config.firewall.extra.is_empty());
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keyrack.config.yml");
        std::fs::write(
            &path,
            "unlock:\n  duration: 1h\nfirewall:\n  extra:\n    - name: internal token\n      pattern: 'itk_[a-z0-9]{8}'\n",
        )
        .unwrap();

        let config = KeyrackConfig::load_from(&path).unwrap();
        assert_eq!(config.unlock.default_duration().unwrap(), Duration::hours(1));
        assert_eq!(config.daemon.spawn_wait_ms, 3000);
        assert_eq!(config.firewall.extra.len(), 1);
    }

    #[test]
    fn test_bad_duration_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keyrack.config.yml");
        std::fs::write(&path, "unlock:\n  duration: soon\n").unwrap();

        assert!(KeyrackConfig::load_from(&path).is_err());
    }
}
