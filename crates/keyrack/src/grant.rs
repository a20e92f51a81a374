//! Grant attempts: the unit of resolution output
//!
//! Only a `granted` attempt carries a value. Every other status carries a
//! message and usually a fix command, and nothing else, so no rendering of a
//! non-granted attempt can contain secret material.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::manifest::KeySlug;
use crate::mechanism::TranslatedSecret;
use crate::secret::SecretValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyrackGrantStatus {
    Granted,
    Locked,
    Blocked,
    Absent,
}

impl KeyrackGrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Locked => "locked",
            Self::Blocked => "blocked",
            Self::Absent => "absent",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Granted => "✓",
            Self::Locked => "○",
            Self::Blocked => "✗",
            Self::Absent => "?",
        }
    }
}

impl fmt::Display for KeyrackGrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The realized value of a granted key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyrackKeyGrant {
    pub slug: KeySlug,
    pub key: GrantedKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedKey {
    pub secret: SecretValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyrackGrantAttempt {
    pub slug: KeySlug,
    pub status: KeyrackGrantStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant: Option<KeyrackKeyGrant>,
}

impl KeyrackGrantAttempt {
    pub fn granted(slug: &KeySlug, source: &str, translated: TranslatedSecret) -> Self {
        Self {
            slug: slug.clone(),
            status: KeyrackGrantStatus::Granted,
            message: format!("granted from {}", source),
            fix: None,
            grant: Some(KeyrackKeyGrant {
                slug: slug.clone(),
                key: GrantedKey {
                    secret: translated.secret,
                    expires_at: translated.expires_at,
                },
            }),
        }
    }

    pub fn locked(slug: &KeySlug, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::without_grant(slug, KeyrackGrantStatus::Locked, message.into(), Some(fix.into()))
    }

    /// `reason` comes from the firewall and never contains the value
    pub fn blocked(slug: &KeySlug, reason: impl Into<String>) -> Self {
        Self::without_grant(
            slug,
            KeyrackGrantStatus::Blocked,
            format!("blocked: {}", reason.into()),
            Some("rotate this credential and store a short-lived or scoped one instead".to_string()),
        )
    }

    pub fn absent(slug: &KeySlug) -> Self {
        Self::without_grant(
            slug,
            KeyrackGrantStatus::Absent,
            "not configured on this host".to_string(),
            Some(format!("keyrack set --key {} --vault <vault>", slug)),
        )
    }

    fn without_grant(
        slug: &KeySlug,
        status: KeyrackGrantStatus,
        message: String,
        fix: Option<String>,
    ) -> Self {
        Self {
            slug: slug.clone(),
            status,
            message,
            fix,
            grant: None,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.status == KeyrackGrantStatus::Granted
    }

    /// Granted value, if any
    pub fn secret(&self) -> Option<&SecretValue> {
        self.grant.as_ref().map(|grant| &grant.key.secret)
    }

    /// Human-readable block; never includes the value, even when granted
    pub fn render(&self) -> String {
        let status = match self.status {
            KeyrackGrantStatus::Granted => self.status.as_str().green(),
            KeyrackGrantStatus::Locked => self.status.as_str().yellow(),
            KeyrackGrantStatus::Blocked => self.status.as_str().red().bold(),
            KeyrackGrantStatus::Absent => self.status.as_str().dimmed(),
        };

        let mut out = format!(
            "{} {} {}\n  {}",
            self.status.symbol(),
            self.slug.to_string().bold(),
            status,
            self.message
        );
        if let Some(expires_at) = self.grant.as_ref().and_then(|g| g.key.expires_at) {
            out.push_str(&format!("\n  expires {}", expires_at.to_rfc3339()));
        }
        if let Some(fix) = &self.fix {
            out.push_str(&format!("\n  fix: {}", fix.cyan()));
        }
        out
    }
}

/// True when every attempt is granted (and there is at least one)
pub fn all_granted(attempts: &[KeyrackGrantAttempt]) -> bool {
    !attempts.is_empty() && attempts.iter().all(KeyrackGrantAttempt::is_granted)
}

/// Process exit code for a resolution: 0 when every key is granted, else 2
pub fn exit_code(attempts: &[KeyrackGrantAttempt]) -> i32 {
    if all_granted(attempts) {
        0
    } else {
        2
    }
}

/// One-line tally, e.g. "3 keys: 2 granted, 1 locked"
pub fn summarize(attempts: &[KeyrackGrantAttempt]) -> String {
    let mut parts = Vec::new();
    for status in [
        KeyrackGrantStatus::Granted,
        KeyrackGrantStatus::Locked,
        KeyrackGrantStatus::Blocked,
        KeyrackGrantStatus::Absent,
    ] {
        let count = attempts.iter().filter(|a| a.status == status).count();
        if count > 0 {
            parts.push(format!("{} {}", count, status));
        }
    }
    format!("{} keys: {}", attempts.len(), parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug() -> KeySlug {
        "testorg.test.SAFE_API_KEY".parse().unwrap()
    }

    #[test]
    fn test_granted_json_shape() {
        let attempt = KeyrackGrantAttempt::granted(
            &slug(),
            "os.direct",
            TranslatedSecret {
                secret: SecretValue::new("sk-safe-api-key-abc123"),
                expires_at: None,
            },
        );
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["status"], "granted");
        assert_eq!(json["grant"]["key"]["secret"], "sk-safe-api-key-abc123");
        assert!(json["grant"]["key"].get("expiresAt").is_none());
        assert!(json.get("fix").is_none());
    }

    #[test]
    fn test_render_never_shows_value() {
        let attempt = KeyrackGrantAttempt::granted(
            &slug(),
            "os.direct",
            TranslatedSecret {
                secret: SecretValue::new("sk-safe-api-key-abc123"),
                expires_at: None,
            },
        );
        let text = attempt.render();
        assert!(text.contains("SAFE_API_KEY"));
        assert!(!text.contains("sk-safe-api-key-abc123"));
    }

    #[test]
    fn test_non_granted_attempts_have_no_grant() {
        let absent = KeyrackGrantAttempt::absent(&slug());
        assert!(absent.grant.is_none());
        assert!(absent.fix.as_deref().unwrap().contains("keyrack set"));

        let blocked = KeyrackGrantAttempt::blocked(&slug(), "github classic pat (ghp_)");
        assert_eq!(blocked.status, KeyrackGrantStatus::Blocked);
        assert!(blocked.secret().is_none());
    }

    #[test]
    fn test_summary() {
        let attempts = vec![
            KeyrackGrantAttempt::absent(&slug()),
            KeyrackGrantAttempt::locked(&slug(), "m", "f"),
            KeyrackGrantAttempt::locked(&slug(), "m", "f"),
        ];
        assert_eq!(summarize(&attempts), "3 keys: 2 locked, 1 absent");
        assert!(!all_granted(&attempts));
        assert!(!all_granted(&[]));
    }
}
