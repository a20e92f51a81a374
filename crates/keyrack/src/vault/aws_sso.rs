//! aws.iam.sso - temporary credentials from an IAM Identity Center profile
//!
//! The exid names the AWS CLI profile. `get` exports the cached session as a
//! process-credential document; `set` signs the profile in when no session is
//! cached, which opens the SSO device flow in a browser.

use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};

use super::{KeyrackHostVault, KeyrackHostVaultAdapter, VaultLocator};
use crate::error::KeyrackError;
use crate::secret::SecretValue;

pub struct AwsSsoVault {
    program: String,
}

impl Default for AwsSsoVault {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsSsoVault {
    pub fn new() -> Self {
        Self {
            program: "aws".to_string(),
        }
    }

    fn login(&self, profile: &str) -> Result<()> {
        tracing::info!(profile, "starting aws sso login");
        let status = Command::new(&self.program)
            .args(["sso", "login", "--profile", profile])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("cannot run {}", self.program))?;

        if !status.success() {
            bail!(KeyrackError::Validation(format!(
                "aws sso login --profile {} failed",
                profile
            )));
        }
        Ok(())
    }
}

impl KeyrackHostVaultAdapter for AwsSsoVault {
    fn vault(&self) -> KeyrackHostVault {
        KeyrackHostVault::AwsIamSso
    }

    fn accepts_secret(&self) -> bool {
        false
    }

    fn get(&self, locator: &VaultLocator) -> Result<Option<SecretValue>> {
        let profile = locator.require_exid(self.vault(), "aws-profile")?;

        let output = Command::new(&self.program)
            .args([
                "configure",
                "export-credentials",
                "--profile",
                profile,
                "--format",
                "process",
            ])
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("cannot run {}", self.program))?;

        if !output.status.success() {
            tracing::debug!(slug = %locator.slug, profile, "no cached sso session");
            return Ok(None);
        }

        let doc = String::from_utf8(output.stdout)
            .map_err(|_| KeyrackError::Validation("aws credential output is not valid UTF-8".into()))?;
        let doc = doc.trim();
        if doc.is_empty() {
            return Ok(None);
        }
        Ok(Some(SecretValue::new(doc)))
    }

    fn set(&self, locator: &VaultLocator, secret: Option<&SecretValue>) -> Result<()> {
        let profile = locator.require_exid(self.vault(), "aws-profile")?;
        if secret.is_some() {
            bail!(KeyrackError::Validation(
                "vault aws.iam.sso does not store values; credentials come from the sso session".into()
            ));
        }
        if self.get(locator)?.is_some() {
            return Ok(());
        }
        self.login(profile)
    }

    fn unlock_hint(&self, locator: &VaultLocator) -> String {
        format!("aws sso login --profile {}", locator.exid.unwrap_or("<profile>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::KeySlug;

    #[test]
    fn test_unlock_hint_names_profile() {
        let vault = AwsSsoVault::new();
        let slug: KeySlug = "o.prod.AWS_CREDS".parse().unwrap();
        assert_eq!(
            vault.unlock_hint(&VaultLocator::new(&slug, Some("acme-prod"))),
            "aws sso login --profile acme-prod"
        );
    }

    #[test]
    fn test_rejects_raw_values() {
        let vault = AwsSsoVault::new();
        let slug: KeySlug = "o.prod.AWS_CREDS".parse().unwrap();
        let err = vault
            .set(
                &VaultLocator::new(&slug, Some("acme-prod")),
                Some(&SecretValue::new("x")),
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KeyrackError>(),
            Some(KeyrackError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_cli_is_an_error() {
        let vault = AwsSsoVault {
            program: "keyrack-test-no-such-aws".to_string(),
        };
        let slug: KeySlug = "o.prod.AWS_CREDS".parse().unwrap();
        assert!(vault.get(&VaultLocator::new(&slug, Some("p"))).is_err());
    }
}
