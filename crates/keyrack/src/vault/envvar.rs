//! os.envvar - read the key from the process environment

use anyhow::{bail, Result};

use super::{KeyrackHostVault, KeyrackHostVaultAdapter, VaultLocator};
use crate::error::KeyrackError;
use crate::secret::{Environment, SecretValue};

pub struct EnvvarVault {
    env: Environment,
}

impl EnvvarVault {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }
}

impl KeyrackHostVaultAdapter for EnvvarVault {
    fn vault(&self) -> KeyrackHostVault {
        KeyrackHostVault::OsEnvvar
    }

    fn accepts_secret(&self) -> bool {
        false
    }

    fn get(&self, locator: &VaultLocator) -> Result<Option<SecretValue>> {
        Ok(self.env.get(&locator.slug.name).map(SecretValue::new))
    }

    fn set(&self, locator: &VaultLocator, secret: Option<&SecretValue>) -> Result<()> {
        if secret.is_some() {
            bail!(KeyrackError::Validation(format!(
                "vault {} is read-only; export {} in the environment instead",
                self.vault(),
                locator.slug.name
            )));
        }
        Ok(())
    }

    fn unlock_hint(&self, locator: &VaultLocator) -> String {
        format!("export {}=<value>", locator.slug.name)
    }
}
