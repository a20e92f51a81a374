//! Encrypted host manifest store
//!
//! Layout under `<home>/owner=<owner>/`:
//! - `keys/identity.key` - age X25519 identity, optionally wrapped with a
//!   passphrase (age scrypt)
//! - `keys/identity.pub` - matching recipient
//! - `keyrack.host.age` - ASCII-armored host manifest encrypted to the recipient
//! - `keyrack.host.lock` - held across every read-modify-write

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::secrecy::{ExposeSecret, SecretString};
use anyhow::Result;
use keyrack_core::Paths;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::KeyrackError;
use crate::fsio::{self, FileLock};
use crate::manifest::{Effect, KeyrackHostManifest};

/// Prefix of an unwrapped age identity file
const PLAIN_IDENTITY_PREFIX: &str = "AGE-SECRET-KEY-";

pub struct HostStore {
    paths: Paths,
    owner: Option<String>,
}

impl HostStore {
    pub fn new(paths: Paths, owner: Option<&str>) -> Self {
        Self {
            paths,
            owner: owner.map(str::to_string),
        }
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.paths.host_manifest(self.owner())
    }

    pub fn identity_path(&self) -> PathBuf {
        self.paths.identity(self.owner())
    }

    pub fn recipient_path(&self) -> PathBuf {
        self.paths.recipient(self.owner())
    }

    fn lock_path(&self) -> PathBuf {
        self.paths.host_lock(self.owner())
    }

    /// Identifier recorded in the manifest
    pub fn uri(&self) -> String {
        format!(
            "keyrack://host/owner={}",
            self.owner().unwrap_or(keyrack_core::paths::DEFAULT_OWNER)
        )
    }

    pub fn is_initialized(&self) -> bool {
        self.identity_path().exists()
    }

    /// Create the identity (and an empty manifest) unless one exists
    pub fn init(&self, passphrase: Option<&SecretString>) -> Result<(String, Effect)> {
        let _lock = FileLock::exclusive(&self.lock_path())?;
        if self.is_initialized() {
            return Ok((self.recipient()?, Effect::Found));
        }

        let identity = self.generate_identity(passphrase)?;
        if !self.manifest_path().exists() {
            self.save_with(&identity.to_public(), &KeyrackHostManifest::new(self.uri()))?;
        }
        Ok((identity.to_public().to_string(), Effect::Created))
    }

    fn generate_identity(&self, passphrase: Option<&SecretString>) -> Result<age::x25519::Identity> {
        let identity = age::x25519::Identity::generate();
        let encoded = identity.to_string();

        let bytes = match passphrase {
            Some(passphrase) => encrypt_armored(
                age::Encryptor::with_user_passphrase(passphrase.clone()),
                encoded.expose_secret().as_bytes(),
            )?,
            None => encoded.expose_secret().as_bytes().to_vec(),
        };
        fsio::write_atomic(&self.identity_path(), &bytes)?;
        fsio::write_atomic(
            &self.recipient_path(),
            format!("{}\n", identity.to_public()).as_bytes(),
        )?;

        tracing::info!(
            path = %self.identity_path().display(),
            protected = passphrase.is_some(),
            "generated host identity"
        );
        Ok(identity)
    }

    /// Public recipient for this host
    pub fn recipient(&self) -> Result<String> {
        let path = self.recipient_path();
        match fsio::read_optional(&path)? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                text.parse::<age::x25519::Recipient>().map_err(|e| {
                    KeyrackError::io(&path, format!("invalid recipient: {}", e))
                })?;
                Ok(text)
            }
            None => Err(KeyrackError::configuration(
                "keyrack has no host identity yet",
                "keyrack init --org <org>",
            )
            .into()),
        }
    }

    /// Whether decrypting needs a passphrase
    pub fn identity_is_protected(&self) -> Result<bool> {
        match fsio::read_optional(&self.identity_path())? {
            Some(bytes) => Ok(!bytes.starts_with(PLAIN_IDENTITY_PREFIX.as_bytes())),
            None => Ok(false),
        }
    }

    /// Load the identity; `None` when it does not exist yet
    pub fn load_identity(
        &self,
        passphrase: Option<&SecretString>,
    ) -> Result<Option<age::x25519::Identity>> {
        let path = self.identity_path();
        let Some(bytes) = fsio::read_optional(&path)? else {
            return Ok(None);
        };

        let encoded = if bytes.starts_with(PLAIN_IDENTITY_PREFIX.as_bytes()) {
            String::from_utf8(bytes)
                .map_err(|_| KeyrackError::io(&path, "identity is not valid UTF-8"))?
        } else {
            let passphrase = passphrase.ok_or_else(|| KeyrackError::Decryption {
                path: path.clone(),
                message: "identity is passphrase-protected".to_string(),
            })?;
            decrypt_with_passphrase(&bytes, passphrase, &path)?
        };

        let identity = encoded
            .trim()
            .parse::<age::x25519::Identity>()
            .map_err(|e| KeyrackError::Decryption {
                path: path.clone(),
                message: format!("invalid identity: {}", e),
            })?;
        Ok(Some(identity))
    }

    fn require_identity(&self, passphrase: Option<&SecretString>) -> Result<age::x25519::Identity> {
        match self.load_identity(passphrase)? {
            Some(identity) => Ok(identity),
            None => self.generate_identity(passphrase),
        }
    }

    /// Decrypt the host manifest; empty when none has been written
    pub fn load(&self, passphrase: Option<&SecretString>) -> Result<KeyrackHostManifest> {
        match self.load_identity(passphrase)? {
            Some(identity) => self.load_with(&identity),
            None => Ok(KeyrackHostManifest::new(self.uri())),
        }
    }

    fn load_with(&self, identity: &age::x25519::Identity) -> Result<KeyrackHostManifest> {
        let path = self.manifest_path();
        let Some(bytes) = fsio::read_optional(&path)? else {
            return Ok(KeyrackHostManifest::new(self.uri()));
        };

        let plaintext = decrypt_with_identity(&bytes, identity, &path)?;
        KeyrackHostManifest::parse(&plaintext).map_err(|e| {
            KeyrackError::Decryption {
                path,
                message: e.to_string(),
            }
            .into()
        })
    }

    fn save_with(&self, recipient: &age::x25519::Recipient, manifest: &KeyrackHostManifest) -> Result<()> {
        let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient.clone())])
            .ok_or_else(|| KeyrackError::Encryption("no recipients".to_string()))?;
        let plaintext = manifest.to_json()?;
        let bytes = encrypt_armored(encryptor, &plaintext)?;
        fsio::write_atomic(&self.manifest_path(), &bytes)
    }

    /// Locked read-modify-write of the manifest
    ///
    /// The file is rewritten only when `apply` changed something.
    pub fn update<T>(
        &self,
        passphrase: Option<&SecretString>,
        apply: impl FnOnce(&mut KeyrackHostManifest) -> Result<T>,
    ) -> Result<(T, KeyrackHostManifest)> {
        let _lock = FileLock::exclusive(&self.lock_path())?;
        let identity = self.require_identity(passphrase)?;

        let mut manifest = self.load_with(&identity)?;
        let before = manifest.clone();
        let out = apply(&mut manifest)?;
        if manifest != before {
            self.save_with(&identity.to_public(), &manifest)?;
            tracing::debug!(path = %self.manifest_path().display(), hosts = manifest.hosts.len(), "host manifest saved");
        }
        Ok((out, manifest))
    }
}

fn encrypt_armored(encryptor: age::Encryptor, plaintext: &[u8]) -> Result<Vec<u8>, KeyrackError> {
    let fail = |e: std::io::Error| KeyrackError::Encryption(e.to_string());

    let mut out = Vec::new();
    let armor = ArmoredWriter::wrap_output(&mut out, Format::AsciiArmor).map_err(fail)?;
    let mut writer = encryptor.wrap_output(armor).map_err(|e| KeyrackError::Encryption(e.to_string()))?;
    writer.write_all(plaintext).map_err(fail)?;
    writer.finish().and_then(|armor| armor.finish()).map_err(fail)?;
    Ok(out)
}

fn decrypt_with_identity(
    bytes: &[u8],
    identity: &age::x25519::Identity,
    path: &Path,
) -> Result<Vec<u8>, KeyrackError> {
    let fail = |message: String| KeyrackError::Decryption {
        path: path.to_path_buf(),
        message,
    };

    let decryptor = match age::Decryptor::new(ArmoredReader::new(bytes)).map_err(|e| fail(e.to_string()))? {
        age::Decryptor::Recipients(d) => d,
        _ => return Err(fail("expected a file encrypted to the host recipient".to_string())),
    };

    let mut plaintext = Vec::new();
    let mut reader = decryptor
        .decrypt(std::iter::once(identity as &dyn age::Identity))
        .map_err(|e| fail(e.to_string()))?;
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| fail(e.to_string()))?;
    Ok(plaintext)
}

fn decrypt_with_passphrase(
    bytes: &[u8],
    passphrase: &SecretString,
    path: &Path,
) -> Result<String, KeyrackError> {
    let fail = |message: String| KeyrackError::Decryption {
        path: path.to_path_buf(),
        message,
    };

    let decryptor = match age::Decryptor::new(ArmoredReader::new(bytes)).map_err(|e| fail(e.to_string()))? {
        age::Decryptor::Passphrase(d) => d,
        _ => return Err(fail("identity is not passphrase-protected".to_string())),
    };

    let mut plaintext = Vec::new();
    let mut reader = decryptor
        .decrypt(passphrase, None)
        .map_err(|_| fail("wrong passphrase".to_string()))?;
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| fail(e.to_string()))?;
    String::from_utf8(plaintext).map_err(|_| fail("identity is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::KeySlug;
    use crate::mechanism::KeyrackGrantMechanism;
    use crate::vault::KeyrackHostVault;
    use chrono::Utc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> HostStore {
        HostStore::new(Paths::with_roots(dir.path().join("home"), dir.path().join("run")), None)
    }

    fn set(store: &HostStore, passphrase: Option<&SecretString>, slug: &str) -> Effect {
        let slug: KeySlug = slug.parse().unwrap();
        let ((_, effect), _) = store
            .update(passphrase, |m| {
                Ok(m.set_key_host(
                    &slug,
                    KeyrackGrantMechanism::Replica,
                    KeyrackHostVault::OsDirect,
                    None,
                    false,
                    Utc::now(),
                )?)
            })
            .unwrap();
        effect
    }

    #[test]
    fn test_init_is_findsert() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let (recipient, effect) = store.init(None).unwrap();
        assert_eq!(effect, Effect::Created);
        assert!(recipient.starts_with("age1"));

        let (again, effect) = store.init(None).unwrap();
        assert_eq!(effect, Effect::Found);
        assert_eq!(again, recipient);
        assert_eq!(store.recipient().unwrap(), recipient);
    }

    #[test]
    fn test_manifest_is_encrypted_at_rest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.init(None).unwrap();

        assert_eq!(set(&store, None, "o.prod.TOKEN"), Effect::Created);
        assert_eq!(set(&store, None, "o.prod.TOKEN"), Effect::Found);

        let raw = std::fs::read_to_string(store.manifest_path()).unwrap();
        assert!(raw.starts_with("-----BEGIN AGE ENCRYPTED FILE-----"));
        assert!(!raw.contains("o.prod.TOKEN"));

        let loaded = store.load(None).unwrap();
        assert!(loaded.get(&"o.prod.TOKEN".parse().unwrap()).is_some());
    }

    #[test]
    fn test_missing_manifest_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.load(None).unwrap().hosts.is_empty());
        assert!(store.recipient().is_err());
    }

    #[test]
    fn test_first_update_creates_identity() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(set(&store, None, "o.prod.A"), Effect::Created);
        assert!(store.is_initialized());
        assert!(!store.identity_is_protected().unwrap());
    }

    #[test]
    fn test_passphrase_protected_identity() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let passphrase = SecretString::new("correct horse".to_string());

        store.init(Some(&passphrase)).unwrap();
        assert!(store.identity_is_protected().unwrap());
        set(&store, Some(&passphrase), "o.prod.A");

        let err = store.load(None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KeyrackError>(),
            Some(KeyrackError::Decryption { .. })
        ));
        let wrong = SecretString::new("wrong".to_string());
        assert!(store.load(Some(&wrong)).is_err());

        assert_eq!(store.load(Some(&passphrase)).unwrap().hosts.len(), 1);
    }

    #[test]
    fn test_concurrent_updates_both_survive() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_roots(dir.path().join("home"), dir.path().join("run"));
        HostStore::new(paths.clone(), None).init(None).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let paths = paths.clone();
                std::thread::spawn(move || {
                    let store = HostStore::new(paths, None);
                    set(&store, None, &format!("o.prod.KEY_{}", i));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let manifest = HostStore::new(paths, None).load(None).unwrap();
        assert_eq!(manifest.hosts.len(), 8);
    }
}
