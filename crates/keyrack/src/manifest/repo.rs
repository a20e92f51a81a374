//! Repo manifest (`keyrack.yml`)
//!
//! ```yaml
//! org: testorg
//! envs: [test, prod]
//! keys:
//!   testorg.test.SAFE_API_KEY:
//!     mech: REPLICA
//!     env: test
//!     name: SAFE_API_KEY
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::slug::{validate_segment, KeySlug, ENV_ALL};
use super::Effect;
use crate::error::KeyrackError;
use crate::mechanism::KeyrackGrantMechanism;

/// Where `init` puts the manifest when no `--at` is given
pub const DEFAULT_REPO_MANIFEST: &str = ".agent/keyrack.yml";

/// One declared key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyrackKeySpec {
    pub slug: KeySlug,
    pub mech: KeyrackGrantMechanism,
    pub env: String,
    pub name: String,
    /// Display/audit classifier only
    pub grade: Option<String>,
}

impl KeyrackKeySpec {
    pub fn new(slug: KeySlug, mech: KeyrackGrantMechanism) -> Self {
        Self {
            env: slug.env.clone(),
            name: slug.name.clone(),
            slug,
            mech,
            grade: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyrackRepoManifest {
    pub org: String,
    pub envs: Vec<String>,
    pub keys: BTreeMap<KeySlug, KeyrackKeySpec>,
}

/// On-disk shape; slugs are map keys and are checked on load
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepoManifestFile {
    org: String,
    #[serde(default)]
    envs: Vec<String>,
    #[serde(default)]
    keys: BTreeMap<String, KeySpecFile>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeySpecFile {
    mech: KeyrackGrantMechanism,
    env: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    grade: Option<String>,
}

impl KeyrackRepoManifest {
    pub fn new(org: &str, envs: &[String]) -> Result<Self, KeyrackError> {
        validate_segment("org", org)?;
        for env in envs {
            validate_segment("env", env)?;
        }

        let mut envs: Vec<String> = envs.iter().filter(|e| *e != ENV_ALL).cloned().collect();
        envs.sort();
        envs.dedup();

        Ok(Self {
            org: org.to_string(),
            envs,
            keys: BTreeMap::new(),
        })
    }

    /// Load from `path`; a missing file is a configuration error
    pub fn load(path: &Path) -> Result<Self> {
        match Self::load_optional(path)? {
            Some(manifest) => Ok(manifest),
            None => Err(KeyrackError::configuration(
                format!("no keyrack manifest at {}", path.display()),
                format!("keyrack init --org <org> --at {}", path.display()),
            )
            .into()),
        }
    }

    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| KeyrackError::io(path, e))?;
        Self::parse(&content)
            .map(Some)
            .map_err(|e| {
                KeyrackError::configuration(
                    format!("malformed keyrack manifest at {}: {}", path.display(), e),
                    format!("edit {} or re-run keyrack init", path.display()),
                )
                .into()
            })
    }

    /// Parse and check every declared key against `org` and `envs`
    pub fn parse(content: &str) -> Result<Self, KeyrackError> {
        let file: RepoManifestFile = serde_yaml::from_str(content)
            .map_err(|e| KeyrackError::Validation(e.to_string()))?;
        let mut manifest = Self::new(&file.org, &file.envs)?;

        for (raw, spec) in file.keys {
            let slug: KeySlug = raw.parse()?;
            if spec.env != slug.env || spec.name != slug.name {
                return Err(KeyrackError::Validation(format!(
                    "key {} declares env {:?} and name {:?}, which disagree with its slug",
                    slug, spec.env, spec.name
                )));
            }
            manifest.check_slug(&slug)?;
            manifest.keys.insert(
                slug.clone(),
                KeyrackKeySpec {
                    slug,
                    mech: spec.mech,
                    env: spec.env,
                    name: spec.name,
                    grade: spec.grade,
                },
            );
        }

        Ok(manifest)
    }

    pub fn to_yaml(&self) -> Result<String> {
        let file = RepoManifestFile {
            org: self.org.clone(),
            envs: self.envs.clone(),
            keys: self
                .keys
                .values()
                .map(|spec| {
                    (
                        spec.slug.to_string(),
                        KeySpecFile {
                            mech: spec.mech,
                            env: spec.env.clone(),
                            name: spec.name.clone(),
                            grade: spec.grade.clone(),
                        },
                    )
                })
                .collect(),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        crate::fsio::write_atomic_shared(path, self.to_yaml()?.as_bytes())
    }

    /// A slug this manifest may declare: own org, env in `envs ∪ {all}`
    pub fn check_slug(&self, slug: &KeySlug) -> Result<(), KeyrackError> {
        if slug.org != self.org {
            return Err(KeyrackError::Validation(format!(
                "key {} belongs to org {:?}, manifest org is {:?}",
                slug, slug.org, self.org
            )));
        }
        if slug.env != ENV_ALL && !self.envs.contains(&slug.env) {
            return Err(KeyrackError::Validation(format!(
                "key {} uses env {:?}; declared envs are {}",
                slug,
                slug.env,
                self.env_names().join(", ")
            )));
        }
        Ok(())
    }

    /// Declared envs plus `all`
    pub fn env_names(&self) -> Vec<&str> {
        self.envs
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(ENV_ALL))
            .collect()
    }

    pub fn spec(&self, slug: &KeySlug) -> Option<&KeyrackKeySpec> {
        self.keys.get(slug)
    }

    /// Keys visible in `env` (that env plus `all`); every key when `None`
    pub fn keys_for_env(&self, env: Option<&str>) -> Vec<&KeyrackKeySpec> {
        self.keys
            .values()
            .filter(|spec| match env {
                Some(env) => spec.env == env || spec.env == ENV_ALL,
                None => true,
            })
            .collect()
    }

    /// Declare a key; an identical declaration is left alone
    ///
    /// A different mechanism for an existing slug is refused unless `force`.
    pub fn findsert_key(&mut self, spec: KeyrackKeySpec, force: bool) -> Result<Effect, KeyrackError> {
        self.check_slug(&spec.slug)?;

        match self.keys.get(&spec.slug) {
            Some(existing) if existing.mech == spec.mech => Ok(Effect::Found),
            Some(existing) if !force => Err(KeyrackError::Validation(format!(
                "key {} is declared with mech {}; pass --force to change it to {}",
                spec.slug, existing.mech, spec.mech
            ))),
            Some(existing) => {
                let grade = existing.grade.clone();
                self.keys.insert(spec.slug.clone(), KeyrackKeySpec { grade, ..spec });
                Ok(Effect::Updated)
            }
            None => {
                self.keys.insert(spec.slug.clone(), spec);
                Ok(Effect::Created)
            }
        }
    }
}
