//! Standard paths used by keyrack
//!
//! Everything host-scoped lives under one root (`~/.rhachet/keyrack` unless
//! `KEYRACK_HOME` says otherwise). Owner-scoped files sit in an `owner=<name>`
//! directory so several tenants can share one machine account.

use std::path::PathBuf;

/// Owner name used when none is given
pub const DEFAULT_OWNER: &str = "default";

/// Standard keyrack paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Host root (~/.rhachet/keyrack)
    pub home: PathBuf,
    /// Runtime directory for sockets and pid files ($XDG_RUNTIME_DIR)
    pub runtime: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let home = match std::env::var_os("KEYRACK_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join(".rhachet")
                .join("keyrack"),
        };

        // XDG_RUNTIME_DIR is per-user already; the /tmp fallback is not
        let runtime = match std::env::var_os("XDG_RUNTIME_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(format!("/tmp/keyrack-{}", crate::session::current_uid())),
        };

        Self { home, runtime }
    }

    /// Paths rooted somewhere explicit (tests, relocated installs)
    pub fn with_roots(home: impl Into<PathBuf>, runtime: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            runtime: runtime.into(),
        }
    }

    /// Directory holding one owner's host manifest and identity
    pub fn owner_dir(&self, owner: Option<&str>) -> PathBuf {
        self.home.join(owner_segment(owner))
    }

    /// Encrypted host manifest
    pub fn host_manifest(&self, owner: Option<&str>) -> PathBuf {
        self.owner_dir(owner).join("keyrack.host.age")
    }

    /// Lock file guarding read-modify-write of the host manifest
    pub fn host_lock(&self, owner: Option<&str>) -> PathBuf {
        self.owner_dir(owner).join("keyrack.host.lock")
    }

    /// Private age identity
    pub fn identity(&self, owner: Option<&str>) -> PathBuf {
        self.owner_dir(owner).join("keys").join("identity.key")
    }

    /// Public age recipient matching `identity`
    pub fn recipient(&self, owner: Option<&str>) -> PathBuf {
        self.owner_dir(owner).join("keys").join("identity.pub")
    }

    /// Plaintext store used by the os.direct vault
    pub fn direct_store(&self, owner: Option<&str>) -> PathBuf {
        self.home
            .join("vault")
            .join("os.direct")
            .join(owner_segment(owner))
            .join("keyrack.direct.json")
    }

    /// Tool configuration file
    pub fn config_file(&self) -> PathBuf {
        self.home.join("keyrack.config.yml")
    }
}

fn owner_segment(owner: Option<&str>) -> String {
    format!("owner={}", owner.unwrap_or(DEFAULT_OWNER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_scoped_paths() {
        let paths = Paths::with_roots("/h", "/run/user/1000");

        assert_eq!(
            paths.host_manifest(None),
            PathBuf::from("/h/owner=default/keyrack.host.age")
        );
        assert_eq!(
            paths.identity(Some("ci")),
            PathBuf::from("/h/owner=ci/keys/identity.key")
        );
        assert_eq!(
            paths.direct_store(Some("ci")),
            PathBuf::from("/h/vault/os.direct/owner=ci/keyrack.direct.json")
        );
    }

    #[test]
    fn test_owners_are_isolated() {
        let paths = Paths::with_roots("/h", "/r");
        assert_ne!(paths.direct_store(Some("a")), paths.direct_store(Some("b")));
        assert_ne!(paths.host_manifest(Some("a")), paths.host_manifest(None));
    }
}
