//! Session daemon server
//!
//! Owns the unlocked session for one login: the decrypted host manifest and
//! any cached key values, each with an expiry. State sits behind one mutex,
//! so eviction (relock or expiry sweep) is atomic with respect to `get`.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::{
    CachedKey, CachedKeyStatus, DaemonRequest, DaemonResponse, DaemonStatusReport,
    MAX_MESSAGE_BYTES,
};
use crate::manifest::{KeySlug, KeyrackHostManifest};

/// A daemon that has never been unlocked exits after this long
const IDLE_GRACE_SECONDS: i64 = 60;

/// Longest session a single unlock can request (30 days)
const MAX_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;

/// How long a client has to send its request
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// In-memory session
#[derive(Debug)]
pub struct SessionState {
    started_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    host: Option<KeyrackHostManifest>,
    keys: BTreeMap<KeySlug, CachedKey>,
}

impl SessionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            expires_at: None,
            host: None,
            keys: BTreeMap::new(),
        }
    }

    fn is_unlocked(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at > now)
    }

    fn clear(&mut self) -> usize {
        let evicted = self.keys.len();
        self.keys.clear();
        self.host = None;
        self.expires_at = None;
        evicted
    }

    /// Apply one request; the flag says whether the daemon should stop
    pub fn handle(&mut self, request: DaemonRequest, now: DateTime<Utc>) -> (DaemonResponse, bool) {
        match request {
            DaemonRequest::Unlock {
                host,
                keys,
                ttl_seconds,
            } => {
                let expires_at = match ttl_seconds {
                    Some(ttl) => now + Duration::seconds(ttl.min(MAX_TTL_SECONDS) as i64),
                    None => match self.expires_at {
                        Some(expires_at) if expires_at > now => expires_at,
                        _ => {
                            return (
                                DaemonResponse::Error {
                                    message: "session is locked; unlock with a duration".to_string(),
                                },
                                false,
                            )
                        }
                    },
                };
                self.expires_at = Some(expires_at);

                if let Some(host) = host {
                    self.host = Some(host);
                }
                for mut key in keys {
                    key.expires_at = Some(match key.expires_at {
                        Some(own) => own.min(expires_at),
                        None => expires_at,
                    });
                    self.keys.insert(key.slug.clone(), key);
                }
                // Keys cached earlier never outlive a shortened session
                for key in self.keys.values_mut() {
                    if key.expires_at.is_some_and(|own| own > expires_at) {
                        key.expires_at = Some(expires_at);
                    }
                }

                info!(expires_at = %expires_at, keys = self.keys.len(), host = self.host.is_some(), "unlocked");
                (DaemonResponse::Unlocked { expires_at }, false)
            }

            DaemonRequest::Get { slug } => {
                let key = if self.is_unlocked(now) {
                    self.keys
                        .get(&slug)
                        .filter(|key| key.expires_at.map_or(true, |e| e > now))
                        .cloned()
                } else {
                    None
                };
                debug!(slug = %slug, hit = key.is_some(), "get");
                (DaemonResponse::Key { key }, false)
            }

            DaemonRequest::Host => {
                let host = if self.is_unlocked(now) {
                    self.host.clone()
                } else {
                    None
                };
                (DaemonResponse::Host { host }, false)
            }

            DaemonRequest::Status => (DaemonResponse::Status(self.report(now)), false),

            DaemonRequest::Relock { slug: Some(slug) } => {
                let evicted = usize::from(self.keys.remove(&slug).is_some());
                info!(slug = %slug, evicted, "relocked key");
                (
                    DaemonResponse::Relocked {
                        evicted,
                        stopping: false,
                    },
                    false,
                )
            }

            DaemonRequest::Relock { slug: None } => {
                let evicted = self.clear();
                info!(evicted, "relocked session");
                (
                    DaemonResponse::Relocked {
                        evicted,
                        stopping: true,
                    },
                    true,
                )
            }
        }
    }

    /// Drop expired keys; true when the whole session is over
    pub fn sweep(&mut self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) if expires_at <= now => {
                let evicted = self.clear();
                info!(evicted, "session expired, relocked");
                true
            }
            Some(_) => {
                let before = self.keys.len();
                self.keys
                    .retain(|_, key| key.expires_at.map_or(true, |e| e > now));
                if self.keys.len() < before {
                    debug!(evicted = before - self.keys.len(), "expired keys evicted");
                }
                false
            }
            None => now - self.started_at >= Duration::seconds(IDLE_GRACE_SECONDS),
        }
    }

    fn report(&self, now: DateTime<Utc>) -> DaemonStatusReport {
        let unlocked = self.is_unlocked(now);
        DaemonStatusReport {
            pid: std::process::id(),
            started_at: self.started_at,
            expires_at: self.expires_at.filter(|_| unlocked),
            host_cached: unlocked && self.host.is_some(),
            keys: self
                .keys
                .values()
                .filter(|key| unlocked && key.expires_at.map_or(true, |e| e > now))
                .map(|key| CachedKeyStatus {
                    slug: key.slug.clone(),
                    expires_at: key.expires_at,
                })
                .collect(),
        }
    }
}

/// Socket server for one session
pub struct DaemonServer {
    socket: PathBuf,
    pid_file: PathBuf,
    sweep_every: std::time::Duration,
    state: Arc<Mutex<SessionState>>,
}

impl DaemonServer {
    pub fn new(socket: PathBuf, pid_file: PathBuf) -> Self {
        Self {
            socket,
            pid_file,
            sweep_every: std::time::Duration::from_secs(1),
            state: Arc::new(Mutex::new(SessionState::new(Utc::now()))),
        }
    }

    pub fn with_sweep_interval(mut self, every: std::time::Duration) -> Self {
        self.sweep_every = every;
        self
    }

    /// Bind the socket; the returned listener is what `serve` accepts on
    pub fn bind(&self) -> Result<UnixListener> {
        if let Some(dir) = self.socket.parent() {
            ensure_runtime_dir(dir)?;
        }
        remove_stale_socket(&self.socket)?;

        let listener = UnixListener::bind(&self.socket)
            .with_context(|| format!("failed to bind {}", self.socket.display()))?;
        std::fs::set_permissions(&self.socket, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", self.socket.display()))?;
        keyrack_core::process::write_pid_file(&self.pid_file)?;

        info!(socket = %self.socket.display(), pid = std::process::id(), "keyrack daemon listening");
        Ok(listener)
    }

    /// Bind and serve until relocked or expired
    pub async fn run(self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: UnixListener) -> Result<()> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut ticker = tokio::time::interval(self.sweep_every);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let state = Arc::clone(&self.state);
                            let stop_tx = stop_tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, state, stop_tx).await {
                                    debug!(error = %e, "connection ended early");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = ticker.tick() => {
                    if lock(&self.state).sweep(Utc::now()) {
                        break;
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.cleanup();
        info!("keyrack daemon stopped");
        Ok(())
    }

    fn cleanup(&self) {
        for path in [&self.socket, &self.pid_file] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove");
                }
            }
        }
    }
}

/// A poisoned lock still holds a consistent map; keep serving
fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn handle_connection(
    mut stream: UnixStream,
    state: Arc<Mutex<SessionState>>,
    stop_tx: watch::Sender<bool>,
) -> Result<()> {
    let mut buf = Vec::new();
    let mut limited = (&mut stream).take(MAX_MESSAGE_BYTES);
    tokio::time::timeout(REQUEST_TIMEOUT, limited.read_to_end(&mut buf))
        .await
        .context("request timed out")??;

    let (response, stop) = match serde_json::from_slice::<DaemonRequest>(&buf) {
        Ok(request) => lock(&state).handle(request, Utc::now()),
        Err(e) => (
            DaemonResponse::Error {
                message: format!("bad request ({})", crate::fsio::json_error_kind(&e)),
            },
            false,
        ),
    };

    let bytes = serde_json::to_vec(&response)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;

    if stop {
        let _ = stop_tx.send(true);
    }
    Ok(())
}

/// Create the runtime dir (0700) if needed; refuse a symlink
fn ensure_runtime_dir(dir: &Path) -> Result<()> {
    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.file_type().is_symlink() => {
            anyhow::bail!("{} is a symlink, refusing to use it for the daemon socket", dir.display())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("failed to stat {}", dir.display())),
    }
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
            debug!(path = %path.display(), "removed stale socket");
            Ok(())
        }
        Ok(_) => anyhow::bail!("{} exists and is not a socket", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to stat {}", path.display())),
    }
}
