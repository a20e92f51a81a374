//! Blocking client for the session daemon
//!
//! Every call is one short-lived connection with read/write timeouts, so an
//! unresponsive daemon surfaces as `DaemonUnavailable` instead of a hang.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use keyrack_core::SessionAddress;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::protocol::{
    CachedKey, DaemonRequest, DaemonResponse, DaemonStatusReport, MAX_MESSAGE_BYTES,
};
use crate::error::KeyrackError;
use crate::manifest::{KeySlug, KeyrackHostManifest};

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);
const SPAWN_POLL: Duration = Duration::from_millis(50);

/// Outcome of a relock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelockOutcome {
    pub evicted: usize,
    /// Whether a daemon was running to receive the request
    pub was_running: bool,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    address: SessionAddress,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(address: SessionAddress) -> Self {
        Self {
            address,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &SessionAddress {
        &self.address
    }

    fn request(&self, request: &DaemonRequest) -> Result<DaemonResponse> {
        let socket = &self.address.socket;
        let unavailable =
            |e: std::io::Error| KeyrackError::DaemonUnavailable(format!("{}: {}", socket.display(), e));

        let mut stream = UnixStream::connect(socket).map_err(unavailable)?;
        stream.set_read_timeout(Some(self.timeout)).map_err(unavailable)?;
        stream.set_write_timeout(Some(self.timeout)).map_err(unavailable)?;

        let bytes = serde_json::to_vec(request)?;
        stream.write_all(&bytes).map_err(unavailable)?;
        stream.shutdown(Shutdown::Write).map_err(unavailable)?;

        let mut response = Vec::new();
        (&mut stream)
            .take(MAX_MESSAGE_BYTES)
            .read_to_end(&mut response)
            .map_err(unavailable)?;

        let response: DaemonResponse = serde_json::from_slice(&response).map_err(|e| {
            KeyrackError::DaemonUnavailable(format!(
                "unreadable daemon response ({})",
                crate::fsio::json_error_kind(&e)
            ))
        })?;

        if let DaemonResponse::Error { message } = response {
            bail!("keyrack daemon refused request: {}", message);
        }
        Ok(response)
    }

    /// Daemon status, `None` when no daemon answers
    pub fn status(&self) -> Result<Option<DaemonStatusReport>> {
        match self.request(&DaemonRequest::Status) {
            Ok(DaemonResponse::Status(report)) => Ok(Some(report)),
            Ok(other) => bail!(unexpected(&other)),
            Err(e) if is_unavailable(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), Ok(Some(_)))
    }

    /// Cached value for `slug`
    pub fn get(&self, slug: &KeySlug) -> Result<Option<CachedKey>> {
        match self.request(&DaemonRequest::Get { slug: slug.clone() })? {
            DaemonResponse::Key { key } => Ok(key),
            other => bail!(unexpected(&other)),
        }
    }

    /// Decrypted host manifest held by the daemon
    pub fn host(&self) -> Result<Option<KeyrackHostManifest>> {
        match self.request(&DaemonRequest::Host)? {
            DaemonResponse::Host { host } => Ok(host),
            other => bail!(unexpected(&other)),
        }
    }

    /// Push state into the session; returns when it expires
    pub fn unlock(
        &self,
        host: Option<KeyrackHostManifest>,
        keys: Vec<CachedKey>,
        ttl: Option<chrono::Duration>,
    ) -> Result<DateTime<Utc>> {
        let request = DaemonRequest::Unlock {
            host,
            keys,
            ttl_seconds: ttl.map(|ttl| ttl.num_seconds().max(1) as u64),
        };
        match self.request(&request)? {
            DaemonResponse::Unlocked { expires_at } => Ok(expires_at),
            other => bail!(unexpected(&other)),
        }
    }

    /// Evict one key, or end the session; succeeds when nothing is running
    pub fn relock(&self, slug: Option<&KeySlug>) -> Result<RelockOutcome> {
        let request = DaemonRequest::Relock {
            slug: slug.cloned(),
        };
        match self.request(&request) {
            Ok(DaemonResponse::Relocked { evicted, .. }) => Ok(RelockOutcome {
                evicted,
                was_running: true,
            }),
            Ok(other) => bail!(unexpected(&other)),
            Err(e) if is_unavailable(&e) => Ok(RelockOutcome {
                evicted: 0,
                was_running: false,
            }),
            Err(e) => Err(e),
        }
    }

    /// Start the session daemon if none answers, then wait until it does
    pub fn ensure_running(&self, wait: Duration) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let exe = std::env::current_exe().context("cannot locate the keyrack executable")?;
        tracing::info!(socket = %self.address.socket.display(), "starting keyrack daemon");
        Command::new(exe)
            .arg("daemon")
            .arg("--socket")
            .arg(&self.address.socket)
            .arg("--pid-file")
            .arg(&self.address.pid_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .context("failed to spawn keyrack daemon")?;

        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            if self.is_running() {
                return Ok(());
            }
            std::thread::sleep(SPAWN_POLL);
        }
        bail!(KeyrackError::DaemonUnavailable(format!(
            "daemon did not start listening on {} within {:?}",
            self.address.socket.display(),
            wait
        )))
    }
}

fn is_unavailable(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<KeyrackError>(),
        Some(KeyrackError::DaemonUnavailable(_))
    )
}

fn unexpected(response: &DaemonResponse) -> KeyrackError {
    let kind = match response {
        DaemonResponse::Unlocked { .. } => "unlocked",
        DaemonResponse::Key { .. } => "key",
        DaemonResponse::Host { .. } => "host",
        DaemonResponse::Status(_) => "status",
        DaemonResponse::Relocked { .. } => "relocked",
        DaemonResponse::Error { .. } => "error",
    };
    KeyrackError::DaemonUnavailable(format!("unexpected {} response from daemon", kind))
}
