//! Daemon status checking

use crate::session::SessionAddress;
use std::path::PathBuf;

/// Status of the session daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running,
    Stopped,
    /// Socket or pid file left behind by a daemon that is gone
    Stale,
}

impl DaemonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Stale => "stale",
        }
    }
}

impl std::fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Information about the session daemon
#[derive(Debug, Clone)]
pub struct DaemonInfo {
    pub status: DaemonStatus,
    pub socket_path: Option<PathBuf>,
    pub pid: Option<u32>,
}

/// Inspect the filesystem footprint of a session daemon
pub fn check_daemon(address: &SessionAddress) -> DaemonInfo {
    let socket_exists = address.socket.exists();
    let pid = crate::process::read_pid_file(&address.pid_file);
    let process_running = pid.map(crate::process::is_alive).unwrap_or(false);

    let status = match (socket_exists, process_running) {
        (true, true) => DaemonStatus::Running,
        (false, false) if pid.is_none() => DaemonStatus::Stopped,
        // Pid alive but no socket yet (still binding) counts as running
        (false, true) => DaemonStatus::Running,
        _ => DaemonStatus::Stale,
    };

    DaemonInfo {
        status,
        socket_path: if socket_exists {
            Some(address.socket.clone())
        } else {
            None
        },
        pid: if process_running { pid } else { None },
    }
}
