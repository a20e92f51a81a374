//! Login-session identification
//!
//! The keyrack daemon lives for one OS login session. Its socket name is
//! derived from the session id so that every shell in the same login finds
//! the same daemon, and a second login (or another owner) gets its own.

use std::path::{Path, PathBuf};

/// Value the kernel reports in /proc/self/sessionid when audit has no session
const UNSET_AUDIT_SESSION: &str = "4294967295";

/// Where the session daemon listens and records its pid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAddress {
    pub session_id: String,
    pub owner: Option<String>,
    pub socket: PathBuf,
    pub pid_file: PathBuf,
}

impl SessionAddress {
    /// Address for the current login session
    pub fn current(runtime: &Path, owner: Option<&str>) -> Self {
        Self::for_session(runtime, &current_session_id(), owner)
    }

    /// Address for an explicit session id
    ///
    /// `$runtime/keyrack.$session[.$owner].sock` plus a sibling `.pid`.
    pub fn for_session(runtime: &Path, session_id: &str, owner: Option<&str>) -> Self {
        let stem = match owner {
            Some(owner) => format!("keyrack.{}.{}", session_id, owner),
            None => format!("keyrack.{}", session_id),
        };

        Self {
            session_id: session_id.to_string(),
            owner: owner.map(str::to_string),
            socket: runtime.join(format!("{}.sock", stem)),
            pid_file: runtime.join(format!("{}.pid", stem)),
        }
    }
}

/// Session id of the calling process
///
/// Prefers the audit session from /proc/self/sessionid, which is stable across
/// every process spawned from one login. Falls back to the POSIX session id
/// where audit sessions are unavailable (containers, macOS).
pub fn current_session_id() -> String {
    if let Ok(raw) = std::fs::read_to_string("/proc/self/sessionid") {
        if let Some(id) = parse_audit_session(&raw) {
            return id;
        }
    }

    // SAFETY: getsid(0) only reads the caller's session id.
    let sid = unsafe { libc::getsid(0) };
    if sid > 0 {
        format!("sid{}", sid)
    } else {
        format!("uid{}", current_uid())
    }
}

/// Real uid of the calling process
pub fn current_uid() -> u32 {
    // SAFETY: getuid never fails and touches no memory.
    unsafe { libc::getuid() }
}

fn parse_audit_session(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() || id == UNSET_AUDIT_SESSION || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(id.to_string())
}
