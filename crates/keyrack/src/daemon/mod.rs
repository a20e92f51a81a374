//! Session daemon: protocol, server and client

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{DaemonClient, RelockOutcome};
pub use protocol::{CachedKey, CachedKeyStatus, DaemonRequest, DaemonResponse, DaemonStatusReport};
pub use server::{DaemonServer, SessionState};
