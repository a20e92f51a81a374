//! keyrack-core - Shared host plumbing for keyrack
//!
//! Paths, login-session addressing and process liveness used by both the
//! keyrack CLI and its session daemon.

pub mod daemon;
pub mod paths;
pub mod process;
pub mod session;

pub use paths::Paths;
pub use session::SessionAddress;
