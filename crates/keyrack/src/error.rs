//! Keyrack error taxonomy
//!
//! Locked, blocked and absent keys are not errors. They are grant attempts
//! (see `grant`). The variants here abort a command.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyrackError {
    /// A manifest is missing or malformed; `fix` is the command that repairs it
    #[error("{message} (fix: {fix})")]
    Configuration { message: String, fix: String },

    /// Bad --mech/--vault value, slug, or mech/vault pairing
    #[error("invalid: {0}")]
    Validation(String),

    #[error("io error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error at {}: {message}", path.display())]
    Decryption { path: PathBuf, message: String },

    /// The session daemon socket could not be reached
    #[error("keyrack daemon unavailable: {0}")]
    DaemonUnavailable(String),
}

impl KeyrackError {
    pub fn configuration(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            fix: fix.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
