//! Error types for natter
//!
//! Provides a unified error type used across all natter crates.

use std::path::PathBuf;

/// Main error type for natter operations
#[derive(Debug, thiserror::Error)]
pub enum NatterError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection fault: {0}")]
    Connection(String),

    // === Chat Errors ===

    #[error("Identity already taken: {0}")]
    IdentityTaken(String),

    #[error("Target not online: {0}")]
    TargetNotFound(String),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    // === Session Errors ===

    #[error("Idle timeout after {seconds}s of inactivity")]
    IdleTimeout { seconds: u64 },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NatterError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check whether this error ends the session it occurred on
    ///
    /// Command-level errors (identity taken, unknown target, malformed
    /// command) are recovered as reply lines; only connection faults and
    /// idle timeout drive teardown.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Connection(_) | Self::IdleTimeout { .. }
        )
    }
}

/// Result type alias using NatterError
pub type Result<T> = std::result::Result<T, NatterError>;
