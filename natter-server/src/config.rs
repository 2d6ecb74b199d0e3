//! Server configuration
//!
//! Settings load from a TOML file with every field optional; anything the
//! file omits falls back to the defaults below. Command line flags are
//! applied on top by the binary entry point before validation.

use std::path::Path;

use natter_utils::{config_file, NatterError, Result};
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen: ListenConfig,
    pub session: SessionConfig,
    pub broadcast: BroadcastConfig,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Interface to bind
    pub host: String,
    /// TCP port to listen on
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8888,
        }
    }
}

impl ListenConfig {
    /// Bind address in `host:port` form
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds of silence before a session is disconnected
    pub idle_timeout_secs: u64,
    /// Outbound queue depth per session; messages beyond it are dropped
    pub mailbox_capacity: usize,
    /// Maximum accepted line length in bytes
    pub max_line_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            mailbox_capacity: 32,
            max_line_bytes: 4096,
        }
    }
}

/// Broadcast fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Depth of the shared queue feeding the fan-out worker
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| NatterError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| NatterError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.listen.host.is_empty() {
            return Err(NatterError::config("listen.host must not be empty"));
        }

        if config.listen.port == 0 {
            return Err(NatterError::config("listen.port must be nonzero"));
        }

        if config.session.idle_timeout_secs == 0 {
            return Err(NatterError::config("idle_timeout_secs must be at least 1"));
        }

        if config.session.mailbox_capacity == 0 {
            return Err(NatterError::config("mailbox_capacity must be at least 1"));
        }

        if config.session.max_line_bytes == 0 || config.session.max_line_bytes > 1_048_576 {
            return Err(NatterError::config(
                "max_line_bytes must be between 1 and 1048576",
            ));
        }

        if config.broadcast.queue_capacity == 0 {
            return Err(NatterError::config("queue_capacity must be at least 1"));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<AppConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }
}
