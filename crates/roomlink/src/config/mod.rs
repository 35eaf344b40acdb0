//! Server Configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! the `PORT` variable, then `ROOMLINK_*` environment variables. Command-line
//! flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,
    pub port: u16,

    /// Room events kept per room for replay after reconnects
    pub history_len: usize,

    /// Longest accepted room topic, in characters
    pub max_topic_len: usize,

    /// Outbound queue capacity per client
    pub client_queue: usize,

    /// Connections silent for this long are closed
    pub idle_timeout_secs: u64,

    /// Largest accepted WebSocket message
    pub max_message_bytes: usize,

    /// Host used in the announced join URL; the local IP when unset
    pub public_host: Option<String>,

    /// Room named in the announced join URL
    pub announce_room: String,

    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            history_len: 64,
            max_topic_len: 200,
            client_queue: 256,
            idle_timeout_secs: 60,
            max_message_bytes: 64 * 1024,
            public_host: None,
            announce_room: "room1".to_string(),
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the standard layers
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path)?)
    }

    /// Build the provider stack without extracting it
    pub fn figment(path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }

        Ok(figment
            .merge(Env::raw().only(&["port"]))
            .merge(Env::prefixed("ROOMLINK_")))
    }

    /// Extract and validate a configuration
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_topic_len == 0 {
            return Err(ConfigError::Invalid(
                "max_topic_len must be greater than zero".to_string(),
            ));
        }
        // A joining client receives a welcome, the replay and its own presence
        if self.client_queue < self.history_len + 2 {
            return Err(ConfigError::Invalid(format!(
                "client_queue ({}) must be at least history_len + 2 ({})",
                self.client_queue,
                self.history_len + 2
            )));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Socket address string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
