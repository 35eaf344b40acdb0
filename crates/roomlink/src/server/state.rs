//! Server Application State
//!
//! Shared state accessible by all WebSocket handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;

use super::registry::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Rooms and their participants
    registry: RoomRegistry,

    /// Effective server configuration
    config: ServerConfig,

    /// Server start time, for uptime reporting
    started_at: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServerConfig) -> Self {
        let registry = RoomRegistry::new(config.history_len, config.max_topic_len);

        Self {
            inner: Arc::new(AppStateInner {
                registry,
                config,
                started_at: Instant::now(),
            }),
        }
    }

    /// Get the room registry
    pub fn registry(&self) -> &RoomRegistry {
        &self.inner.registry
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Time since the state was created
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }
}
