//! Error types for the client.

use tokio_tungstenite::tungstenite;

use roomlink_types::IdError;

/// Errors that can occur while connecting or talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    #[error("WebSocket error: {0}")]
    Transport(Box<tungstenite::Error>),

    #[error("Connection attempt timed out")]
    Timeout,

    #[error("Failed to decode server message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No frame received within the heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Connection closed")]
    Closed,

    #[error("Gave up after {0} reconnect attempts")]
    RetriesExhausted(u32),

    #[error("Connection task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<tungstenite::Error> for ClientError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Transport(Box::new(error))
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
