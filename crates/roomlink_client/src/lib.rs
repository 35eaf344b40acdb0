//! Roomlink client
//!
//! Joins one room on a roomlink server and keeps the connection alive:
//! reconnects with backoff, resumes from the last seen room event, and
//! delivers every message to an application-supplied [`MessageHandler`].
//!
//! ```ignore
//! let (handler, mut events) = ChannelHandler::new();
//! let client = RoomClient::builder("ws://127.0.0.1:8000/ws")
//!     .room("room1")
//!     .name("ann")
//!     .spawn(handler)?;
//! client.send(serde_json::json!({ "text": "hello" })).await?;
//! ```

pub mod backoff;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod router;

pub use backoff::{Backoff, BackoffPolicy};
pub use connection::{ClientConfig, ConnectionState, RoomClient, RoomClientBuilder};
pub use error::{ClientError, ClientResult};
pub use handler::{ChannelHandler, ClientEvent, FnHandler, MessageHandler};
pub use router::{InboundRouter, ResumePoint, Routed};

// Re-export the wire protocol
pub use roomlink_types;
