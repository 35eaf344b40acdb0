//! Roomlink Types - Wire protocol shared by the server and the client
//!
//! This crate holds the pure data structures exchanged over the WebSocket:
//! validated room and participant identifiers plus the tagged JSON messages
//! in both directions.

mod ids;
mod protocol;

pub use ids::*;
pub use protocol::*;
