//! WebSocket Server
//!
//! Room-based WebSocket API: clients join one room per connection and
//! receive that room's events in sequence order.

mod handler;
mod registry;
mod router;
mod state;

pub use handler::*;
pub use registry::*;
pub use router::*;
pub use state::*;
