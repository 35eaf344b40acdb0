//! Inbound message router
//!
//! Parses text frames, drops replayed duplicates and heartbeat answers, and
//! hands everything else to the application's handler.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use roomlink_types::{RoomId, ServerMessage};

use crate::error::ClientError;
use crate::handler::MessageHandler;

/// Prefix of ping ids generated by the heartbeat
pub(crate) const HEARTBEAT_PREFIX: &str = "hb-";

/// What happened to a routed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Dispatched,
    /// A room event at or below the cursor
    Duplicate,
    /// Answer to one of our own heartbeat pings
    Heartbeat,
    /// Addressed to a room other than ours
    OtherRoom,
}

/// Position in a room's event stream, sent back on reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub epoch: Uuid,
    pub seq: u64,
}

pub struct InboundRouter {
    handler: Arc<dyn MessageHandler>,
    room: RoomId,
    /// Highest room event seen, within the current room epoch
    position: Option<ResumePoint>,
}

impl InboundRouter {
    pub fn new(handler: Arc<dyn MessageHandler>, room: RoomId) -> Self {
        Self {
            handler,
            room,
            position: None,
        }
    }

    /// Highest room event sequence number seen so far
    pub fn cursor(&self) -> Option<u64> {
        self.position.map(|p| p.seq)
    }

    /// Where the next connection should resume from
    pub fn resume_point(&self) -> Option<ResumePoint> {
        self.position
    }

    /// Parse one text frame and route it
    pub async fn route_text(&mut self, text: &str) -> Result<Routed, ClientError> {
        // Plain JSON first, so malformed frames and unknown shapes are told apart
        let value: Value = serde_json::from_str(text)?;
        let message: ServerMessage = serde_json::from_value(value)?;
        Ok(self.route(message).await)
    }

    /// Route an already decoded message
    pub async fn route(&mut self, message: ServerMessage) -> Routed {
        if message.room().is_some_and(|room| *room != self.room) {
            tracing::warn!(room = ?message.room(), "Dropping message for another room");
            return Routed::OtherRoom;
        }

        match &message {
            ServerMessage::Welcome {
                epoch, last_seq, ..
            } => {
                let position = match self.position {
                    Some(p) if p.epoch == *epoch && p.seq <= *last_seq => p,
                    // Recreated while we were away: the server replays its
                    // whole history, so start over from the beginning
                    Some(p) => {
                        tracing::debug!(cursor = p.seq, last_seq, "Room sequence restarted");
                        ResumePoint {
                            epoch: *epoch,
                            seq: 0,
                        }
                    }
                    None => ResumePoint {
                        epoch: *epoch,
                        seq: *last_seq,
                    },
                };
                self.position = Some(position);
            }
            ServerMessage::Pong { id } if id.starts_with(HEARTBEAT_PREFIX) => {
                return Routed::Heartbeat;
            }
            _ => {
                if let (Some(seq), Some(position)) = (message.seq(), self.position.as_mut()) {
                    if seq <= position.seq {
                        tracing::trace!(seq, "Dropping duplicate room event");
                        return Routed::Duplicate;
                    }
                    position.seq = seq;
                }
            }
        }

        self.handler.on_message(message).await;
        Routed::Dispatched
    }
}
