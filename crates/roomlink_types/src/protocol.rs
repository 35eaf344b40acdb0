//! WebSocket Protocol Messages
//!
//! Defines the message types exchanged between client and server. Every frame
//! is a JSON object tagged by its `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::{ParticipantName, RoomId};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Broadcast a payload to everyone in the sender's room
    Chat { body: Value },

    /// Replace the room topic
    SetTopic { topic: String },

    /// Application-level keep-alive
    Ping { id: String },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once, right after the connection is accepted
    Welcome {
        session_id: Uuid,
        room: RoomId,
        name: ParticipantName,
        /// Names of everyone in the room, the new participant included
        participants: Vec<ParticipantName>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        /// Sequence number of the latest room event (0 for a fresh room)
        last_seq: u64,
        /// Changes whenever the room is recreated, which restarts `seq`
        epoch: Uuid,
        server_version: String,
    },

    /// A chat payload relayed to the room
    Message {
        seq: u64,
        room: RoomId,
        sender: ParticipantName,
        body: Value,
        sent_at: DateTime<Utc>,
    },

    /// A participant joined or left the room
    Presence {
        seq: u64,
        room: RoomId,
        name: ParticipantName,
        session_id: Uuid,
        action: PresenceAction,
        sent_at: DateTime<Utc>,
    },

    /// The room topic changed
    TopicUpdate {
        seq: u64,
        room: RoomId,
        topic: String,
        set_by: ParticipantName,
        sent_at: DateTime<Utc>,
    },

    /// Answer to a client ping
    Pong { id: String },

    /// Error report for the receiving client only
    Error { code: ErrorCode, message: String },
}

/// Presence transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Joined,
    Left,
}

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    TopicTooLong,
}

impl ServerMessage {
    /// Sequence number, for messages that are room events
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Message { seq, .. }
            | Self::Presence { seq, .. }
            | Self::TopicUpdate { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Room the message belongs to, if any
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            Self::Welcome { room, .. }
            | Self::Message { room, .. }
            | Self::Presence { room, .. }
            | Self::TopicUpdate { room, .. } => Some(room),
            _ => None,
        }
    }

    /// Whether this is a sequenced room event
    pub fn is_room_event(&self) -> bool {
        self.seq().is_some()
    }

    /// Create an error message
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a pong message
    pub fn pong(id: impl Into<String>) -> Self {
        Self::Pong { id: id.into() }
    }
}
