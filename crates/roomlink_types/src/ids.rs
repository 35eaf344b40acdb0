//! Room and participant identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Room used when the connection does not name one
pub const DEFAULT_ROOM: &str = "default";

/// Participant name used when the connection does not supply one
pub const DEFAULT_NAME: &str = "anonymous";

/// Maximum identifier length, in characters
pub const MAX_ID_LEN: usize = 64;

/// Identifier validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} is longer than {max} characters")]
    TooLong { kind: &'static str, max: usize },

    #[error("{kind} contains control characters")]
    ControlCharacter { kind: &'static str },
}

fn validate(kind: &'static str, raw: &str) -> Result<String, IdError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(IdError::TooLong {
            kind,
            max: MAX_ID_LEN,
        });
    }
    if value.chars().any(char::is_control) {
        return Err(IdError::ControlCharacter { kind });
    }
    Ok(value.to_string())
}

/// Identifier of a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Parse and validate a room id (surrounding whitespace is trimmed)
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        validate("room", raw).map(Self)
    }

    /// Parse an optional raw value, falling back to [`DEFAULT_ROOM`] when it
    /// is missing or blank
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, IdError> {
        match raw {
            Some(value) if !value.trim().is_empty() => Self::parse(value),
            _ => Ok(Self::default()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self(DEFAULT_ROOM.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Display name of a participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantName(String);

impl ParticipantName {
    /// Parse and validate a participant name
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        validate("name", raw).map(Self)
    }

    /// Parse an optional raw value, falling back to [`DEFAULT_NAME`]
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, IdError> {
        match raw {
            Some(value) if !value.trim().is_empty() => Self::parse(value),
            _ => Ok(Self::default()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ParticipantName {
    fn default() -> Self {
        Self(DEFAULT_NAME.to_string())
    }
}

impl fmt::Display for ParticipantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ParticipantName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
