//! Room Registry
//!
//! Maps room ids to their connected participants. All room events (chat,
//! presence, topic changes) are stamped with a per-room sequence number and
//! fanned out while the room entry is locked, so every member sees the same
//! order. Fan-out only uses `try_send`; a participant whose queue is full or
//! closed is evicted.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use roomlink_types::{ParticipantName, PresenceAction, RoomId, ServerMessage};

/// Errors returned by registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Session {0} is not a member of the room")]
    NotAMember(Uuid),

    #[error("Topic is longer than {max} characters")]
    TopicTooLong { max: usize },

    #[error("Client queue closed before the welcome was delivered")]
    Disconnected,
}

/// A connected participant
#[derive(Debug, Clone)]
pub struct Participant {
    pub session_id: Uuid,
    pub name: ParticipantName,
    pub joined_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerMessage>,
}

/// Outcome of a successful join
#[derive(Debug, Clone)]
pub struct Joined {
    pub session_id: Uuid,
    /// Number of history events replayed to the new participant
    pub replayed: usize,
    /// Sequence number of the joiner's own presence event
    pub seq: u64,
}

/// Where a reconnecting participant left off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resume {
    /// Last room event the participant saw
    pub since: u64,
    /// Room epoch that `since` belongs to, when the client knows it
    pub epoch: Option<Uuid>,
}

impl Resume {
    pub fn since(since: u64) -> Self {
        Self { since, epoch: None }
    }
}

/// Point-in-time view of a room, for the HTTP API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room: RoomId,
    pub participants: Vec<ParticipantName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub last_seq: u64,
}

#[derive(Debug)]
struct Room {
    members: HashMap<Uuid, Participant>,
    /// Fresh for every incarnation of the room
    epoch: Uuid,
    last_seq: u64,
    history: VecDeque<ServerMessage>,
}

impl Default for Room {
    fn default() -> Self {
        Self {
            members: HashMap::new(),
            epoch: Uuid::new_v4(),
            last_seq: 0,
            history: VecDeque::new(),
        }
    }
}

impl Room {
    fn participant_names(&self) -> Vec<ParticipantName> {
        let mut members: Vec<_> = self.members.values().collect();
        members.sort_by_key(|p| p.joined_at);
        members.into_iter().map(|p| p.name.clone()).collect()
    }

    /// Deliver the welcome and replay to a new participant, then add it and
    /// announce it. Returns the replay count and the presence seq.
    fn admit(
        &mut self,
        room_id: &RoomId,
        participant: Participant,
        topic: Option<String>,
        resume: Option<Resume>,
        history_len: usize,
    ) -> Result<(usize, u64), RegistryError> {
        let mut participants = self.participant_names();
        participants.push(participant.name.clone());

        let welcome = ServerMessage::Welcome {
            session_id: participant.session_id,
            room: room_id.clone(),
            name: participant.name.clone(),
            participants,
            topic,
            last_seq: self.last_seq,
            epoch: self.epoch,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        participant
            .tx
            .try_send(welcome)
            .map_err(|_| RegistryError::Disconnected)?;

        let mut replayed = 0;
        if let Some(since) = self.replay_from(resume) {
            for event in self
                .history
                .iter()
                .filter(|e| e.seq().is_some_and(|seq| seq > since))
            {
                participant
                    .tx
                    .try_send(event.clone())
                    .map_err(|_| RegistryError::Disconnected)?;
                replayed += 1;
            }
        }

        let session_id = participant.session_id;
        let name = participant.name.clone();
        self.members.insert(session_id, participant);

        let (seq, evicted) = self.fan_out(history_len, |seq| ServerMessage::Presence {
            seq,
            room: room_id.clone(),
            name,
            session_id,
            action: PresenceAction::Joined,
            sent_at: Utc::now(),
        });
        self.announce_left(room_id, history_len, evicted);

        Ok((replayed, seq))
    }

    /// First sequence number to skip when replaying history. A cursor from
    /// another epoch, or one ahead of this room, means the room was recreated
    /// and everything still in history is new to the participant.
    fn replay_from(&self, resume: Option<Resume>) -> Option<u64> {
        let resume = resume?;
        let same_room = resume.epoch.is_none_or(|epoch| epoch == self.epoch);
        if same_room && resume.since <= self.last_seq {
            Some(resume.since)
        } else {
            Some(0)
        }
    }

    /// Stamp the next sequence number, record the event and deliver it to
    /// every member. Returns the seq and the members that had to be evicted.
    fn fan_out(
        &mut self,
        history_len: usize,
        make: impl FnOnce(u64) -> ServerMessage,
    ) -> (u64, Vec<Participant>) {
        self.last_seq += 1;
        let seq = self.last_seq;
        let message = make(seq);

        if history_len > 0 {
            if self.history.len() == history_len {
                self.history.pop_front();
            }
            self.history.push_back(message.clone());
        }

        let mut failed = Vec::new();
        for (session_id, participant) in &self.members {
            if let Err(e) = participant.tx.try_send(message.clone()) {
                tracing::warn!(
                    session_id = %session_id,
                    name = %participant.name,
                    "Evicting participant: {}",
                    e
                );
                failed.push(*session_id);
            }
        }

        let evicted = failed
            .into_iter()
            .filter_map(|id| self.members.remove(&id))
            .collect();

        (seq, evicted)
    }

    /// Announce departures, including any evictions those announcements cause
    fn announce_left(&mut self, room: &RoomId, history_len: usize, mut gone: Vec<Participant>) {
        while let Some(participant) = gone.pop() {
            let (_, evicted) = self.fan_out(history_len, |seq| ServerMessage::Presence {
                seq,
                room: room.clone(),
                name: participant.name.clone(),
                session_id: participant.session_id,
                action: PresenceAction::Left,
                sent_at: Utc::now(),
            });
            gone.extend(evicted);
        }
    }
}

/// Registry of all active rooms
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Room>,
    /// Topics outlive the rooms they were set in
    topics: DashMap<RoomId, String>,
    history_len: usize,
    max_topic_len: usize,
}

impl RoomRegistry {
    pub fn new(history_len: usize, max_topic_len: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            topics: DashMap::new(),
            history_len,
            max_topic_len,
        }
    }

    /// Add a participant to a room, creating the room if needed.
    ///
    /// The new participant receives, in order: the `welcome`, the history
    /// events it missed, then the room-wide `presence/joined`.
    pub fn join(
        &self,
        room_id: &RoomId,
        name: ParticipantName,
        tx: mpsc::Sender<ServerMessage>,
        resume: Option<Resume>,
    ) -> Result<Joined, RegistryError> {
        let session_id = Uuid::new_v4();
        let participant = Participant {
            session_id,
            name: name.clone(),
            joined_at: Utc::now(),
            tx,
        };

        let admitted = {
            let mut room = self.rooms.entry(room_id.clone()).or_default();
            // Topics change under the room guard, so this read cannot miss one
            let topic = self.topic(room_id);
            room.admit(room_id, participant, topic, resume, self.history_len)
        };
        // A failed admission may leave a freshly created room behind
        self.rooms.remove_if(room_id, |_, room| room.members.is_empty());
        let (replayed, seq) = admitted?;

        tracing::info!(
            room = %room_id,
            name = %name,
            session_id = %session_id,
            replayed,
            "Participant joined"
        );

        Ok(Joined {
            session_id,
            replayed,
            seq,
        })
    }

    /// Remove a participant. Empty rooms are deleted.
    ///
    /// Returns `None` when the participant was already gone (for example
    /// after an eviction).
    pub fn leave(&self, room_id: &RoomId, session_id: Uuid) -> Option<Participant> {
        let participant = {
            let mut room = self.rooms.get_mut(room_id)?;
            let participant = room.members.remove(&session_id)?;
            room.announce_left(room_id, self.history_len, vec![participant.clone()]);
            participant
        };

        if self
            .rooms
            .remove_if(room_id, |_, room| room.members.is_empty())
            .is_some()
        {
            tracing::info!(room = %room_id, "Room closed");
        }

        tracing::info!(
            room = %room_id,
            name = %participant.name,
            session_id = %session_id,
            "Participant left"
        );
        Some(participant)
    }

    /// Broadcast a chat payload from a member to its room
    pub fn publish(
        &self,
        room_id: &RoomId,
        session_id: Uuid,
        body: Value,
    ) -> Result<u64, RegistryError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.clone()))?;
        let sender = room
            .members
            .get(&session_id)
            .map(|p| p.name.clone())
            .ok_or(RegistryError::NotAMember(session_id))?;

        let (seq, evicted) = room.fan_out(self.history_len, |seq| ServerMessage::Message {
            seq,
            room: room_id.clone(),
            sender,
            body,
            sent_at: Utc::now(),
        });
        room.announce_left(room_id, self.history_len, evicted);
        drop(room);
        self.rooms.remove_if(room_id, |_, room| room.members.is_empty());

        Ok(seq)
    }

    /// Set the room topic and broadcast the change
    pub fn set_topic(
        &self,
        room_id: &RoomId,
        session_id: Uuid,
        topic: &str,
    ) -> Result<u64, RegistryError> {
        let topic = topic.trim();
        if topic.chars().count() > self.max_topic_len {
            return Err(RegistryError::TopicTooLong {
                max: self.max_topic_len,
            });
        }

        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.clone()))?;
        let set_by = room
            .members
            .get(&session_id)
            .map(|p| p.name.clone())
            .ok_or(RegistryError::NotAMember(session_id))?;

        self.topics.insert(room_id.clone(), topic.to_string());
        let (seq, evicted) = room.fan_out(self.history_len, |seq| ServerMessage::TopicUpdate {
            seq,
            room: room_id.clone(),
            topic: topic.to_string(),
            set_by,
            sent_at: Utc::now(),
        });
        room.announce_left(room_id, self.history_len, evicted);
        drop(room);
        self.rooms.remove_if(room_id, |_, room| room.members.is_empty());

        tracing::info!(room = %room_id, topic = %topic, "Topic updated");
        Ok(seq)
    }

    /// Send an unsequenced message to one member. Returns false if the
    /// member is unknown or its queue rejected the message.
    pub fn send_to(&self, room_id: &RoomId, session_id: Uuid, message: ServerMessage) -> bool {
        self.rooms
            .get(room_id)
            .and_then(|room| room.members.get(&session_id).map(|p| p.tx.try_send(message).is_ok()))
            .unwrap_or(false)
    }

    /// Names of everyone in a room, in join order
    pub fn participants(&self, room_id: &RoomId) -> Vec<ParticipantName> {
        self.rooms
            .get(room_id)
            .map(|room| room.participant_names())
            .unwrap_or_default()
    }

    /// Current topic of a room, if one was ever set
    pub fn topic(&self, room_id: &RoomId) -> Option<String> {
        self.topics.get(room_id).map(|t| t.clone())
    }

    /// Number of rooms with at least one participant
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of connected participants across all rooms
    pub fn client_count(&self) -> usize {
        self.rooms.iter().map(|room| room.members.len()).sum()
    }

    /// Snapshot of all active rooms, sorted by id
    pub fn rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<_> = self
            .rooms
            .iter()
            .map(|entry| RoomSummary {
                room: entry.key().clone(),
                participants: entry.participant_names(),
                topic: self.topic(entry.key()),
                last_seq: entry.last_seq,
            })
            .collect();
        rooms.sort_by(|a, b| a.room.cmp(&b.room));
        rooms
    }
}
