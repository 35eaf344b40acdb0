//! Connection Manager
//!
//! Owns the WebSocket lifecycle for one participant: connect, heartbeat,
//! reconnect with backoff, resume from the last seen room event, close.
//!
//! ```text
//! Connecting ──▶ Open ──(lost)──▶ Connecting ──▶ ...
//!      │           │
//!      └───────────┴──(close / retries exhausted)──▶ Closed
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use roomlink_types::{ClientMessage, ParticipantName, RoomId};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::endpoint::{connection_url, parse_base};
use crate::error::{ClientError, ClientResult};
use crate::handler::MessageHandler;
use crate::router::{HEARTBEAT_PREFIX, InboundRouter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─────────────────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connecting, or waiting to reconnect
    Connecting,
    /// Connected and joined to the room
    Open,
    /// Closed for good
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        *self == ConnectionState::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Client timing and buffering settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Limit for a single connection attempt
    pub connect_timeout: Duration,
    /// Interval between heartbeat pings
    pub heartbeat_interval: Duration,
    /// Silence after a ping that counts as a dead connection
    pub heartbeat_timeout: Duration,
    /// Outbound messages buffered while disconnected
    pub max_pending: usize,
    pub backoff: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(10),
            max_pending: 256,
            backoff: BackoffPolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Handle
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    Close,
}

/// Builder for [`RoomClient`]
#[derive(Debug, Clone)]
pub struct RoomClientBuilder {
    url: String,
    room: Option<String>,
    name: Option<String>,
    config: ClientConfig,
}

impl RoomClientBuilder {
    /// Room to join; `default` when unset or blank
    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Participant name; `anonymous` when unset or blank
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.config.backoff = policy;
        self
    }

    /// Validate the settings and start the connection task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(self, handler: impl MessageHandler) -> ClientResult<RoomClient> {
        let base = parse_base(&self.url)?;
        let room = RoomId::parse_or_default(self.room.as_deref())?;
        let name = ParticipantName::parse_or_default(self.name.as_deref())?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let pending = OutboundBuffer::new(self.config.max_pending);

        let manager = ConnectionManager {
            base,
            room: room.clone(),
            name: name.clone(),
            backoff: Backoff::new(self.config.backoff.clone()),
            config: self.config,
            commands: command_rx,
            state_tx,
            router: InboundRouter::new(handler.clone(), room.clone()),
            handler,
            pending,
            pings_sent: 0,
        };

        Ok(RoomClient {
            room,
            name,
            commands: command_tx,
            state: state_rx,
            task: tokio::spawn(manager.run()),
        })
    }
}

/// Handle to a running room connection.
///
/// Dropping every handle closes the connection.
pub struct RoomClient {
    room: RoomId,
    name: ParticipantName,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<ClientResult<()>>,
}

impl RoomClient {
    /// Start building a client for the given server URL
    pub fn builder(url: impl Into<String>) -> RoomClientBuilder {
        RoomClientBuilder {
            url: url.into(),
            room: None,
            name: None,
            config: ClientConfig::default(),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn name(&self) -> &ParticipantName {
        &self.name
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel of state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection reaches `target`
    pub async fn wait_for(&self, target: ConnectionState) -> ClientResult<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Send a chat payload to the room. Buffered while reconnecting.
    pub async fn send(&self, body: Value) -> ClientResult<()> {
        self.command(Command::Send(ClientMessage::Chat { body })).await
    }

    /// Change the room topic
    pub async fn set_topic(&self, topic: impl Into<String>) -> ClientResult<()> {
        self.command(Command::Send(ClientMessage::SetTopic {
            topic: topic.into(),
        }))
        .await
    }

    async fn command(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Close the connection and wait for the connection task to finish
    pub async fn close(self) -> ClientResult<()> {
        let _ = self.commands.send(Command::Close).await;
        self.task.await?
    }

    /// Wait for the connection task to end on its own
    pub async fn finished(self) -> ClientResult<()> {
        self.task.await?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound Buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Messages waiting for an open connection. A full buffer drops its oldest
/// entry.
#[derive(Debug)]
struct OutboundBuffer {
    messages: VecDeque<ClientMessage>,
    capacity: usize,
}

impl OutboundBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
        }
    }

    /// Queue a message. Returns whatever had to be dropped to make room.
    fn push(&mut self, message: ClientMessage) -> Option<ClientMessage> {
        if self.capacity == 0 {
            return Some(message);
        }
        let dropped = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        dropped
    }

    /// Put back a message whose send failed, ahead of everything else
    fn requeue(&mut self, message: ClientMessage) {
        self.messages.push_front(message);
    }

    fn pop(&mut self) -> Option<ClientMessage> {
        self.messages.pop_front()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Manager
// ─────────────────────────────────────────────────────────────────────────────

/// How a session ended
enum SessionEnd {
    /// Closed on request
    Closed,
    /// Dropped; reconnect
    Lost(ClientError),
}

struct ConnectionManager {
    base: Url,
    room: RoomId,
    name: ParticipantName,
    config: ClientConfig,
    backoff: Backoff,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    router: InboundRouter,
    handler: Arc<dyn MessageHandler>,
    /// Outbound messages waiting for an open connection
    pending: OutboundBuffer,
    pings_sent: u64,
}

impl ConnectionManager {
    async fn run(mut self) -> ClientResult<()> {
        let result = self.run_loop().await;
        if let Err(e) = &result {
            tracing::error!(room = %self.room, "Connection closed: {}", e);
            self.handler.on_error(e).await;
        }
        self.set_state(ConnectionState::Closed).await;
        result
    }

    async fn run_loop(&mut self) -> ClientResult<()> {
        loop {
            self.set_state(ConnectionState::Connecting).await;

            let resume = self.router.resume_point();
            let url = connection_url(&self.base, &self.room, &self.name, resume);
            tracing::debug!(url = %url, "Connecting");

            let connect_timeout = self.config.connect_timeout;
            let connected = tokio::select! {
                result = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => result,
                _ = self.buffer_until_close() => return Ok(()),
            };

            let end = match connected {
                Ok(Ok((ws, _response))) => {
                    self.backoff.on_connected();
                    self.session(ws).await
                }
                Ok(Err(e)) => SessionEnd::Lost(e.into()),
                Err(_) => SessionEnd::Lost(ClientError::Timeout),
            };

            let error = match end {
                SessionEnd::Closed => return Ok(()),
                SessionEnd::Lost(error) => error,
            };

            let Some(delay) = self.backoff.on_disconnect() else {
                return Err(ClientError::RetriesExhausted(self.backoff.attempts() - 1));
            };

            tracing::warn!(
                room = %self.room,
                attempt = self.backoff.attempts(),
                delay = ?delay,
                "Connection lost: {}",
                error
            );
            self.handler.on_error(&error).await;
            self.set_state(ConnectionState::Connecting).await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.buffer_until_close() => return Ok(()),
            }
        }
    }

    /// Run one open connection until it is closed or lost
    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut write, mut read) = ws.split();
        self.set_state(ConnectionState::Open).await;
        tracing::info!(room = %self.room, name = %self.name, "Connected");

        while let Some(message) = self.pending.pop() {
            if let Err(e) = send_json(&mut write, &message).await {
                self.pending.requeue(message);
                return SessionEnd::Lost(e);
            }
        }

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Set when a ping goes out, cleared by any inbound frame
        let mut ping_sent_at: Option<Instant> = None;

        loop {
            let deadline = ping_sent_at.map(|at| at + self.config.heartbeat_timeout);

            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        ping_sent_at = None;
                        if let Err(e) = self.router.route_text(&text).await {
                            tracing::warn!(room = %self.room, "Ignoring server frame: {}", e);
                            self.handler.on_error(&e).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Lost(ClientError::Closed);
                    }
                    Some(Ok(_)) => ping_sent_at = None,
                    Some(Err(e)) => return SessionEnd::Lost(e.into()),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = send_json(&mut write, &message).await {
                            self.pending.requeue(message);
                            return SessionEnd::Lost(e);
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        let _ = write.close().await;
                        tracing::info!(room = %self.room, "Connection closed by client");
                        return SessionEnd::Closed;
                    }
                },
                _ = heartbeat.tick() => {
                    if ping_sent_at.is_none() {
                        self.pings_sent += 1;
                        let ping = ClientMessage::Ping {
                            id: format!("{}{}", HEARTBEAT_PREFIX, self.pings_sent),
                        };
                        if let Err(e) = send_json(&mut write, &ping).await {
                            return SessionEnd::Lost(e);
                        }
                        ping_sent_at = Some(Instant::now());
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    return SessionEnd::Lost(ClientError::HeartbeatTimeout);
                }
            }
        }
    }

    /// Buffer outbound messages while disconnected; returns once a close is
    /// requested or every handle is dropped.
    async fn buffer_until_close(&mut self) {
        while let Some(Command::Send(message)) = self.commands.recv().await {
            if self.pending.push(message).is_some() {
                tracing::warn!(room = %self.room, "Outbound buffer full, dropping oldest message");
            }
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(room = %self.room, "State {} -> {}", previous, state);
            self.handler.on_state_change(state).await;
        }
    }
}

async fn send_json<S>(sink: &mut S, message: &ClientMessage) -> Result<(), ClientError>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(message)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(n: u64) -> ClientMessage {
        ClientMessage::Chat { body: json!(n) }
    }

    #[test]
    fn test_buffer_drops_oldest_when_full() {
        let mut buffer = OutboundBuffer::new(2);
        assert_eq!(buffer.push(chat(1)), None);
        assert_eq!(buffer.push(chat(2)), None);
        assert_eq!(buffer.push(chat(3)), Some(chat(1)));

        assert_eq!(buffer.pop(), Some(chat(2)));
        assert_eq!(buffer.pop(), Some(chat(3)));
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_requeued_message_goes_first() {
        let mut buffer = OutboundBuffer::new(4);
        buffer.push(chat(2));
        buffer.push(chat(3));
        buffer.requeue(chat(1));
        let order: Vec<_> = std::iter::from_fn(|| buffer.pop()).collect();
        assert_eq!(order, vec![chat(1), chat(2), chat(3)]);
    }

    #[test]
    fn test_zero_capacity_buffers_nothing() {
        let mut buffer = OutboundBuffer::new(0);
        assert_eq!(buffer.push(chat(1)), Some(chat(1)));
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Closed.is_open());
    }
}
