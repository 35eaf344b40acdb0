//! Message handlers
//!
//! The application supplies a [`MessageHandler`] when building the client.
//! Every parsed server message is delivered to it in order.

use async_trait::async_trait;
use tokio::sync::mpsc;

use roomlink_types::ServerMessage;

use crate::connection::ConnectionState;
use crate::error::ClientError;

/// Receives inbound messages and lifecycle notifications.
///
/// Callbacks run on the connection task; a slow handler delays heartbeats, so
/// long work should be handed off.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Called for every dispatched server message
    async fn on_message(&self, message: ServerMessage);

    /// Called when the connection state changes
    async fn on_state_change(&self, _state: ConnectionState) {}

    /// Called for frames that could not be decoded and for lost connections
    async fn on_error(&self, _error: &ClientError) {}
}

/// Everything a [`ChannelHandler`] forwards
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(ServerMessage),
    State(ConnectionState),
    Error(String),
}

/// Handler that forwards all callbacks into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageHandler for ChannelHandler {
    async fn on_message(&self, message: ServerMessage) {
        let _ = self.tx.send(ClientEvent::Message(message));
    }

    async fn on_state_change(&self, state: ConnectionState) {
        let _ = self.tx.send(ClientEvent::State(state));
    }

    async fn on_error(&self, error: &ClientError) {
        let _ = self.tx.send(ClientEvent::Error(error.to_string()));
    }
}

/// Adapts a synchronous closure into a handler for messages only
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(ServerMessage) + Send + Sync + 'static,
{
    async fn on_message(&self, message: ServerMessage) {
        (self.0)(message)
    }
}
