//! WebSocket Connection Handler
//!
//! Handles individual WebSocket connections and routes their messages into
//! the room registry.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use roomlink_types::{ClientMessage, ErrorCode, ParticipantName, RoomId, ServerMessage};

use super::registry::{RegistryError, Resume};
use super::state::AppState;

/// Validated connection parameters
#[derive(Debug, Clone)]
pub struct JoinParams {
    pub room: RoomId,
    pub name: ParticipantName,
    /// Where the client left off, for replay after a reconnect
    pub resume: Option<Resume>,
}

/// Handle a WebSocket connection
pub async fn handle_websocket(socket: WebSocket, state: AppState, params: JoinParams) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let JoinParams { room, name, resume } = params;

    // Outbound queue; the registry holds the only sender
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config().client_queue);

    let session_id = match state.registry().join(&room, name, tx, resume) {
        Ok(joined) => joined.session_id,
        Err(e) => {
            tracing::warn!(room = %room, "Join failed: {}", e);
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Forward queued messages to the socket until the queue is dropped
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode server message: {}", e),
            }
        }
        let _ = ws_sender.close().await;
    });

    // Process incoming messages
    let idle_timeout = state.config().idle_timeout();
    let recv_state = state.clone();
    let recv_room = room.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let msg = match tokio::time::timeout(idle_timeout, ws_receiver.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    tracing::debug!(session_id = %session_id, "WebSocket error: {}", e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::info!(session_id = %session_id, "Closing idle connection");
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    handle_client_message(&recv_state, &recv_room, session_id, &text);
                }
                Message::Close(_) => {
                    break;
                }
                Message::Ping(_) => {
                    // Pong is handled automatically by axum
                    tracing::trace!("Received ping from {}", session_id);
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        // Socket write failed or the participant was evicted
        _ = &mut send_task => recv_task.abort(),
        // Leaving drops the queue, which ends the send task
        _ = &mut recv_task => {},
    }

    state.registry().leave(&room, session_id);
}

/// Route one text frame from a participant
fn handle_client_message(state: &AppState, room: &RoomId, session_id: Uuid, text: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(session_id = %session_id, "Failed to parse client message: {}", e);
            send_error(
                state,
                room,
                session_id,
                ErrorCode::InvalidRequest,
                format!("Invalid message: {}", e),
            );
            return;
        }
    };

    let result = match msg {
        ClientMessage::Chat { body } => {
            state.registry().publish(room, session_id, body).map(|_| ())
        }
        ClientMessage::SetTopic { topic } => {
            state.registry().set_topic(room, session_id, &topic).map(|_| ())
        }
        ClientMessage::Ping { id } => {
            state.registry().send_to(room, session_id, ServerMessage::pong(id));
            Ok(())
        }
    };

    match result {
        Ok(()) => {}
        Err(e @ RegistryError::TopicTooLong { .. }) => {
            send_error(state, room, session_id, ErrorCode::TopicTooLong, e.to_string());
        }
        Err(e) => {
            // Evicted between receiving the frame and routing it
            tracing::debug!(session_id = %session_id, "Dropping message: {}", e);
        }
    }
}

/// Send an error to a specific client
fn send_error(
    state: &AppState,
    room: &RoomId,
    session_id: Uuid,
    code: ErrorCode,
    message: impl Into<String>,
) {
    state
        .registry()
        .send_to(room, session_id, ServerMessage::error(code, message));
}
