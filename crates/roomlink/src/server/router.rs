//! HTTP Router
//!
//! Sets up the axum router with the WebSocket endpoints and a small JSON API.

use std::future::Future;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use roomlink_types::{IdError, ParticipantName, RoomId};

use super::handler::{handle_websocket, JoinParams};
use super::registry::{Resume, RoomSummary};
use super::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        // WebSocket endpoints: /ws?room=..&name=.. or /ws/{room}?name=..
        .route("/ws", get(ws_upgrade))
        .route("/ws/:room", get(ws_upgrade_room))
        // Health check for monitoring/load balancers
        .route("/health", get(health_check))
        .route("/rooms", get(list_rooms))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on a bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Query string accepted by the WebSocket endpoints
#[derive(Debug, Default, Deserialize)]
pub struct JoinQuery {
    pub room: Option<String>,
    pub name: Option<String>,
    pub since: Option<u64>,
    /// Room epoch the `since` cursor belongs to
    pub epoch: Option<Uuid>,
}

impl JoinQuery {
    /// Validate into join parameters. `room_override` comes from the path.
    pub fn into_params(self, room_override: Option<&str>) -> Result<JoinParams, IdError> {
        let room = RoomId::parse_or_default(room_override.or(self.room.as_deref()))?;
        let name = ParticipantName::parse_or_default(self.name.as_deref())?;
        let resume = self.since.map(|since| Resume {
            since,
            epoch: self.epoch,
        });
        Ok(JoinParams { room, name, resume })
    }
}

/// Rejection for a malformed connection request
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidId(#[from] IdError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// WebSocket upgrade handler
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<JoinQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let params = query.into_params(None)?;
    Ok(upgrade(ws, state, params))
}

/// WebSocket upgrade handler with the room in the path
async fn ws_upgrade_room(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(query): Query<JoinQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let params = query.into_params(Some(&room))?;
    Ok(upgrade(ws, state, params))
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, params: JoinParams) -> Response {
    tracing::debug!(
        room = %params.room,
        name = %params.name,
        resume = ?params.resume,
        "Upgrading connection"
    );
    ws.max_message_size(state.config().max_message_bytes)
        .on_upgrade(move |socket| handle_websocket(socket, state, params))
}

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
}

async fn root() -> Json<RootResponse> {
    tracing::info!("Root endpoint accessed");
    Json(RootResponse {
        message: "roomlink server is running",
    })
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    rooms: usize,
    clients: usize,
    uptime_secs: u64,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        rooms: state.registry().room_count(),
        clients: state.registry().client_count(),
        uptime_secs: state.uptime().as_secs(),
    })
}

async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.registry().rooms())
}
