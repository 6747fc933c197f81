//! HTTP handlers: health, game-state polling and upstream emit.

use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::error::AppError;
use crate::models::game_state::GameState;
use crate::services::{LiveState, SnapshotStore};

/// Shared relay state for HTTP and WS handlers.
#[derive(Clone)]
pub struct AppState {
    pub live: LiveState,
    pub snapshot: SnapshotStore,
    pub stale_after: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateResponse {
    #[serde(flatten)]
    pub state: GameState,
    pub stale: bool,
    pub updated_at: Option<String>,
}

/// GET /api/game-state — merged snapshot for polling clients.
pub async fn game_state(State(state): State<AppState>) -> Json<GameStateResponse> {
    let snapshot = &state.snapshot;
    Json(GameStateResponse {
        state: snapshot.current(),
        stale: snapshot.is_stale(state.stale_after),
        updated_at: snapshot.last_update_at().map(|at| at.to_rfc3339()),
    })
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmitRequest {
    #[validate(length(min = 1, max = 64))]
    pub event: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// POST /api/emit — forward a message upstream.
pub async fn emit(
    State(state): State<AppState>,
    Json(body): Json<EmitRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    body.validate()?;
    let conn = state.live.connection().ok_or(AppError::NotConnected)?;
    conn.emit(&body.event, body.data);

    Ok(Json(json!({
        "ok": true,
        "event": body.event,
        "connected": conn.is_connected()
    })))
}

/// GET /health — liveness check, with upstream connectivity.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "livestate",
            "connected": state.live.is_connected()
        })),
    )
}
