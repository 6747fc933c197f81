//! Live game-state broadcaster for a trivia event push channel.
//!
//! Keeps one shared upstream WebSocket connection, fans out named events to
//! local callbacks and derives partial game-state updates from the known
//! event types. The bundled relay merges those updates and serves them to
//! browser front-ends over HTTP polling and a local WebSocket.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod transport;

pub use config::{Config, TransportConfig};
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::live_state::{Connection, LiveState};
pub use services::snapshot::SnapshotStore;

use axum::routing::{get, post};
use handlers::http;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the relay router (health, game-state polling, emit, ws). Used by main and by integration tests.
pub fn create_app(state: AppState, cors: CorsLayer) -> axum::Router {
    let api_routes = axum::Router::new()
        .route("/game-state", get(http::game_state))
        .route("/emit", post(http::emit));

    axum::Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/health", get(http::health))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
