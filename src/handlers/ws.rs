//! WebSocket handler: streams the merged snapshot and every later patch to local clients.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handlers::http::AppState;
use crate::models::event::Envelope;

/// GET /ws — upgrade to a local game-state stream.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let client_id = Uuid::new_v4();
    info!(%client_id, "relay ws connected");

    let (mut sender, mut receiver) = socket.split();
    // Subscribe before reading the snapshot so no patch falls between the two.
    let mut updates = state.snapshot.subscribe();

    let snapshot = json!({ "event": "snapshot", "data": state.snapshot.current() });
    if sender.send(Message::Text(snapshot.to_string())).await.is_err() {
        return;
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let tx_fwd = tx.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(patch) => {
                    let msg = json!({ "event": "update", "data": patch });
                    if tx_fwd.send(msg.to_string()).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%client_id, skipped, "relay client lagging, patches skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) if envelope.event == "ping" => {
                    let pong = json!({ "event": "pong", "data": {} });
                    let _ = tx.send(pong.to_string());
                }
                Ok(envelope) => debug!(%client_id, event = %envelope.event, "ignoring client event"),
                Err(e) => debug!(%client_id, error = %e, "ignoring malformed client frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    forward_task.abort();
    send_task.abort();
    info!(%client_id, "relay ws disconnected");
}
