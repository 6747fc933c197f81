//! Integration tests: relay endpoints over the router, and the full path from a
//! loopback WebSocket backend through the broadcaster into the relay.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use livestate::middleware::cors_layer;
use livestate::models::{GameStatus, GameStateUpdate};
use livestate::transport::WsConnector;
use livestate::{create_app, AppState, LiveState, SnapshotStore, TransportConfig};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tower::util::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

fn test_state(url: &str) -> AppState {
    let config = TransportConfig::new(url).with_reconnect(2, Duration::from_millis(50));
    let live = LiveState::new(Arc::new(WsConnector::new(url)), config);
    let snapshot = SnapshotStore::default();
    snapshot.attach(&live);
    AppState {
        live,
        snapshot,
        stale_after: Duration::from_secs(30),
    }
}

async fn body_json(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Loopback backend: records every frame it receives and answers
/// `requestGameState` with the scripted frames.
async fn start_backend(script: Vec<serde_json::Value>) -> (String, mpsc::UnboundedReceiver<String>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel::<String>();
    let app = axum::Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let seen_tx = seen_tx.clone();
            let script = script.clone();
            async move { ws.on_upgrade(move |socket| backend_session(socket, script, seen_tx)) }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/ws"), seen_rx)
}

async fn backend_session(
    mut socket: WebSocket,
    script: Vec<serde_json::Value>,
    seen_tx: mpsc::UnboundedSender<String>,
) {
    while let Some(Ok(msg)) = socket.recv().await {
        if let AxumMessage::Text(text) = msg {
            let envelope: serde_json::Value = serde_json::from_str(&text).unwrap();
            let _ = seen_tx.send(text.clone());
            if envelope["event"] == "requestGameState" {
                for frame in &script {
                    if socket.send(AxumMessage::Text(frame.to_string())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn next_seen(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
    let text = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for backend frame")
        .expect("backend gone");
    serde_json::from_str(&text).unwrap()
}

/// Read the next relay frame as JSON, with a timeout.
async fn next_json<S>(read: &mut S) -> serde_json::Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let msg = tokio::time::timeout(WAIT, read.next())
        .await
        .expect("timed out waiting for relay frame")
        .expect("stream ended")
        .expect("ws error");
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn health_reports_upstream_state() {
    let state = test_state("ws://127.0.0.1:9/ws");
    let app = create_app(state, cors_layer(&[]));

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("ok"));
    assert_eq!(json.get("connected").and_then(|v| v.as_bool()), Some(false));
}

#[tokio::test]
async fn game_state_defaults_to_stale_stopped() {
    let state = test_state("ws://127.0.0.1:9/ws");
    let app = create_app(state, cors_layer(&[]));

    let req = Request::builder()
        .uri("/api/game-state")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["gameStatus"], "Stopped");
    assert_eq!(json["currentRound"], 0);
    assert_eq!(json["stale"], true);
    assert!(json["updatedAt"].is_null());
}

#[tokio::test]
async fn emit_validates_and_requires_connection() {
    let state = test_state("ws://127.0.0.1:9/ws");
    let app = create_app(state, cors_layer(&[]));

    let req = Request::builder()
        .method("POST")
        .uri("/api/emit")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "event": "" }).to_string()))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST, "empty event name is rejected");

    let req = Request::builder()
        .method("POST")
        .uri("/api/emit")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "event": "submitAnswer" }).to_string()))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(
        res.status(),
        StatusCode::SERVICE_UNAVAILABLE,
        "emit before the connection is opened"
    );
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let state = test_state("ws://127.0.0.1:9/ws");
    let app = create_app(state, cors_layer(&["https://admin.example.com".to_string()]));

    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/game-state")
        .header("origin", "https://admin.example.com")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(
        res.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("https://admin.example.com")
    );
    assert_eq!(
        res.headers()
            .get("access-control-allow-credentials")
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
}

#[tokio::test]
async fn backend_events_flow_into_polled_snapshot() {
    let (url, mut seen) = start_backend(vec![
        json!({ "event": "registrationStatusChanged", "data": { "status": "open" } }),
        json!({ "event": "roundChanged", "data": { "round": 3, "endTime": "2026-10-17T20:00:00Z" } }),
        json!({ "event": "leaderboardUpdate", "data": [{ "team": "a" }, { "team": "b" }] }),
    ])
    .await;
    let state = test_state(&url);
    let live = state.live.clone();
    let snapshot = state.snapshot.clone();

    let (tx, mut updates) = mpsc::unbounded_channel::<GameStateUpdate>();
    live.subscribe_to_game_state(Arc::new(move |u: &GameStateUpdate| {
        let _ = tx.send(u.clone());
    }));

    let conn = live.open();
    assert!(tokio::time::timeout(WAIT, conn.wait_connected()).await.unwrap());
    assert_eq!(next_seen(&mut seen).await["event"], "requestGameState");

    let mut received = Vec::new();
    for _ in 0..3 {
        let update = tokio::time::timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        received.push(update);
    }
    assert_eq!(received[0], GameStateUpdate::Registration { open: true });
    assert_eq!(received[2], GameStateUpdate::ActiveUsers { count: 2 });

    let current = snapshot.current();
    assert_eq!(current.current_round, 3);
    assert_eq!(current.game_status, GameStatus::Running);
    assert_eq!(current.active_users, 2);
    assert!(current.registration_open);

    let app = create_app(state, cors_layer(&[]));
    let req = Request::builder()
        .uri("/api/game-state")
        .body(Body::empty())
        .unwrap();
    let json = body_json(app.clone().oneshot(req).await.unwrap()).await;
    assert_eq!(json["gameStatus"], "In Progress");
    assert_eq!(json["endTime"], "2026-10-17T20:00:00Z");
    assert_eq!(json["stale"], false);

    let req = Request::builder()
        .method("POST")
        .uri("/api/emit")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "event": "submitAnswer", "data": { "answer": "c" } }).to_string(),
        ))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let forwarded = next_seen(&mut seen).await;
    assert_eq!(forwarded, json!({ "event": "submitAnswer", "data": { "answer": "c" } }));

    live.close().await;
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn relay_ws_streams_snapshot_then_patches() {
    let state = test_state("ws://127.0.0.1:9/ws");
    let snapshot = state.snapshot.clone();
    let app = create_app(state, cors_layer(&[]));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    let (mut write, mut read) = stream.split();

    let first = next_json(&mut read).await;
    assert_eq!(first["event"], "snapshot");
    assert_eq!(first["data"]["currentRound"], 0);

    snapshot.apply(&GameStateUpdate::RoundTerminated);
    let update = next_json(&mut read).await;
    assert_eq!(update["event"], "update");
    assert_eq!(
        update["data"],
        json!({ "currentRound": 0, "gameStatus": "Stopped", "endTime": null })
    );

    write
        .send(Message::Text(json!({ "event": "ping" }).to_string().into()))
        .await
        .unwrap();
    let pong = next_json(&mut read).await;
    assert_eq!(pong["event"], "pong");
}
