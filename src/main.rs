//! Entry point: load config, open the upstream connection, and serve the relay.

use std::sync::Arc;

use livestate::config::Config;
use livestate::middleware::cors_layer;
use livestate::transport::WsConnector;
use livestate::{create_app, AppState, LiveState, SnapshotStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let connector = Arc::new(WsConnector::new(config.transport.url.clone()));
    let live = LiveState::new(connector, config.transport.clone());
    let snapshot = SnapshotStore::default();
    snapshot.attach(&live);
    live.open();

    let state = AppState {
        live: live.clone(),
        snapshot,
        stale_after: config.stale_after,
    };
    let app = create_app(state, cors_layer(&config.cors_origins));

    tracing::info!(addr = %config.server_addr, upstream = %config.transport.url, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    live.close().await;
    Ok(())
}
