//! Upstream push-channel transport: one text-frame connection at a time.

pub mod ws;

pub use ws::{WsConnector, WsTransport};

use async_trait::async_trait;

use crate::error::AppResult;

/// A connected, bidirectional text-frame channel.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> AppResult<()>;

    /// Next text frame. `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<AppResult<String>>;

    async fn close(&mut self) -> AppResult<()>;
}

/// Opens fresh transports; called again on every reconnection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> AppResult<Box<dyn Transport>>;
}
