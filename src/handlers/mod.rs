//! HTTP and WebSocket request handlers for the relay.

pub mod http;
pub mod ws;

pub use http::*;
pub use ws::*;
