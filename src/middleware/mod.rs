//! Middleware for the relay router.

pub mod cors;

pub use cors::cors_layer;
