//! Data models for push-channel frames and game state.

pub mod event;
pub mod game_state;

pub use event::*;
pub use game_state::*;
