//! Live connection management and the merged snapshot built on top of it.

pub mod live_state;
pub mod snapshot;

pub use live_state::{Connection, EventCallback, GameStateCallback, LiveState};
pub use snapshot::SnapshotStore;
