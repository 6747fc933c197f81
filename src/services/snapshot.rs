//! Merged game-state snapshot: applies partial updates in arrival order and
//! re-broadcasts them to local listeners.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::game_state::{GameState, GameStatePatch, GameStateUpdate};
use crate::services::live_state::{GameStateCallback, LiveState};

#[derive(Debug, Default)]
struct Tracked {
    state: GameState,
    last_update_at: Option<DateTime<Utc>>,
}

/// Holds the current merged [`GameState`] for pollers and streams each patch to subscribers.
#[derive(Clone)]
pub struct SnapshotStore {
    tracked: Arc<RwLock<Tracked>>,
    updates: broadcast::Sender<GameStatePatch>,
}

impl SnapshotStore {
    pub fn new(capacity: usize) -> Self {
        let (updates, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tracked: Arc::new(RwLock::new(Tracked::default())),
            updates,
        }
    }

    /// Subscribe this store to `live`. Returns the registered callback so it can be detached.
    pub fn attach(&self, live: &LiveState) -> GameStateCallback {
        let store = self.clone();
        let callback: GameStateCallback = Arc::new(move |update: &GameStateUpdate| {
            store.apply(update);
        });
        live.subscribe_to_game_state(Arc::clone(&callback));
        callback
    }

    pub fn apply(&self, update: &GameStateUpdate) {
        let patch = update.to_patch();
        {
            let mut tracked = self.tracked.write().unwrap_or_else(PoisonError::into_inner);
            tracked.state.merge(&patch);
            tracked.last_update_at = Some(Utc::now());
        }
        if self.updates.send(patch).is_err() {
            debug!("no local listeners for game-state update");
        }
    }

    pub fn current(&self) -> GameState {
        self.tracked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    pub fn last_update_at(&self) -> Option<DateTime<Utc>> {
        self.tracked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_update_at
    }

    /// True when nothing has arrived within `max_age`, or nothing has arrived at all.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.last_update_at() {
            Some(at) => (Utc::now() - at)
                .to_std()
                .map_or(false, |age| age > max_age),
            None => true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameStatePatch> {
        self.updates.subscribe()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(64)
    }
}
