//! Game state: run status, partial patches, per-event updates and the merged snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::event::{RegistrationStatus, ServerEvent};

/// Whether the event is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    #[serde(rename = "In Progress", alias = "running")]
    Running,
    #[serde(rename = "Stopped", alias = "stopped")]
    Stopped,
}

impl GameStatus {
    /// Round 0 or below means no round is being played.
    pub fn for_round(round: i64) -> Self {
        if round > 0 {
            GameStatus::Running
        } else {
            GameStatus::Stopped
        }
    }
}

/// Sparse set of game-state fields. `None` means "not part of this patch".
///
/// `end_time` is doubly optional: `Some(None)` clears the end time and is
/// serialized as an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_status: Option<GameStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_users: Option<usize>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub end_time: Option<Option<DateTime<Utc>>>,
}

/// Marks a field that appeared in the input, even as `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial update derived from one backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum GameStateUpdate {
    /// Generic state update, passed through as sent.
    Snapshot(GameStatePatch),
    Registration { open: bool },
    Round {
        current_round: i64,
        status: GameStatus,
        end_time: Option<DateTime<Utc>>,
    },
    /// Round 0, stopped, end time cleared.
    RoundTerminated,
    ActiveUsers { count: usize },
}

impl GameStateUpdate {
    /// The fields this update sets.
    pub fn to_patch(&self) -> GameStatePatch {
        match self {
            GameStateUpdate::Snapshot(patch) => patch.clone(),
            GameStateUpdate::Registration { open } => GameStatePatch {
                registration_open: Some(*open),
                ..Default::default()
            },
            GameStateUpdate::Round {
                current_round,
                status,
                end_time,
            } => GameStatePatch {
                current_round: Some(*current_round),
                game_status: Some(*status),
                end_time: Some(*end_time),
                ..Default::default()
            },
            GameStateUpdate::RoundTerminated => GameStatePatch {
                current_round: Some(0),
                game_status: Some(GameStatus::Stopped),
                end_time: Some(None),
                ..Default::default()
            },
            GameStateUpdate::ActiveUsers { count } => GameStatePatch {
                active_users: Some(*count),
                ..Default::default()
            },
        }
    }
}

impl From<ServerEvent> for GameStateUpdate {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::GameStateUpdate(patch) => GameStateUpdate::Snapshot(patch),
            ServerEvent::RegistrationStatusChanged(status) => GameStateUpdate::Registration {
                open: status == RegistrationStatus::Open,
            },
            ServerEvent::RoundChanged { round, end_time } => GameStateUpdate::Round {
                current_round: round,
                status: GameStatus::for_round(round),
                end_time,
            },
            ServerEvent::RoundTerminated => GameStateUpdate::RoundTerminated,
            ServerEvent::LeaderboardUpdate { entries } => {
                GameStateUpdate::ActiveUsers { count: entries }
            }
        }
    }
}

/// Merged view of the game, built by applying updates in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub game_status: GameStatus,
    pub registration_open: bool,
    pub current_round: i64,
    pub active_users: usize,
    pub end_time: Option<DateTime<Utc>>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            game_status: GameStatus::Stopped,
            registration_open: false,
            current_round: 0,
            active_users: 0,
            end_time: None,
        }
    }
}

impl GameState {
    pub fn apply(&mut self, update: &GameStateUpdate) {
        self.merge(&update.to_patch());
    }

    pub fn merge(&mut self, patch: &GameStatePatch) {
        if let Some(status) = patch.game_status {
            self.game_status = status;
        }
        if let Some(open) = patch.registration_open {
            self.registration_open = open;
        }
        if let Some(round) = patch.current_round {
            self.current_round = round;
        }
        if let Some(count) = patch.active_users {
            self.active_users = count;
        }
        if let Some(end_time) = patch.end_time {
            self.end_time = end_time;
        }
    }
}
