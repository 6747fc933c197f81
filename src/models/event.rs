//! Wire frames exchanged with the backend push channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::game_state::GameStatePatch;

/// Event names used on the push channel.
pub mod names {
    /// Sent upstream right after every connect.
    pub const REQUEST_GAME_STATE: &str = "requestGameState";

    pub const GAME_STATE_UPDATE: &str = "gameStateUpdate";
    pub const REGISTRATION_STATUS_CHANGED: &str = "registrationStatusChanged";
    pub const ROUND_CHANGED: &str = "roundChanged";
    pub const ROUND_TERMINATED: &str = "roundTerminated";
    pub const LEADERBOARD_UPDATE: &str = "leaderboardUpdate";

    /// Reserved local events dispatched to raw subscribers on connection changes.
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
}

/// One text frame on the push channel: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Envelope with no payload.
    pub fn signal(event: impl Into<String>) -> Self {
        Self::new(event, serde_json::Value::Null)
    }
}

/// Registration state announced by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Open,
    Closed,
}

impl RegistrationStatus {
    /// Anything other than `"open"` counts as closed.
    pub fn from_wire(s: &str) -> Self {
        if s.eq_ignore_ascii_case("open") {
            RegistrationStatus::Open
        } else {
            RegistrationStatus::Closed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoundChangedPayload {
    #[serde(alias = "currentRound", alias = "roundNumber")]
    round: i64,
    #[serde(default)]
    end_time: serde_json::Value,
}

/// RFC 3339 string or epoch milliseconds. Anything else is treated as absent.
fn parse_end_time(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    let parsed = match raw {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    };
    if parsed.is_none() {
        warn!(end_time = %raw, "unrecognized round end time, treating as absent");
    }
    parsed
}

/// Closed set of backend events this crate interprets, validated at decode time.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    GameStateUpdate(GameStatePatch),
    RegistrationStatusChanged(RegistrationStatus),
    RoundChanged {
        round: i64,
        end_time: Option<DateTime<Utc>>,
    },
    RoundTerminated,
    /// Leaderboard entry count. Non-list payloads count as zero.
    LeaderboardUpdate { entries: usize },
}

impl ServerEvent {
    /// Interpret an envelope. `Ok(None)` for event names outside the known set.
    pub fn decode(envelope: &Envelope) -> Result<Option<Self>, serde_json::Error> {
        let data = &envelope.data;
        let event = match envelope.event.as_str() {
            names::GAME_STATE_UPDATE => {
                let patch = if data.is_null() {
                    GameStatePatch::default()
                } else {
                    GameStatePatch::deserialize(data)?
                };
                ServerEvent::GameStateUpdate(patch)
            }
            names::REGISTRATION_STATUS_CHANGED => {
                let status = data
                    .get("status")
                    .and_then(|v| v.as_str())
                    .or_else(|| data.as_str())
                    .map(RegistrationStatus::from_wire)
                    .unwrap_or(RegistrationStatus::Closed);
                ServerEvent::RegistrationStatusChanged(status)
            }
            names::ROUND_CHANGED => {
                let payload = RoundChangedPayload::deserialize(data)?;
                ServerEvent::RoundChanged {
                    round: payload.round,
                    end_time: parse_end_time(&payload.end_time),
                }
            }
            names::ROUND_TERMINATED => ServerEvent::RoundTerminated,
            names::LEADERBOARD_UPDATE => ServerEvent::LeaderboardUpdate {
                entries: data.as_array().map_or(0, |list| list.len()),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
