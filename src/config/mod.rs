//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay bind address (e.g. `0.0.0.0:3000`).
    pub server_addr: SocketAddr,
    /// Upstream push channel settings.
    pub transport: TransportConfig,
    /// Origins allowed to call the relay. Empty means any origin.
    pub cors_origins: Vec<String>,
    /// A snapshot with no update for this long is reported as stale.
    pub stale_after: Duration,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

/// Settings for the single upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// WebSocket address of the backend push channel (`ws://` or `wss://`).
    pub url: String,
    /// Consecutive failed connection attempts tolerated before giving up.
    pub reconnect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub reconnect_delay: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }

    pub fn with_reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_delay = delay;
        self
    }
}

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let server_addr = std::env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigLoadError::InvalidServerAddr)?;

        let url = std::env::var("SOCKET_URL")
            .unwrap_or_else(|_| "ws://127.0.0.1:4000/ws".to_string());
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigLoadError::InvalidSocketUrl(url));
        }

        let reconnect_attempts = parse_var("RECONNECT_ATTEMPTS", DEFAULT_RECONNECT_ATTEMPTS)?;
        let reconnect_delay_ms = parse_var("RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)?;
        let stale_after_secs = parse_var("STALE_AFTER_SECS", 30u64)?;

        let cors_origins = parse_origins(
            &std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()),
        );
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server_addr,
            transport: TransportConfig {
                url,
                reconnect_attempts,
                reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            },
            cors_origins,
            stale_after: Duration::from_secs(stale_after_secs),
            log_level,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigLoadError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated origin list. `*` anywhere means any origin.
pub(crate) fn parse_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if origins.iter().any(|o| o == "*") {
        Vec::new()
    } else {
        origins
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("SOCKET_URL must start with ws:// or wss://, got {0}")]
    InvalidSocketUrl(String),
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
}
