// Relay server configuration.
//
// Every setting comes from a `DUET_RELAY_*` environment variable with a
// default suited to local development.

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Period of the liveness sweep. A connection that misses one full
    /// period without answering a ping is terminated on the next sweep.
    pub heartbeat_interval: Duration,
    /// Largest inbound WebSocket message the relay accepts.
    pub max_frame_bytes: usize,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `duet_relay=debug`).
    pub log_filter: String,
    /// Emit logs as JSON lines instead of the human-readable format.
    pub log_json: bool,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `DUET_RELAY_HOST` | `0.0.0.0` |
    /// | `DUET_RELAY_PORT` | `1234` |
    /// | `DUET_RELAY_HEARTBEAT_INTERVAL_MS` | `30000` |
    /// | `DUET_RELAY_MAX_FRAME_BYTES` | `1048576` |
    /// | `DUET_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `DUET_RELAY_LOG_FILTER` | `info` |
    /// | `DUET_RELAY_LOG_JSON` | `false` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub(crate) fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("DUET_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("DUET_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        // Zero would make the sweep spin, so it falls back to the default.
        let heartbeat_ms = env("DUET_RELAY_HEARTBEAT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);

        let max_frame_bytes = env("DUET_RELAY_MAX_FRAME_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|bytes| *bytes > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);

        let cors_origins = env("DUET_RELAY_CORS_ORIGINS").ok();

        let log_filter = env("DUET_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = env("DUET_RELAY_LOG_JSON")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            listen_addr,
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            max_frame_bytes,
            cors_origins,
            log_filter,
            log_json,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_env_fn(|_| Err(std::env::VarError::NotPresent))
    }
}
