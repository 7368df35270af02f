//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_PING_INTERVAL_SECS: u64 = 25;
const DEFAULT_PONG_TIMEOUT_SECS: u64 = 20;
const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Application configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g. `0.0.0.0:5001`).
    pub server_addr: SocketAddr,
    /// Allowed browser origins, from the comma separated `FRONTEND_URL`.
    pub allowed_origins: Vec<String>,
    /// Key the REST message layer sends in `x-app-key` when calling `/api/notify`.
    pub app_key: String,
    /// Redis URL for the delivery bridge. `None` keeps delivery in-process.
    pub redis_url: Option<String>,
    /// Redis channel carrying delivery events between instances.
    pub delivery_channel: String,
    pub heartbeat: HeartbeatConfig,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_buffer: usize,
    pub assistant: AssistantConfig,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

/// WebSocket keepalive settings.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Extra grace after a ping before the connection counts as idle.
    pub pong_timeout: Duration,
}

impl HeartbeatConfig {
    /// Longest silence tolerated from a client before it is disconnected.
    pub fn idle_timeout(&self) -> Duration {
        self.ping_interval + self.pong_timeout
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            pong_timeout: Duration::from_secs(DEFAULT_PONG_TIMEOUT_SECS),
        }
    }
}

/// Gemini API settings for the assistant relay.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// API key; the relay answers 503 when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let server_addr = std::env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5001".to_string());
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigLoadError::InvalidServerAddr)?;

        let frontend_url = std::env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:5173".to_string());
        let allowed_origins = parse_origin_list(&frontend_url);
        if allowed_origins.is_empty() {
            return Err(ConfigLoadError::EmptyOriginList);
        }

        let app_key =
            std::env::var("APP_KEY").unwrap_or_else(|_| "chatline_key".to_string());
        let redis_url = std::env::var("REDIS_URL").ok().filter(|u| !u.trim().is_empty());
        let delivery_channel = std::env::var("DELIVERY_CHANNEL")
            .unwrap_or_else(|_| "chatline:deliveries".to_string());

        let heartbeat = HeartbeatConfig {
            ping_interval: Duration::from_secs(env_positive(
                "PING_INTERVAL_SECS",
                DEFAULT_PING_INTERVAL_SECS,
            )?),
            pong_timeout: Duration::from_secs(env_positive(
                "PONG_TIMEOUT_SECS",
                DEFAULT_PONG_TIMEOUT_SECS,
            )?),
        };
        let outbound_buffer = env_positive("OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER as u64)?;

        let defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            api_base: std::env::var("GEMINI_API_BASE").unwrap_or(defaults.api_base),
        };

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server_addr,
            allowed_origins,
            app_key,
            redis_url,
            delivery_channel,
            heartbeat,
            outbound_buffer: outbound_buffer as usize,
            assistant,
            log_level,
        })
    }
}

/// Split a comma separated origin list, dropping blanks and trailing slashes.
pub fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Numeric setting that must be at least 1.
fn env_positive(name: &'static str, default: u64) -> Result<u64, ConfigLoadError> {
    let value = match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(name))?,
        Err(_) => default,
    };
    if value == 0 {
        return Err(ConfigLoadError::InvalidNumber(name));
    }
    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("FRONTEND_URL must name at least one origin")]
    EmptyOriginList,
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
}
