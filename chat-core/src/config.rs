use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Allowed CORS origins. `None` means permissive.
    pub cors_origins: Option<Vec<String>>,
    pub environment: String,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_proxy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub connection_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub max_connections_per_user: usize,
    /// Check `join_conversation` against the participant list.
    pub enforce_membership: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3001,
                jwt_secret: "your-secret-key-change-in-production".to_string(),
                cors_origins: None,
                environment: "development".to_string(),
                trust_proxy: false,
            },
            websocket: WebSocketConfig {
                connection_timeout_ms: 60_000,
                heartbeat_interval_ms: 25_000,
                max_connections_per_user: 5,
                enforce_membership: false,
            },
            rate_limit: RateLimitConfig {
                window_ms: 15 * 60 * 1000,
                max_requests: 1000,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source, falling back to the
    /// defaults for anything missing or unparseable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or(defaults.server.host),
                port: parse_or(&lookup, "PORT", defaults.server.port),
                jwt_secret: lookup("JWT_SECRET").unwrap_or(defaults.server.jwt_secret),
                cors_origins: lookup("CORS_ORIGIN").map(|origins| parse_origins(&origins)),
                environment: lookup("NODE_ENV").unwrap_or(defaults.server.environment),
                trust_proxy: parse_or(&lookup, "TRUST_PROXY", defaults.server.trust_proxy),
            },
            websocket: WebSocketConfig {
                connection_timeout_ms: parse_nonzero_or(
                    &lookup,
                    "WS_CONNECTION_TIMEOUT",
                    defaults.websocket.connection_timeout_ms,
                ),
                heartbeat_interval_ms: parse_nonzero_or(
                    &lookup,
                    "WS_HEARTBEAT_INTERVAL",
                    defaults.websocket.heartbeat_interval_ms,
                ),
                max_connections_per_user: parse_or(
                    &lookup,
                    "WS_MAX_CONNECTIONS_PER_USER",
                    defaults.websocket.max_connections_per_user,
                ),
                enforce_membership: parse_or(
                    &lookup,
                    "WS_ENFORCE_MEMBERSHIP",
                    defaults.websocket.enforce_membership,
                ),
            },
            rate_limit: RateLimitConfig {
                window_ms: parse_or(&lookup, "RATE_LIMIT_WINDOW_MS", defaults.rate_limit.window_ms),
                max_requests: parse_or(
                    &lookup,
                    "RATE_LIMIT_MAX_REQUESTS",
                    defaults.rate_limit.max_requests,
                ),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.server.environment == "production"
    }
}

impl WebSocketConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring unparseable value for {}: {:?}", key, raw);
                default
            }
        },
        None => default,
    }
}

/// Like `parse_or`, but zero is refused. Zero periods panic `tokio::time::interval`
/// and time out every socket on its first read.
fn parse_nonzero_or<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default) {
        0 => {
            tracing::warn!("Ignoring zero value for {}", key);
            default
        }
        value => value,
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
