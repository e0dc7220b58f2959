use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
}

/// Push notification settings
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Appears in the notification title: "New Message in <relay_name>"
    pub relay_name: String,
    pub icon: String,
    /// Best-effort bound on a single endpoint delivery
    pub timeout: Duration,
    pub ttl_seconds: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            relay_name: "Chat Relay".to_string(),
            icon: "/icon.png".to_string(),
            timeout: Duration::from_millis(5000),
            ttl_seconds: 86_400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// `None` runs the relay on the in-memory message store
    pub database: Option<DatabaseConfig>,
    pub history_limit: usize,
    pub cors_allowed_origins: Vec<String>,
    pub push: PushConfig,
    pub websocket: WebSocketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            database: None,
            history_limit: 50,
            cors_allowed_origins: vec!["*".to_string()],
            push: PushConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

impl Config {
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
        match env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} has invalid value {raw:?}"))),
            Err(_) => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let defaults = Self::default();

        let port = Self::parse_var("PORT", defaults.port)?;

        let database = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url,
                max_connections: Self::parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            }),
            _ => None,
        };

        let history_limit = Self::parse_var("HISTORY_LIMIT", defaults.history_limit)?;
        if history_limit == 0 {
            return Err(AppError::Config("HISTORY_LIMIT must be positive".into()));
        }

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| Self::parse_list(&v))
            .ok()
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.cors_allowed_origins);

        let push = PushConfig {
            relay_name: env::var("RELAY_NAME").unwrap_or(defaults.push.relay_name),
            icon: env::var("NOTIFICATION_ICON").unwrap_or(defaults.push.icon),
            timeout: Duration::from_millis(Self::parse_var("PUSH_TIMEOUT_MS", 5000u64)?),
            ttl_seconds: Self::parse_var("PUSH_TTL_SECONDS", defaults.push.ttl_seconds)?,
        };

        let websocket = WebSocketConfig {
            heartbeat_interval: Duration::from_secs(Self::parse_var(
                "WS_HEARTBEAT_INTERVAL_SECS",
                5u64,
            )?),
            client_timeout: Duration::from_secs(Self::parse_var("WS_CLIENT_TIMEOUT_SECS", 30u64)?),
        };

        Ok(Self {
            port,
            database,
            history_limit,
            cors_allowed_origins,
            push,
            websocket,
        })
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_allowed_origins.iter().any(|o| o == "*")
    }
}
