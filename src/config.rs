use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Runtime configuration, read from the environment at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// PostgreSQL connection string; in-memory stores are used when absent
    pub database_url: Option<String>,
    /// Per-sender message count that closes a direct chat
    pub closure_threshold: u32,
    /// Maximum message length, in characters
    pub max_message_length: usize,
    /// How long a connection may stay silent before it is reclaimed
    pub idle_timeout: Duration,
    pub jwt_secret: String,
    pub cors_allow_origin: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5001".to_string(),
            database_url: None,
            closure_threshold: 5,
            max_message_length: 2000,
            idle_timeout: Duration::from_secs(5 * 60),
            jwt_secret: "your-secret-key-change-in-production".to_string(),
            cors_allow_origin: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            closure_threshold: parse_var("CLOSURE_THRESHOLD", defaults.closure_threshold),
            max_message_length: parse_var("MAX_MESSAGE_LENGTH", defaults.max_message_length),
            idle_timeout: Duration::from_secs(parse_var(
                "IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            cors_allow_origin: std::env::var("CORS_ALLOW_ORIGIN").ok(),
        };

        debug!(
            bind_addr = %config.bind_addr,
            persistent = config.database_url.is_some(),
            closure_threshold = config.closure_threshold,
            max_message_length = config.max_message_length,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Loaded configuration"
        );

        config
    }

    /// Overrides the closure threshold, mostly for tests
    pub fn with_closure_threshold(mut self, threshold: u32) -> Self {
        self.closure_threshold = threshold;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }
}

fn parse_var<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
