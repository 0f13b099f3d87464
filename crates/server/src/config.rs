use std::{env, time::Duration};

use services::services::rate_limit::RateLimitConfig;
use thiserror::Error;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 127.0.0.1)
    pub host: String,
    /// Server port (default: 3001)
    pub port: u16,
    /// SQLite database URL (default: sqlite://kanban.db)
    pub database_url: String,
    /// Limit applied to every route (default: 100 requests / 15 minutes)
    pub general_rate_limit: RateLimitConfig,
    /// Additional limit on mutating routes (default: 30 requests / minute)
    pub api_rate_limit: RateLimitConfig,
    /// How often the background sweeper drops expired windows (default: 60s)
    pub rate_limit_cleanup: Duration,
    pub sentry_dsn: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid PORT environment variable")]
    InvalidPort,
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

impl Config {
    /// Load configuration from the environment, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = match lookup("PORT") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidPort)?,
            None => 3001,
        };
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://kanban.db".to_string());

        let general = RateLimitConfig::general();
        let general_rate_limit = RateLimitConfig {
            max_requests: parse_or(&lookup, "RATE_LIMIT_GENERAL_MAX", general.max_requests)?,
            window: Duration::from_secs(parse_or(
                &lookup,
                "RATE_LIMIT_GENERAL_WINDOW_SECS",
                general.window.as_secs(),
            )?),
            ..general
        };

        let api = RateLimitConfig::api();
        let api_rate_limit = RateLimitConfig {
            max_requests: parse_or(&lookup, "RATE_LIMIT_API_MAX", api.max_requests)?,
            window: Duration::from_secs(parse_or(
                &lookup,
                "RATE_LIMIT_API_WINDOW_SECS",
                api.window.as_secs(),
            )?),
            ..api
        };

        let cleanup_secs: u64 = parse_or(&lookup, "RATE_LIMIT_CLEANUP_SECS", 60)?;
        if cleanup_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_CLEANUP_SECS",
                value: "0".to_string(),
            });
        }

        let sentry_dsn = lookup("SENTRY_DSN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Config {
            host,
            port,
            database_url,
            general_rate_limit,
            api_rate_limit,
            rate_limit_cleanup: Duration::from_secs(cleanup_secs),
            sentry_dsn,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}
