use std::time::Duration;

use thiserror::Error;

use crate::polling::PollerSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Forum platform
    pub forum_base_url: String,
    pub forum_api_token: Option<String>,
    pub http_timeout: Duration,

    // Games to watch (binary only; library callers register games directly)
    pub game_post_ids: Vec<String>,

    // Polling
    pub poll_interval: Duration,
    pub max_poll_backoff: Duration,
    pub max_consecutive_errors: u32,
    pub update_channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Forum platform
            forum_base_url: required_env("FORUM_BASE_URL")?,
            forum_api_token: optional_env("FORUM_API_TOKEN"),
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),

            // Games
            game_post_ids: parse_id_list(&env_or_default("GAME_POST_IDS", "")),

            // Polling
            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 5)?),
            max_poll_backoff: Duration::from_secs(parse_env_u64("MAX_POLL_BACKOFF_SECS", 300)?),
            max_consecutive_errors: parse_env_u32("MAX_CONSECUTIVE_ERRORS", 3)?,
            update_channel_capacity: parse_env_usize("UPDATE_CHANNEL_CAPACITY", 64)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forum_base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if url::Url::parse(&self.forum_base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_BASE_URL".to_string(),
                message: "must be a valid URL".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "POLL_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_consecutive_errors == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_CONSECUTIVE_ERRORS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.update_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "UPDATE_CHANNEL_CAPACITY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Polling engine settings derived from this configuration.
    #[must_use]
    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            base_interval: self.poll_interval,
            max_backoff: self.max_poll_backoff,
            max_consecutive_errors: self.max_consecutive_errors,
            channel_capacity: self.update_channel_capacity,
        }
    }

    /// A configuration suitable for tests: no environment access, local
    /// endpoints, short intervals.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            forum_base_url: "http://127.0.0.1:0".to_string(),
            forum_api_token: None,
            http_timeout: Duration::from_secs(5),
            game_post_ids: Vec::new(),
            poll_interval: Duration::from_millis(20),
            max_poll_backoff: Duration::from_millis(100),
            max_consecutive_errors: 3,
            update_channel_capacity: 16,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
