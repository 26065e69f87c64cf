//! Runtime configuration from environment variables
//!
//! Everything is read once at startup. A malformed value or a failed range
//! check is the one fatal error class in the system: nothing is spawned
//! until the configuration is known good.

use std::env;
use std::time::Duration;

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Configuration loaded from environment variables
///
/// Environment variables:
/// - `COMPETITIONS` (comma-separated league names, required)
/// - `LOOKBACK_HOURS` (default: 1)
/// - `POLLING_INTERVAL` (seconds, default: 30)
/// - `DELAY_MIN` / `DELAY_MAX` (interaction jitter seconds, default: 0.5/1.5)
/// - `DATA_DIR` (default: data)
/// - `FEED_URL` (default: the public results feed)
/// - `WEBDRIVER_URL` (default: http://localhost:4444)
/// - `SOURCE_USERNAME` / `SOURCE_PASSWORD` (optional upstream credentials)
#[derive(Debug, Clone)]
pub struct Config {
    pub competitions: Vec<String>,
    pub lookback_hours: u32,
    pub poll_interval: Duration,
    pub delay_min: f64,
    pub delay_max: f64,
    pub data_dir: String,
    pub feed_url: String,
    pub webdriver_url: String,
    pub source_username: Option<String>,
    pub source_password: Option<String>,
}

impl Config {
    /// Load and validate configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let competitions: Vec<String> = env::var("COMPETITIONS")
            .unwrap_or_default()
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        let config = Self {
            competitions,
            lookback_hours: parse_var("LOOKBACK_HOURS", 1)?,
            poll_interval: Duration::from_secs(parse_var("POLLING_INTERVAL", 30)?),
            delay_min: parse_var("DELAY_MIN", 0.5)?,
            delay_max: parse_var("DELAY_MAX", 1.5)?,
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            feed_url: env::var("FEED_URL")
                .unwrap_or_else(|_| "https://feed.example.com/results".to_string()),
            webdriver_url: env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".to_string()),
            source_username: env::var("SOURCE_USERNAME").ok(),
            source_password: env::var("SOURCE_PASSWORD").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.competitions.is_empty() {
            return Err(ConfigError(
                "COMPETITIONS must list at least one league".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError("POLLING_INTERVAL must be > 0".to_string()));
        }
        if self.delay_min < 0.0 {
            return Err(ConfigError("DELAY_MIN must be >= 0".to_string()));
        }
        if self.delay_max < self.delay_min {
            return Err(ConfigError("DELAY_MAX must be >= DELAY_MIN".to_string()));
        }
        Ok(())
    }
}

/// Strict parse with a default for unset variables
///
/// A variable that is set but unparseable is a hard error, not a silent
/// fallback to the default.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError(format!("{} has unparseable value {:?}", name, raw))),
    }
}
