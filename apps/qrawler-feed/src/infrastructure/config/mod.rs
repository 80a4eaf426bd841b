//! Configuration Module
//!
//! YAML configuration with environment variable interpolation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use qrawler_feed::infrastructure::config::load_config;
//!
//! // Path from QRAWLER_CONFIG, falling back to config.yaml
//! let config = load_config(None)?;
//! let feed_map = config.feed_map()?;
//! ```

mod settings;

use std::sync::OnceLock;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::symbol::FeedMap;

pub use settings::{
    LiveSettings, QrawlerSettings, ReconnectSettings, ServerSettings, SubscriptionSettings,
};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "QRAWLER_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider endpoints and symbol mapping.
    pub qrawler: QrawlerSettings,
    /// Live stream settings.
    #[serde(default)]
    pub live: LiveSettings,
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSettings,
    /// Subscriptions opened at startup.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSettings>,
}

impl Config {
    /// Validated feed map.
    ///
    /// # Errors
    ///
    /// `ValidationError` when two exchanges share a feed code.
    pub fn feed_map(&self) -> Result<FeedMap, ConfigError> {
        FeedMap::new(self.qrawler.feed_map.clone())
            .map_err(|e| ConfigError::ValidationError(format!("qrawler.feed_map: {e}")))
    }

    /// Configured data time zone override.
    ///
    /// # Errors
    ///
    /// `ValidationError` when the name is not an IANA zone.
    pub fn data_time_zone(&self) -> Result<Option<Tz>, ConfigError> {
        self.qrawler
            .data_time_zone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>().map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "qrawler.data_time_zone: unknown time zone '{name}'"
                    ))
                })
            })
            .transpose()
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// The path defaults to `$QRAWLER_CONFIG`, then `config.yaml`.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(
        || std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
        str::to_string,
    );

    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadError {
        path: path.clone(),
        source,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Replace `${VAR}` and `${VAR:-default}` with environment values.
///
/// Unset or empty variables without a default become empty strings.
#[allow(clippy::expect_used)] // Regex is a compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let default = caps.get(2).map_or("", |m| m.as_str());
        match std::env::var(&caps[1]) {
            Ok(value) if !value.is_empty() => value,
            _ => default.to_string(),
        }
    })
    .into_owned()
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let qrawler = &config.qrawler;

    if qrawler.url_live.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "qrawler.url_live must not be empty".to_string(),
        ));
    }

    if qrawler.url_historical.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "qrawler.url_historical must not be empty".to_string(),
        ));
    }

    config.feed_map()?;
    config.data_time_zone()?;

    if config.live.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "live.poll_interval_ms must be positive".to_string(),
        ));
    }

    if config.live.buffer_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "live.buffer_capacity must be positive".to_string(),
        ));
    }

    if config.live.queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "live.queue_capacity must be positive".to_string(),
        ));
    }

    let reconnect = &config.live.reconnect;
    if reconnect.multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "live.reconnect.multiplier must be at least 1.0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&reconnect.jitter_factor) {
        return Err(ConfigError::ValidationError(
            "live.reconnect.jitter_factor must be between 0.0 and 1.0".to_string(),
        ));
    }

    if reconnect.initial_delay_ms > reconnect.max_delay_ms {
        return Err(ConfigError::ValidationError(
            "live.reconnect.initial_delay_ms must not exceed max_delay_ms".to_string(),
        ));
    }

    for (index, subscription) in config.subscriptions.iter().enumerate() {
        if let Some(end) = subscription.end
            && end < subscription.start
        {
            return Err(ConfigError::ValidationError(format!(
                "subscriptions[{index}]: end precedes start"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::domain::market_data::Resolution;

    const MINIMAL: &str = r"
qrawler:
  url_live: ws://localhost:9000/stream
  url_historical: http://localhost:9000
  feed_map:
    NYSE: XNYS
    NASDAQ: XNAS
";

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = load_config_from_string(MINIMAL).unwrap();
        assert_eq!(config.live.poll_interval_ms, 250);
        assert_eq!(config.live.queue_capacity, 10_000);
        assert_eq!(config.server.health_port, 8086);
        assert!(config.subscriptions.is_empty());
        assert_eq!(config.data_time_zone().unwrap(), None);

        let feed_map = config.feed_map().unwrap();
        assert_eq!(feed_map.feed_code("NYSE"), Some("XNYS"));
        assert_eq!(feed_map.exchange("XNAS"), Some("NASDAQ"));
    }

    #[test]
    fn full_config_parses_subscriptions() {
        let yaml = format!(
            r#"{MINIMAL}
  data_time_zone: America/New_York
  exchange_hours:
    NYSE: us_equity
live:
  poll_interval_ms: 100
  reconnect:
    max_attempts: 3
server:
  health_port: 9999
subscriptions:
  - symbol: "NYSE:IBM"
    resolution: minute
    start: "2024-01-02T14:30:00Z"
    end: "2024-01-02T21:00:00Z"
  - symbol: "NASDAQ:AAPL"
    resolution: tick
    start: "2024-01-02T14:30:00Z"
"#
        );
        let config = load_config_from_string(&yaml).unwrap();
        assert_eq!(config.live.reconnect.max_attempts, 3);
        assert_eq!(config.live.reconnect.initial_delay_ms, 500);
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(config.subscriptions[1].resolution, Resolution::Tick);
        assert!(config.subscriptions[0].fill_forward);

        let tz = config.data_time_zone().unwrap();
        let request = config.subscriptions[0].to_request(&config.qrawler.market_hours(), tz);
        assert_eq!(request.exchange_hours.timezone, chrono_tz::America::New_York);
        assert!(!request.is_live());
        assert!(config.subscriptions[1].to_request(&config.qrawler.market_hours(), tz).is_live());
    }

    #[test]
    fn ambiguous_feed_map_is_rejected() {
        let yaml = r"
qrawler:
  url_live: ws://x
  url_historical: http://x
  feed_map:
    NYSE: XNYS
    ARCA: XNYS
";
        let err = load_config_from_string(yaml).unwrap_err();
        assert!(err.to_string().contains("feed_map"), "{err}");
    }

    #[test]
    fn unknown_time_zone_is_rejected() {
        let yaml = format!("{MINIMAL}  data_time_zone: Mars/Olympus\n");
        assert!(matches!(
            load_config_from_string(&yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn unknown_resolution_fails_to_parse() {
        let yaml = format!(
            "{MINIMAL}subscriptions:\n  - symbol: \"NYSE:IBM\"\n    resolution: fortnight\n    start: \"2024-01-02T14:30:00Z\"\n"
        );
        assert!(matches!(
            load_config_from_string(&yaml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn empty_live_url_is_rejected() {
        let yaml = MINIMAL.replace("ws://localhost:9000/stream", "\"\"");
        assert!(matches!(
            load_config_from_string(&yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let yaml = format!("{MINIMAL}live:\n  queue_capacity: 0\n");
        assert!(matches!(
            load_config_from_string(&yaml),
            Err(ConfigError::ValidationError(message)) if message.contains("queue_capacity")
        ));
    }

    #[test]
    fn env_var_with_default_when_missing() {
        let input = "url: ${QRAWLER_CONFIG_TEST_NONEXISTENT_VAR:-ws://fallback}";
        assert_eq!(interpolate_env_vars(input), "url: ws://fallback");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)]
    fn env_var_with_default_uses_existing() {
        let result = interpolate_env_vars("path: ${PATH:-default}");
        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }

    #[test]
    fn env_var_without_default_becomes_empty() {
        let input = "url: ${QRAWLER_CONFIG_TEST_UNLIKELY_TO_EXIST}";
        assert_eq!(interpolate_env_vars(input), "url: ");
    }

    #[test]
    fn load_reads_file_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap();

        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.qrawler.url_historical, "http://localhost:9000");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Some("/nonexistent/qrawler.yaml")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ReadError { ref path, .. } if path == "/nonexistent/qrawler.yaml"
        ));
    }
}
