//! Configuration sections.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::calendar::{HoursPreset, MarketHoursDatabase};
use crate::domain::market_data::{Resolution, Symbol, TickType};
use crate::domain::subscription::SubscriptionRequest;

// =============================================================================
// Provider
// =============================================================================

/// Qrawler provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrawlerSettings {
    /// Live WebSocket URL.
    pub url_live: String,
    /// Historical HTTP base URL.
    pub url_historical: String,
    /// Exchange qualifier to provider feed code.
    #[serde(default)]
    pub feed_map: BTreeMap<String, String>,
    /// IANA zone of provider timestamps; defaults to each exchange's zone.
    #[serde(default)]
    pub data_time_zone: Option<String>,
    /// Trading hours per exchange qualifier.
    #[serde(default)]
    pub exchange_hours: BTreeMap<String, HoursPreset>,
    /// Historical request timeout in milliseconds (0 = none).
    #[serde(default)]
    pub historical_timeout_ms: u64,
}

impl QrawlerSettings {
    /// Market hours lookup built from the configured presets.
    #[must_use]
    pub fn market_hours(&self) -> MarketHoursDatabase {
        self.exchange_hours
            .iter()
            .fold(MarketHoursDatabase::new(), |db, (exchange, preset)| {
                db.with_exchange(exchange.clone(), preset.hours())
            })
    }

    /// Historical request timeout, if any.
    #[must_use]
    pub const fn historical_timeout(&self) -> Option<Duration> {
        match self.historical_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

// =============================================================================
// Live
// =============================================================================

/// Reconnection backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter fraction.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
            max_attempts: 0,
        }
    }
}

/// Live stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    /// How long a tick pull waits before re-checking cancellation.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Ticks buffered client-side before the oldest are dropped.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Ticks queued per live subscription before the oldest are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Reconnection backoff.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            buffer_capacity: default_buffer_capacity(),
            queue_capacity: default_queue_capacity(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl LiveSettings {
    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Health and metrics port.
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: default_health_port(),
        }
    }
}

// =============================================================================
// Startup Subscriptions
// =============================================================================

/// Subscription opened by the binary at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Host symbol, `exchange:ticker`.
    pub symbol: String,
    /// Requested resolution.
    pub resolution: Resolution,
    /// Tick type at tick resolution.
    #[serde(default)]
    pub tick_type: TickType,
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Inclusive end; omitted for live.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Synthesize bars for empty slots.
    #[serde(default = "default_true")]
    pub fill_forward: bool,
    /// Treat extended sessions as open.
    #[serde(default)]
    pub extended_market_hours: bool,
}

impl SubscriptionSettings {
    /// Build the request, resolving exchange hours from `hours`.
    #[must_use]
    pub fn to_request(
        &self,
        hours: &MarketHoursDatabase,
        data_time_zone: Option<chrono_tz::Tz>,
    ) -> SubscriptionRequest {
        let symbol = Symbol::from_value(self.symbol.as_str());
        let exchange_hours = symbol
            .parts()
            .map_or_else(|| hours.hours(""), |(exchange, _)| hours.hours(exchange));
        let request = SubscriptionRequest::new(
            symbol,
            self.resolution,
            self.start,
            self.end,
            exchange_hours,
        )
        .with_tick_type(self.tick_type)
        .with_fill_forward(self.fill_forward)
        .with_extended_market_hours(self.extended_market_hours);

        match data_time_zone {
            Some(tz) => request.with_data_time_zone(tz),
            None => request,
        }
    }
}

// =============================================================================
// Defaults
// =============================================================================

const fn default_initial_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter_factor() -> f64 {
    0.1
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_buffer_capacity() -> usize {
    crate::infrastructure::qrawler::DEFAULT_BUFFER_CAPACITY
}

const fn default_queue_capacity() -> usize {
    crate::application::services::DEFAULT_QUEUE_CAPACITY
}

const fn default_health_port() -> u16 {
    8086
}

const fn default_true() -> bool {
    true
}
