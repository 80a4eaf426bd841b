//! Port Interfaces
//!
//! Contracts between the subscription pipeline and the systems around it,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement the driven ports; the trading host implements the rest.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`LiveConnection`]: push-tick connection to the provider
//! - [`HistoricalEndpoint`]: bulk OHLC fetch from the provider
//!
//! ## Host Collaborators
//!
//! - [`HostDiagnostics`]: user-visible error reporting
//! - [`UniverseSourceFactory`]: universe-driven sources
//! - [`UniverseSelection`]: re-selection after universe changes
//!
//! All ports are synchronous. Provider adapters bridge to their async
//! transports internally, so pipeline consumers can pull from plain
//! iterators on blocking threads.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::pipeline::{DataStream, PipelineHook};
use crate::domain::market_data::{ProviderSymbolRef, TickType};
use crate::domain::subscription::{SubscriptionRequest, UniverseChange};
use crate::domain::symbol::ProviderResolution;
use crate::error::FeedResult;

// =============================================================================
// Provider Payloads
// =============================================================================

/// Tick as pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTick {
    /// Provider ticker.
    pub ticker: String,
    /// Provider feed code.
    pub feed_code: String,
    /// Event time.
    pub time: DateTime<Utc>,
    /// Trade or quote.
    pub kind: TickType,
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Traded volume.
    pub volume: Option<Decimal>,
}

/// Zone-naive OHLC record returned by the historical endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOhlcRecord {
    /// Local bar start.
    pub start_time: NaiveDateTime,
    /// Local bar end.
    pub end_time: NaiveDateTime,
    /// Opening price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Volume, absent for some instruments.
    pub volume: Option<Decimal>,
}

/// Bulk OHLC query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OhlcQuery {
    /// Provider ticker.
    pub ticker: String,
    /// Venue filter (always the wildcard).
    pub venue: String,
    /// Provider feed code.
    pub feed_code: String,
    /// Range start.
    pub start_utc: DateTime<Utc>,
    /// Range end.
    pub end_utc: DateTime<Utc>,
    /// Provider resolution code.
    pub resolution: ProviderResolution,
}

impl OhlcQuery {
    /// Query for `reference` over `[start, end]`.
    #[must_use]
    pub fn new(
        reference: &ProviderSymbolRef,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        resolution: ProviderResolution,
    ) -> Self {
        Self {
            ticker: reference.ticker.clone(),
            venue: reference.venue().to_string(),
            feed_code: reference.feed_code.clone(),
            start_utc,
            end_utc,
            resolution,
        }
    }
}

// =============================================================================
// Driven Ports
// =============================================================================

/// Live push connection to the provider.
#[cfg_attr(test, mockall::automock)]
pub trait LiveConnection: Send + Sync {
    /// Open the connection. Idempotent.
    ///
    /// # Errors
    ///
    /// `ProviderUnavailable` if the connection cannot be started.
    fn start(&self) -> FeedResult<()>;

    /// Close the connection. Idempotent.
    fn stop(&self);

    /// Subscribe to provider symbols.
    ///
    /// # Errors
    ///
    /// `ProviderUnavailable` if the instruction cannot be delivered.
    fn subscribe(&self, symbols: &[ProviderSymbolRef]) -> FeedResult<()>;

    /// Unsubscribe from provider symbols.
    ///
    /// # Errors
    ///
    /// `ProviderUnavailable` if the instruction cannot be delivered.
    fn unsubscribe(&self, symbols: &[ProviderSymbolRef]) -> FeedResult<()>;

    /// Take buffered ticks, waiting at most `wait` for the first one.
    ///
    /// # Errors
    ///
    /// `ProviderUnavailable` once the connection is closed for good.
    fn pull_ticks(&self, wait: Duration) -> FeedResult<Vec<ProviderTick>>;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Historical OHLC endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait HistoricalEndpoint: Send + Sync {
    /// Fetch all records for the query, ordered by start time.
    ///
    /// # Errors
    ///
    /// `ProviderUnavailable` on transport or decoding failure.
    fn fetch_ohlc(&self, query: &OhlcQuery) -> FeedResult<Vec<ProviderOhlcRecord>>;
}

// =============================================================================
// Host Collaborators
// =============================================================================

/// User-visible diagnostics sink of the trading host.
#[cfg_attr(test, mockall::automock)]
pub trait HostDiagnostics: Send + Sync {
    /// Report a non-fatal error to the user.
    fn report_error(&self, message: &str);
}

/// Diagnostics sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl HostDiagnostics for TracingDiagnostics {
    fn report_error(&self, message: &str) {
        tracing::error!(message, "Host diagnostic");
    }
}

/// Factory for universe-driven sources owned by the host.
pub trait UniverseSourceFactory: Send + Sync {
    /// Build the stream for `request`.
    ///
    /// Chain factories configure child subscriptions through `hook`, which
    /// runs them through the same enumerator pipeline with aggregation on.
    ///
    /// # Errors
    ///
    /// Any error building the source.
    fn create_stream(
        &self,
        request: Arc<SubscriptionRequest>,
        hook: PipelineHook,
    ) -> FeedResult<DataStream>;
}

/// Host universe-selection subsystem.
#[cfg_attr(test, mockall::automock)]
pub trait UniverseSelection: Send + Sync {
    /// A user-defined universe changed; re-run selection.
    fn on_universe_changed(
        &self,
        universe_id: &str,
        change: &UniverseChange,
        utc_now: DateTime<Utc>,
    );
}

/// Registered universe source factories, one per universe kind.
#[derive(Clone, Default)]
pub struct UniverseSources {
    /// Calendar-driven universes.
    pub time_triggered: Option<Arc<dyn UniverseSourceFactory>>,
    /// Coarse fundamental universes.
    pub coarse_fundamental: Option<Arc<dyn UniverseSourceFactory>>,
    /// Option chains.
    pub option_chain: Option<Arc<dyn UniverseSourceFactory>>,
    /// Futures chains.
    pub futures_chain: Option<Arc<dyn UniverseSourceFactory>>,
}

impl std::fmt::Debug for UniverseSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniverseSources")
            .field("time_triggered", &self.time_triggered.is_some())
            .field("coarse_fundamental", &self.coarse_fundamental.is_some())
            .field("option_chain", &self.option_chain.is_some())
            .field("futures_chain", &self.futures_chain.is_some())
            .finish()
    }
}
