#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Qrawler Feed - Market Data Subscription Pipeline
//!
//! Turns subscription requests into uniform, lazily pulled streams of bars
//! and ticks sourced from the Qrawler provider.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Values and rules with no I/O
//!   - `market_data`: Symbols, resolutions, bars, ticks
//!   - `calendar`: Exchange hours and time zone offsets
//!   - `symbol`: Feed map and symbol translation
//!   - `subscription`: Requests, universes, live symbol sharing
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Provider and host collaborator interfaces
//!   - `sources`: Historical streamer, live tick source, tick routing
//!   - `pipeline`: Aggregation, fill-forward, filtering, cancellation
//!   - `services`: Source selection and the `DataFeed` lifecycle
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `qrawler`: WebSocket live client and HTTP historical client
//!   - `config`: YAML configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐
//! Historical HTTP ──►│  Historical  │──┐
//!                    │   Streamer   │  │   ┌────────────────────────────┐
//!                    └──────────────┘  ├──►│ FillForward → Filter →     │──► Subscription
//!                    ┌──────────────┐  │   │ CancellationGuard          │
//! Live WebSocket ───►│ TickRouter   │──┘   └────────────────────────────┘
//!                    └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types shared by every layer.
pub mod error;

/// Domain layer - Market data values with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Errors
pub use error::{ErrorCode, FeedError, FeedResult};

// Domain types
pub use domain::calendar::{ExchangeHours, MarketHoursDatabase, TimeZoneOffsetProvider};
pub use domain::market_data::{
    Bar, DataCollection, DataPoint, DataType, ProviderSymbolRef, QuoteBar, Resolution, Symbol,
    Tick, TickType,
};
pub use domain::subscription::{
    SubscriptionId, SubscriptionRequest, UniverseChange, UniverseKind, UserDefinedUniverse,
};
pub use domain::symbol::{FeedMap, ProviderResolution, SymbolTranslator};

// Application services
pub use application::pipeline::{DataStream, EnumeratorPipeline, PipelineHook};
pub use application::services::{
    DataFeed, FeedCollaborators, SourceStrategy, Subscription, select_strategy,
};

// Infrastructure config
pub use infrastructure::config::{Config, ConfigError, load_config};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Provider adapters
pub use infrastructure::qrawler::{
    HistoricalClientConfig, LiveClientConfig, QrawlerHistoricalClient, QrawlerLiveClient,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
