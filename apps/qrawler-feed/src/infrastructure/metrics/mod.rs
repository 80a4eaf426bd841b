//! Feed Metrics
//!
//! Counters, gauges and histograms recorded through the `metrics` facade and
//! rendered by a process-wide Prometheus recorder.
//!
//! # Metrics Categories
//!
//! - **Subscriptions**: Created, rejected and active subscriptions
//! - **Live**: Ticks received and dropped, live symbol count, connection state
//! - **Pipeline**: Filtered and fill-forwarded points
//! - **Historical**: Fetch latency and skipped records
//!
//! Every name carries the `qrawler_feed_` prefix. The health server renders
//! them at `/metrics`.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the recorder once and describe every metric.
///
/// Later calls return the same handle.
///
/// # Panics
///
/// If another global recorder was installed first.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            #[allow(clippy::expect_used)]
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Handle for rendering, once [`init_metrics`] has run.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Subscriptions
    describe_counter!(
        "qrawler_feed_subscriptions_created_total",
        "Subscriptions created by source strategy"
    );
    describe_counter!(
        "qrawler_feed_subscriptions_rejected_total",
        "Subscription requests declined or failed"
    );
    describe_gauge!(
        "qrawler_feed_subscriptions_active",
        "Currently open subscriptions"
    );
    describe_gauge!(
        "qrawler_feed_live_symbols",
        "Unique symbols subscribed on the live connection"
    );

    // Live ticks
    describe_counter!(
        "qrawler_feed_ticks_received_total",
        "Ticks received from the live connection"
    );
    describe_counter!(
        "qrawler_feed_ticks_dropped_total",
        "Ticks dropped before delivery"
    );
    describe_gauge!(
        "qrawler_feed_websocket_connected",
        "Whether the live WebSocket is connected"
    );
    describe_counter!(
        "qrawler_feed_websocket_errors_total",
        "Live WebSocket errors by type"
    );
    describe_counter!(
        "qrawler_feed_reconnects_total",
        "Live WebSocket reconnection attempts"
    );

    // Pipeline
    describe_counter!(
        "qrawler_feed_points_filtered_total",
        "Points dropped by the filter stage"
    );
    describe_counter!(
        "qrawler_feed_points_fill_forward_total",
        "Synthetic points emitted by fill-forward"
    );

    // Historical
    describe_histogram!(
        "qrawler_feed_historical_fetch_seconds",
        "Latency of historical OHLC fetches"
    );
    describe_counter!(
        "qrawler_feed_historical_records_skipped_total",
        "Historical records skipped for an empty interval"
    );
    describe_counter!(
        "qrawler_feed_provider_errors_total",
        "Provider failures surfaced to subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a tick never reaches a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDropReason {
    /// Feed code not in the feed map.
    UnmappedFeedCode,
    /// Symbol is not subscribed.
    NotSubscribed,
    /// Trade tick without a last price.
    MissingPrice,
    /// Subscriber's queue is closed.
    SubscriberGone,
    /// Connection buffer overflowed before the ticks were pulled.
    BufferFull,
}

impl TickDropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::UnmappedFeedCode => "unmapped_feed_code",
            Self::NotSubscribed => "not_subscribed",
            Self::MissingPrice => "missing_price",
            Self::SubscriberGone => "subscriber_gone",
            Self::BufferFull => "buffer_full",
        }
    }
}

/// Reasons the filter stage drops a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// Ends after the requested range.
    AfterEnd,
    /// Falls outside exchange hours.
    MarketClosed,
    /// Rejected by the user predicate.
    Predicate,
}

impl FilterReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::AfterEnd => "after_end",
            Self::MarketClosed => "market_closed",
            Self::Predicate => "predicate",
        }
    }
}

/// Record a created subscription.
pub fn record_subscription_created(strategy: &'static str) {
    counter!(
        "qrawler_feed_subscriptions_created_total",
        "strategy" => strategy
    )
    .increment(1);
}

/// Record a declined or failed subscription request.
pub fn record_subscription_rejected(reason: &'static str) {
    counter!(
        "qrawler_feed_subscriptions_rejected_total",
        "reason" => reason
    )
    .increment(1);
}

/// Update the active subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("qrawler_feed_subscriptions_active").set(count as f64);
}

/// Update the live symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_symbols(count: usize) {
    gauge!("qrawler_feed_live_symbols").set(count as f64);
}

/// Record a tick received from the live connection.
pub fn record_tick_received(tick_type: &'static str) {
    counter!(
        "qrawler_feed_ticks_received_total",
        "tick_type" => tick_type
    )
    .increment(1);
}

/// Record a dropped tick.
pub fn record_tick_dropped(reason: TickDropReason) {
    counter!(
        "qrawler_feed_ticks_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the live WebSocket connection state.
pub fn set_websocket_connected(connected: bool) {
    gauge!("qrawler_feed_websocket_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Count a live socket failure by kind.
pub fn record_websocket_error(error_type: &str) {
    counter!(
        "qrawler_feed_websocket_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Count a scheduled reconnect.
pub fn record_reconnect() {
    counter!("qrawler_feed_reconnects_total").increment(1);
}

/// Record a point dropped by the filter stage.
pub fn record_point_filtered(reason: FilterReason) {
    counter!(
        "qrawler_feed_points_filtered_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a synthetic fill-forward point.
pub fn record_fill_forward() {
    counter!("qrawler_feed_points_fill_forward_total").increment(1);
}

/// Record historical fetch latency.
pub fn record_historical_fetch(resolution: &'static str, duration: Duration) {
    histogram!(
        "qrawler_feed_historical_fetch_seconds",
        "resolution" => resolution
    )
    .record(duration.as_secs_f64());
}

/// Record a skipped historical record.
pub fn record_historical_skipped() {
    counter!("qrawler_feed_historical_records_skipped_total").increment(1);
}

/// Count a provider failure by error code.
pub fn record_provider_error(code: &'static str) {
    counter!(
        "qrawler_feed_provider_errors_total",
        "code" => code
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
