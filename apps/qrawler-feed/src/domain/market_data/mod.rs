//! Market Data Types
//!
//! Host-side value types flowing through the subscription pipeline:
//! symbols, resolutions, bars, quote bars, ticks and the [`DataPoint`]
//! union every stream yields.
//!
//! # Time Semantics
//!
//! All instants are UTC. A bar covers `[start_time_utc, end_time_utc)`
//! and is keyed on its end time; ticks are keyed on their timestamp.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbols
// =============================================================================

/// Delimiter between exchange qualifier and ticker.
pub const SYMBOL_DELIMITER: char = ':';

/// Venue wildcard used in every provider call.
pub const VENUE_WILDCARD: &str = "*";

/// Host symbol identifier, serialized as `"exchange:ticker"`.
///
/// The raw value is kept as-is so malformed identifiers coming from the
/// host surface as translation errors instead of being silently repaired.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Build a symbol from its two halves.
    #[must_use]
    pub fn new(exchange: &str, ticker: &str) -> Self {
        Self(format!("{exchange}{SYMBOL_DELIMITER}{ticker}"))
    }

    /// Wrap a raw host value without validation.
    #[must_use]
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw string form.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Exchange and ticker halves, when the value has exactly one delimiter.
    #[must_use]
    pub fn parts(&self) -> Option<(&str, &str)> {
        let mut split = self.0.split(SYMBOL_DELIMITER);
        match (split.next(), split.next(), split.next()) {
            (Some(exchange), Some(ticker), None) => Some((exchange, ticker)),
            _ => None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-side addressing of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderSymbolRef {
    /// Provider ticker.
    pub ticker: String,
    /// Provider feed channel code.
    pub feed_code: String,
}

impl ProviderSymbolRef {
    /// Create a new provider reference.
    #[must_use]
    pub fn new(ticker: impl Into<String>, feed_code: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            feed_code: feed_code.into(),
        }
    }

    /// Venue sent alongside ticker and feed (always the wildcard).
    #[must_use]
    pub const fn venue(&self) -> &'static str {
        VENUE_WILDCARD
    }
}

impl fmt::Display for ProviderSymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ticker, self.feed_code)
    }
}

// =============================================================================
// Enumerations
// =============================================================================

/// Bar interval granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Individual ticks.
    Tick,
    /// One-second bars.
    Second,
    /// One-minute bars.
    Minute,
    /// One-hour bars.
    Hour,
    /// One-day bars.
    Daily,
}

impl Resolution {
    /// Bar period, `None` for tick resolution.
    #[must_use]
    pub const fn period(self) -> Option<TimeDelta> {
        match self {
            Self::Tick => None,
            Self::Second => Some(TimeDelta::seconds(1)),
            Self::Minute => Some(TimeDelta::minutes(1)),
            Self::Hour => Some(TimeDelta::hours(1)),
            Self::Daily => Some(TimeDelta::days(1)),
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Daily => "daily",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tick" => Ok(Self::Tick),
            "second" => Ok(Self::Second),
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "daily" | "day" => Ok(Self::Daily),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// Kind of tick event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickType {
    /// Executed trade.
    #[default]
    Trade,
    /// Bid/ask quote.
    Quote,
}

impl fmt::Display for TickType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trade => f.write_str("trade"),
            Self::Quote => f.write_str("quote"),
        }
    }
}

/// Shape of the data a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// OHLCV trade bars.
    #[default]
    TradeBar,
    /// Bars with independent bid/ask sides.
    QuoteBar,
    /// Raw ticks.
    Tick,
}

// =============================================================================
// Bars
// =============================================================================

/// Open/high/low/close prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    /// Opening price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
}

impl Ohlc {
    /// Create a price set.
    #[must_use]
    pub const fn new(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self {
            open,
            high,
            low,
            close,
        }
    }

    /// All four prices equal to `price`.
    #[must_use]
    pub const fn flat(price: Decimal) -> Self {
        Self::new(price, price, price, price)
    }
}

/// OHLCV summary over `[start_time_utc, end_time_utc)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Host symbol.
    pub symbol: Symbol,
    start_time_utc: DateTime<Utc>,
    end_time_utc: DateTime<Utc>,
    /// Prices.
    pub ohlc: Ohlc,
    /// Traded volume.
    pub volume: Decimal,
    /// Synthesized by fill-forward.
    pub is_fill_forward: bool,
}

impl Bar {
    /// Create a bar from explicit bounds.
    ///
    /// Returns `None` unless `start < end`.
    #[must_use]
    pub fn spanning(
        symbol: Symbol,
        start_time_utc: DateTime<Utc>,
        end_time_utc: DateTime<Utc>,
        ohlc: Ohlc,
        volume: Decimal,
    ) -> Option<Self> {
        (start_time_utc < end_time_utc).then_some(Self {
            symbol,
            start_time_utc,
            end_time_utc,
            ohlc,
            volume,
            is_fill_forward: false,
        })
    }

    /// Create a bar whose end is derived from its start and period.
    ///
    /// Returns `None` for a non-positive period.
    #[must_use]
    pub fn with_period(
        symbol: Symbol,
        start_time_utc: DateTime<Utc>,
        period: TimeDelta,
        ohlc: Ohlc,
        volume: Decimal,
    ) -> Option<Self> {
        Self::spanning(symbol, start_time_utc, start_time_utc + period, ohlc, volume)
    }

    /// Bar start.
    #[must_use]
    pub const fn start_time_utc(&self) -> DateTime<Utc> {
        self.start_time_utc
    }

    /// Bar end.
    #[must_use]
    pub const fn end_time_utc(&self) -> DateTime<Utc> {
        self.end_time_utc
    }

    /// Flat zero-volume copy at the close, placed at `start`.
    #[must_use]
    pub fn fill_forward(&self, start_time_utc: DateTime<Utc>, period: TimeDelta) -> Option<Self> {
        let mut bar = Self::with_period(
            self.symbol.clone(),
            start_time_utc,
            period,
            Ohlc::flat(self.ohlc.close),
            Decimal::ZERO,
        )?;
        bar.is_fill_forward = true;
        Some(bar)
    }
}

/// Bar with independent bid and ask sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteBar {
    /// Host symbol.
    pub symbol: Symbol,
    start_time_utc: DateTime<Utc>,
    end_time_utc: DateTime<Utc>,
    /// Bid side, absent when the update carried none.
    pub bid: Option<Ohlc>,
    /// Ask side, absent when the update carried none.
    pub ask: Option<Ohlc>,
    /// Last bid size.
    pub last_bid_size: Decimal,
    /// Last ask size.
    pub last_ask_size: Decimal,
    /// Synthesized by fill-forward.
    pub is_fill_forward: bool,
}

impl QuoteBar {
    /// Create a quote bar; `None` unless `start < end`.
    #[must_use]
    pub fn spanning(
        symbol: Symbol,
        start_time_utc: DateTime<Utc>,
        end_time_utc: DateTime<Utc>,
        bid: Option<Ohlc>,
        ask: Option<Ohlc>,
    ) -> Option<Self> {
        (start_time_utc < end_time_utc).then_some(Self {
            symbol,
            start_time_utc,
            end_time_utc,
            bid,
            ask,
            last_bid_size: Decimal::ZERO,
            last_ask_size: Decimal::ZERO,
            is_fill_forward: false,
        })
    }

    /// Bar start.
    #[must_use]
    pub const fn start_time_utc(&self) -> DateTime<Utc> {
        self.start_time_utc
    }

    /// Bar end.
    #[must_use]
    pub const fn end_time_utc(&self) -> DateTime<Utc> {
        self.end_time_utc
    }

    /// Mid of the closing bid and ask, or whichever side is present.
    #[must_use]
    pub fn mid_close(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid.close + ask.close) / Decimal::TWO),
            (Some(side), None) | (None, Some(side)) => Some(side.close),
            (None, None) => None,
        }
    }

    /// Flat copy of both sides at their closes, placed at `start`.
    #[must_use]
    pub fn fill_forward(&self, start_time_utc: DateTime<Utc>, period: TimeDelta) -> Option<Self> {
        let mut bar = Self::spanning(
            self.symbol.clone(),
            start_time_utc,
            start_time_utc + period,
            self.bid.map(|side| Ohlc::flat(side.close)),
            self.ask.map(|side| Ohlc::flat(side.close)),
        )?;
        bar.last_bid_size = self.last_bid_size;
        bar.last_ask_size = self.last_ask_size;
        bar.is_fill_forward = true;
        Some(bar)
    }
}

// =============================================================================
// Ticks
// =============================================================================

/// A single trade or quote event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Host symbol.
    pub symbol: Symbol,
    /// Event time.
    pub timestamp_utc: DateTime<Utc>,
    /// Trade price, or quote mid.
    pub price: Decimal,
    /// Bid price (quotes only).
    pub bid_price: Option<Decimal>,
    /// Ask price (quotes only).
    pub ask_price: Option<Decimal>,
    /// Traded size; zero when the provider sent none.
    pub size: Decimal,
    /// Trade or quote.
    pub tick_type: TickType,
}

// =============================================================================
// Stream Items
// =============================================================================

/// Points grouped by the aggregator for one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCollection {
    /// Symbol the collection is keyed on.
    pub symbol: Symbol,
    /// Shared end time of every member.
    pub end_time_utc: DateTime<Utc>,
    /// Members in arrival order.
    pub points: Vec<DataPoint>,
}

/// Item yielded by every pipeline stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataPoint {
    /// Trade bar.
    Trade(Bar),
    /// Quote bar.
    Quote(QuoteBar),
    /// Tick.
    Tick(Tick),
    /// Aggregated collection.
    Collection(DataCollection),
}

impl DataPoint {
    /// Symbol of the point.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Trade(bar) => &bar.symbol,
            Self::Quote(bar) => &bar.symbol,
            Self::Tick(tick) => &tick.symbol,
            Self::Collection(collection) => &collection.symbol,
        }
    }

    /// Start of the covered interval (ticks and collections are instants).
    #[must_use]
    pub const fn start_time_utc(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(bar) => bar.start_time_utc,
            Self::Quote(bar) => bar.start_time_utc,
            Self::Tick(tick) => tick.timestamp_utc,
            Self::Collection(collection) => collection.end_time_utc,
        }
    }

    /// Time the point becomes available.
    #[must_use]
    pub const fn end_time_utc(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(bar) => bar.end_time_utc,
            Self::Quote(bar) => bar.end_time_utc,
            Self::Tick(tick) => tick.timestamp_utc,
            Self::Collection(collection) => collection.end_time_utc,
        }
    }

    /// Whether the point was synthesized by fill-forward.
    #[must_use]
    pub const fn is_fill_forward(&self) -> bool {
        match self {
            Self::Trade(bar) => bar.is_fill_forward,
            Self::Quote(bar) => bar.is_fill_forward,
            Self::Tick(_) | Self::Collection(_) => false,
        }
    }

    /// Synthetic copy placed at `start`; ticks and collections cannot be filled.
    #[must_use]
    pub fn fill_forward(&self, start_time_utc: DateTime<Utc>, period: TimeDelta) -> Option<Self> {
        match self {
            Self::Trade(bar) => bar.fill_forward(start_time_utc, period).map(Self::Trade),
            Self::Quote(bar) => bar.fill_forward(start_time_utc, period).map(Self::Quote),
            Self::Tick(_) | Self::Collection(_) => None,
        }
    }
}
