//! Qrawler Wire Messages
//!
//! JSON shapes exchanged with the Qrawler live socket and returned by the
//! historical HTTP endpoint.
//!
//! # Live socket
//!
//! Outgoing:
//! ```json
//! {"action": "subscribe", "symbols": [{"symbol": "IBM", "venue": "*", "feed": "XNYS"}]}
//! ```
//!
//! Incoming, either a single object or an array of objects:
//! ```json
//! {"type": "tick", "symbol": "IBM", "feed": "XNYS", "time": "2024-01-02T15:00:00Z", "last": "185.1", "volume": "100"}
//! {"type": "subscribed", "symbols": [{"symbol": "IBM", "venue": "*", "feed": "XNYS"}]}
//! {"type": "error", "code": 404, "msg": "unknown symbol"}
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::{ProviderOhlcRecord, ProviderTick};
use crate::domain::market_data::{ProviderSymbolRef, TickType};

// =============================================================================
// Outgoing
// =============================================================================

/// Subscription instruction verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start streaming the listed symbols.
    Subscribe,
    /// Stop streaming the listed symbols.
    Unsubscribe,
}

/// Provider symbol as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireSymbol {
    /// Provider ticker.
    pub symbol: String,
    /// Venue filter.
    pub venue: String,
    /// Feed code.
    pub feed: String,
}

impl From<&ProviderSymbolRef> for WireSymbol {
    fn from(reference: &ProviderSymbolRef) -> Self {
        Self {
            symbol: reference.ticker.clone(),
            venue: reference.venue().to_string(),
            feed: reference.feed_code.clone(),
        }
    }
}

/// Subscribe or unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCommand {
    /// Verb.
    pub action: SubscriptionAction,
    /// Affected symbols.
    pub symbols: Vec<WireSymbol>,
}

impl SubscriptionCommand {
    /// Subscribe to `symbols`.
    #[must_use]
    pub const fn subscribe(symbols: Vec<WireSymbol>) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            symbols,
        }
    }

    /// Unsubscribe from `symbols`.
    #[must_use]
    pub const fn unsubscribe(symbols: Vec<WireSymbol>) -> Self {
        Self {
            action: SubscriptionAction::Unsubscribe,
            symbols,
        }
    }
}

// =============================================================================
// Incoming
// =============================================================================

/// Pushed tick.
///
/// Trade ticks carry `last`; quote ticks carry `bid` and `ask`. A missing
/// `kind` means trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickMessage {
    /// Provider ticker.
    pub symbol: String,
    /// Feed code.
    pub feed: String,
    /// Event time.
    pub time: DateTime<Utc>,
    /// Trade or quote.
    #[serde(default)]
    pub kind: TickType,
    /// Last traded price.
    #[serde(default)]
    pub last: Option<Decimal>,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<Decimal>,
    /// Traded volume.
    #[serde(default)]
    pub volume: Option<Decimal>,
}

impl From<TickMessage> for ProviderTick {
    fn from(message: TickMessage) -> Self {
        Self {
            ticker: message.symbol,
            feed_code: message.feed,
            time: message.time,
            kind: message.kind,
            last: message.last,
            bid: message.bid,
            ask: message.ask,
            volume: message.volume,
        }
    }
}

/// Subscription acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedMessage {
    /// Symbols now streaming.
    pub symbols: Vec<WireSymbol>,
}

/// Server-side error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Numeric error code.
    pub code: i32,
    /// Description.
    pub msg: String,
}

/// Any message pushed over the live socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QrawlerMessage {
    /// Market tick.
    Tick(TickMessage),
    /// Subscription acknowledgement.
    Subscribed(SubscribedMessage),
    /// Server-side error.
    Error(ErrorMessage),
}

// =============================================================================
// Historical
// =============================================================================

/// One OHLC row of the historical endpoint.
///
/// `startTime` and `time` are zone-naive; they are in the data time zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OhlcRow {
    /// Bar start.
    pub start_time: NaiveDateTime,
    /// Bar end.
    pub time: NaiveDateTime,
    /// Opening price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Volume, absent for some instruments.
    #[serde(default)]
    pub volume: Option<Decimal>,
}

impl From<OhlcRow> for ProviderOhlcRecord {
    fn from(row: OhlcRow) -> Self {
        Self {
            start_time: row.start_time,
            end_time: row.time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}
