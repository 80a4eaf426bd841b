//! Qrawler Provider Adapters
//!
//! - **Live**: WebSocket push stream of ticks (JSON codec)
//! - **Historical**: HTTP endpoint returning OHLC rows

pub mod codec;
pub mod historical;
pub mod live;
pub mod messages;
pub mod reconnect;

pub use codec::{CodecError, JsonCodec};
pub use historical::{HistoricalClientConfig, QrawlerHistoricalClient};
pub use live::{DEFAULT_BUFFER_CAPACITY, LiveClientConfig, LiveClientError, QrawlerLiveClient};
pub use messages::{
    ErrorMessage, OhlcRow, QrawlerMessage, SubscribedMessage, SubscriptionAction,
    SubscriptionCommand, TickMessage, WireSymbol,
};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
