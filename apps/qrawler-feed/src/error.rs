//! Feed error taxonomy.
//!
//! Every failure the subscription pipeline can surface maps to one
//! [`FeedError`] variant. Messages always name the offending symbol,
//! exchange or feed code so configuration mistakes are easy to trace.
//!
//! | Code | Recoverable | Raised by |
//! |------|-------------|-----------|
//! | `INVALID_SYMBOL_FORMAT` | no | symbol translation |
//! | `UNMAPPED_EXCHANGE` | no | symbol translation |
//! | `UNMAPPED_FEED_CODE` | no | reverse translation |
//! | `AMBIGUOUS_FEED_CODE` | no | feed map construction |
//! | `UNSUPPORTED_RESOLUTION` | no | resolution translation |
//! | `UNSUPPORTED_TICK_TYPE` | no | historical streamer |
//! | `NO_TRADABLE_DAYS` | yes | source selection |
//! | `PROVIDER_UNAVAILABLE` | no | provider adapters |
//! | `NOT_SUPPORTED` | no | single-pass streams |
//! | `FEED_INACTIVE` | no | data feed after exit |
//! | `UNIVERSE_SOURCE_UNAVAILABLE` | no | source selection |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::market_data::{Resolution, Symbol, TickType};

/// Stable error codes, mirrored in logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Symbol string is not `exchange:ticker`.
    InvalidSymbolFormat,
    /// Exchange has no feed code.
    UnmappedExchange,
    /// Feed code has no exchange.
    UnmappedFeedCode,
    /// Two exchanges share one feed code.
    AmbiguousFeedCode,
    /// Resolution not offered by the provider.
    UnsupportedResolution,
    /// Tick type not representable.
    UnsupportedTickType,
    /// Request range holds no tradable day.
    NoTradableDays,
    /// Provider connection or fetch failed.
    ProviderUnavailable,
    /// Operation not offered by a single-pass stream.
    NotSupported,
    /// Feed has exited.
    FeedInactive,
    /// No source factory for a universe kind.
    UniverseSourceUnavailable,
}

impl ErrorCode {
    /// Code as a static label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSymbolFormat => "INVALID_SYMBOL_FORMAT",
            Self::UnmappedExchange => "UNMAPPED_EXCHANGE",
            Self::UnmappedFeedCode => "UNMAPPED_FEED_CODE",
            Self::AmbiguousFeedCode => "AMBIGUOUS_FEED_CODE",
            Self::UnsupportedResolution => "UNSUPPORTED_RESOLUTION",
            Self::UnsupportedTickType => "UNSUPPORTED_TICK_TYPE",
            Self::NoTradableDays => "NO_TRADABLE_DAYS",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::FeedInactive => "FEED_INACTIVE",
            Self::UniverseSourceUnavailable => "UNIVERSE_SOURCE_UNAVAILABLE",
        }
    }
}

/// Errors raised by the subscription pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The symbol did not split into exactly two `:`-separated parts.
    #[error("unexpected number of colons in symbol '{symbol}': expected exactly one")]
    InvalidSymbolFormat {
        /// Raw symbol text.
        symbol: String,
    },

    /// The exchange qualifier has no entry in the feed map.
    #[error("exchange not found in feed map: {exchange} (symbol {symbol})")]
    UnmappedExchange {
        /// Exchange qualifier.
        exchange: String,
        /// Full symbol text.
        symbol: String,
    },

    /// The provider feed code has no inverse entry in the feed map.
    #[error("feed code not found in feed map: {feed_code} (ticker {ticker})")]
    UnmappedFeedCode {
        /// Provider feed code.
        feed_code: String,
        /// Provider ticker.
        ticker: String,
    },

    /// Two exchanges map to the same feed code.
    #[error("feed code {feed_code} is mapped from both {first} and {second}")]
    AmbiguousFeedCode {
        /// Shared feed code.
        feed_code: String,
        /// First exchange.
        first: String,
        /// Second exchange.
        second: String,
    },

    /// The provider offers no code for this resolution.
    #[error("unsupported resolution: {0}")]
    UnsupportedResolution(Resolution),

    /// Only trade ticks can be replayed at tick resolution.
    #[error("only trade tick data supported, got {tick_type} for {symbol}")]
    UnsupportedTickType {
        /// Requested symbol.
        symbol: Symbol,
        /// Requested tick type.
        tick_type: TickType,
    },

    /// The request range holds no tradable day.
    #[error(
        "no data loaded for {0} because there were no tradeable dates for this security"
    )]
    NoTradableDays(Symbol),

    /// Provider connection or fetch failed.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The operation is not offered by this stream.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// The feed has exited; no new subscriptions are accepted.
    #[error("data feed has exited")]
    FeedInactive,

    /// No collaborator factory is registered for the universe kind.
    #[error("no source factory registered for {0} universe")]
    UniverseSourceUnavailable(&'static str),
}

impl FeedError {
    /// Stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidSymbolFormat { .. } => ErrorCode::InvalidSymbolFormat,
            Self::UnmappedExchange { .. } => ErrorCode::UnmappedExchange,
            Self::UnmappedFeedCode { .. } => ErrorCode::UnmappedFeedCode,
            Self::AmbiguousFeedCode { .. } => ErrorCode::AmbiguousFeedCode,
            Self::UnsupportedResolution(_) => ErrorCode::UnsupportedResolution,
            Self::UnsupportedTickType { .. } => ErrorCode::UnsupportedTickType,
            Self::NoTradableDays(_) => ErrorCode::NoTradableDays,
            Self::ProviderUnavailable(_) => ErrorCode::ProviderUnavailable,
            Self::NotSupported(_) => ErrorCode::NotSupported,
            Self::FeedInactive => ErrorCode::FeedInactive,
            Self::UniverseSourceUnavailable(_) => ErrorCode::UniverseSourceUnavailable,
        }
    }

    /// Whether the caller should treat this as a skipped subscription
    /// rather than a failure.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoTradableDays(_))
    }
}

/// Result alias for pipeline operations.
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = FeedError::UnmappedExchange {
            exchange: "XETRA".to_string(),
            symbol: "XETRA:SAP".to_string(),
        };
        assert!(err.to_string().contains("XETRA:SAP"));

        let err = FeedError::InvalidSymbolFormat {
            symbol: "A:B:C".to_string(),
        };
        assert!(err.to_string().contains("A:B:C"));
    }

    #[test]
    fn only_no_tradable_days_is_recoverable() {
        let symbol = Symbol::new("NYSE", "IBM");
        assert!(FeedError::NoTradableDays(symbol).is_recoverable());
        assert!(!FeedError::FeedInactive.is_recoverable());
        assert!(!FeedError::ProviderUnavailable("down".to_string()).is_recoverable());
    }

    #[test]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::UnsupportedTickType).unwrap();
        assert_eq!(json, "\"UNSUPPORTED_TICK_TYPE\"");
        assert_eq!(FeedError::NotSupported("reset").code().as_str(), "NOT_SUPPORTED");
    }
}
