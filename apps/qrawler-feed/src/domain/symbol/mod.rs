//! Symbol Translation
//!
//! Maps host symbols (`"exchange:ticker"`) to the provider's ticker plus
//! feed channel and back, and host resolutions to provider resolution codes.
//!
//! The [`FeedMap`] is built once at startup and is read-only afterwards, so
//! translators share it through an `Arc` without locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::market_data::{ProviderSymbolRef, Resolution, Symbol};
use crate::error::{FeedError, FeedResult};

// =============================================================================
// Feed Map
// =============================================================================

/// Bidirectional exchange qualifier <-> provider feed code mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMap {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl FeedMap {
    /// Build from `exchange -> feed_code` entries.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::AmbiguousFeedCode`] when two exchanges share a
    /// feed code, since reverse lookups would then be undefined.
    pub fn new<I, K, V>(entries: I) -> FeedResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut forward = HashMap::new();
        let mut reverse: HashMap<String, String> = HashMap::new();

        for (exchange, feed_code) in entries {
            let exchange = exchange.into();
            let feed_code = feed_code.into();

            if let Some(existing) = reverse.get(&feed_code)
                && existing != &exchange
            {
                let (first, second) = if existing < &exchange {
                    (existing.clone(), exchange)
                } else {
                    (exchange, existing.clone())
                };
                return Err(FeedError::AmbiguousFeedCode {
                    feed_code,
                    first,
                    second,
                });
            }

            reverse.insert(feed_code.clone(), exchange.clone());
            if let Some(previous) = forward.insert(exchange, feed_code.clone())
                && previous != feed_code
            {
                reverse.remove(&previous);
            }
        }

        Ok(Self { forward, reverse })
    }

    /// Feed code for an exchange qualifier.
    #[must_use]
    pub fn feed_code(&self, exchange: &str) -> Option<&str> {
        self.forward.get(exchange).map(String::as_str)
    }

    /// Exchange qualifier for a feed code.
    #[must_use]
    pub fn exchange(&self, feed_code: &str) -> Option<&str> {
        self.reverse.get(feed_code).map(String::as_str)
    }

    /// Number of mapped exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

// =============================================================================
// Provider Resolution
// =============================================================================

/// Resolution codes understood by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderResolution {
    /// One minute.
    M1,
    /// One hour.
    H1,
    /// One day.
    D1,
}

impl ProviderResolution {
    /// Wire code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::M1 => "M1",
            Self::H1 => "H1",
            Self::D1 => "D1",
        }
    }
}

impl fmt::Display for ProviderResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Translator
// =============================================================================

/// Translates between host and provider addressing.
#[derive(Debug, Clone)]
pub struct SymbolTranslator {
    feed_map: Arc<FeedMap>,
}

impl SymbolTranslator {
    /// Create a translator over a shared feed map.
    #[must_use]
    pub const fn new(feed_map: Arc<FeedMap>) -> Self {
        Self { feed_map }
    }

    /// The underlying feed map.
    #[must_use]
    pub fn feed_map(&self) -> &FeedMap {
        &self.feed_map
    }

    /// Host symbol to provider ticker and feed code.
    ///
    /// # Errors
    ///
    /// [`FeedError::InvalidSymbolFormat`] unless the symbol has exactly one
    /// delimiter; [`FeedError::UnmappedExchange`] if its exchange has no
    /// feed code.
    pub fn translate(&self, symbol: &Symbol) -> FeedResult<ProviderSymbolRef> {
        let (exchange, ticker) = symbol.parts().ok_or_else(|| FeedError::InvalidSymbolFormat {
            symbol: symbol.to_string(),
        })?;

        let feed_code =
            self.feed_map
                .feed_code(exchange)
                .ok_or_else(|| FeedError::UnmappedExchange {
                    exchange: exchange.to_string(),
                    symbol: symbol.to_string(),
                })?;

        Ok(ProviderSymbolRef::new(ticker, feed_code))
    }

    /// Provider ticker and feed code back to a host symbol.
    ///
    /// # Errors
    ///
    /// [`FeedError::UnmappedFeedCode`] if the feed code has no exchange.
    pub fn translate_back(&self, ticker: &str, feed_code: &str) -> FeedResult<Symbol> {
        let exchange =
            self.feed_map
                .exchange(feed_code)
                .ok_or_else(|| FeedError::UnmappedFeedCode {
                    feed_code: feed_code.to_string(),
                    ticker: ticker.to_string(),
                })?;

        Ok(Symbol::new(exchange, ticker))
    }

    /// Host resolution to provider code.
    ///
    /// # Errors
    ///
    /// [`FeedError::UnsupportedResolution`] for anything other than minute,
    /// hour or daily.
    pub fn translate_resolution(&self, resolution: Resolution) -> FeedResult<ProviderResolution> {
        match resolution {
            Resolution::Minute => Ok(ProviderResolution::M1),
            Resolution::Hour => Ok(ProviderResolution::H1),
            Resolution::Daily => Ok(ProviderResolution::D1),
            Resolution::Tick | Resolution::Second => {
                Err(FeedError::UnsupportedResolution(resolution))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn translator() -> SymbolTranslator {
        let map = FeedMap::new([("NYSE", "N"), ("NASDAQ", "Q"), ("BINANCE", "BN")]).unwrap();
        SymbolTranslator::new(Arc::new(map))
    }

    #[test]
    fn translate_splits_and_maps_exchange() {
        let reference = translator().translate(&Symbol::new("NASDAQ", "AAPL")).unwrap();
        assert_eq!(reference, ProviderSymbolRef::new("AAPL", "Q"));
        assert_eq!(reference.venue(), "*");
    }

    #[test_case("AAPL" ; "no delimiter")]
    #[test_case("NYSE:BRK:B" ; "two delimiters")]
    #[test_case("" ; "empty")]
    fn translate_rejects_bad_delimiter_count(raw: &str) {
        let err = translator().translate(&Symbol::from_value(raw)).unwrap_err();
        assert!(matches!(err, FeedError::InvalidSymbolFormat { .. }));
    }

    #[test]
    fn translate_rejects_unmapped_exchange() {
        let err = translator().translate(&Symbol::new("LSE", "VOD")).unwrap_err();
        assert_eq!(
            err,
            FeedError::UnmappedExchange {
                exchange: "LSE".to_string(),
                symbol: "LSE:VOD".to_string(),
            }
        );
    }

    #[test]
    fn translate_back_rejects_unknown_feed_code() {
        let err = translator().translate_back("VOD", "L").unwrap_err();
        assert!(matches!(err, FeedError::UnmappedFeedCode { .. }));
    }

    #[test_case(Resolution::Minute, "M1")]
    #[test_case(Resolution::Hour, "H1")]
    #[test_case(Resolution::Daily, "D1")]
    fn supported_resolutions_map_to_fixed_codes(resolution: Resolution, code: &str) {
        assert_eq!(
            translator().translate_resolution(resolution).unwrap().code(),
            code
        );
    }

    #[test_case(Resolution::Tick)]
    #[test_case(Resolution::Second)]
    fn sub_minute_resolutions_are_unsupported(resolution: Resolution) {
        assert_eq!(
            translator().translate_resolution(resolution),
            Err(FeedError::UnsupportedResolution(resolution))
        );
    }

    #[test]
    fn feed_map_rejects_shared_feed_code() {
        let err = FeedMap::new([("NYSE", "N"), ("ARCA", "N")]).unwrap_err();
        assert_eq!(
            err,
            FeedError::AmbiguousFeedCode {
                feed_code: "N".to_string(),
                first: "ARCA".to_string(),
                second: "NYSE".to_string(),
            }
        );
    }

    #[test]
    fn feed_map_tolerates_repeated_identical_entry() {
        let map = FeedMap::new([("NYSE", "N"), ("NYSE", "N")]).unwrap();
        assert_eq!(map.len(), 1);
    }

    proptest! {
        #[test]
        fn translate_back_inverts_translate(
            exchange in prop::sample::select(vec!["NYSE", "NASDAQ", "BINANCE"]),
            ticker in "[A-Z0-9.]{1,8}",
        ) {
            let translator = translator();
            let symbol = Symbol::new(exchange, &ticker);
            let reference = translator.translate(&symbol).unwrap();
            let back = translator
                .translate_back(&reference.ticker, &reference.feed_code)
                .unwrap();
            prop_assert_eq!(back, symbol);
        }
    }
}
