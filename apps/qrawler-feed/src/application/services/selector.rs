//! Source Strategy Selection
//!
//! One exhaustive dispatch over [`UniverseKind`] decides where a request's
//! data comes from.

use std::fmt;
use std::sync::Arc;

use crate::application::ports::{UniverseSourceFactory, UniverseSources};
use crate::domain::subscription::{SubscriptionRequest, UniverseKind};
use crate::error::{FeedError, FeedResult};

/// Where a subscription's raw data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceStrategy {
    /// Calendar-driven universe source.
    TimeTriggeredUniverse,
    /// Bulk coarse fundamental collection.
    CoarseFundamental,
    /// Option chain source re-entering the pipeline.
    OptionChain,
    /// Futures chain source re-entering the pipeline.
    FuturesChain,
    /// Bounded bar replay.
    Historical,
    /// Open-ended live ticks.
    Live,
}

impl SourceStrategy {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeTriggeredUniverse => "time_triggered",
            Self::CoarseFundamental => "coarse_fundamental",
            Self::OptionChain => "option_chain",
            Self::FuturesChain => "futures_chain",
            Self::Historical => "historical",
            Self::Live => "live",
        }
    }

    /// Registered factory for universe strategies; `None` for plain data.
    ///
    /// # Errors
    ///
    /// [`FeedError::UniverseSourceUnavailable`] when a universe strategy has
    /// no factory registered.
    pub fn universe_factory(
        self,
        sources: &UniverseSources,
    ) -> FeedResult<Option<Arc<dyn UniverseSourceFactory>>> {
        let registered = match self {
            Self::TimeTriggeredUniverse => &sources.time_triggered,
            Self::CoarseFundamental => &sources.coarse_fundamental,
            Self::OptionChain => &sources.option_chain,
            Self::FuturesChain => &sources.futures_chain,
            Self::Historical | Self::Live => return Ok(None),
        };
        registered
            .clone()
            .map(Some)
            .ok_or(FeedError::UniverseSourceUnavailable(self.as_str()))
    }
}

impl fmt::Display for SourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the source strategy for `request`.
#[must_use]
pub const fn select_strategy(request: &SubscriptionRequest) -> SourceStrategy {
    match request.universe {
        UniverseKind::TimeTriggered { .. } => SourceStrategy::TimeTriggeredUniverse,
        UniverseKind::CoarseFundamental => SourceStrategy::CoarseFundamental,
        UniverseKind::OptionChain => SourceStrategy::OptionChain,
        UniverseKind::FuturesChain => SourceStrategy::FuturesChain,
        UniverseKind::Plain if request.end_time_utc.is_some() => SourceStrategy::Historical,
        UniverseKind::Plain => SourceStrategy::Live,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use test_case::test_case;

    use super::*;
    use crate::application::pipeline::{DataStream, PipelineHook};
    use crate::domain::calendar::ExchangeHours;
    use crate::domain::market_data::{Resolution, Symbol};

    struct EmptyFactory;

    impl UniverseSourceFactory for EmptyFactory {
        fn create_stream(
            &self,
            _request: Arc<SubscriptionRequest>,
            _hook: PipelineHook,
        ) -> FeedResult<DataStream> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    fn request(universe: UniverseKind, bounded: bool) -> SubscriptionRequest {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = bounded.then(|| Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
        SubscriptionRequest::new(
            Symbol::new("NYSE", "IBM"),
            Resolution::Minute,
            start,
            end,
            Arc::new(ExchangeHours::us_equity()),
        )
        .with_universe(universe)
    }

    #[test_case(UniverseKind::TimeTriggered { universe: None }, SourceStrategy::TimeTriggeredUniverse ; "time triggered")]
    #[test_case(UniverseKind::CoarseFundamental, SourceStrategy::CoarseFundamental ; "coarse")]
    #[test_case(UniverseKind::OptionChain, SourceStrategy::OptionChain ; "options")]
    #[test_case(UniverseKind::FuturesChain, SourceStrategy::FuturesChain ; "futures")]
    fn universe_kinds_select_their_source(kind: UniverseKind, expected: SourceStrategy) {
        assert_eq!(select_strategy(&request(kind.clone(), true)), expected);
        assert_eq!(select_strategy(&request(kind, false)), expected);
    }

    #[test]
    fn plain_requests_split_on_end_time() {
        assert_eq!(
            select_strategy(&request(UniverseKind::Plain, true)),
            SourceStrategy::Historical
        );
        assert_eq!(
            select_strategy(&request(UniverseKind::Plain, false)),
            SourceStrategy::Live
        );
    }

    #[test]
    fn missing_factory_is_reported_by_kind() {
        let sources = UniverseSources::default();
        assert!(matches!(
            SourceStrategy::OptionChain.universe_factory(&sources),
            Err(FeedError::UniverseSourceUnavailable("option_chain"))
        ));
        assert!(matches!(
            SourceStrategy::Historical.universe_factory(&sources),
            Ok(None)
        ));
    }

    #[test]
    fn registered_factory_is_returned() {
        let sources = UniverseSources {
            futures_chain: Some(Arc::new(EmptyFactory)),
            ..UniverseSources::default()
        };
        assert!(
            SourceStrategy::FuturesChain
                .universe_factory(&sources)
                .unwrap()
                .is_some()
        );
    }
}
