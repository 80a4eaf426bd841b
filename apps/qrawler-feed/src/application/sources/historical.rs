//! Historical Streamer
//!
//! Single-use, forward-only replay of provider OHLC bars. The first pull
//! validates the request and issues one bulk fetch; later pulls only drain
//! the fetched buffer.

use std::sync::Arc;
use std::time::Instant;
use std::vec;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{HistoricalEndpoint, OhlcQuery, ProviderOhlcRecord};
use crate::domain::calendar::TimeZoneOffsetProvider;
use crate::domain::market_data::{
    Bar, DataPoint, Ohlc, ProviderSymbolRef, Resolution, Symbol, TickType,
};
use crate::domain::subscription::SubscriptionRequest;
use crate::domain::symbol::{ProviderResolution, SymbolTranslator};
use crate::error::{FeedError, FeedResult};
use crate::infrastructure::metrics;

/// Lifecycle of a [`HistoricalStreamer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerPhase {
    /// Nothing fetched yet.
    NotStarted,
    /// Bulk fetch in flight.
    Fetching,
    /// Draining fetched records.
    Streaming,
    /// Finished, failed or cancelled.
    Exhausted,
}

enum StreamerState {
    NotStarted,
    Fetching,
    Streaming(vec::IntoIter<ProviderOhlcRecord>),
    Exhausted,
}

/// Lazy replay of a bounded historical request.
pub struct HistoricalStreamer {
    request: Arc<SubscriptionRequest>,
    translator: SymbolTranslator,
    endpoint: Arc<dyn HistoricalEndpoint>,
    cancel: CancellationToken,
    offsets: TimeZoneOffsetProvider,
    state: StreamerState,
}

impl HistoricalStreamer {
    /// Create an unstarted streamer. No I/O happens until the first pull.
    #[must_use]
    pub fn new(
        request: Arc<SubscriptionRequest>,
        translator: SymbolTranslator,
        endpoint: Arc<dyn HistoricalEndpoint>,
        cancel: CancellationToken,
    ) -> Self {
        let offsets = request.offsets();
        Self {
            request,
            translator,
            endpoint,
            cancel,
            offsets,
            state: StreamerState::NotStarted,
        }
    }

    /// Check that `request` can be served, without any network call.
    ///
    /// # Errors
    ///
    /// Translation failures, or [`FeedError::UnsupportedTickType`] for tick
    /// requests other than trades.
    pub fn validate(
        request: &SubscriptionRequest,
        translator: &SymbolTranslator,
    ) -> FeedResult<(ProviderSymbolRef, ProviderResolution)> {
        let reference = translator.translate(&request.symbol)?;

        if request.resolution == Resolution::Tick && request.tick_type != TickType::Trade {
            return Err(FeedError::UnsupportedTickType {
                symbol: request.symbol.clone(),
                tick_type: request.tick_type,
            });
        }

        let resolution = translator.translate_resolution(request.resolution)?;
        Ok((reference, resolution))
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> StreamerPhase {
        match self.state {
            StreamerState::NotStarted => StreamerPhase::NotStarted,
            StreamerState::Fetching => StreamerPhase::Fetching,
            StreamerState::Streaming(_) => StreamerPhase::Streaming,
            StreamerState::Exhausted => StreamerPhase::Exhausted,
        }
    }

    /// Rewinding a replay is not supported.
    ///
    /// # Errors
    ///
    /// Always [`FeedError::NotSupported`].
    pub const fn reset(&mut self) -> FeedResult<()> {
        Err(FeedError::NotSupported("reset"))
    }

    fn fetch(&self) -> FeedResult<Vec<ProviderOhlcRecord>> {
        let (reference, resolution) = Self::validate(&self.request, &self.translator)?;
        let end_utc = self.request.end_time_utc.unwrap_or_else(Utc::now);
        let query = OhlcQuery::new(&reference, self.request.start_time_utc, end_utc, resolution);

        let started = Instant::now();
        let records = self
            .endpoint
            .fetch_ohlc(&query)
            .inspect_err(|e| metrics::record_provider_error(e.code().as_str()))?;
        metrics::record_historical_fetch(resolution.code(), started.elapsed());

        tracing::info!(
            symbol = %self.request.symbol,
            provider = %reference,
            resolution = %resolution,
            records = records.len(),
            "Fetched historical bars"
        );
        Ok(records)
    }
}

/// Anchor a zone-naive record in the data time zone.
fn to_bar(
    symbol: &Symbol,
    offsets: &TimeZoneOffsetProvider,
    record: ProviderOhlcRecord,
) -> Option<Bar> {
    let start = offsets.to_utc(record.start_time);
    let end = offsets.to_utc(record.end_time);
    let ohlc = Ohlc::new(record.open, record.high, record.low, record.close);
    let bar = Bar::spanning(symbol.clone(), start, end, ohlc, record.volume.unwrap_or_default());
    if bar.is_none() {
        tracing::warn!(
            %symbol,
            start_time = %record.start_time,
            end_time = %record.end_time,
            "Skipping historical record with empty interval"
        );
        metrics::record_historical_skipped();
    }
    bar
}

impl Iterator for HistoricalStreamer {
    type Item = FeedResult<DataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            self.state = StreamerState::Exhausted;
            return None;
        }

        loop {
            match &mut self.state {
                StreamerState::NotStarted => {
                    self.state = StreamerState::Fetching;
                    match self.fetch() {
                        Ok(records) => self.state = StreamerState::Streaming(records.into_iter()),
                        Err(e) => {
                            self.state = StreamerState::Exhausted;
                            return Some(Err(e));
                        }
                    }
                }
                StreamerState::Streaming(records) => {
                    let Some(record) = records.next() else {
                        self.state = StreamerState::Exhausted;
                        return None;
                    };
                    if let Some(bar) = to_bar(&self.request.symbol, &self.offsets, record) {
                        return Some(Ok(DataPoint::Trade(bar)));
                    }
                }
                StreamerState::Fetching | StreamerState::Exhausted => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveDateTime, TimeZone};
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::MockHistoricalEndpoint;
    use crate::domain::calendar::ExchangeHours;
    use crate::domain::symbol::FeedMap;

    fn translator() -> SymbolTranslator {
        SymbolTranslator::new(Arc::new(FeedMap::new([("NYSE", "N")]).unwrap()))
    }

    fn local(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn record(start: NaiveDateTime, end: NaiveDateTime, close: i64) -> ProviderOhlcRecord {
        let price = Decimal::from(close);
        ProviderOhlcRecord {
            start_time: start,
            end_time: end,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: None,
        }
    }

    fn daily_request(symbol: Symbol) -> SubscriptionRequest {
        SubscriptionRequest::new(
            symbol,
            Resolution::Daily,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap()),
            Arc::new(ExchangeHours::us_equity()),
        )
    }

    fn streamer(
        request: SubscriptionRequest,
        endpoint: MockHistoricalEndpoint,
    ) -> HistoricalStreamer {
        HistoricalStreamer::new(
            Arc::new(request),
            translator(),
            Arc::new(endpoint),
            CancellationToken::new(),
        )
    }

    #[test]
    fn replays_two_daily_bars_in_data_time_zone() {
        let mut endpoint = MockHistoricalEndpoint::new();
        endpoint
            .expect_fetch_ohlc()
            .withf(|q| {
                q.ticker == "IBM"
                    && q.feed_code == "N"
                    && q.venue == "*"
                    && q.resolution == ProviderResolution::D1
            })
            .times(1)
            .returning(|_| {
                Ok(vec![
                    record(local(2, 0), local(3, 0), 10),
                    record(local(3, 0), local(4, 0), 11),
                ])
            });

        let mut replay = streamer(daily_request(Symbol::new("NYSE", "IBM")), endpoint);
        assert_eq!(replay.phase(), StreamerPhase::NotStarted);

        let bars: Vec<_> = replay.by_ref().collect::<FeedResult<_>>().unwrap();
        assert_eq!(bars.len(), 2);
        // Midnight New York is 05:00 UTC in January.
        assert_eq!(
            bars[0].start_time_utc(),
            Utc.with_ymd_and_hms(2024, 1, 2, 5, 0, 0).unwrap()
        );
        assert_eq!(
            bars[1].end_time_utc(),
            Utc.with_ymd_and_hms(2024, 1, 4, 5, 0, 0).unwrap()
        );
        assert_eq!(replay.phase(), StreamerPhase::Exhausted);
        assert!(replay.next().is_none());
    }

    #[test]
    fn unmapped_exchange_fails_before_fetch() {
        let mut endpoint = MockHistoricalEndpoint::new();
        endpoint.expect_fetch_ohlc().never();

        let mut replay = streamer(daily_request(Symbol::new("LSE", "VOD")), endpoint);
        assert!(matches!(
            replay.next(),
            Some(Err(FeedError::UnmappedExchange { .. }))
        ));
        assert!(replay.next().is_none());
    }

    #[test]
    fn quote_ticks_fail_before_fetch() {
        let mut endpoint = MockHistoricalEndpoint::new();
        endpoint.expect_fetch_ohlc().never();

        let mut request = daily_request(Symbol::new("NYSE", "IBM")).with_tick_type(TickType::Quote);
        request.resolution = Resolution::Tick;

        let mut replay = streamer(request, endpoint);
        assert!(matches!(
            replay.next(),
            Some(Err(FeedError::UnsupportedTickType { .. }))
        ));
    }

    #[test]
    fn empty_interval_records_are_skipped() {
        let mut endpoint = MockHistoricalEndpoint::new();
        endpoint.expect_fetch_ohlc().returning(|_| {
            Ok(vec![
                record(local(2, 0), local(2, 0), 1),
                record(local(3, 0), local(4, 0), 2),
            ])
        });

        let bars: Vec<_> = streamer(daily_request(Symbol::new("NYSE", "IBM")), endpoint)
            .collect::<FeedResult<_>>()
            .unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn fetch_failure_is_yielded_once() {
        let mut endpoint = MockHistoricalEndpoint::new();
        endpoint
            .expect_fetch_ohlc()
            .times(1)
            .returning(|_| Err(FeedError::ProviderUnavailable("503".to_string())));

        let out: Vec<_> = streamer(daily_request(Symbol::new("NYSE", "IBM")), endpoint).collect();
        assert_eq!(out, vec![Err(FeedError::ProviderUnavailable("503".to_string()))]);
    }

    #[test]
    fn cancelled_streamer_never_fetches() {
        let mut endpoint = MockHistoricalEndpoint::new();
        endpoint.expect_fetch_ohlc().never();

        let cancel = CancellationToken::new();
        let mut replay = HistoricalStreamer::new(
            Arc::new(daily_request(Symbol::new("NYSE", "IBM"))),
            translator(),
            Arc::new(endpoint),
            cancel.clone(),
        );
        cancel.cancel();
        assert!(replay.next().is_none());
        assert_eq!(replay.phase(), StreamerPhase::Exhausted);
    }

    #[test]
    fn reset_is_not_supported() {
        let mut replay = streamer(
            daily_request(Symbol::new("NYSE", "IBM")),
            MockHistoricalEndpoint::new(),
        );
        assert_eq!(replay.reset(), Err(FeedError::NotSupported("reset")));
    }
}
