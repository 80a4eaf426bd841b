//! Live Tick Source
//!
//! Process-wide set of live symbols plus the tick stream that pulls from the
//! provider connection. [`TickRouter`] fans ticks out to per-subscription
//! queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{LiveConnection, ProviderTick};
use crate::application::sources::enqueue::{EnqueueSink, Enqueued};
use crate::domain::market_data::{ProviderSymbolRef, Symbol, Tick, TickType};
use crate::domain::subscription::SubscriptionId;
use crate::domain::symbol::SymbolTranslator;
use crate::error::FeedResult;
use crate::infrastructure::metrics::{self, TickDropReason};

// =============================================================================
// Live Tick Source
// =============================================================================

/// Shared live symbol set backed by one provider connection.
pub struct LiveTickSource {
    translator: SymbolTranslator,
    connection: Arc<dyn LiveConnection>,
    subscribed: RwLock<HashSet<Symbol>>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl LiveTickSource {
    /// Create a source whose tick streams end when `cancel` fires.
    #[must_use]
    pub fn new(
        translator: SymbolTranslator,
        connection: Arc<dyn LiveConnection>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            translator,
            connection,
            subscribed: RwLock::new(HashSet::new()),
            poll_interval,
            cancel,
        }
    }

    /// Add symbols to the live set.
    ///
    /// Every symbol is translated before anything changes; already
    /// subscribed symbols are not sent to the provider again.
    ///
    /// # Errors
    ///
    /// Translation failures leave the set untouched; provider failures are
    /// propagated and the symbols are not recorded.
    pub fn subscribe(&self, symbols: &[Symbol]) -> FeedResult<()> {
        let translated = symbols
            .iter()
            .map(|symbol| Ok((symbol.clone(), self.translator.translate(symbol)?)))
            .collect::<FeedResult<Vec<(Symbol, ProviderSymbolRef)>>>()?;

        let mut subscribed = self.subscribed.write();
        let mut fresh = Vec::new();
        let mut refs = Vec::new();
        for (symbol, reference) in translated {
            if !subscribed.contains(&symbol) && !fresh.contains(&symbol) {
                fresh.push(symbol);
                refs.push(reference);
            }
        }
        if refs.is_empty() {
            return Ok(());
        }

        self.connection.subscribe(&refs)?;
        tracing::info!(symbols = ?fresh, "Subscribed live symbols");
        subscribed.extend(fresh);
        metrics::set_live_symbols(subscribed.len());
        Ok(())
    }

    /// Remove symbols from the live set. Unknown symbols are ignored.
    ///
    /// # Errors
    ///
    /// Provider failures are propagated; the symbols stay removed locally.
    pub fn unsubscribe(&self, symbols: &[Symbol]) -> FeedResult<()> {
        let mut subscribed = self.subscribed.write();
        let removed: Vec<Symbol> = symbols
            .iter()
            .filter(|symbol| subscribed.remove(*symbol))
            .cloned()
            .collect();
        metrics::set_live_symbols(subscribed.len());
        drop(subscribed);

        if removed.is_empty() {
            return Ok(());
        }

        let refs: Vec<ProviderSymbolRef> = removed
            .iter()
            .filter_map(|symbol| self.translator.translate(symbol).ok())
            .collect();
        tracing::info!(symbols = ?removed, "Unsubscribed live symbols");
        self.connection.unsubscribe(&refs)
    }

    /// Whether `symbol` is in the live set.
    #[must_use]
    pub fn is_subscribed(&self, symbol: &Symbol) -> bool {
        self.subscribed.read().contains(symbol)
    }

    /// Snapshot of the live set.
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.subscribed.read().iter().cloned().collect()
    }

    /// Whether the provider connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Unbounded stream of host ticks for subscribed symbols.
    #[must_use]
    pub fn get_next_ticks(self: &Arc<Self>) -> TickStream {
        TickStream {
            source: Arc::clone(self),
            buffer: VecDeque::new(),
            closed: false,
        }
    }

    /// Map a provider tick to a host tick, or `None` if it must be dropped.
    fn map_tick(&self, raw: ProviderTick) -> Option<Tick> {
        let kind = match raw.kind {
            TickType::Trade => "trade",
            TickType::Quote => "quote",
        };
        metrics::record_tick_received(kind);

        let symbol = match self.translator.translate_back(&raw.ticker, &raw.feed_code) {
            Ok(symbol) => symbol,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping tick");
                metrics::record_tick_dropped(TickDropReason::UnmappedFeedCode);
                return None;
            }
        };

        if !self.is_subscribed(&symbol) {
            tracing::debug!(%symbol, "Dropping tick for unsubscribed symbol");
            metrics::record_tick_dropped(TickDropReason::NotSubscribed);
            return None;
        }

        let price = match raw.kind {
            TickType::Trade => raw.last,
            TickType::Quote => match (raw.bid, raw.ask) {
                (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
                (Some(side), None) | (None, Some(side)) => Some(side),
                (None, None) => raw.last,
            },
        };
        let Some(price) = price else {
            tracing::debug!(%symbol, kind, "Dropping tick without price");
            metrics::record_tick_dropped(TickDropReason::MissingPrice);
            return None;
        };

        Some(Tick {
            symbol,
            timestamp_utc: raw.time,
            price,
            bid_price: raw.bid,
            ask_price: raw.ask,
            size: raw.volume.unwrap_or_default(),
            tick_type: raw.kind,
        })
    }
}

impl std::fmt::Debug for LiveTickSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveTickSource")
            .field("subscribed", &self.subscribed.read().len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tick Stream
// =============================================================================

/// Unbounded tick sequence; ends only on cancellation or a dead connection.
///
/// Ticks already pulled are still yielded after cancellation, but no new
/// pull is issued.
pub struct TickStream {
    source: Arc<LiveTickSource>,
    buffer: VecDeque<Tick>,
    closed: bool,
}

impl Iterator for TickStream {
    type Item = Tick;

    fn next(&mut self) -> Option<Tick> {
        loop {
            if let Some(tick) = self.buffer.pop_front() {
                return Some(tick);
            }
            if self.closed || self.source.cancel.is_cancelled() {
                return None;
            }

            match self.source.connection.pull_ticks(self.source.poll_interval) {
                Ok(batch) => {
                    self.buffer
                        .extend(batch.into_iter().filter_map(|raw| self.source.map_tick(raw)));
                }
                Err(e) => {
                    metrics::record_provider_error(e.code().as_str());
                    tracing::warn!(error = %e, "Live connection closed; ending tick stream");
                    self.closed = true;
                }
            }
        }
    }
}

// =============================================================================
// Tick Router
// =============================================================================

type Route = (SubscriptionId, EnqueueSink<Tick>);

/// Delivers ticks to every live subscription on their symbol.
#[derive(Default)]
pub struct TickRouter {
    routes: RwLock<HashMap<Symbol, Vec<Route>>>,
}

impl TickRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route ticks for `symbol` to `sink`.
    pub fn attach(&self, symbol: Symbol, id: SubscriptionId, sink: EnqueueSink<Tick>) {
        self.routes.write().entry(symbol).or_default().push((id, sink));
    }

    /// Stop routing to `id` and close its queue.
    pub fn detach(&self, id: SubscriptionId) {
        let mut routes = self.routes.write();
        for sinks in routes.values_mut() {
            sinks.retain(|(route_id, sink)| {
                if *route_id == id {
                    sink.close();
                    false
                } else {
                    true
                }
            });
        }
        routes.retain(|_, sinks| !sinks.is_empty());
    }

    /// Close every queue.
    pub fn close_all(&self) {
        let mut routes = self.routes.write();
        for (_, sink) in routes.values().flatten() {
            sink.close();
        }
        routes.clear();
    }

    /// Deliver `tick`; returns how many subscriptions received it.
    pub fn route(&self, tick: &Tick) -> usize {
        let routes = self.routes.read();
        let Some(sinks) = routes.get(&tick.symbol) else {
            return 0;
        };
        let mut delivered = 0;
        for (_, sink) in sinks {
            match sink.enqueue(tick.clone()) {
                Enqueued::Accepted => delivered += 1,
                Enqueued::DisplacedOldest => {
                    metrics::record_tick_dropped(TickDropReason::BufferFull);
                    delivered += 1;
                }
                Enqueued::Closed => metrics::record_tick_dropped(TickDropReason::SubscriberGone),
            }
        }
        delivered
    }

    /// Number of attached subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().values().map(Vec::len).sum()
    }

    /// Whether no subscription is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use mockall::Sequence;

    use super::*;
    use crate::application::ports::MockLiveConnection;
    use crate::application::sources::enqueue::enqueueable;
    use crate::domain::symbol::FeedMap;
    use crate::error::FeedError;

    const POLL: Duration = Duration::from_millis(5);

    fn translator() -> SymbolTranslator {
        SymbolTranslator::new(Arc::new(FeedMap::new([("NYSE", "N"), ("ARCA", "P")]).unwrap()))
    }

    fn source(connection: MockLiveConnection, cancel: CancellationToken) -> Arc<LiveTickSource> {
        Arc::new(LiveTickSource::new(translator(), Arc::new(connection), POLL, cancel))
    }

    fn raw(ticker: &str, feed: &str, kind: TickType) -> ProviderTick {
        ProviderTick {
            ticker: ticker.to_string(),
            feed_code: feed.to_string(),
            time: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            kind,
            last: Some(Decimal::from(100)),
            bid: Some(Decimal::from(99)),
            ask: Some(Decimal::from(101)),
            volume: None,
        }
    }

    #[test]
    fn subscribe_translates_before_forwarding() {
        let mut connection = MockLiveConnection::new();
        connection.expect_subscribe().never();

        let live = source(connection, CancellationToken::new());
        let err = live
            .subscribe(&[Symbol::new("NYSE", "IBM"), Symbol::new("LSE", "VOD")])
            .unwrap_err();
        assert!(matches!(err, FeedError::UnmappedExchange { .. }));
        assert!(live.subscribed_symbols().is_empty());
    }

    #[test]
    fn subscribe_forwards_only_new_symbols() {
        let mut connection = MockLiveConnection::new();
        let mut seq = Sequence::new();
        connection
            .expect_subscribe()
            .withf(|refs| refs == [ProviderSymbolRef::new("IBM", "N")])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        connection
            .expect_subscribe()
            .withf(|refs| refs == [ProviderSymbolRef::new("SPY", "P")])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let live = source(connection, CancellationToken::new());
        let ibm = Symbol::new("NYSE", "IBM");
        live.subscribe(&[ibm.clone(), ibm.clone()]).unwrap();
        live.subscribe(&[ibm.clone(), Symbol::new("ARCA", "SPY")]).unwrap();
        assert_eq!(live.subscribed_symbols().len(), 2);
    }

    #[test]
    fn unsubscribe_unknown_symbol_is_no_op() {
        let mut connection = MockLiveConnection::new();
        connection.expect_unsubscribe().never();

        let live = source(connection, CancellationToken::new());
        live.unsubscribe(&[Symbol::new("NYSE", "IBM")]).unwrap();
    }

    #[test]
    fn ticks_for_unsubscribed_symbols_are_dropped() {
        let cancel = CancellationToken::new();
        let mut connection = MockLiveConnection::new();
        connection.expect_subscribe().returning(|_| Ok(()));
        connection.expect_unsubscribe().returning(|_| Ok(()));
        let pull_cancel = cancel.clone();
        connection.expect_pull_ticks().returning(move |_| {
            pull_cancel.cancel();
            Ok(vec![
                raw("IBM", "N", TickType::Trade),
                raw("SPY", "P", TickType::Trade),
                raw("VOD", "L", TickType::Trade),
            ])
        });

        let live = source(connection, cancel);
        live.subscribe(&[Symbol::new("NYSE", "IBM"), Symbol::new("ARCA", "SPY")])
            .unwrap();
        live.unsubscribe(&[Symbol::new("ARCA", "SPY")]).unwrap();

        let ticks: Vec<_> = live.get_next_ticks().collect();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, Symbol::new("NYSE", "IBM"));
        assert_eq!(ticks[0].price, Decimal::from(100));
        assert_eq!(ticks[0].size, Decimal::ZERO);
        assert_eq!(ticks[0].tick_type, TickType::Trade);
    }

    #[test]
    fn quote_ticks_use_mid_price() {
        let cancel = CancellationToken::new();
        let mut connection = MockLiveConnection::new();
        connection.expect_subscribe().returning(|_| Ok(()));
        let pull_cancel = cancel.clone();
        connection.expect_pull_ticks().returning(move |_| {
            pull_cancel.cancel();
            Ok(vec![raw("IBM", "N", TickType::Quote)])
        });

        let live = source(connection, cancel);
        live.subscribe(&[Symbol::new("NYSE", "IBM")]).unwrap();

        let ticks: Vec<_> = live.get_next_ticks().collect();
        assert_eq!(ticks[0].price, Decimal::from(100));
        assert_eq!(ticks[0].bid_price, Some(Decimal::from(99)));
        assert_eq!(ticks[0].tick_type, TickType::Quote);
    }

    #[test]
    fn connection_error_ends_stream() {
        let mut connection = MockLiveConnection::new();
        connection
            .expect_pull_ticks()
            .times(1)
            .returning(|_| Err(FeedError::ProviderUnavailable("closed".to_string())));

        let live = source(connection, CancellationToken::new());
        assert_eq!(live.get_next_ticks().count(), 0);
    }

    #[test]
    fn router_fans_out_and_detaches() {
        let cancel = CancellationToken::new();
        let router = TickRouter::new();
        let ibm = Symbol::new("NYSE", "IBM");
        let (a, b) = (SubscriptionId::new(), SubscriptionId::new());
        let (sink_a, stream_a) = enqueueable(cancel.clone(), POLL, 16);
        let (sink_b, stream_b) = enqueueable(cancel, POLL, 16);
        router.attach(ibm.clone(), a, sink_a);
        router.attach(ibm.clone(), b, sink_b);

        let tick = Tick {
            symbol: ibm,
            timestamp_utc: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            price: Decimal::ONE,
            bid_price: None,
            ask_price: None,
            size: Decimal::ONE,
            tick_type: TickType::Trade,
        };
        assert_eq!(router.route(&tick), 2);

        router.detach(a);
        assert_eq!(router.len(), 1);
        assert_eq!(router.route(&tick), 1);

        // detached queue is closed but keeps what it already received
        assert_eq!(stream_a.count(), 1);
        router.close_all();
        assert_eq!(stream_b.count(), 2);
        assert!(router.is_empty());
    }

    #[test]
    fn router_keeps_newest_ticks_for_slow_consumer() {
        let router = TickRouter::new();
        let ibm = Symbol::new("NYSE", "IBM");
        let (sink, stream) = enqueueable(CancellationToken::new(), POLL, 2);
        router.attach(ibm.clone(), SubscriptionId::new(), sink);

        let tick = |price: i64| Tick {
            symbol: ibm.clone(),
            timestamp_utc: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            price: Decimal::from(price),
            bid_price: None,
            ask_price: None,
            size: Decimal::ONE,
            tick_type: TickType::Trade,
        };
        for price in 1..=4 {
            assert_eq!(router.route(&tick(price)), 1);
        }

        router.close_all();
        let prices: Vec<_> = stream.map(|t| t.price).collect();
        assert_eq!(prices, vec![Decimal::from(3), Decimal::from(4)]);
    }
}
