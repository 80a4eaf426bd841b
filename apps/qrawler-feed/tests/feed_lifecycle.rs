//! Data Feed Lifecycle Integration Tests
//!
//! Drives `DataFeed` through its public API against in-process provider
//! fakes: live routing, symbol sharing, historical replay and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::{Condvar, Mutex};
use rust_decimal::Decimal;
use tokio::runtime::Runtime;

use qrawler_feed::application::ports::{
    HistoricalEndpoint, LiveConnection, OhlcQuery, ProviderOhlcRecord, ProviderTick,
};
use qrawler_feed::{
    DataFeed, DataPoint, ExchangeHours, FeedCollaborators, FeedError, FeedMap, FeedResult,
    ProviderSymbolRef, Resolution, SourceStrategy, SubscriptionRequest, Symbol, SymbolTranslator,
    TickType,
};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct LiveState {
    starts: usize,
    stops: usize,
    subscribe_calls: Vec<Vec<ProviderSymbolRef>>,
    unsubscribe_calls: Vec<Vec<ProviderSymbolRef>>,
    pending: VecDeque<ProviderTick>,
}

#[derive(Default)]
struct FakeLive {
    state: Mutex<LiveState>,
    ready: Condvar,
}

impl FakeLive {
    fn push(&self, tick: ProviderTick) {
        self.state.lock().pending.push_back(tick);
        self.ready.notify_all();
    }

    fn subscribe_calls(&self) -> Vec<Vec<ProviderSymbolRef>> {
        self.state.lock().subscribe_calls.clone()
    }

    fn unsubscribe_calls(&self) -> Vec<Vec<ProviderSymbolRef>> {
        self.state.lock().unsubscribe_calls.clone()
    }
}

impl LiveConnection for FakeLive {
    fn start(&self) -> FeedResult<()> {
        self.state.lock().starts += 1;
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().stops += 1;
        self.ready.notify_all();
    }

    fn subscribe(&self, symbols: &[ProviderSymbolRef]) -> FeedResult<()> {
        self.state.lock().subscribe_calls.push(symbols.to_vec());
        Ok(())
    }

    fn unsubscribe(&self, symbols: &[ProviderSymbolRef]) -> FeedResult<()> {
        self.state.lock().unsubscribe_calls.push(symbols.to_vec());
        Ok(())
    }

    fn pull_ticks(&self, wait: Duration) -> FeedResult<Vec<ProviderTick>> {
        let mut state = self.state.lock();
        if state.pending.is_empty() && state.stops == 0 {
            self.ready.wait_for(&mut state, wait);
        }
        if state.pending.is_empty() && state.stops > 0 {
            return Err(FeedError::ProviderUnavailable("stopped".to_string()));
        }
        Ok(state.pending.drain(..).collect())
    }
}

#[derive(Default)]
struct FakeHistorical {
    queries: Mutex<Vec<OhlcQuery>>,
    records: Vec<ProviderOhlcRecord>,
}

impl HistoricalEndpoint for FakeHistorical {
    fn fetch_ohlc(&self, query: &OhlcQuery) -> FeedResult<Vec<ProviderOhlcRecord>> {
        self.queries.lock().push(query.clone());
        Ok(self.records.clone())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn translator() -> SymbolTranslator {
    SymbolTranslator::new(Arc::new(
        FeedMap::new([("NYSE", "XNYS"), ("BINANCE", "BNC")]).unwrap(),
    ))
}

fn feed(runtime: &Runtime, live: &Arc<FakeLive>, historical: Arc<FakeHistorical>) -> DataFeed {
    let live: Arc<dyn LiveConnection> = Arc::clone(live) as Arc<dyn LiveConnection>;
    DataFeed::new(
        translator(),
        FeedCollaborators::new(live, historical),
        Duration::from_millis(10),
        runtime.handle().clone(),
    )
}

fn btc() -> Symbol {
    Symbol::new("BINANCE", "BTCUSDT")
}

fn live_ticks(tick_type: TickType) -> SubscriptionRequest {
    SubscriptionRequest::new(
        btc(),
        Resolution::Tick,
        Utc::now(),
        None,
        Arc::new(ExchangeHours::always_open()),
    )
    .with_tick_type(tick_type)
}

fn trade(last: i64) -> ProviderTick {
    ProviderTick {
        ticker: "BTCUSDT".to_string(),
        feed_code: "BNC".to_string(),
        time: Utc::now(),
        kind: TickType::Trade,
        last: Some(Decimal::from(last)),
        bid: None,
        ask: None,
        volume: Some(Decimal::ONE),
    }
}

fn quote(bid: i64, ask: i64) -> ProviderTick {
    ProviderTick {
        kind: TickType::Quote,
        last: None,
        bid: Some(Decimal::from(bid)),
        ask: Some(Decimal::from(ask)),
        volume: None,
        ..trade(0)
    }
}

fn tick_price(point: &DataPoint) -> Decimal {
    match point {
        DataPoint::Tick(tick) => tick.price,
        other => panic!("expected tick, got {other:?}"),
    }
}

fn utc(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
}

// =============================================================================
// Live
// =============================================================================

#[test]
fn live_tick_subscription_receives_matching_ticks() {
    let runtime = Runtime::new().unwrap();
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::default());

    let mut subscription = feed
        .create_subscription(live_ticks(TickType::Trade))
        .unwrap()
        .unwrap();
    assert_eq!(subscription.strategy(), SourceStrategy::Live);
    assert_eq!(
        live.subscribe_calls(),
        vec![vec![ProviderSymbolRef::new("BTCUSDT", "BNC")]]
    );

    live.push(trade(100));
    live.push(quote(99, 101));
    live.push(trade(102));

    let first = subscription.next().unwrap().unwrap();
    let second = subscription.next().unwrap().unwrap();
    assert_eq!(tick_price(&first), Decimal::from(100));
    assert_eq!(tick_price(&second), Decimal::from(102));

    feed.exit();
}

#[test]
fn quote_subscription_gets_mid_price() {
    let runtime = Runtime::new().unwrap();
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::default());

    let mut subscription = feed
        .create_subscription(live_ticks(TickType::Quote))
        .unwrap()
        .unwrap();

    live.push(trade(100));
    live.push(quote(99, 101));

    let point = subscription.next().unwrap().unwrap();
    assert_eq!(tick_price(&point), Decimal::from(100));
    match point {
        DataPoint::Tick(tick) => {
            assert_eq!(tick.tick_type, TickType::Quote);
            assert_eq!(tick.bid_price, Some(Decimal::from(99)));
        }
        other => panic!("expected tick, got {other:?}"),
    }

    feed.exit();
}

#[test]
fn shared_symbol_is_subscribed_once_and_released_last() {
    let runtime = Runtime::new().unwrap();
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::default());

    let mut first = feed
        .create_subscription(live_ticks(TickType::Trade))
        .unwrap()
        .unwrap();
    let mut second = feed
        .create_subscription(live_ticks(TickType::Trade))
        .unwrap()
        .unwrap();

    assert_eq!(live.subscribe_calls().len(), 1);
    let stats = feed.live_stats();
    assert_eq!(stats.symbol_count, 1);
    assert_eq!(stats.subscription_count, 2);

    live.push(trade(7));
    assert_eq!(tick_price(&first.next().unwrap().unwrap()), Decimal::from(7));
    assert_eq!(tick_price(&second.next().unwrap().unwrap()), Decimal::from(7));

    feed.remove_subscription(&first);
    assert!(first.next().is_none());
    assert!(live.unsubscribe_calls().is_empty());
    assert_eq!(feed.live_stats().symbol_count, 1);

    feed.remove_subscription(&second);
    assert_eq!(
        live.unsubscribe_calls(),
        vec![vec![ProviderSymbolRef::new("BTCUSDT", "BNC")]]
    );
    assert_eq!(feed.live_stats().symbol_count, 0);
    assert_eq!(feed.subscription_count(), 0);

    feed.exit();
}

#[test]
fn direct_subscribe_feeds_next_ticks() {
    let runtime = Runtime::new().unwrap();
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::default());

    feed.subscribe(&[btc(), btc()]).unwrap();
    assert_eq!(
        live.subscribe_calls(),
        vec![vec![ProviderSymbolRef::new("BTCUSDT", "BNC")]]
    );

    live.push(ProviderTick {
        ticker: "ETHUSDT".to_string(),
        ..trade(1)
    });
    live.push(trade(5));

    let tick = feed.get_next_ticks().next().unwrap();
    assert_eq!(tick.symbol, btc());
    assert_eq!(tick.price, Decimal::from(5));

    feed.unsubscribe(&[btc()]).unwrap();
    assert_eq!(live.unsubscribe_calls().len(), 1);

    feed.exit();
}

#[test]
fn direct_subscription_outlives_last_live_subscription() {
    let runtime = Runtime::new().unwrap();
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::default());

    feed.subscribe(&[btc()]).unwrap();
    let subscription = feed
        .create_subscription(live_ticks(TickType::Trade))
        .unwrap()
        .unwrap();
    assert_eq!(live.subscribe_calls().len(), 1);
    assert_eq!(feed.live_stats().subscription_count, 2);

    feed.remove_subscription(&subscription);
    assert!(live.unsubscribe_calls().is_empty());
    assert_eq!(feed.live_stats().symbol_count, 1);

    feed.unsubscribe(&[btc()]).unwrap();
    assert_eq!(
        live.unsubscribe_calls(),
        vec![vec![ProviderSymbolRef::new("BTCUSDT", "BNC")]]
    );
    assert_eq!(feed.live_stats().symbol_count, 0);

    feed.exit();
}

#[test]
fn direct_unsubscribe_keeps_symbol_for_live_subscription() {
    let runtime = Runtime::new().unwrap();
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::default());

    let mut subscription = feed
        .create_subscription(live_ticks(TickType::Trade))
        .unwrap()
        .unwrap();
    feed.subscribe(&[btc()]).unwrap();
    feed.unsubscribe(&[btc()]).unwrap();
    assert!(live.unsubscribe_calls().is_empty());

    live.push(trade(3));
    assert_eq!(
        tick_price(&subscription.next().unwrap().unwrap()),
        Decimal::from(3)
    );

    feed.remove_subscription(&subscription);
    assert_eq!(live.unsubscribe_calls().len(), 1);

    feed.exit();
}

#[test]
fn unmapped_live_symbol_is_rejected_before_subscribing() {
    let runtime = Runtime::new().unwrap();
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::default());

    let mut request = live_ticks(TickType::Trade);
    request.symbol = Symbol::new("LSE", "VOD");

    assert!(matches!(
        feed.create_subscription(request),
        Err(FeedError::UnmappedExchange { .. })
    ));
    assert!(live.subscribe_calls().is_empty());
    assert_eq!(feed.subscription_count(), 0);
}

// =============================================================================
// Historical
// =============================================================================

#[test]
fn historical_subscription_queries_provider_symbol() {
    let runtime = Runtime::new().unwrap();
    let midnight = |d| {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    };
    let historical = Arc::new(FakeHistorical {
        queries: Mutex::default(),
        records: vec![ProviderOhlcRecord {
            start_time: midnight(2),
            end_time: midnight(3),
            open: Decimal::ONE,
            high: Decimal::TWO,
            low: Decimal::ONE,
            close: Decimal::TWO,
            volume: None,
        }],
    });
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::clone(&historical));

    let request = SubscriptionRequest::new(
        Symbol::new("NYSE", "IBM"),
        Resolution::Daily,
        utc(2, 0),
        Some(utc(3, 5)),
        Arc::new(ExchangeHours::us_equity()),
    );
    let subscription = feed.create_subscription(request).unwrap().unwrap();
    assert_eq!(subscription.strategy(), SourceStrategy::Historical);

    let points: Vec<_> = subscription.collect::<FeedResult<_>>().unwrap();
    assert_eq!(points.len(), 1);

    let queries = historical.queries.lock();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].ticker, "IBM");
    assert_eq!(queries[0].feed_code, "XNYS");
    assert!(live.subscribe_calls().is_empty());
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn exit_ends_live_streams_and_stops_once() {
    let runtime = Runtime::new().unwrap();
    let live = Arc::new(FakeLive::default());
    let feed = feed(&runtime, &live, Arc::default());

    let mut subscription = feed
        .create_subscription(live_ticks(TickType::Trade))
        .unwrap()
        .unwrap();

    feed.exit();
    feed.exit();

    assert!(!feed.is_active());
    assert!(subscription.is_cancelled());
    assert!(subscription.next().is_none());
    assert_eq!(live.state.lock().stops, 1);
    assert_eq!(feed.subscription_count(), 0);

    assert!(matches!(
        feed.create_subscription(live_ticks(TickType::Trade)),
        Err(FeedError::FeedInactive)
    ));
    assert!(matches!(feed.subscribe(&[btc()]), Err(FeedError::FeedInactive)));
}
