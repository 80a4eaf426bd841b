//! Data Feed
//!
//! Owns the subscription lifecycle: creation through source selection and
//! pipeline configuration, removal, and orderly shutdown. Also acts as the
//! live queue of the host (`subscribe`, `unsubscribe`, `get_next_ticks`).
//!
//! # Live Routing
//!
//! Live subscriptions share one provider connection. The first live
//! subscription starts the connection and a dispatcher on a blocking thread
//! that drains [`LiveTickSource::get_next_ticks`] into a [`TickRouter`].
//! Upstream symbols are reference counted so the provider subscription is
//! dropped only when the last holder of a symbol goes away. Symbols added
//! directly through `subscribe` count as one holder each.
//!
//! Each live subscription reads from its own queue of at most
//! `queue_capacity` ticks; a slow consumer loses its oldest ticks.
//!
//! # Cancellation
//!
//! Each subscription runs under a child of the feed's token. Removing a
//! subscription cancels its child; `exit` cancels the parent, ending every
//! stream at its next pull. `exit` waits for in-flight `create_subscription`
//! and `subscribe` calls, so nothing they open outlives it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::pipeline::{DataStream, EnumeratorPipeline};
use crate::application::ports::{
    HistoricalEndpoint, HostDiagnostics, LiveConnection, TracingDiagnostics, UniverseSelection,
    UniverseSources,
};
use crate::application::services::selector::{SourceStrategy, select_strategy};
use crate::application::sources::{
    HistoricalStreamer, LiveTickSource, TickConsolidator, TickRouter, TickStream, enqueueable,
};
use crate::domain::calendar::TimeZoneOffsetProvider;
use crate::domain::market_data::{DataPoint, Resolution, Symbol};
use crate::domain::subscription::{
    LiveSymbolRefCounts, LiveSymbolStats, SubscriptionId, SubscriptionRequest, UniverseKind,
    UserDefinedUniverse,
};
use crate::domain::symbol::SymbolTranslator;
use crate::error::{FeedError, FeedResult};
use crate::infrastructure::metrics;

/// Default bound on a single blocking wait for live ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default per-subscription live queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

// =============================================================================
// Collaborators
// =============================================================================

/// External systems the feed talks to.
#[derive(Clone)]
pub struct FeedCollaborators {
    /// Provider push connection.
    pub live: Arc<dyn LiveConnection>,
    /// Provider bulk OHLC endpoint.
    pub historical: Arc<dyn HistoricalEndpoint>,
    /// User-visible error sink.
    pub diagnostics: Arc<dyn HostDiagnostics>,
    /// Universe source factories.
    pub universes: UniverseSources,
    /// Universe re-selection, if the host supports it.
    pub selection: Option<Arc<dyn UniverseSelection>>,
}

impl FeedCollaborators {
    /// Provider adapters with logging diagnostics and no universe support.
    #[must_use]
    pub fn new(live: Arc<dyn LiveConnection>, historical: Arc<dyn HistoricalEndpoint>) -> Self {
        Self {
            live,
            historical,
            diagnostics: Arc::new(TracingDiagnostics),
            universes: UniverseSources::default(),
            selection: None,
        }
    }

    /// Route diagnostics to the host.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn HostDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Register universe source factories.
    #[must_use]
    pub fn with_universe_sources(mut self, universes: UniverseSources) -> Self {
        self.universes = universes;
        self
    }

    /// Register the host's universe selection.
    #[must_use]
    pub fn with_universe_selection(mut self, selection: Arc<dyn UniverseSelection>) -> Self {
        self.selection = Some(selection);
        self
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// One open subscription and its normalized stream.
pub struct Subscription {
    id: SubscriptionId,
    request: Arc<SubscriptionRequest>,
    strategy: SourceStrategy,
    offsets: TimeZoneOffsetProvider,
    cancel: CancellationToken,
    stream: DataStream,
}

impl Subscription {
    /// Subscription identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The request this subscription serves.
    #[must_use]
    pub fn request(&self) -> &SubscriptionRequest {
        &self.request
    }

    /// Selected source strategy.
    #[must_use]
    pub const fn strategy(&self) -> SourceStrategy {
        self.strategy
    }

    /// Data time zone offsets.
    #[must_use]
    pub const fn offsets(&self) -> &TimeZoneOffsetProvider {
        &self.offsets
    }

    /// Whether the subscription was removed or the feed exited.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Iterator for Subscription {
    type Item = FeedResult<DataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("symbol", &self.request.symbol)
            .field("strategy", &self.strategy)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

struct SubscriptionEntry {
    strategy: SourceStrategy,
    cancel: CancellationToken,
}

// =============================================================================
// Data Feed
// =============================================================================

/// Subscription lifecycle over the provider.
pub struct DataFeed {
    translator: SymbolTranslator,
    collaborators: FeedCollaborators,
    live: Arc<LiveTickSource>,
    router: Arc<TickRouter>,
    live_refs: LiveSymbolRefCounts,
    direct_holders: Mutex<HashMap<Symbol, SubscriptionId>>,
    subscriptions: RwLock<HashMap<SubscriptionId, SubscriptionEntry>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
    cancel: CancellationToken,
    lifecycle: RwLock<()>,
    active: AtomicBool,
    poll_interval: Duration,
    queue_capacity: usize,
}

impl DataFeed {
    /// Create an active feed. Background work runs on `runtime`.
    #[must_use]
    pub fn new(
        translator: SymbolTranslator,
        collaborators: FeedCollaborators,
        poll_interval: Duration,
        runtime: Handle,
    ) -> Self {
        let cancel = CancellationToken::new();
        let live = Arc::new(LiveTickSource::new(
            translator.clone(),
            Arc::clone(&collaborators.live),
            poll_interval,
            cancel.clone(),
        ));
        Self {
            translator,
            collaborators,
            live,
            router: Arc::new(TickRouter::new()),
            live_refs: LiveSymbolRefCounts::new(),
            direct_holders: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            dispatcher: Mutex::new(None),
            runtime,
            cancel,
            lifecycle: RwLock::new(()),
            active: AtomicBool::new(true),
            poll_interval,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Bound each live subscription's tick queue.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Whether `exit` has not been called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Live symbol sharing statistics.
    #[must_use]
    pub fn live_stats(&self) -> LiveSymbolStats {
        self.live_refs.stats()
    }

    /// Whether the provider's live connection is up.
    #[must_use]
    pub fn is_live_connected(&self) -> bool {
        self.live.is_connected()
    }

    /// Open a subscription for `request`.
    ///
    /// Returns `Ok(None)` when the request range holds no tradable day; the
    /// host is told through its diagnostics.
    ///
    /// # Errors
    ///
    /// [`FeedError::FeedInactive`] after [`exit`](Self::exit); translation
    /// and validation failures for historical and live requests;
    /// [`FeedError::UniverseSourceUnavailable`] for universe kinds without a
    /// factory; provider errors starting the live connection.
    pub fn create_subscription(
        &self,
        request: SubscriptionRequest,
    ) -> FeedResult<Option<Subscription>> {
        let _lifecycle = self.lifecycle.read();
        if !self.is_active() {
            metrics::record_subscription_rejected("inactive");
            return Err(FeedError::FeedInactive);
        }

        let request = Arc::new(request);
        if !request.has_tradable_days() {
            let symbol = &request.symbol;
            self.collaborators.diagnostics.report_error(&format!(
                "No data loaded for {symbol} because there were no tradable dates for this security."
            ));
            tracing::warn!(
                %symbol,
                error = %FeedError::NoTradableDays(symbol.clone()),
                "Subscription rejected"
            );
            metrics::record_subscription_rejected("no_tradable_days");
            return Ok(None);
        }

        let strategy = select_strategy(&request);
        let id = SubscriptionId::new();
        let cancel = self.cancel.child_token();
        let pipeline = EnumeratorPipeline::new(cancel.clone());

        let source = match self.build_source(id, strategy, &request, &cancel, &pipeline) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(
                    symbol = %request.symbol,
                    %strategy,
                    error = %e,
                    "Failed to create subscription"
                );
                metrics::record_subscription_rejected(e.code().as_str());
                return Err(e);
            }
        };
        let stream = pipeline.configure(&request, false, source);

        let count = {
            let mut subscriptions = self.subscriptions.write();
            subscriptions.insert(
                id,
                SubscriptionEntry {
                    strategy,
                    cancel: cancel.clone(),
                },
            );
            subscriptions.len()
        };
        metrics::record_subscription_created(strategy.as_str());
        metrics::set_active_subscriptions(count);

        tracing::info!(
            subscription_id = %id,
            symbol = %request.symbol,
            resolution = %request.resolution,
            %strategy,
            "Subscription created"
        );

        Ok(Some(Subscription {
            id,
            offsets: request.offsets(),
            request,
            strategy,
            cancel,
            stream,
        }))
    }

    /// Remove `subscription`. Unknown subscriptions are ignored.
    pub fn remove_subscription(&self, subscription: &Subscription) {
        self.remove_subscription_by_id(subscription.id);
    }

    /// Remove a subscription by identifier. Unknown identifiers are ignored.
    pub fn remove_subscription_by_id(&self, id: SubscriptionId) {
        let (entry, count) = {
            let mut subscriptions = self.subscriptions.write();
            let Some(entry) = subscriptions.remove(&id) else {
                return;
            };
            (entry, subscriptions.len())
        };

        entry.cancel.cancel();
        if entry.strategy == SourceStrategy::Live {
            self.router.detach(id);
            if let Some(symbol) = self.live_refs.release(id)
                && let Err(e) = self.live.unsubscribe(std::slice::from_ref(&symbol))
            {
                tracing::warn!(%symbol, error = %e, "Failed to unsubscribe live symbol");
            }
        }
        metrics::set_active_subscriptions(count);
        tracing::info!(subscription_id = %id, "Subscription removed");
    }

    /// Shut the feed down. Only the first call has any effect.
    pub fn exit(&self) {
        let _lifecycle = self.lifecycle.write();
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        tracing::info!("Data feed exiting");
        self.cancel.cancel();
        self.router.close_all();
        self.collaborators.live.stop();
        self.subscriptions.write().clear();
        self.direct_holders.lock().clear();
        metrics::set_active_subscriptions(0);
        tracing::info!("Data feed exited");
    }

    /// Subscribe symbols on the live connection.
    ///
    /// Each symbol is held until [`unsubscribe`](Self::unsubscribe), even
    /// if live subscriptions on it come and go.
    ///
    /// # Errors
    ///
    /// [`FeedError::FeedInactive`] after exit, translation or provider
    /// failures. On failure no symbol is held.
    pub fn subscribe(&self, symbols: &[Symbol]) -> FeedResult<()> {
        let _lifecycle = self.lifecycle.read();
        if !self.is_active() {
            return Err(FeedError::FeedInactive);
        }
        for symbol in symbols {
            self.translator.translate(symbol)?;
        }
        self.collaborators.live.start()?;

        let mut direct = self.direct_holders.lock();
        let mut fresh: Vec<(Symbol, SubscriptionId)> = Vec::new();
        for symbol in symbols {
            if !direct.contains_key(symbol) && !fresh.iter().any(|(held, _)| held == symbol) {
                fresh.push((symbol.clone(), SubscriptionId::new()));
            }
        }
        let upstream: Vec<Symbol> = fresh
            .iter()
            .filter(|(symbol, id)| self.live_refs.acquire(*id, symbol.clone()))
            .map(|(symbol, _)| symbol.clone())
            .collect();

        if let Err(e) = self.live.subscribe(&upstream) {
            for (_, id) in &fresh {
                self.live_refs.release(*id);
            }
            return Err(e);
        }
        direct.extend(fresh);
        Ok(())
    }

    /// Release symbols added through [`subscribe`](Self::subscribe).
    ///
    /// A symbol still used by a live subscription stays subscribed upstream.
    /// Symbols that were not subscribed directly are ignored.
    ///
    /// # Errors
    ///
    /// Provider failures.
    pub fn unsubscribe(&self, symbols: &[Symbol]) -> FeedResult<()> {
        let released: Vec<Symbol> = {
            let mut direct = self.direct_holders.lock();
            symbols
                .iter()
                .filter_map(|symbol| direct.remove(symbol))
                .filter_map(|id| self.live_refs.release(id))
                .collect()
        };
        self.live.unsubscribe(&released)
    }

    /// Ticks for symbols subscribed through [`subscribe`](Self::subscribe).
    ///
    /// Pulls from the same connection as the live dispatcher, so hosts
    /// consuming ticks here should not also open live subscriptions.
    #[must_use]
    pub fn get_next_ticks(&self) -> TickStream {
        self.live.get_next_ticks()
    }

    fn build_source(
        &self,
        id: SubscriptionId,
        strategy: SourceStrategy,
        request: &Arc<SubscriptionRequest>,
        cancel: &CancellationToken,
        pipeline: &EnumeratorPipeline,
    ) -> FeedResult<DataStream> {
        match strategy {
            SourceStrategy::Historical => {
                HistoricalStreamer::validate(request, &self.translator)?;
                Ok(Box::new(HistoricalStreamer::new(
                    Arc::clone(request),
                    self.translator.clone(),
                    Arc::clone(&self.collaborators.historical),
                    cancel.clone(),
                )))
            }
            SourceStrategy::Live => self.open_live(id, request, cancel),
            SourceStrategy::TimeTriggeredUniverse
            | SourceStrategy::CoarseFundamental
            | SourceStrategy::OptionChain
            | SourceStrategy::FuturesChain => {
                let factory = strategy
                    .universe_factory(&self.collaborators.universes)?
                    .ok_or(FeedError::UniverseSourceUnavailable(strategy.as_str()))?;
                if let UniverseKind::TimeTriggered {
                    universe: Some(universe),
                } = &request.universe
                {
                    self.watch_universe(universe);
                }
                factory.create_stream(Arc::clone(request), pipeline.hook())
            }
        }
    }

    fn open_live(
        &self,
        id: SubscriptionId,
        request: &Arc<SubscriptionRequest>,
        cancel: &CancellationToken,
    ) -> FeedResult<DataStream> {
        let symbol = request.symbol.clone();
        self.translator.translate(&symbol)?;
        self.collaborators.live.start()?;

        if self.live_refs.acquire(id, symbol.clone())
            && let Err(e) = self.live.subscribe(std::slice::from_ref(&symbol))
        {
            self.live_refs.release(id);
            return Err(e);
        }

        let (sink, ticks) = enqueueable(cancel.clone(), self.poll_interval, self.queue_capacity);
        self.router.attach(symbol, id, sink);
        self.ensure_dispatcher();

        if request.resolution == Resolution::Tick {
            let tick_type = request.tick_type;
            return Ok(Box::new(
                ticks
                    .filter(move |tick| tick.tick_type == tick_type)
                    .map(|tick| Ok(DataPoint::Tick(tick))),
            ));
        }
        Ok(Box::new(TickConsolidator::new(Arc::clone(request), ticks.polled())))
    }

    fn ensure_dispatcher(&self) {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let live = Arc::clone(&self.live);
        let router = Arc::clone(&self.router);
        *dispatcher = Some(self.runtime.spawn_blocking(move || {
            tracing::info!("Live dispatcher started");
            for tick in live.get_next_ticks() {
                router.route(&tick);
            }
            router.close_all();
            tracing::info!("Live dispatcher stopped");
        }));
    }

    fn watch_universe(&self, universe: &Arc<UserDefinedUniverse>) {
        let Some(selection) = self.collaborators.selection.clone() else {
            tracing::debug!(universe = universe.id(), "No universe selection registered");
            return;
        };
        let Some(mut changes) = universe.take_changes() else {
            return;
        };

        let universe_id = universe.id().to_string();
        let cancel = self.cancel.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    change = changes.recv() => match change {
                        Some(change) => {
                            tracing::debug!(universe = %universe_id, ?change, "Universe changed");
                            selection.on_universe_changed(&universe_id, &change, Utc::now());
                        }
                        None => break,
                    },
                }
            }
        });
    }
}

impl Drop for DataFeed {
    fn drop(&mut self) {
        self.exit();
    }
}

impl fmt::Debug for DataFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFeed")
            .field("active", &self.is_active())
            .field("subscriptions", &self.subscription_count())
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use chrono::{DateTime, NaiveDate, TimeZone};
    use mockall::Sequence;
    use rust_decimal::Decimal;
    use tokio::runtime::Runtime;

    use super::*;
    use crate::application::ports::{
        MockHistoricalEndpoint, MockHostDiagnostics, MockLiveConnection, ProviderOhlcRecord,
    };
    use crate::domain::calendar::ExchangeHours;
    use crate::domain::symbol::FeedMap;

    fn translator() -> SymbolTranslator {
        SymbolTranslator::new(Arc::new(FeedMap::new([("NYSE", "N")]).unwrap()))
    }

    fn utc(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    fn feed(runtime: &Runtime, collaborators: FeedCollaborators) -> DataFeed {
        DataFeed::new(
            translator(),
            collaborators,
            Duration::from_millis(5),
            runtime.handle().clone(),
        )
    }

    fn idle_live() -> MockLiveConnection {
        let mut live = MockLiveConnection::new();
        live.expect_stop().return_const(());
        live
    }

    fn daily(start: DateTime<Utc>, end: DateTime<Utc>) -> SubscriptionRequest {
        SubscriptionRequest::new(
            Symbol::new("NYSE", "IBM"),
            Resolution::Daily,
            start,
            Some(end),
            Arc::new(ExchangeHours::us_equity()),
        )
    }

    #[test]
    fn historical_subscription_replays_bars() {
        let runtime = Runtime::new().unwrap();
        let mut historical = MockHistoricalEndpoint::new();
        historical.expect_fetch_ohlc().times(1).returning(|_| {
            let midnight = |d| {
                NaiveDate::from_ymd_opt(2024, 1, d)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            };
            Ok((2..4)
                .map(|d| ProviderOhlcRecord {
                    start_time: midnight(d),
                    end_time: midnight(d + 1),
                    open: Decimal::ONE,
                    high: Decimal::TWO,
                    low: Decimal::ONE,
                    close: Decimal::TWO,
                    volume: Some(Decimal::TEN),
                })
                .collect())
        });

        let feed = feed(
            &runtime,
            FeedCollaborators::new(Arc::new(idle_live()), Arc::new(historical)),
        );
        let subscription = feed
            .create_subscription(daily(utc(2, 0), utc(4, 5)))
            .unwrap()
            .unwrap();
        assert_eq!(subscription.strategy(), SourceStrategy::Historical);
        assert_eq!(feed.subscription_count(), 1);

        let points: Vec<_> = subscription.collect::<FeedResult<_>>().unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| !p.is_fill_forward()));
    }

    #[test]
    fn no_tradable_days_reports_and_declines() {
        let runtime = Runtime::new().unwrap();
        let mut historical = MockHistoricalEndpoint::new();
        historical.expect_fetch_ohlc().never();
        let mut diagnostics = MockHostDiagnostics::new();
        diagnostics
            .expect_report_error()
            .withf(|message| message.contains("NYSE:IBM"))
            .times(1)
            .return_const(());

        let feed = feed(
            &runtime,
            FeedCollaborators::new(Arc::new(idle_live()), Arc::new(historical))
                .with_diagnostics(Arc::new(diagnostics)),
        );
        // Saturday to Sunday.
        let created = feed.create_subscription(daily(utc(6, 12), utc(7, 20))).unwrap();
        assert!(created.is_none());
        assert_eq!(feed.subscription_count(), 0);
    }

    #[test]
    fn unmapped_exchange_fails_fast() {
        let runtime = Runtime::new().unwrap();
        let mut historical = MockHistoricalEndpoint::new();
        historical.expect_fetch_ohlc().never();
        let feed = feed(
            &runtime,
            FeedCollaborators::new(Arc::new(idle_live()), Arc::new(historical)),
        );

        let mut request = daily(utc(2, 0), utc(4, 0));
        request.symbol = Symbol::new("LSE", "VOD");
        assert!(matches!(
            feed.create_subscription(request),
            Err(FeedError::UnmappedExchange { .. })
        ));
    }

    #[test]
    fn universe_without_factory_is_unavailable() {
        let runtime = Runtime::new().unwrap();
        let feed = feed(
            &runtime,
            FeedCollaborators::new(
                Arc::new(idle_live()),
                Arc::new(MockHistoricalEndpoint::new()),
            ),
        );
        let request = daily(utc(2, 0), utc(4, 0)).with_universe(UniverseKind::CoarseFundamental);
        assert!(matches!(
            feed.create_subscription(request),
            Err(FeedError::UniverseSourceUnavailable("coarse_fundamental"))
        ));
    }

    #[test]
    fn exit_is_idempotent_and_final() {
        let runtime = Runtime::new().unwrap();
        let mut live = MockLiveConnection::new();
        live.expect_stop().times(1).return_const(());

        let feed = feed(
            &runtime,
            FeedCollaborators::new(Arc::new(live), Arc::new(MockHistoricalEndpoint::new())),
        );
        feed.exit();
        feed.exit();
        assert!(!feed.is_active());
        assert!(matches!(
            feed.create_subscription(daily(utc(2, 0), utc(4, 0))),
            Err(FeedError::FeedInactive)
        ));
        drop(feed);
    }

    #[test]
    fn removing_unknown_subscription_is_no_op() {
        let runtime = Runtime::new().unwrap();
        let feed = feed(
            &runtime,
            FeedCollaborators::new(
                Arc::new(idle_live()),
                Arc::new(MockHistoricalEndpoint::new()),
            ),
        );
        feed.remove_subscription_by_id(SubscriptionId::new());
        assert_eq!(feed.subscription_count(), 0);
    }

    #[test]
    fn removed_subscription_stream_ends() {
        let runtime = Runtime::new().unwrap();
        let mut historical = MockHistoricalEndpoint::new();
        historical.expect_fetch_ohlc().never();
        let feed = feed(
            &runtime,
            FeedCollaborators::new(Arc::new(idle_live()), Arc::new(historical)),
        );

        let mut subscription = feed
            .create_subscription(daily(utc(2, 0), utc(4, 0)))
            .unwrap()
            .unwrap();
        feed.remove_subscription(&subscription);
        assert!(subscription.is_cancelled());
        assert!(subscription.next().is_none());
        assert_eq!(feed.subscription_count(), 0);
    }

    #[test]
    fn exit_waits_for_subscription_in_flight_then_tears_it_down() {
        let runtime = Runtime::new().unwrap();
        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let mut seq = Sequence::new();
        let mut live = MockLiveConnection::new();
        live.expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || {
                let _ = entered_tx.send(());
                let _ = release_rx.lock().recv();
                Ok(())
            });
        live.expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        live.expect_subscribe().returning(|_| Ok(()));
        live.expect_pull_ticks().returning(|wait| {
            thread::sleep(wait);
            Ok(Vec::new())
        });

        let feed = feed(
            &runtime,
            FeedCollaborators::new(Arc::new(live), Arc::new(MockHistoricalEndpoint::new())),
        );
        let request = SubscriptionRequest::new(
            Symbol::new("NYSE", "IBM"),
            Resolution::Tick,
            Utc::now(),
            None,
            Arc::new(ExchangeHours::always_open()),
        );

        thread::scope(|scope| {
            let creating = scope.spawn(|| feed.create_subscription(request));
            entered.recv().unwrap();

            let exiting = scope.spawn(|| feed.exit());
            thread::sleep(Duration::from_millis(50));
            // exit is parked behind the in-flight creation
            assert!(feed.is_active());

            release.send(()).unwrap();
            let mut subscription = creating.join().unwrap().unwrap().unwrap();
            exiting.join().unwrap();

            assert!(!feed.is_active());
            assert!(subscription.is_cancelled());
            assert!(subscription.next().is_none());
            assert_eq!(feed.subscription_count(), 0);
        });
    }
}
