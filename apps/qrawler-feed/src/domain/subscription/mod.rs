//! Subscription Types
//!
//! Domain types describing what a host asks for and how live symbols are
//! shared between subscriptions.
//!
//! # Design
//!
//! - [`SubscriptionRequest`] is immutable once built and shared as an `Arc`
//!   by every stage of the pipeline.
//! - [`UniverseKind`] is the tagged variant source selection dispatches on.
//! - [`UserDefinedUniverse`] publishes membership changes on a channel
//!   instead of invoking callbacks.
//! - [`LiveSymbolRefCounts`] lets several subscriptions share one upstream
//!   live subscription per symbol.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::calendar::{ExchangeHours, TimeZoneOffsetProvider};
use crate::domain::market_data::{DataPoint, DataType, Resolution, Symbol, TickType};

/// Window probed for tradable days when a live request has no end.
const LIVE_TRADABLE_LOOKAHEAD: TimeDelta = TimeDelta::days(7);

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Universes
// =============================================================================

/// Membership change of a user-defined universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniverseChange {
    /// Symbol joined the universe.
    Added(Symbol),
    /// Symbol left the universe.
    Removed(Symbol),
}

/// Host-managed universe whose membership is edited by hand.
///
/// Every effective `add`/`remove` emits a [`UniverseChange`]; the receiver
/// is taken once by the re-selection task.
pub struct UserDefinedUniverse {
    id: String,
    members: RwLock<BTreeSet<Symbol>>,
    changes_tx: mpsc::UnboundedSender<UniverseChange>,
    changes_rx: Mutex<Option<mpsc::UnboundedReceiver<UniverseChange>>>,
}

impl UserDefinedUniverse {
    /// Create an empty universe.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        Self {
            id: id.into(),
            members: RwLock::new(BTreeSet::new()),
            changes_tx,
            changes_rx: Mutex::new(Some(changes_rx)),
        }
    }

    /// Universe identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a member; returns `false` if it was already present.
    pub fn add(&self, symbol: Symbol) -> bool {
        let inserted = self.members.write().insert(symbol.clone());
        if inserted {
            let _ = self.changes_tx.send(UniverseChange::Added(symbol));
        }
        inserted
    }

    /// Remove a member; returns `false` if it was absent.
    pub fn remove(&self, symbol: &Symbol) -> bool {
        let removed = self.members.write().remove(symbol);
        if removed {
            let _ = self.changes_tx.send(UniverseChange::Removed(symbol.clone()));
        }
        removed
    }

    /// Current members.
    #[must_use]
    pub fn members(&self) -> Vec<Symbol> {
        self.members.read().iter().cloned().collect()
    }

    /// Take the change receiver; `None` once taken.
    pub fn take_changes(&self) -> Option<mpsc::UnboundedReceiver<UniverseChange>> {
        self.changes_rx.lock().take()
    }
}

impl fmt::Debug for UserDefinedUniverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDefinedUniverse")
            .field("id", &self.id)
            .field("members", &self.members.read().len())
            .finish_non_exhaustive()
    }
}

/// How a request's data is sourced.
#[derive(Debug, Clone, Default)]
pub enum UniverseKind {
    /// Calendar-driven universe re-evaluation.
    TimeTriggered {
        /// Hand-edited universe whose changes trigger re-selection.
        universe: Option<Arc<UserDefinedUniverse>>,
    },
    /// Coarse fundamental bulk collection.
    CoarseFundamental,
    /// Option chain universe.
    OptionChain,
    /// Futures chain universe.
    FuturesChain,
    /// Plain, non-universe data.
    #[default]
    Plain,
}

impl UniverseKind {
    /// Label used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TimeTriggered { .. } => "time_triggered",
            Self::CoarseFundamental => "coarse_fundamental",
            Self::OptionChain => "option_chain",
            Self::FuturesChain => "futures_chain",
            Self::Plain => "plain",
        }
    }
}

// =============================================================================
// Subscription Request
// =============================================================================

/// User-supplied keep/drop predicate for the filter stage.
pub type DataPredicate = Arc<dyn Fn(&DataPoint) -> bool + Send + Sync>;

/// Everything needed to open one subscription.
#[derive(Clone)]
pub struct SubscriptionRequest {
    /// Requested symbol.
    pub symbol: Symbol,
    /// Bar granularity.
    pub resolution: Resolution,
    /// Tick type (relevant at tick resolution).
    pub tick_type: TickType,
    /// Delivered data shape.
    pub data_type: DataType,
    /// Inclusive start.
    pub start_time_utc: DateTime<Utc>,
    /// Inclusive end; `None` for live, open-ended requests.
    pub end_time_utc: Option<DateTime<Utc>>,
    /// Source kind.
    pub universe: UniverseKind,
    /// Synthesize bars for empty slots.
    pub fill_forward: bool,
    /// Drop points outside exchange hours or failing the predicate.
    pub is_filtered: bool,
    /// Treat extended sessions as open.
    pub extended_market_hours: bool,
    /// Exchange trading hours.
    pub exchange_hours: Arc<ExchangeHours>,
    /// Time zone provider timestamps are expressed in.
    pub data_time_zone: Tz,
    /// Optional user predicate applied by the filter stage.
    pub predicate: Option<DataPredicate>,
}

impl SubscriptionRequest {
    /// Plain trade-bar request with fill-forward and filtering enabled.
    #[must_use]
    pub fn new(
        symbol: Symbol,
        resolution: Resolution,
        start_time_utc: DateTime<Utc>,
        end_time_utc: Option<DateTime<Utc>>,
        exchange_hours: Arc<ExchangeHours>,
    ) -> Self {
        let data_time_zone = exchange_hours.timezone;
        let data_type = if resolution == Resolution::Tick {
            DataType::Tick
        } else {
            DataType::TradeBar
        };
        Self {
            symbol,
            resolution,
            tick_type: TickType::Trade,
            data_type,
            start_time_utc,
            end_time_utc,
            universe: UniverseKind::Plain,
            fill_forward: true,
            is_filtered: true,
            extended_market_hours: false,
            exchange_hours,
            data_time_zone,
            predicate: None,
        }
    }

    /// Set the tick type.
    #[must_use]
    pub const fn with_tick_type(mut self, tick_type: TickType) -> Self {
        self.tick_type = tick_type;
        self
    }

    /// Set the data type.
    #[must_use]
    pub const fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Set the universe kind.
    #[must_use]
    pub fn with_universe(mut self, universe: UniverseKind) -> Self {
        self.universe = universe;
        self
    }

    /// Enable or disable fill-forward.
    #[must_use]
    pub const fn with_fill_forward(mut self, enabled: bool) -> Self {
        self.fill_forward = enabled;
        self
    }

    /// Enable or disable filtering.
    #[must_use]
    pub const fn with_filtered(mut self, enabled: bool) -> Self {
        self.is_filtered = enabled;
        self
    }

    /// Allow extended-hours sessions.
    #[must_use]
    pub const fn with_extended_market_hours(mut self, enabled: bool) -> Self {
        self.extended_market_hours = enabled;
        self
    }

    /// Override the data time zone.
    #[must_use]
    pub const fn with_data_time_zone(mut self, tz: Tz) -> Self {
        self.data_time_zone = tz;
        self
    }

    /// Attach a filter predicate.
    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&DataPoint) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether the request is universe-driven.
    #[must_use]
    pub const fn is_universe(&self) -> bool {
        !matches!(self.universe, UniverseKind::Plain)
    }

    /// Whether the request streams live (no end time).
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.end_time_utc.is_none()
    }

    /// Whether fill-forward applies: enabled and coarser than tick.
    #[must_use]
    pub fn fills_forward(&self) -> bool {
        self.fill_forward && self.resolution != Resolution::Tick
    }

    /// Offset provider for the data time zone.
    #[must_use]
    pub const fn offsets(&self) -> TimeZoneOffsetProvider {
        TimeZoneOffsetProvider::new(self.data_time_zone)
    }

    /// Whether the request range holds at least one tradable exchange date.
    #[must_use]
    pub fn has_tradable_days(&self) -> bool {
        let end = self
            .end_time_utc
            .unwrap_or(self.start_time_utc + LIVE_TRADABLE_LOOKAHEAD);
        if end < self.start_time_utc {
            return false;
        }
        self.exchange_hours
            .has_tradable_day(self.start_time_utc, end, self.extended_market_hours)
    }
}

impl fmt::Debug for SubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRequest")
            .field("symbol", &self.symbol)
            .field("resolution", &self.resolution)
            .field("tick_type", &self.tick_type)
            .field("data_type", &self.data_type)
            .field("start_time_utc", &self.start_time_utc)
            .field("end_time_utc", &self.end_time_utc)
            .field("universe", &self.universe.name())
            .field("fill_forward", &self.fill_forward)
            .field("is_filtered", &self.is_filtered)
            .field("extended_market_hours", &self.extended_market_hours)
            .field("data_time_zone", &self.data_time_zone)
            .field("predicate", &self.predicate.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Live Symbol Reference Counts
// =============================================================================

/// Statistics for live symbol sharing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveSymbolStats {
    /// Unique upstream symbols.
    pub symbol_count: usize,
    /// Live subscriptions.
    pub subscription_count: usize,
}

#[derive(Debug, Default)]
struct RefCountState {
    /// Symbol held by each live subscription.
    holders: HashMap<SubscriptionId, Symbol>,
    /// Holders per symbol.
    refcount: HashMap<Symbol, usize>,
}

/// Reference counts deciding when a live symbol is subscribed upstream.
///
/// # Example
///
/// ```rust
/// use qrawler_feed::domain::market_data::Symbol;
/// use qrawler_feed::domain::subscription::{LiveSymbolRefCounts, SubscriptionId};
///
/// let counts = LiveSymbolRefCounts::new();
/// let (a, b) = (SubscriptionId::new(), SubscriptionId::new());
/// let spy = Symbol::new("ARCA", "SPY");
///
/// assert!(counts.acquire(a, spy.clone()));   // first holder: subscribe upstream
/// assert!(!counts.acquire(b, spy.clone()));  // shared
/// assert_eq!(counts.release(a), None);       // still held by b
/// assert_eq!(counts.release(b), Some(spy));  // last holder: unsubscribe upstream
/// ```
#[derive(Debug, Default)]
pub struct LiveSymbolRefCounts {
    state: RwLock<RefCountState>,
}

impl LiveSymbolRefCounts {
    /// Create empty counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as a holder of `symbol`.
    ///
    /// Returns `true` when this is the first holder (refcount 0 -> 1).
    pub fn acquire(&self, id: SubscriptionId, symbol: Symbol) -> bool {
        let mut state = self.state.write();
        if state.holders.contains_key(&id) {
            return false;
        }
        state.holders.insert(id, symbol.clone());
        let count = state.refcount.entry(symbol).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop `id` as a holder.
    ///
    /// Returns the symbol when its last holder left (refcount 1 -> 0).
    pub fn release(&self, id: SubscriptionId) -> Option<Symbol> {
        let mut state = self.state.write();
        let symbol = state.holders.remove(&id)?;
        let count = state.refcount.get_mut(&symbol)?;
        *count = count.saturating_sub(1);
        if *count == 0 {
            state.refcount.remove(&symbol);
            return Some(symbol);
        }
        None
    }

    /// Symbols with at least one holder.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.state.read().refcount.keys().cloned().collect()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> LiveSymbolStats {
        let state = self.state.read();
        LiveSymbolStats {
            symbol_count: state.refcount.len(),
            subscription_count: state.holders.len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
