//! Builds bars of the request resolution from live ticks.
//!
//! The input yields `Some(tick)` per tick and `None` per idle poll. A bar is
//! emitted when a tick from a later slot arrives, when the clock passes the
//! bar's end while the input is idle, or when the input ends. Ticks for a
//! slot that was already emitted are dropped.
//!
//! Trade bars are built from trade ticks and quote bars from quote ticks;
//! ticks of the other kind are ignored.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;

use crate::domain::market_data::{
    Bar, DataPoint, DataType, Ohlc, QuoteBar, Resolution, Tick, TickType,
};
use crate::domain::subscription::SubscriptionRequest;
use crate::error::FeedResult;

/// Running OHLC for one side.
fn update(side: &mut Option<Ohlc>, price: Decimal) {
    match side {
        Some(ohlc) => {
            ohlc.high = ohlc.high.max(price);
            ohlc.low = ohlc.low.min(price);
            ohlc.close = price;
        }
        None => *side = Some(Ohlc::flat(price)),
    }
}

struct Working {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    trade: Option<Ohlc>,
    volume: Decimal,
    bid: Option<Ohlc>,
    ask: Option<Ohlc>,
}

/// Consolidates ticks into bars.
pub struct TickConsolidator<I> {
    request: Arc<SubscriptionRequest>,
    inner: I,
    working: Option<Working>,
    emitted_until: Option<DateTime<Utc>>,
    clock: fn() -> DateTime<Utc>,
}

impl<I> TickConsolidator<I>
where
    I: Iterator<Item = Option<Tick>>,
{
    /// Consolidate `inner` at the resolution of `request`.
    #[must_use]
    pub fn new(request: Arc<SubscriptionRequest>, inner: I) -> Self {
        Self {
            request,
            inner,
            working: None,
            emitted_until: None,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used to close idle bars.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Slot containing `time`.
    ///
    /// Daily slots are local calendar days; others are aligned to the epoch.
    fn slot(&self, time: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let period = self.request.resolution.period()?;
        if self.request.resolution == Resolution::Daily {
            let offsets = self.request.offsets();
            let day = offsets.to_local(time).date();
            let start = offsets.to_utc(day.and_time(chrono::NaiveTime::MIN));
            let end = offsets.to_utc(day.succ_opt()?.and_time(chrono::NaiveTime::MIN));
            return Some((start, end));
        }
        let seconds = period.num_seconds();
        let floor = time.timestamp() - time.timestamp().rem_euclid(seconds);
        let start = DateTime::from_timestamp(floor, 0)?;
        Some((start, start + TimeDelta::seconds(seconds)))
    }

    fn wants(&self, tick: &Tick) -> bool {
        match self.request.data_type {
            DataType::QuoteBar => tick.tick_type == TickType::Quote,
            DataType::TradeBar | DataType::Tick => tick.tick_type == TickType::Trade,
        }
    }

    fn finish(&mut self, working: Working) -> Option<DataPoint> {
        self.emitted_until = Some(working.end);
        let symbol = self.request.symbol.clone();
        if self.request.data_type == DataType::QuoteBar {
            return QuoteBar::spanning(symbol, working.start, working.end, working.bid, working.ask)
                .map(DataPoint::Quote);
        }
        let ohlc = working.trade?;
        Bar::spanning(symbol, working.start, working.end, ohlc, working.volume)
            .map(DataPoint::Trade)
    }

    /// Take the working bar if its period has closed on the clock.
    fn take_closed(&mut self) -> Option<Working> {
        let now = (self.clock)();
        if self.working.as_ref().is_some_and(|working| now >= working.end) {
            return self.working.take();
        }
        None
    }

    fn absorb(working: &mut Working, tick: &Tick) {
        match tick.tick_type {
            TickType::Trade => {
                update(&mut working.trade, tick.price);
                working.volume += tick.size;
            }
            TickType::Quote => {
                if let Some(bid) = tick.bid_price {
                    update(&mut working.bid, bid);
                }
                if let Some(ask) = tick.ask_price {
                    update(&mut working.ask, ask);
                }
            }
        }
    }
}

impl<I> Iterator for TickConsolidator<I>
where
    I: Iterator<Item = Option<Tick>>,
{
    type Item = FeedResult<DataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(polled) = self.inner.next() else {
                let working = self.working.take()?;
                return self.finish(working).map(Ok);
            };
            let Some(tick) = polled.filter(|tick| self.wants(tick)) else {
                if let Some(closed) = self.take_closed()
                    && let Some(point) = self.finish(closed)
                {
                    return Some(Ok(point));
                }
                continue;
            };
            let Some((start, end)) = self.slot(tick.timestamp_utc) else {
                continue;
            };
            let late = self.emitted_until.is_some_and(|until| start < until);

            match self.working.as_mut() {
                Some(working) if working.start == start => Self::absorb(working, &tick),
                Some(working) if start < working.start => {
                    tracing::debug!(
                        symbol = %tick.symbol,
                        time = %tick.timestamp_utc,
                        "Dropping late tick"
                    );
                }
                _ if late => {
                    tracing::debug!(
                        symbol = %tick.symbol,
                        time = %tick.timestamp_utc,
                        "Dropping tick for an emitted bar"
                    );
                }
                _ => {
                    let mut fresh = Working {
                        start,
                        end,
                        trade: None,
                        volume: Decimal::ZERO,
                        bid: None,
                        ask: None,
                    };
                    Self::absorb(&mut fresh, &tick);
                    if let Some(done) = self.working.replace(fresh)
                        && let Some(point) = self.finish(done)
                    {
                        return Some(Ok(point));
                    }
                }
            }
        }
    }
}
