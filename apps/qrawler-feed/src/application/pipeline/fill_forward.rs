//! Gap filling for bar streams.
//!
//! [`QuoteFillForward`] patches missing bid or ask sides of quote bars.
//! [`FillForward`] synthesizes flat bars for empty resolution slots while
//! the exchange is open.

use std::iter::Fuse;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::application::pipeline::DataStream;
use crate::domain::market_data::{DataPoint, Ohlc, Resolution};
use crate::domain::subscription::SubscriptionRequest;
use crate::error::FeedResult;
use crate::infrastructure::metrics;

// =============================================================================
// Quote Fill-Forward
// =============================================================================

/// Carries the last known bid and ask sides into quote bars missing one.
pub struct QuoteFillForward {
    inner: DataStream,
    last_bid: Option<Ohlc>,
    last_ask: Option<Ohlc>,
}

impl QuoteFillForward {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: DataStream) -> Self {
        Self {
            inner,
            last_bid: None,
            last_ask: None,
        }
    }
}

impl Iterator for QuoteFillForward {
    type Item = FeedResult<DataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(DataPoint::Quote(mut quote)) => {
                match quote.bid {
                    Some(bid) => self.last_bid = Some(bid),
                    None => quote.bid = self.last_bid.map(|side| Ohlc::flat(side.close)),
                }
                match quote.ask {
                    Some(ask) => self.last_ask = Some(ask),
                    None => quote.ask = self.last_ask.map(|side| Ohlc::flat(side.close)),
                }
                Some(Ok(DataPoint::Quote(quote)))
            }
            other => Some(other),
        }
    }
}

// =============================================================================
// Fill-Forward
// =============================================================================

/// Synthesizes bars for empty slots of the request resolution.
///
/// Slots are laid end to end from the last emitted bar's end. A slot is
/// filled only while the exchange is open during it; closed slots are
/// skipped. Gaps are filled up to the next source bar and, for bounded
/// requests, up to the request end. Ticks and collections pass through and
/// never seed a fill.
pub struct FillForward {
    request: Arc<SubscriptionRequest>,
    inner: Fuse<DataStream>,
    /// Last fillable bar emitted.
    previous: Option<DataPoint>,
    /// Item read from the source but not yet emitted.
    pending: Option<FeedResult<DataPoint>>,
    /// Start of the first slot not yet covered.
    next_slot: Option<DateTime<Utc>>,
}

impl FillForward {
    /// Fill gaps in `inner` at the resolution of `request`.
    #[must_use]
    pub fn new(request: Arc<SubscriptionRequest>, inner: DataStream) -> Self {
        Self {
            request,
            inner: inner.fuse(),
            previous: None,
            pending: None,
            next_slot: None,
        }
    }

    /// End of the slot starting at `start`.
    ///
    /// Daily slots advance one local calendar day so they track DST changes.
    fn slot_end(&self, start: DateTime<Utc>, period: TimeDelta) -> DateTime<Utc> {
        if self.request.resolution == Resolution::Daily {
            let offsets = self.request.offsets();
            offsets.to_utc(offsets.to_local(start) + TimeDelta::days(1))
        } else {
            start + period
        }
    }

    /// Next synthetic bar for slots ending at or before `limit`.
    ///
    /// Closed slots are consumed without output.
    fn fill_until(&mut self, limit: DateTime<Utc>) -> Option<DataPoint> {
        let period = self.request.resolution.period()?;
        let previous = self.previous.as_ref()?;

        while let Some(slot) = self.next_slot {
            let end = self.slot_end(slot, period);
            if end > limit || end <= slot {
                return None;
            }
            self.next_slot = Some(end);

            if self
                .request
                .exchange_hours
                .is_open_between(slot, end, self.request.extended_market_hours)
            {
                let filled = previous.fill_forward(slot, end - slot);
                if filled.is_some() {
                    metrics::record_fill_forward();
                }
                return filled;
            }
        }
        None
    }

    fn emit(&mut self, point: DataPoint) -> DataPoint {
        if matches!(point, DataPoint::Trade(_) | DataPoint::Quote(_)) {
            let end = point.end_time_utc();
            if self.next_slot.is_none_or(|slot| slot < end) {
                self.next_slot = Some(end);
            }
            self.previous = Some(point.clone());
        }
        point
    }
}

impl Iterator for FillForward {
    type Item = FeedResult<DataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_none() {
            self.pending = self.inner.next();
        }

        match self.pending.take() {
            Some(Ok(point)) => {
                if let Some(filled) = self.fill_until(point.start_time_utc()) {
                    self.pending = Some(Ok(point));
                    return Some(Ok(filled));
                }
                Some(Ok(self.emit(point)))
            }
            Some(Err(e)) => Some(Err(e)),
            None => {
                let end = self.request.end_time_utc?;
                self.fill_until(end).map(Ok)
            }
        }
    }
}
