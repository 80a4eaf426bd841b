//! Groups consecutive points sharing an end time into one collection.

use std::iter::Fuse;

use crate::application::pipeline::DataStream;
use crate::domain::market_data::{DataCollection, DataPoint, Symbol};
use crate::error::FeedResult;

/// Emits one [`DataCollection`] per run of equal end times.
///
/// Reads one item past each run to detect its end; that item is held and
/// starts the next run. An error ends the current run and is yielded after it.
pub struct Aggregator {
    symbol: Symbol,
    inner: Fuse<DataStream>,
    pending: Option<FeedResult<DataPoint>>,
}

impl Aggregator {
    /// Aggregate `inner`, keying collections on `symbol`.
    #[must_use]
    pub fn new(symbol: Symbol, inner: DataStream) -> Self {
        Self {
            symbol,
            inner: inner.fuse(),
            pending: None,
        }
    }
}

impl Iterator for Aggregator {
    type Item = FeedResult<DataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.pending.take().or_else(|| self.inner.next())? {
            Ok(point) => point,
            Err(e) => return Some(Err(e)),
        };

        let end_time_utc = first.end_time_utc();
        let mut points = vec![first];
        loop {
            match self.inner.next() {
                Some(Ok(point)) if point.end_time_utc() == end_time_utc => points.push(point),
                other => {
                    self.pending = other;
                    break;
                }
            }
        }

        Some(Ok(DataPoint::Collection(DataCollection {
            symbol: self.symbol.clone(),
            end_time_utc,
            points,
        })))
    }
}
