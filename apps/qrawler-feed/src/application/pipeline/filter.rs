//! Drops points outside the request range, outside exchange hours, or
//! rejected by the request predicate.

use std::sync::Arc;

use crate::application::pipeline::DataStream;
use crate::domain::market_data::DataPoint;
use crate::domain::subscription::SubscriptionRequest;
use crate::error::FeedResult;
use crate::infrastructure::metrics::{self, FilterReason};

/// Outermost decoration stage.
pub struct Filter {
    request: Arc<SubscriptionRequest>,
    inner: DataStream,
}

impl Filter {
    /// Filter `inner` against `request`.
    #[must_use]
    pub fn new(request: Arc<SubscriptionRequest>, inner: DataStream) -> Self {
        Self { request, inner }
    }

    fn rejection(&self, point: &DataPoint) -> Option<FilterReason> {
        let request = &self.request;

        if let Some(end) = request.end_time_utc
            && point.end_time_utc() > end
        {
            return Some(FilterReason::AfterEnd);
        }

        let hours = &request.exchange_hours;
        let extended = request.extended_market_hours;
        let open = match point {
            DataPoint::Trade(_) | DataPoint::Quote(_) => {
                hours.is_open_between(point.start_time_utc(), point.end_time_utc(), extended)
            }
            DataPoint::Tick(tick) => hours.is_open(tick.timestamp_utc, extended),
            DataPoint::Collection(_) => true,
        };
        if !open {
            return Some(FilterReason::MarketClosed);
        }

        if let Some(predicate) = &request.predicate
            && !predicate(point)
        {
            return Some(FilterReason::Predicate);
        }

        None
    }
}

impl Iterator for Filter {
    type Item = FeedResult<DataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let point = match self.inner.next()? {
                Ok(point) => point,
                Err(e) => return Some(Err(e)),
            };

            match self.rejection(&point) {
                None => return Some(Ok(point)),
                Some(reason) => {
                    tracing::debug!(
                        symbol = %point.symbol(),
                        end_time = %point.end_time_utc(),
                        ?reason,
                        "Filtered data point"
                    );
                    metrics::record_point_filtered(reason);
                }
            }
        }
    }
}
