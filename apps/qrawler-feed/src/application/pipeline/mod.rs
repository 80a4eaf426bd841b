//! Enumerator Pipeline
//!
//! Lazy decoration stages applied to every raw source, innermost first:
//!
//! ```text
//! source ─► Aggregator ─► QuoteFillForward ─► FillForward ─► Filter ─► CancellationGuard
//!           (aggregate)   (quote bars)        (bars)         (filtered)
//! ```
//!
//! Each stage is an iterator over `FeedResult<DataPoint>` that pulls from the
//! stage below it. Errors pass through every stage untouched; what a stage
//! does after forwarding an error is up to the source, which ends itself.

mod aggregate;
mod fill_forward;
mod filter;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use aggregate::Aggregator;
pub use fill_forward::{FillForward, QuoteFillForward};
pub use filter::Filter;

use crate::domain::market_data::{DataPoint, DataType};
use crate::domain::subscription::SubscriptionRequest;
use crate::error::FeedResult;

/// Boxed lazy sequence yielded by sources and pipeline stages.
pub type DataStream = Box<dyn Iterator<Item = FeedResult<DataPoint>> + Send>;

/// Re-entry point that decorates a child source with the full pipeline.
pub type PipelineHook =
    Arc<dyn Fn(Arc<SubscriptionRequest>, DataStream) -> DataStream + Send + Sync>;

// =============================================================================
// Pipeline
// =============================================================================

/// Composes the decoration stages for a request.
#[derive(Debug, Clone)]
pub struct EnumeratorPipeline {
    cancel: CancellationToken,
}

impl EnumeratorPipeline {
    /// Pipeline whose streams end when `cancel` fires.
    #[must_use]
    pub const fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Wrap `source` with the stages `request` calls for.
    #[must_use]
    pub fn configure(
        &self,
        request: &Arc<SubscriptionRequest>,
        aggregate: bool,
        source: DataStream,
    ) -> DataStream {
        let mut stream = source;

        if aggregate {
            stream = Box::new(Aggregator::new(request.symbol.clone(), stream));
        }

        if request.fills_forward() {
            if request.data_type == DataType::QuoteBar {
                stream = Box::new(QuoteFillForward::new(stream));
            }
            stream = Box::new(FillForward::new(Arc::clone(request), stream));
        }

        if request.is_filtered {
            stream = Box::new(Filter::new(Arc::clone(request), stream));
        }

        Box::new(CancellationGuard::new(stream, self.cancel.clone()))
    }

    /// Hook that runs child sources through this pipeline with aggregation.
    #[must_use]
    pub fn hook(&self) -> PipelineHook {
        let pipeline = self.clone();
        Arc::new(move |request, source| pipeline.configure(&request, true, source))
    }
}

// =============================================================================
// Cancellation Guard
// =============================================================================

/// Ends the inner stream once the token is cancelled.
pub struct CancellationGuard {
    inner: DataStream,
    cancel: CancellationToken,
}

impl CancellationGuard {
    /// Guard `inner` with `cancel`.
    #[must_use]
    pub fn new(inner: DataStream, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

impl Iterator for CancellationGuard {
    type Item = FeedResult<DataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.inner.next()
    }
}

// =============================================================================
// Tests
// =============================================================================
