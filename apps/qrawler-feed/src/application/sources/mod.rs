//! Raw data sources.
//!
//! - [`HistoricalStreamer`]: pull-based replay of provider bars
//! - [`LiveTickSource`]: push-based provider ticks behind a pull interface
//! - [`TickRouter`] and [`enqueueable`]: per-subscription live queues
//! - [`TickConsolidator`]: live ticks to bars

mod consolidate;
mod enqueue;
mod historical;
mod live;

pub use consolidate::TickConsolidator;
pub use enqueue::{EnqueueSink, Enqueued, EnqueueableStream, Polled, Pulled, enqueueable};
pub use historical::{HistoricalStreamer, StreamerPhase};
pub use live::{LiveTickSource, TickRouter, TickStream};
