//! Application Services
//!
//! - [`select_strategy`]: routes a request to its source strategy
//! - [`DataFeed`]: subscription lifecycle and live queue

mod feed;
mod selector;

pub use feed::{
    DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY, DataFeed, FeedCollaborators, Subscription,
};
pub use selector::{SourceStrategy, select_strategy};
