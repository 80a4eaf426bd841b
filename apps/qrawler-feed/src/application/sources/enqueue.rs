//! Push-to-pull bridge.
//!
//! A producer thread pushes items through an [`EnqueueSink`]; the consumer
//! pulls them from the paired [`EnqueueableStream`], blocking in bounded
//! waits so cancellation is observed promptly. The queue holds at most
//! `capacity` items and displaces the oldest when full.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

struct Queue<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
    ready: Condvar,
}

/// Create a connected sink and stream holding at most `capacity` items.
#[must_use]
pub fn enqueueable<T>(
    cancel: CancellationToken,
    poll: Duration,
    capacity: usize,
) -> (EnqueueSink<T>, EnqueueableStream<T>) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(Queue {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            closed: false,
        }),
        ready: Condvar::new(),
    });
    (
        EnqueueSink {
            shared: Arc::clone(&shared),
        },
        EnqueueableStream {
            shared,
            cancel,
            poll,
        },
    )
}

/// Result of [`EnqueueSink::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Enqueued {
    /// Queued.
    Accepted,
    /// Queued after dropping the oldest buffered item.
    DisplacedOldest,
    /// The stream is closed or dropped; the item was discarded.
    Closed,
}

/// Producer half.
pub struct EnqueueSink<T> {
    shared: Arc<Shared<T>>,
}

impl<T> EnqueueSink<T> {
    /// Push an item, dropping the oldest one if the queue is full.
    pub fn enqueue(&self, item: T) -> Enqueued {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            return Enqueued::Closed;
        }
        let outcome = if queue.items.len() >= queue.capacity {
            queue.items.pop_front();
            Enqueued::DisplacedOldest
        } else {
            Enqueued::Accepted
        };
        queue.items.push_back(item);
        drop(queue);
        self.shared.ready.notify_one();
        outcome
    }

    /// Close the stream; buffered items are still delivered.
    pub fn close(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.ready.notify_all();
    }
}

impl<T> Clone for EnqueueSink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Outcome of one bounded wait on the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Pulled<T> {
    /// Next queued item.
    Item(T),
    /// The poll interval passed with nothing queued.
    Idle,
    /// Closed and drained, or cancelled.
    Ended,
}

/// Consumer half. Ends when closed and drained, or when cancelled.
pub struct EnqueueableStream<T> {
    shared: Arc<Shared<T>>,
    cancel: CancellationToken,
    poll: Duration,
}

impl<T> EnqueueableStream<T> {
    fn take(&self, queue: &mut Queue<T>) -> Option<Pulled<T>> {
        if self.cancel.is_cancelled() {
            return Some(Pulled::Ended);
        }
        if let Some(item) = queue.items.pop_front() {
            return Some(Pulled::Item(item));
        }
        queue.closed.then_some(Pulled::Ended)
    }

    /// Wait at most one poll interval for the next item.
    pub fn pull(&mut self) -> Pulled<T> {
        let mut queue = self.shared.queue.lock();
        if let Some(pulled) = Self::take(self, &mut queue) {
            return pulled;
        }
        self.shared.ready.wait_for(&mut queue, self.poll);
        Self::take(self, &mut queue).unwrap_or(Pulled::Idle)
    }

    /// Iterate with idle polls surfaced as `None`.
    #[must_use]
    pub fn polled(self) -> Polled<T> {
        Polled { stream: self }
    }
}

impl<T> Iterator for EnqueueableStream<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            match self.pull() {
                Pulled::Item(item) => return Some(item),
                Pulled::Ended => return None,
                Pulled::Idle => {}
            }
        }
    }
}

impl<T> Drop for EnqueueableStream<T> {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock();
        queue.closed = true;
        queue.items.clear();
    }
}

/// [`EnqueueableStream`] yielding `Some(item)` per item and `None` per
/// idle poll, so a consumer can act on the passage of time.
pub struct Polled<T> {
    stream: EnqueueableStream<T>,
}

impl<T> Iterator for Polled<T> {
    type Item = Option<T>;

    fn next(&mut self) -> Option<Option<T>> {
        match self.stream.pull() {
            Pulled::Item(item) => Some(Some(item)),
            Pulled::Idle => Some(None),
            Pulled::Ended => None,
        }
    }
}
