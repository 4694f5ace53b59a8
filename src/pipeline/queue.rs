//! Unbounded single-producer/single-consumer FIFO for parsed samples.
//!
//! Growth is unbounded on purpose: acquisition runs are finite and dropping a
//! sample is never acceptable. The consumer can block on
//! [`IngestionQueue::wait_for_sample`] instead of polling an empty queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::measurement::ParsedSample;

/// Result of waiting on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// At least one sample is buffered.
    Ready,
    /// Timeout elapsed with the queue still empty.
    TimedOut,
    /// The queue was closed and is empty.
    Closed,
}

struct State {
    items: VecDeque<ParsedSample>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
    pushed: AtomicU64,
    popped: AtomicU64,
}

/// Thread-safe FIFO shared by exactly one producer and one consumer.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct IngestionQueue(Arc<Shared>);

impl Default for IngestionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self(Arc::new(Shared {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
        }))
    }

    /// Append a sample at the tail and wake a waiting consumer. Never blocks on capacity.
    pub fn push(&self, sample: ParsedSample) {
        let mut state = self.0.state.lock();
        state.items.push_back(sample);
        self.0.pushed.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.0.available.notify_one();
    }

    /// Remove the head sample if there is one.
    pub fn pop_if_available(&self) -> Option<ParsedSample> {
        let sample = self.0.state.lock().items.pop_front();
        if sample.is_some() {
            self.0.popped.fetch_add(1, Ordering::Relaxed);
        }
        sample
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.0.state.lock().items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until a sample is buffered, the queue is closed, or `timeout` elapses.
    ///
    /// A closed queue that still holds samples reports `Ready` so that buffered
    /// samples can be flushed.
    pub fn wait_for_sample(&self, timeout: Duration) -> WaitOutcome {
        let mut state = self.0.state.lock();
        if !state.items.is_empty() {
            return WaitOutcome::Ready;
        }
        if state.closed {
            return WaitOutcome::Closed;
        }
        let _ = self.0.available.wait_for(&mut state, timeout);
        if !state.items.is_empty() {
            WaitOutcome::Ready
        } else if state.closed {
            WaitOutcome::Closed
        } else {
            WaitOutcome::TimedOut
        }
    }

    /// Close the queue, waking every waiter. Buffered samples stay poppable.
    pub fn close(&self) {
        self.0.state.lock().closed = true;
        self.0.available.notify_all();
    }

    /// Wake waiters without closing, used when the consumer must re-check its own flags.
    pub fn notify(&self) {
        self.0.available.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.0.state.lock().closed
    }

    /// Remove and return every buffered sample in FIFO order.
    pub fn drain_all(&self) -> Vec<ParsedSample> {
        let drained: Vec<_> = self.0.state.lock().items.drain(..).collect();
        self.0
            .popped
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    /// Total samples ever pushed.
    pub fn total_pushed(&self) -> u64 {
        self.0.pushed.load(Ordering::Relaxed)
    }

    /// Total samples ever removed (popped or drained).
    pub fn total_popped(&self) -> u64 {
        self.0.popped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for IngestionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionQueue")
            .field("len", &self.len())
            .field("pushed", &self.total_pushed())
            .field("popped", &self.total_popped())
            .finish()
    }
}
