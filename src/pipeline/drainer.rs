//! RateLimitedDrainer: delivers buffered samples to the sink at a bounded rate.
//!
//! One sample per tick. When the queue is empty the drainer blocks on the queue's
//! condition variable and resumes as soon as the reader pushes again, so an idle
//! run costs no polling. The interval can be changed while running; the next
//! tick is always computed from the last delivery and the current interval, and
//! buffered samples are unaffected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info_span};

use super::queue::{IngestionQueue, WaitOutcome};
use crate::error::{AppResult, DaqError};
use crate::measurement::ParsedSample;

/// Receives every sample, in order, at the drainer's cadence.
pub type SampleSink = Arc<dyn Fn(ParsedSample) + Send + Sync>;

/// Upper bound on a single blocking wait, so flag changes are noticed promptly.
const IDLE_WAIT: Duration = Duration::from_millis(50);

struct Shared {
    stop: AtomicBool,
    flush: AtomicBool,
    interval_us: AtomicU64,
    delivered: AtomicU64,
}

/// Handle to the drainer thread.
pub struct RateLimitedDrainer {
    shared: Arc<Shared>,
    queue: IngestionQueue,
    handle: Option<JoinHandle<()>>,
}

impl RateLimitedDrainer {
    /// Start draining `queue` into `sink`, one sample per `interval`.
    pub fn spawn(queue: IngestionQueue, sink: SampleSink, interval: Duration) -> AppResult<Self> {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            flush: AtomicBool::new(false),
            interval_us: AtomicU64::new(duration_to_us(interval)),
            delivered: AtomicU64::new(0),
        });

        let thread_shared = shared.clone();
        let thread_queue = queue.clone();
        let handle = thread::Builder::new()
            .name("drainer".into())
            .spawn(move || {
                let span = info_span!("drainer");
                let _guard = span.enter();
                drain_loop(&thread_shared, &thread_queue, &sink);
            })
            .map_err(|source| DaqError::Thread {
                name: "drainer".into(),
                source,
            })?;

        Ok(Self {
            shared,
            queue,
            handle: Some(handle),
        })
    }

    /// Change the delivery interval. Takes effect at the next tick.
    pub fn set_interval(&self, interval: Duration) {
        self.shared
            .interval_us
            .store(duration_to_us(interval), Ordering::SeqCst);
        self.wake();
    }

    /// Current delivery interval.
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.shared.interval_us.load(Ordering::SeqCst))
    }

    /// Samples delivered so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    /// Whether the drainer thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop delivering. Samples still buffered stay in the queue.
    ///
    /// Returns the number of samples delivered during the drainer's lifetime.
    pub fn stop(&mut self, timeout: Duration) -> u64 {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.wake();
        self.join(timeout);
        self.delivered()
    }

    /// Deliver every buffered sample without throttling, then exit.
    ///
    /// The queue is closed first, so the producer must already be finished. If the
    /// flush does not complete within `timeout` the drainer is stopped and the
    /// remainder stays in the queue.
    pub fn finish(&mut self, timeout: Duration) -> u64 {
        self.shared.flush.store(true, Ordering::SeqCst);
        self.queue.close();
        self.wake();
        if !self.join(timeout) {
            debug!(remaining = self.queue.len(), "Flush timed out, stopping drainer");
            return self.stop(IDLE_WAIT * 2);
        }
        self.delivered()
    }

    fn wake(&self) {
        self.queue.notify();
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                self.handle = Some(handle);
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        if handle.join().is_err() {
            error!("Drainer thread panicked (sink callback failed)");
        }
        true
    }
}

impl Drop for RateLimitedDrainer {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.wake();
    }
}

fn duration_to_us(interval: Duration) -> u64 {
    u64::try_from(interval.as_micros()).unwrap_or(u64::MAX)
}

fn drain_loop(shared: &Shared, queue: &IngestionQueue, sink: &SampleSink) {
    debug!("Drainer started");
    let mut last_delivery: Option<Instant> = None;

    loop {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }

        match queue.wait_for_sample(IDLE_WAIT) {
            WaitOutcome::Ready => {}
            WaitOutcome::TimedOut => continue,
            WaitOutcome::Closed => break,
        }

        if !shared.flush.load(Ordering::SeqCst) {
            if let Some(last) = last_delivery {
                let interval = Duration::from_micros(shared.interval_us.load(Ordering::SeqCst));
                let due = last + interval;
                let now = Instant::now();
                if due > now {
                    thread::park_timeout((due - now).min(IDLE_WAIT));
                    continue;
                }
            }
        }

        if let Some(sample) = queue.pop_if_available() {
            sink(sample);
            shared.delivered.fetch_add(1, Ordering::SeqCst);
            last_delivery = Some(Instant::now());
        }
    }

    debug!(
        delivered = shared.delivered.load(Ordering::SeqCst),
        "Drainer exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collecting_sink() -> (SampleSink, Arc<Mutex<Vec<u64>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = received.clone();
        let sink: SampleSink = Arc::new(move |s: ParsedSample| sink_received.lock().push(s.sequence));
        (sink, received)
    }

    fn sample(seq: u64) -> ParsedSample {
        ParsedSample::new(seq, 17.5, 0.1)
    }

    #[test]
    fn delivers_in_order_at_interval() {
        let queue = IngestionQueue::new();
        for i in 0..5 {
            queue.push(sample(i));
        }
        let (sink, received) = collecting_sink();
        let start = Instant::now();
        let mut drainer =
            RateLimitedDrainer::spawn(queue.clone(), sink, Duration::from_millis(20)).unwrap();

        while drainer.delivered() < 5 {
            assert!(start.elapsed() < Duration::from_secs(5), "drainer stalled");
            thread::sleep(Duration::from_millis(5));
        }
        // Four intervals separate five deliveries.
        assert!(start.elapsed() >= Duration::from_millis(75));
        drainer.stop(Duration::from_secs(1));
        assert_eq!(*received.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn resumes_after_queue_runs_dry() {
        let queue = IngestionQueue::new();
        let (sink, received) = collecting_sink();
        let mut drainer =
            RateLimitedDrainer::spawn(queue.clone(), sink, Duration::from_millis(1)).unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(drainer.delivered(), 0);

        queue.push(sample(7));
        let start = Instant::now();
        while drainer.delivered() < 1 {
            assert!(start.elapsed() < Duration::from_secs(2));
            thread::sleep(Duration::from_millis(1));
        }
        drainer.stop(Duration::from_secs(1));
        assert_eq!(*received.lock(), vec![7]);
    }

    #[test]
    fn interval_change_keeps_buffered_samples() {
        let queue = IngestionQueue::new();
        for i in 0..50 {
            queue.push(sample(i));
        }
        let (sink, received) = collecting_sink();
        let mut drainer =
            RateLimitedDrainer::spawn(queue.clone(), sink, Duration::from_secs(10)).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(drainer.delivered(), 1);

        drainer.set_interval(Duration::from_millis(1));
        assert_eq!(drainer.interval(), Duration::from_millis(1));
        let start = Instant::now();
        while drainer.delivered() < 50 {
            assert!(start.elapsed() < Duration::from_secs(5), "drainer stalled");
            thread::sleep(Duration::from_millis(2));
        }
        drainer.stop(Duration::from_secs(1));
        assert_eq!(*received.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn stop_leaves_remaining_samples_buffered() {
        let queue = IngestionQueue::new();
        for i in 0..10 {
            queue.push(sample(i));
        }
        let (sink, _received) = collecting_sink();
        let mut drainer =
            RateLimitedDrainer::spawn(queue.clone(), sink, Duration::from_secs(10)).unwrap();
        thread::sleep(Duration::from_millis(20));

        let delivered = drainer.stop(Duration::from_secs(1));
        assert!(drainer.is_finished());
        assert_eq!(delivered as usize + queue.len(), 10);
    }

    #[test]
    fn finish_flushes_everything() {
        let queue = IngestionQueue::new();
        for i in 0..200 {
            queue.push(sample(i));
        }
        let (sink, received) = collecting_sink();
        let mut drainer =
            RateLimitedDrainer::spawn(queue.clone(), sink, Duration::from_secs(1)).unwrap();

        let delivered = drainer.finish(Duration::from_secs(5));
        assert_eq!(delivered, 200);
        assert!(queue.is_empty());
        assert_eq!(*received.lock(), (0..200).collect::<Vec<_>>());
    }
}
