//! StreamReader: turns a child's stdout into parsed samples.
//!
//! Two threads cooperate per reader:
//!
//! - the **pump** does the blocking `read_until(b'\n')` on the pipe and forwards raw
//!   lines over a channel; it ends at EOF or on a read error.
//! - the **reader** waits on that channel with a bounded timeout, so a stop request
//!   is honoured within one poll period even when the child is silent. It parses
//!   each line, pushes samples into the [`IngestionQueue`] and reports telemetry.
//!
//! Lines are decoded with the configured code page (GBK by default); malformed
//! sequences become U+FFFD and never abort the loop. Parse failures are counted, and only the first
//! `max_reported_failures` of them are reported individually.

use encoding_rs::Encoding;
use parking_lot::Mutex;
use serde::Serialize;
use std::borrow::Cow;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn};

use super::queue::IngestionQueue;
use crate::config::PipelineConfig;
use crate::error::{AppResult, DaqError};
use crate::events::{EventBus, PipelineEvent};
use crate::measurement::LineParser;

/// Reader settings.
#[derive(Debug, Clone)]
pub struct StreamReaderConfig {
    /// Parser bound to the run's depth step
    pub parser: LineParser,
    /// Code page of the incoming bytes
    pub encoding: &'static Encoding,
    /// Channel poll timeout; bounds stop latency
    pub poll_timeout: Duration,
    /// Parse failures reported individually before suppression
    pub max_reported_failures: usize,
    /// Progress event period, in samples
    pub progress_every: u64,
}

impl StreamReaderConfig {
    /// Derive reader settings from the pipeline configuration.
    ///
    /// Fails on an unknown `acquisition.encoding` label.
    pub fn from_config(config: &PipelineConfig) -> AppResult<Self> {
        Ok(Self {
            parser: LineParser::new(config.parser.depth_step),
            encoding: config.acquisition.decoder()?,
            poll_timeout: config.supervisor.reader_poll(),
            max_reported_failures: config.parser.max_reported_failures,
            progress_every: config.parser.progress_every.max(1),
        })
    }
}

/// Decode one raw output line, replacing malformed input.
pub fn decode_line<'a>(encoding: &'static Encoding, bytes: &'a [u8]) -> Cow<'a, str> {
    encoding.decode_without_bom_handling(bytes).0
}

/// Counters maintained by the reader thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaderStats {
    /// Lines received, blank ones included
    pub lines: u64,
    /// Blank lines skipped
    pub blank_lines: u64,
    /// Lines that failed to parse
    pub parse_failures: u64,
    /// Samples pushed into the queue
    pub samples: u64,
}

/// Why the reader loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The child closed its stdout.
    EndOfStream,
    /// A stop was requested.
    Stopped,
    /// Reading the pipe failed.
    ReadError(String),
}

enum PumpMessage {
    Line(Vec<u8>),
    Eof,
    Failed(String),
}

struct Shared {
    stop: AtomicBool,
    stats: Mutex<ReaderStats>,
}

/// Handle to a running reader. Dropping it requests a stop without waiting.
pub struct StreamReader {
    name: String,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<ReaderExit>>,
    pump: Option<JoinHandle<()>>,
}

impl StreamReader {
    /// Start reading `source` on dedicated threads named after `name`.
    pub fn spawn<R>(
        name: &str,
        source: R,
        queue: IngestionQueue,
        events: EventBus,
        config: StreamReaderConfig,
    ) -> AppResult<Self>
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            stats: Mutex::new(ReaderStats::default()),
        });
        let (tx, rx) = mpsc::channel::<PumpMessage>();

        let pump_name = format!("{name}-pump");
        let pump = thread::Builder::new()
            .name(pump_name.clone())
            .spawn(move || pump_lines(source, tx))
            .map_err(|source| DaqError::Thread {
                name: pump_name,
                source,
            })?;

        let reader_name = name.to_string();
        let thread_shared = shared.clone();
        let reader = thread::Builder::new()
            .name(reader_name.clone())
            .spawn(move || {
                let span = info_span!("stream_reader", reader = %reader_name);
                let _guard = span.enter();
                let mut state = ReadLoop {
                    shared: thread_shared,
                    queue,
                    events,
                    config,
                    reported_failures: 0,
                };
                state.run(rx)
            })
            .map_err(|source| DaqError::Thread {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            shared,
            reader: Some(reader),
            pump: Some(pump),
        })
    }

    /// Ask the reader loop to exit at its next poll.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    /// Current counters.
    pub fn stats(&self) -> ReaderStats {
        *self.shared.stats.lock()
    }

    /// Whether the reader loop and the pump have both exited.
    pub fn is_finished(&self) -> bool {
        self.reader.as_ref().map_or(true, JoinHandle::is_finished)
            && self.pump.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the reader loop to exit on its own.
    ///
    /// Returns `None` if it is still running (or was already joined). The pump
    /// thread is joined as well when it has finished; otherwise it is kept, and
    /// [`is_finished`](Self::is_finished) reports it, until the pipe closes.
    pub fn join(&mut self, timeout: Duration) -> Option<ReaderExit> {
        let exit = match self.reader.take() {
            Some(handle) => match wait_finished(handle, timeout) {
                Ok(handle) => match handle.join() {
                    Ok(exit) => Some(exit),
                    Err(_) => {
                        warn!(reader = %self.name, "Reader thread panicked");
                        Some(ReaderExit::ReadError("reader thread panicked".into()))
                    }
                },
                Err(handle) => {
                    self.reader = Some(handle);
                    return None;
                }
            },
            None => return None,
        };

        if let Some(pump) = self.pump.take() {
            match wait_finished(pump, Duration::from_millis(100)) {
                Ok(pump) => {
                    let _ = pump.join();
                }
                Err(pump) => {
                    debug!(reader = %self.name, "Pump still blocked on read; it ends when the pipe closes");
                    self.pump = Some(pump);
                }
            }
        }
        exit
    }

    /// Request a stop and wait for the loop to exit.
    pub fn stop(&mut self, timeout: Duration) -> Option<ReaderExit> {
        self.request_stop();
        self.join(timeout)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// Poll `handle` until it has finished or `timeout` elapses.
fn wait_finished<T>(handle: JoinHandle<T>, timeout: Duration) -> Result<JoinHandle<T>, JoinHandle<T>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        thread::sleep(Duration::from_millis(5));
    }
    Ok(handle)
}

fn pump_lines<R: Read>(source: R, tx: mpsc::Sender<PumpMessage>) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::with_capacity(128);
    loop {
        buf.clear();
        let message = match reader.read_until(b'\n', &mut buf) {
            Ok(0) => PumpMessage::Eof,
            Ok(_) => PumpMessage::Line(std::mem::take(&mut buf)),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => PumpMessage::Failed(e.to_string()),
        };
        let last = !matches!(message, PumpMessage::Line(_));
        if tx.send(message).is_err() || last {
            break;
        }
    }
}

struct ReadLoop {
    shared: Arc<Shared>,
    queue: IngestionQueue,
    events: EventBus,
    config: StreamReaderConfig,
    reported_failures: usize,
}

impl ReadLoop {
    fn run(&mut self, rx: mpsc::Receiver<PumpMessage>) -> ReaderExit {
        debug!("Reader started");
        let exit = loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                break ReaderExit::Stopped;
            }
            match rx.recv_timeout(self.config.poll_timeout) {
                Ok(PumpMessage::Line(bytes)) => self.handle_line(&bytes),
                Ok(PumpMessage::Eof) | Err(RecvTimeoutError::Disconnected) => {
                    break ReaderExit::EndOfStream
                }
                Ok(PumpMessage::Failed(e)) => {
                    warn!(error = %e, "Reading acquisition output failed");
                    break ReaderExit::ReadError(e);
                }
                Err(RecvTimeoutError::Timeout) => continue,
            }
        };

        let stats = *self.shared.stats.lock();
        debug!(?exit, ?stats, "Reader exiting");
        self.events.emit(PipelineEvent::Progress(stats));
        exit
    }

    fn handle_line(&mut self, bytes: &[u8]) {
        let text = decode_line(self.config.encoding, bytes);
        let line_number = {
            let mut stats = self.shared.stats.lock();
            stats.lines += 1;
            stats.lines
        };

        match self.config.parser.parse(&text) {
            Ok(None) => self.shared.stats.lock().blank_lines += 1,
            Ok(Some(sample)) => {
                self.queue.push(sample);
                let stats = {
                    let mut stats = self.shared.stats.lock();
                    stats.samples += 1;
                    *stats
                };
                if stats.samples % self.config.progress_every == 0 {
                    self.events.emit(PipelineEvent::Progress(stats));
                    self.events.status(format!(
                        "Received {} samples (depth {:.3})",
                        stats.samples, sample.depth
                    ));
                }
            }
            Err(err) => {
                self.shared.stats.lock().parse_failures += 1;
                if self.reported_failures < self.config.max_reported_failures {
                    self.reported_failures += 1;
                    let line = text.trim_end().to_string();
                    warn!(line_number, line = %line, reason = %err, "Skipping unparseable line");
                    self.events.emit(PipelineEvent::ParseFailure {
                        line_number,
                        line,
                        reason: err.to_string(),
                    });
                    if self.reported_failures == self.config.max_reported_failures {
                        warn!(
                            reported = self.reported_failures,
                            "Further parse failures will only be counted"
                        );
                        self.events.emit(PipelineEvent::ParseFailuresSuppressed {
                            reported: self.reported_failures,
                        });
                    }
                }
            }
        }
    }
}
