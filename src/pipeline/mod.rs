//! Producer/consumer plumbing between the acquisition stdout and the sample sink.
//!
//! ```text
//! child stdout ──▶ StreamReader ──push──▶ IngestionQueue ──pop──▶ RateLimitedDrainer ──▶ sink
//!                  (reader thread)                                (drainer thread)
//! ```
//!
//! The queue is the only object shared between the two threads.

pub mod drainer;
pub mod queue;
pub mod reader;

pub use drainer::{RateLimitedDrainer, SampleSink};
pub use queue::{IngestionQueue, WaitOutcome};
pub use reader::{decode_line, ReaderExit, ReaderStats, StreamReader, StreamReaderConfig};
