//! # bore-daq
//!
//! Real-time ingestion pipeline for borehole diameter measurements. An external
//! acquisition executable prints one measurement per line on its stdout while a
//! companion control script drives the positioning hardware; this crate turns
//! that text stream into typed samples, delivers them at a bounded rate to a
//! consumer, supervises both processes, and archives the run's CSV artifact into
//! a run-numbered store.
//!
//! ## Crate Structure
//!
//! - **`measurement`**: `ParsedSample` and the line protocol parser.
//! - **`pipeline`**: the `IngestionQueue` between the `StreamReader` thread
//!   (producer) and the `RateLimitedDrainer` thread (consumer).
//! - **`supervisor`**: `ProcessSupervisor`, its state machine and child process
//!   handling.
//! - **`archive`**: `ArchivalWatcher` and `ArchiveWorker` (`R###C###` numbering).
//! - **`events`**: `PipelineEvent`, `RunOutcome` and the broadcast `EventBus`.
//! - **`config`**: figment-based configuration (TOML + `BORE_DAQ_` environment).
//! - **`error`**: the `DaqError` enum.
//! - **`tracing_setup`**: tracing-subscriber initialisation.

pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod measurement;
pub mod pipeline;
pub mod supervisor;
pub mod tracing_setup;

pub use error::{AppResult, DaqError};
pub use events::{EventBus, OutcomeKind, PipelineEvent, RunOutcome};
pub use measurement::ParsedSample;
pub use supervisor::{ProcessSupervisor, SupervisorState};
