//! Status and telemetry events for pipeline observers.
//!
//! Components never talk to observers directly; they hold a clone of the
//! [`EventBus`] the supervisor created for the run. Observers call
//! [`EventBus::subscribe`] and receive every event published after that point.
//! Status lines are mirrored to the log so that nothing depends on a subscriber
//! being present.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::archive::{ArchivalStatus, ArchiveEvent};
use crate::pipeline::ReaderStats;
use crate::supervisor::SupervisorState;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The control script (or the acquisition process) finished on its own.
    Completed,
    /// `stop()` was called.
    Cancelled,
    /// A child process exited with an error, or could not be kept alive.
    Failed,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Completed => write!(f, "completed"),
            OutcomeKind::Cancelled => write!(f, "cancelled"),
            OutcomeKind::Failed => write!(f, "failed"),
        }
    }
}

/// Final result of one supervised run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Run identifier
    pub run_id: Uuid,
    /// True only for completed runs
    pub success: bool,
    /// Completed, cancelled or failed
    pub kind: OutcomeKind,
    /// Human-readable summary, names the failing stage on failure
    pub message: String,
    /// Exit code of the acquisition process, if it exited with one
    pub acquisition_exit: Option<i32>,
    /// Exit code of the control script, if it exited with one
    pub control_exit: Option<i32>,
    /// Reader counters at the end of the run
    pub stats: ReaderStats,
    /// Samples handed to the sink
    pub samples_delivered: u64,
    /// Buffered samples thrown away on cancellation or failure
    pub samples_discarded: u64,
    /// Helper threads that outlived cleanup and were detached. Empty after a
    /// clean shutdown.
    pub detached_threads: Vec<String>,
    /// Whether archival was started for this run
    pub archival: ArchivalStatus,
    /// When the run was started
    pub started_at: DateTime<Utc>,
    /// When cleanup finished
    pub finished_at: DateTime<Utc>,
    /// Duration of the run, measured on the monotonic clock
    pub duration: Duration,
}

/// Everything the pipeline reports to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Human-readable progress line
    Status(String),
    /// Periodic reader counters
    Progress(ReaderStats),
    /// A line that could not be parsed (reported up to a cap)
    ParseFailure {
        /// 1-based line number in the stream
        line_number: u64,
        /// Offending line
        line: String,
        /// Parser diagnosis
        reason: String,
    },
    /// Further parse failures will not be reported individually
    ParseFailuresSuppressed {
        /// Number of failures reported before suppression
        reported: usize,
    },
    /// A line printed by the control script
    ControlOutput(String),
    /// Supervisor state transition
    StateChanged(SupervisorState),
    /// Final outcome of the run
    Finished(RunOutcome),
    /// Archival progress and result
    Archive(ArchiveEvent),
}

/// Broadcast channel for pipeline events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscriber is not an error.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Log and publish a status line.
    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.emit(PipelineEvent::Status(message));
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
