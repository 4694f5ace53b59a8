//! Archival of the acquisition artifact into the run-numbered store.
//!
//! ```text
//! <root>/
//!   R001C001/
//!     CCIDM/R001C001.csv
//!     BISDM/
//!   R001C002/
//!     ...
//! ```
//!
//! [`ArchivalWatcher`] waits for the artifact to appear and hands it, at most once
//! per run, to an [`ArchiveWorker`] running on its own thread.

pub mod watcher;
pub mod worker;

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub use watcher::ArchivalWatcher;
pub use worker::{next_destination_id, ArchiveRecord, ArchiveWorker, DestinationId};

/// Subdirectory receiving the raw artifact.
pub const RAW_DATA_DIR: &str = "CCIDM";

/// Companion subdirectory created alongside the raw data.
pub const IMAGE_DATA_DIR: &str = "BISDM";

/// Archival failures. None of them affect previously archived runs.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The artifact to archive does not exist.
    #[error("artifact not found: {}", .0.display())]
    MissingSource(PathBuf),

    /// The archive root could not be listed.
    #[error("cannot scan archive root {}: {source}", .root.display())]
    ScanRoot {
        /// Archive root
        root: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A destination directory could not be created.
    #[error("cannot create {}: {source}", .path.display())]
    CreateDir {
        /// Directory that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The artifact could not be moved.
    #[error("cannot move {} to {}: {source}", .from.display(), .to.display())]
    Move {
        /// Source artifact
        from: PathBuf,
        /// Intended destination
        to: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Every column number for this row is taken.
    #[error("no free identifier left for row R{row:03}")]
    Exhausted {
        /// Row number
        row: u32,
    },
}

/// Whether archival was started for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchivalStatus {
    /// Archival is turned off in the configuration.
    Disabled,
    /// The artifact was detected and handed to the worker.
    Triggered,
    /// The artifact never appeared.
    Skipped,
}

/// Archival progress reported on the event bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ArchiveEvent {
    /// The artifact appeared.
    Detected {
        /// Artifact path
        path: PathBuf,
    },
    /// The artifact was moved into the store.
    Completed(ArchiveRecord),
    /// Archival failed; the measurement itself is unaffected.
    Failed {
        /// Human-readable reason
        message: String,
    },
    /// No artifact was produced by the run.
    Skipped {
        /// Human-readable reason
        reason: String,
    },
}
