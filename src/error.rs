//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the ingestion pipeline.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can stop a run, from configuration issues to child processes that
//! refuse to start.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   TOML file or in `BORE_DAQ_` environment overrides.
//! - **`Configuration`**: Semantic errors in values that parsed correctly (zero
//!   intervals, unknown log level, empty executable path).
//! - **`ExecutableNotFound`** / **`Spawn`** / **`ImmediateExit`**: Raised synchronously
//!   by `ProcessSupervisor::start` before any pipeline thread exists.
//! - **`InvalidState`**: An operation was requested in a supervisor state that does not
//!   allow it.
//! - **`Archive`**: Filesystem failures while relocating the run artifact. These are
//!   reported as events and never fail the measurement itself.
//!
//! Line protocol failures are not part of this hierarchy; see
//! [`crate::measurement::ParseError`].

use std::path::PathBuf;
use thiserror::Error;

use crate::archive::ArchiveError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the ingestion pipeline.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The acquisition executable or control program does not exist.
    #[error("Executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    /// A child process could not be launched.
    #[error("Failed to start {what}: {source}")]
    Spawn {
        /// Which process failed ("acquisition" or "control script").
        what: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The acquisition process exited during the startup grace period.
    #[error("Acquisition process exited immediately (exit code {code:?})")]
    ImmediateExit {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// Operation not allowed in the current supervisor state.
    #[error("Cannot {operation}: supervisor is {state}")]
    InvalidState {
        /// Requested operation.
        operation: &'static str,
        /// State the supervisor was in.
        state: String,
    },

    /// Archival of the run artifact failed.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// A pipeline thread could not be spawned.
    #[error("Failed to spawn thread '{name}': {source}")]
    Thread {
        /// Thread name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the error was raised before any resources were allocated for a run.
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            DaqError::Config(_)
                | DaqError::Configuration(_)
                | DaqError::ExecutableNotFound(_)
                | DaqError::Spawn { .. }
                | DaqError::ImmediateExit { .. }
                | DaqError::InvalidState { .. }
        )
    }
}
