//! Pipeline configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/bore_daq.toml` (base configuration)
//! 2. Environment variables prefixed with `BORE_DAQ_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use bore_daq::config::PipelineConfig;
//!
//! let config = PipelineConfig::load()?;
//! config.validate()?;
//! println!("Acquisition: {}", config.acquisition.executable.display());
//! # Ok::<(), bore_daq::error::DaqError>(())
//! ```

use encoding_rs::Encoding;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, DaqError};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/bore_daq.toml";

/// Upper bound on the reader poll timeout; a stop request must interrupt the reader
/// within this delay.
pub const MAX_READER_POLL_MS: u64 = 50;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition executable
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Companion control script
    #[serde(default)]
    pub control: ControlConfig,
    /// Line protocol parsing
    #[serde(default)]
    pub parser: ParserConfig,
    /// Rate-limited delivery to the sink
    #[serde(default)]
    pub drainer: DrainerConfig,
    /// Process lifecycle timings
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Artifact archival
    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Acquisition executable settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Path to the acquisition executable
    #[serde(default)]
    pub executable: PathBuf,
    /// Extra command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// How long the process must survive after launch before the run is considered started
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,
    /// Output artifact, relative to the executable's folder
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    /// Code page of the child processes' output (a WHATWG label such as
    /// `GBK` or `UTF-8`). Malformed bytes are replaced, never fatal.
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

/// Control script settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Program to launch (an interpreter, or the script itself)
    #[serde(default)]
    pub program: PathBuf,
    /// Arguments, typically the script path
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; defaults to the program's folder
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Line protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Depth increment per sequence number
    #[serde(default = "default_depth_step")]
    pub depth_step: f64,
    /// How many parse failures are reported individually before suppression
    #[serde(default = "default_max_reported_failures")]
    pub max_reported_failures: usize,
    /// Emit a progress event every N samples
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

/// Drainer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainerConfig {
    /// Delay between two deliveries to the sink
    #[serde(default = "default_drain_interval")]
    pub interval_ms: u64,
}

/// Supervisor timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Liveness polling period
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Reader poll timeout (capped at 50 ms)
    #[serde(default = "default_reader_poll")]
    pub reader_poll_ms: u64,
    /// Grace period between terminate and kill
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
    /// How long a completed run may spend flushing buffered samples
    #[serde(default = "default_completion_drain_timeout")]
    pub completion_drain_timeout_ms: u64,
    /// Kill leftover processes with the same executable name after cleanup
    #[serde(default = "default_enabled")]
    pub kill_by_name: bool,
}

/// Archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Whether artifacts are archived at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Archive root holding the `R###C###` directories
    #[serde(default = "default_archive_root")]
    pub root: PathBuf,
    /// Row number used for new identifiers
    #[serde(default = "default_row")]
    pub row: u32,
    /// Delay between detection and move, lets the writer flush
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

// Default value functions
fn default_name() -> String {
    "bore-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_startup_grace() -> u64 {
    500
}

fn default_output_file() -> PathBuf {
    PathBuf::from("result.csv")
}

fn default_encoding() -> String {
    "GBK".to_string()
}

fn default_depth_step() -> f64 {
    0.1
}

fn default_max_reported_failures() -> usize {
    10
}

fn default_progress_every() -> u64 {
    100
}

fn default_drain_interval() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    100
}

fn default_reader_poll() -> u64 {
    MAX_READER_POLL_MS
}

fn default_stop_timeout() -> u64 {
    3000
}

fn default_completion_drain_timeout() -> u64 {
    5000
}

fn default_enabled() -> bool {
    true
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("archive")
}

fn default_row() -> u32 {
    1
}

fn default_settle() -> u64 {
    500
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::new(),
            args: Vec::new(),
            startup_grace_ms: default_startup_grace(),
            output_file: default_output_file(),
            encoding: default_encoding(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            depth_step: default_depth_step(),
            max_reported_failures: default_max_reported_failures(),
            progress_every: default_progress_every(),
        }
    }
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_drain_interval(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            reader_poll_ms: default_reader_poll(),
            stop_timeout_ms: default_stop_timeout(),
            completion_drain_timeout_ms: default_completion_drain_timeout(),
            kill_by_name: default_enabled(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            root: default_archive_root(),
            row: default_row(),
            settle_ms: default_settle(),
        }
    }
}

impl AcquisitionConfig {
    /// Folder containing the executable; used as the process working directory.
    pub fn working_dir(&self) -> PathBuf {
        match self.executable.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Where the acquisition process writes its artifact when it runs in
    /// `working_dir`.
    pub fn artifact_path(&self, working_dir: &Path) -> PathBuf {
        if self.output_file.is_absolute() {
            self.output_file.clone()
        } else {
            working_dir.join(&self.output_file)
        }
    }

    /// Decoder for child output.
    pub fn decoder(&self) -> AppResult<&'static Encoding> {
        Encoding::for_label(self.encoding.trim().as_bytes()).ok_or_else(|| {
            DaqError::Configuration(format!(
                "Unknown acquisition.encoding '{}'",
                self.encoding
            ))
        })
    }

    /// Startup grace period.
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

impl ControlConfig {
    /// Working directory for the control script.
    pub fn working_dir(&self) -> PathBuf {
        if let Some(dir) = &self.working_dir {
            return dir.clone();
        }
        match self.program.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl DrainerConfig {
    /// Delivery interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl SupervisorConfig {
    /// Liveness polling period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reader poll timeout, never above [`MAX_READER_POLL_MS`].
    pub fn reader_poll(&self) -> Duration {
        Duration::from_millis(self.reader_poll_ms.clamp(1, MAX_READER_POLL_MS))
    }

    /// Grace period between terminate and kill.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Flush budget for completed runs.
    pub fn completion_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_drain_timeout_ms)
    }
}

impl ArchiveConfig {
    /// Delay between detection and move.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl PipelineConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override file values with prefix `BORE_DAQ_`.
    /// Example: `BORE_DAQ_DRAINER__INTERVAL_MS=10`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BORE_DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (defaults fill missing keys)
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.application.event_capacity == 0 {
            return Err(DaqError::Configuration(
                "event_capacity must be greater than 0".into(),
            ));
        }

        if self.acquisition.executable.as_os_str().is_empty() {
            return Err(DaqError::Configuration(
                "acquisition.executable must be set".into(),
            ));
        }

        if self.control.program.as_os_str().is_empty() {
            return Err(DaqError::Configuration("control.program must be set".into()));
        }

        self.acquisition.decoder()?;

        if !(self.parser.depth_step.is_finite() && self.parser.depth_step > 0.0) {
            return Err(DaqError::Configuration(format!(
                "parser.depth_step must be a positive number, got {}",
                self.parser.depth_step
            )));
        }

        if self.parser.progress_every == 0 {
            return Err(DaqError::Configuration(
                "parser.progress_every must be greater than 0".into(),
            ));
        }

        if self.drainer.interval_ms == 0 {
            return Err(DaqError::Configuration(
                "drainer.interval_ms must be greater than 0".into(),
            ));
        }

        if self.supervisor.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "supervisor.poll_interval_ms must be greater than 0".into(),
            ));
        }

        if !(1..=999).contains(&self.archive.row) {
            return Err(DaqError::Configuration(format!(
                "archive.row must be within 1..=999, got {}",
                self.archive.row
            )));
        }

        Ok(())
    }
}
