//! ProcessSupervisor: lifecycle of one acquisition run.
//!
//! ```text
//! Idle ──start──▶ Starting ──▶ Running ──stop / exit──▶ Stopping ──▶ Stopped
//!                    │                                       │
//!                    └────────── failure ──▶ Errored ◀───────┘ (process failure)
//! ```
//!
//! Every `start()` builds a fresh `RunContext` owning both child processes, the
//! reader, the drainer, the queue and the archival watcher. The context lives in
//! the supervisor only while the run is active; whoever takes it out (an explicit
//! [`ProcessSupervisor::stop`] or the liveness monitor noticing that a child
//! exited) performs the cleanup, so cleanup happens exactly once per run.
//!
//! Stopping never blocks indefinitely: every wait is bounded, and processes that
//! ignore the termination request are killed.

pub mod process;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

pub use process::{is_process_running, kill_by_name, ProcessCommand, ProcessHandle};

use crate::archive::{ArchivalStatus, ArchivalWatcher, ArchiveError, ArchiveRecord, ArchiveWorker};
use crate::config::PipelineConfig;
use crate::error::{AppResult, DaqError};
use crate::events::{EventBus, OutcomeKind, PipelineEvent, RunOutcome};
use crate::measurement::ParsedSample;
use crate::pipeline::{IngestionQueue, RateLimitedDrainer, SampleSink, StreamReader, StreamReaderConfig};

/// Bound on joining helper threads during cleanup.
const THREAD_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// No run has been started yet.
    Idle,
    /// Processes are being launched.
    Starting,
    /// Both processes are up and samples flow.
    Running,
    /// Cleanup in progress.
    Stopping,
    /// The last run ended (completed or cancelled).
    Stopped,
    /// The last run failed to start or a process failed mid-run.
    Errored,
}

impl SupervisorState {
    /// Whether a new run may be started from this state.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Errored)
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// How a run is ending, decided before cleanup starts.
struct RunEnd {
    kind: OutcomeKind,
    message: String,
}

impl RunEnd {
    fn cancelled() -> Self {
        Self {
            kind: OutcomeKind::Cancelled,
            message: "Run cancelled".into(),
        }
    }

    fn completed(message: &str) -> Self {
        Self {
            kind: OutcomeKind::Completed,
            message: message.into(),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            message,
        }
    }
}

/// How a run ends given the exit statuses observed in one liveness poll.
///
/// A failure of either process outranks a normal exit of the other. The control
/// script finishing is the normal end of a run; the acquisition process exiting
/// with status 0 counts as one too.
fn classify_exit(acquisition: Option<ExitStatus>, control: Option<ExitStatus>) -> Option<RunEnd> {
    match (acquisition, control) {
        (Some(status), _) if !status.success() => Some(RunEnd::failed(format!(
            "Acquisition process exited unexpectedly ({status})"
        ))),
        (_, Some(status)) if !status.success() => Some(RunEnd::failed(format!(
            "Control script exited unexpectedly ({status})"
        ))),
        (_, Some(_)) => Some(RunEnd::completed("Control script finished")),
        (Some(_), None) => Some(RunEnd::completed("Acquisition process finished")),
        (None, None) => None,
    }
}

/// Resources of one run. Created by `start()`, consumed by cleanup.
struct RunContext {
    run_id: Uuid,
    started: Instant,
    started_at: DateTime<Utc>,
    acquisition: ProcessHandle,
    acquisition_name: Option<std::ffi::OsString>,
    control: ProcessHandle,
    queue: IngestionQueue,
    reader: StreamReader,
    drainer: RateLimitedDrainer,
    watcher: Option<ArchivalWatcher>,
    forwarders: Vec<JoinHandle<()>>,
    monitor_stop: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl RunContext {
    /// Liveness check.
    fn check_exit(&mut self) -> Option<RunEnd> {
        let acquisition = self.acquisition.try_exit();
        let control = self.control.try_exit();
        classify_exit(acquisition, control)
    }
}

struct Inner {
    config: PipelineConfig,
    events: EventBus,
    sink: SampleSink,
    drain_interval_us: AtomicU64,
    state: Mutex<SupervisorState>,
    /// Serialises start and cleanup.
    lifecycle: Mutex<()>,
    run: Mutex<Option<RunContext>>,
    outcome: Mutex<Option<RunOutcome>>,
    outcome_ready: Condvar,
    archive: Mutex<Option<ArchivalWatcher>>,
}

/// Owns the pipeline of one run at a time.
///
/// Methods take `&self` and may be called from any thread. Dropping the
/// supervisor stops an active run.
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Supervisor delivering samples to `sink`.
    pub fn new(config: PipelineConfig, sink: SampleSink) -> Self {
        let events = EventBus::new(config.application.event_capacity);
        let drain_interval_us = u64::try_from(config.drainer.interval().as_micros()).unwrap_or(u64::MAX);
        Self {
            inner: Arc::new(Inner {
                config,
                events,
                sink,
                drain_interval_us: AtomicU64::new(drain_interval_us),
                state: Mutex::new(SupervisorState::Idle),
                lifecycle: Mutex::new(()),
                run: Mutex::new(None),
                outcome: Mutex::new(None),
                outcome_ready: Condvar::new(),
                archive: Mutex::new(None),
            }),
        }
    }

    /// Supervisor whose sink only logs each sample at trace level.
    pub fn with_logging_sink(config: PipelineConfig) -> Self {
        let sink: SampleSink = Arc::new(|sample: ParsedSample| {
            tracing::trace!(%sample, "Sample delivered");
        });
        Self::new(config, sink)
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Event bus shared by every component of a run.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        *self.inner.state.lock()
    }

    /// Id of the active run, if any.
    pub fn run_id(&self) -> Option<Uuid> {
        self.inner.run.lock().as_ref().map(|ctx| ctx.run_id)
    }

    /// Pids of the active run's processes: (acquisition, control script).
    pub fn process_ids(&self) -> Option<(u32, u32)> {
        self.inner
            .run
            .lock()
            .as_ref()
            .map(|ctx| (ctx.acquisition.pid(), ctx.control.pid()))
    }

    /// Change the drainer interval, for the active run and for later ones.
    pub fn set_drain_interval(&self, interval: Duration) {
        let us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
        self.inner.drain_interval_us.store(us, Ordering::SeqCst);
        if let Some(ctx) = self.inner.run.lock().as_ref() {
            ctx.drainer.set_interval(interval);
        }
    }

    /// Current drainer interval.
    pub fn drain_interval(&self) -> Duration {
        self.inner.drain_interval()
    }

    /// Start a run with the commands from the configuration.
    pub fn start_configured(&self) -> AppResult<Uuid> {
        let acquisition = ProcessCommand::acquisition(&self.inner.config.acquisition);
        let control = ProcessCommand::control(&self.inner.config.control);
        self.start(acquisition, control)
    }

    /// Launch the acquisition process and the control script and start the
    /// pipeline between them.
    ///
    /// Fails synchronously, leaving nothing running, when the acquisition
    /// executable is missing, cannot be launched or exits within the startup
    /// grace period, or when the control script cannot be launched.
    pub fn start(&self, acquisition: ProcessCommand, control: ProcessCommand) -> AppResult<Uuid> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock();

        {
            let state = *inner.state.lock();
            if !state.can_start() {
                return Err(DaqError::InvalidState {
                    operation: "start",
                    state: state.to_string(),
                });
            }
        }

        *inner.outcome.lock() = None;
        *inner.archive.lock() = None;
        inner.set_state(SupervisorState::Starting);

        let ctx = match inner.launch(acquisition, control) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "Run failed to start");
                inner.events.status(format!("Start failed: {e}"));
                inner.set_state(SupervisorState::Errored);
                return Err(e);
            }
        };

        let run_id = ctx.run_id;
        let monitor_stop = ctx.monitor_stop.clone();
        *inner.run.lock() = Some(ctx);
        inner.set_state(SupervisorState::Running);
        inner.events.status(format!("Run {run_id} started"));

        let monitor_inner = inner.clone();
        let spawned = thread::Builder::new()
            .name("supervisor-monitor".into())
            .spawn(move || monitor(monitor_inner, run_id, monitor_stop));
        match spawned {
            Ok(handle) => {
                if let Some(ctx) = inner.run.lock().as_mut() {
                    ctx.monitor = Some(handle);
                }
            }
            Err(source) => {
                // Without a monitor nobody would notice the processes exiting.
                let ctx = inner.run.lock().take();
                if let Some(ctx) = ctx {
                    inner.cleanup(
                        ctx,
                        RunEnd::failed("Could not start the liveness monitor".into()),
                    );
                }
                return Err(DaqError::Thread {
                    name: "supervisor-monitor".into(),
                    source,
                });
            }
        }

        Ok(run_id)
    }

    /// Cancel the active run.
    ///
    /// Idempotent and safe from any thread: with no active run this is a no-op.
    /// If the run is already being cleaned up because a process exited, this
    /// waits for that cleanup instead. Returns the outcome when this call ended
    /// the run.
    pub fn stop(&self) -> Option<RunOutcome> {
        self.inner.finish_run(RunEnd::cancelled(), None)
    }

    /// Wait up to `timeout` for the current (or last) run's outcome.
    pub fn wait_for_outcome(&self, timeout: Duration) -> Option<RunOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.inner.outcome.lock();
        while outcome.is_none() {
            if self
                .inner
                .outcome_ready
                .wait_until(&mut outcome, deadline)
                .timed_out()
            {
                break;
            }
        }
        outcome.clone()
    }

    /// Wait up to `timeout` for the last run's archival result.
    ///
    /// `None` when archival was disabled or skipped, or is still in progress.
    pub fn wait_for_archive(&self, timeout: Duration) -> Option<Result<ArchiveRecord, ArchiveError>> {
        let archive = self.inner.archive.lock();
        archive.as_ref()?.wait(timeout)
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if self.inner.run.lock().is_some() {
            debug!("Supervisor dropped with an active run, stopping it");
            self.stop();
        }
    }
}

impl Inner {
    fn drain_interval(&self) -> Duration {
        Duration::from_micros(self.drain_interval_us.load(Ordering::SeqCst))
    }

    fn set_state(&self, next: SupervisorState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous != next {
            debug!(from = %previous, to = %next, "Supervisor state changed");
            self.events.emit(PipelineEvent::StateChanged(next));
        }
    }

    fn launch(&self, acquisition: ProcessCommand, control: ProcessCommand) -> AppResult<RunContext> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let started_at = Utc::now();
        let span = info_span!("run", run_id = %run_id);
        let _guard = span.enter();
        let config = &self.config;
        let reader_config = StreamReaderConfig::from_config(config)?;
        let encoding = reader_config.encoding;

        self.events.status(format!(
            "Starting acquisition: {}",
            acquisition.program.display()
        ));
        let mut acquisition_process = ProcessHandle::launch("acquisition", &acquisition)?;
        if let Some(status) = acquisition_process.wait_exit(config.acquisition.startup_grace()) {
            return Err(DaqError::ImmediateExit {
                code: status.code(),
            });
        }

        let stdout = acquisition_process.take_stdout().ok_or_else(|| DaqError::Spawn {
            what: "acquisition",
            source: std::io::Error::other("stdout was not captured"),
        })?;

        let mut forwarders = Vec::with_capacity(3);
        if let Some(stderr) = acquisition_process.take_stderr() {
            forwarders.push(process::forward_lines(
                "acquisition-stderr",
                stderr,
                encoding,
                |line| {
                    warn!(target: "bore_daq::acquisition", "{}", line);
                },
            )?);
        }

        let queue = IngestionQueue::new();
        let reader = StreamReader::spawn(
            "stream-reader",
            stdout,
            queue.clone(),
            self.events.clone(),
            reader_config,
        )?;
        let drainer = RateLimitedDrainer::spawn(queue.clone(), self.sink.clone(), self.drain_interval())?;

        let watcher = config.archive.enabled.then(|| {
            ArchivalWatcher::start(
                config.acquisition.artifact_path(&acquisition.working_dir),
                ArchiveWorker::from_config(&config.archive),
                self.events.clone(),
            )
        });

        self.events
            .status(format!("Starting control script: {}", control.program.display()));
        let mut control_process = ProcessHandle::launch("control script", &control)?;
        if let Some(stdout) = control_process.take_stdout() {
            let events = self.events.clone();
            forwarders.push(process::forward_lines(
                "control-stdout",
                stdout,
                encoding,
                move |line| {
                    info!(target: "bore_daq::control", "{}", line);
                    events.emit(PipelineEvent::ControlOutput(line));
                },
            )?);
        }
        if let Some(stderr) = control_process.take_stderr() {
            forwarders.push(process::forward_lines(
                "control-stderr",
                stderr,
                encoding,
                |line| {
                    warn!(target: "bore_daq::control", "{}", line);
                },
            )?);
        }

        Ok(RunContext {
            run_id,
            started,
            started_at,
            acquisition: acquisition_process,
            acquisition_name: acquisition.process_name().map(ToOwned::to_owned),
            control: control_process,
            queue,
            reader,
            drainer,
            watcher,
            forwarders,
            monitor_stop: Arc::new(AtomicBool::new(false)),
            monitor: None,
        })
    }

    /// Take the active run (only if it is `expected`, when given) and clean it up.
    fn finish_run(&self, end: RunEnd, expected: Option<Uuid>) -> Option<RunOutcome> {
        let _lifecycle = self.lifecycle.lock();
        let ctx = {
            let mut run = self.run.lock();
            match (run.as_ref(), expected) {
                (Some(ctx), Some(id)) if ctx.run_id != id => return None,
                _ => run.take()?,
            }
        };
        Some(self.cleanup(ctx, end))
    }

    fn cleanup(&self, mut ctx: RunContext, end: RunEnd) -> RunOutcome {
        let span = info_span!("run", run_id = %ctx.run_id);
        let _guard = span.enter();
        let timings = &self.config.supervisor;

        self.set_state(SupervisorState::Stopping);
        self.events.status(format!("{}, cleaning up", end.message));

        ctx.monitor_stop.store(true, Ordering::SeqCst);
        if let Some(monitor) = &ctx.monitor {
            monitor.thread().unpark();
        }

        let (delivered, discarded) = if end.kind == OutcomeKind::Completed {
            process::terminate_all(
                &mut [&mut ctx.control, &mut ctx.acquisition],
                timings.stop_timeout(),
            );
            // The pipe is closed now; let the reader consume what is left in it.
            if ctx.reader.join(timings.completion_drain_timeout()).is_none() {
                warn!("Reader did not reach end of stream in time, stopping it");
                ctx.reader.stop(THREAD_JOIN_TIMEOUT);
            }
            let delivered = ctx.drainer.finish(timings.completion_drain_timeout());
            (delivered, ctx.queue.drain_all().len() as u64)
        } else {
            ctx.reader.request_stop();
            process::terminate_all(
                &mut [&mut ctx.acquisition, &mut ctx.control],
                timings.stop_timeout(),
            );
            ctx.reader.stop(THREAD_JOIN_TIMEOUT);
            let delivered = ctx.drainer.stop(THREAD_JOIN_TIMEOUT);
            (delivered, ctx.queue.drain_all().len() as u64)
        };
        if discarded > 0 {
            self.events
                .status(format!("Discarded {discarded} buffered samples"));
        }

        if timings.kill_by_name {
            if let Some(name) = &ctx.acquisition_name {
                kill_by_name(name);
            }
        }

        let archival = match ctx.watcher.take() {
            Some(watcher) => {
                let status = watcher.finish();
                *self.archive.lock() = Some(watcher);
                status
            }
            None => ArchivalStatus::Disabled,
        };

        let mut detached_threads = Vec::new();
        // The pump exits once the last writer of the pipe is gone.
        let deadline = Instant::now() + THREAD_JOIN_TIMEOUT;
        while !ctx.reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if !ctx.reader.is_finished() {
            detached_threads.push("stream-reader".to_string());
        }
        if !ctx.drainer.is_finished() {
            detached_threads.push("drainer".to_string());
        }
        for forwarder in ctx.forwarders.drain(..) {
            if let Some(name) = join_bounded(forwarder, THREAD_JOIN_TIMEOUT) {
                detached_threads.push(name);
            }
        }
        if let Some(monitor) = ctx.monitor.take() {
            if monitor.thread().id() != thread::current().id() {
                if let Some(name) = join_bounded(monitor, THREAD_JOIN_TIMEOUT) {
                    detached_threads.push(name);
                }
            }
        }
        if !detached_threads.is_empty() {
            warn!(threads = ?detached_threads, "Helper threads still running after cleanup");
        }

        let stats = ctx.reader.stats();
        let message = match end.kind {
            OutcomeKind::Completed => format!(
                "{}: {} samples delivered, {} parse failures",
                end.message, delivered, stats.parse_failures
            ),
            _ => end.message,
        };
        let outcome = RunOutcome {
            run_id: ctx.run_id,
            success: end.kind == OutcomeKind::Completed,
            kind: end.kind,
            message,
            acquisition_exit: ctx.acquisition.exit_code(),
            control_exit: ctx.control.exit_code(),
            stats,
            samples_delivered: delivered,
            samples_discarded: discarded,
            detached_threads,
            archival,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            duration: ctx.started.elapsed(),
        };

        let final_state = if end.kind == OutcomeKind::Failed {
            SupervisorState::Errored
        } else {
            SupervisorState::Stopped
        };
        self.set_state(final_state);

        match outcome.kind {
            OutcomeKind::Failed => error!(message = %outcome.message, "Run failed"),
            kind => info!(%kind, message = %outcome.message, "Run ended"),
        }
        self.events.status(format!("Run {}: {}", outcome.kind, outcome.message));
        self.events.emit(PipelineEvent::Finished(outcome.clone()));

        *self.outcome.lock() = Some(outcome.clone());
        self.outcome_ready.notify_all();
        outcome
    }
}

fn monitor(inner: Arc<Inner>, run_id: Uuid, stop: Arc<AtomicBool>) {
    let span = info_span!("monitor", run_id = %run_id);
    let _guard = span.enter();
    let poll = inner.config.supervisor.poll_interval();

    loop {
        thread::park_timeout(poll);
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let end = {
            let mut run = inner.run.lock();
            match run.as_mut() {
                Some(ctx) if ctx.run_id == run_id => ctx.check_exit(),
                _ => break,
            }
        };

        if let Some(end) = end {
            debug!(kind = %end.kind, "Process exit detected");
            inner.finish_run(end, Some(run_id));
            break;
        }
    }
    debug!("Monitor exiting");
}

/// Join `handle` within `timeout`. Returns the thread's name if it had to be
/// detached.
fn join_bounded(handle: JoinHandle<()>, timeout: Duration) -> Option<String> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            debug!(thread = %name, "Helper thread still running, detaching");
            return Some(name);
        }
        thread::sleep(Duration::from_millis(5));
    }
    let _ = handle.join();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn state_display_and_start_rules() {
        assert_eq!(SupervisorState::Running.to_string(), "running");
        assert!(SupervisorState::Idle.can_start());
        assert!(SupervisorState::Stopped.can_start());
        assert!(SupervisorState::Errored.can_start());
        assert!(!SupervisorState::Running.can_start());
        assert!(!SupervisorState::Stopping.can_start());
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let supervisor = ProcessSupervisor::with_logging_sink(PipelineConfig::default());
        assert!(supervisor.stop().is_none());
        assert!(supervisor.stop().is_none());
        assert_eq!(supervisor.state(), SupervisorState::Idle);
    }

    #[test]
    fn missing_executable_fails_synchronously() {
        let supervisor = ProcessSupervisor::with_logging_sink(PipelineConfig::default());
        let mut rx = supervisor.subscribe();
        let acquisition = ProcessCommand::new("/nonexistent/bore/acq.exe").with_working_dir(".");
        let control = ProcessCommand::new("/nonexistent/bore/control.sh").with_working_dir(".");

        let err = supervisor.start(acquisition, control).unwrap_err();
        assert!(matches!(err, DaqError::ExecutableNotFound(_)));
        assert_eq!(supervisor.state(), SupervisorState::Errored);
        assert!(supervisor.run_id().is_none());

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec![SupervisorState::Starting, SupervisorState::Errored]);
    }

    #[cfg(unix)]
    #[test]
    fn failure_outranks_completion_in_the_same_poll() {
        use std::os::unix::process::ExitStatusExt;

        let ok = ExitStatus::from_raw(0);
        let crashed = ExitStatus::from_raw(7 << 8);

        let end = classify_exit(Some(crashed), Some(ok)).unwrap();
        assert_eq!(end.kind, OutcomeKind::Failed);
        assert!(end.message.starts_with("Acquisition"), "{}", end.message);

        let end = classify_exit(Some(ok), Some(crashed)).unwrap();
        assert_eq!(end.kind, OutcomeKind::Failed);
        assert!(end.message.starts_with("Control"), "{}", end.message);

        let end = classify_exit(Some(ok), Some(ok)).unwrap();
        assert_eq!(end.kind, OutcomeKind::Completed);
        assert_eq!(end.message, "Control script finished");

        let end = classify_exit(Some(ok), None).unwrap();
        assert_eq!(end.kind, OutcomeKind::Completed);
        assert!(classify_exit(None, None).is_none());
    }

    #[test]
    fn unknown_encoding_fails_before_launching() {
        let mut config = PipelineConfig::default();
        config.acquisition.encoding = "klingon".into();
        let supervisor = ProcessSupervisor::with_logging_sink(config);
        let acquisition = ProcessCommand::new("/nonexistent/bore/acq.exe").with_working_dir(".");
        let control = ProcessCommand::new("/nonexistent/bore/control.sh").with_working_dir(".");

        let err = supervisor.start(acquisition, control).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(msg) if msg.contains("encoding")));
        assert_eq!(supervisor.state(), SupervisorState::Errored);
    }

    #[test]
    fn drain_interval_is_adjustable_between_runs() {
        let supervisor = ProcessSupervisor::with_logging_sink(PipelineConfig::default());
        assert_eq!(supervisor.drain_interval(), Duration::from_millis(30));
        supervisor.set_drain_interval(Duration::from_millis(5));
        assert_eq!(supervisor.drain_interval(), Duration::from_millis(5));
    }
}
