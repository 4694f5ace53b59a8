//! ArchivalWatcher: at-most-once trigger on artifact creation.
//!
//! A `notify` watcher observes the artifact's parent directory. The first create
//! (or rename-into-place) event naming the artifact flips an atomic flag, drops
//! the `notify` watcher so the path stops being watched, and hands the file to
//! [`ArchiveWorker::spawn`]. Later events find the flag set and are ignored.
//!
//! Notification backends can miss or coalesce events, so [`ArchivalWatcher::finish`]
//! re-checks the filesystem once at the end of the run. A file that was already
//! there when watching began only counts if it was rewritten since.

use notify::{event::ModifyKind, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use super::{ArchivalStatus, ArchiveError, ArchiveEvent, ArchiveRecord, ArchiveWorker};
use crate::events::{EventBus, PipelineEvent};

type WorkerHandle = JoinHandle<Result<ArchiveRecord, ArchiveError>>;

struct Shared {
    artifact: PathBuf,
    file_name: OsString,
    /// Modification time of a file already at `artifact` when watching began
    baseline: Option<SystemTime>,
    worker: ArchiveWorker,
    events: EventBus,
    triggered: AtomicBool,
    watcher: Mutex<Option<RecommendedWatcher>>,
    handle: Mutex<Option<WorkerHandle>>,
}

impl Shared {
    fn matches(&self, path: &Path) -> bool {
        path.file_name() == Some(self.file_name.as_os_str())
    }

    /// Whether a regular file sits at the artifact path and was written during
    /// this run.
    fn produced_during_run(&self) -> bool {
        let Ok(meta) = fs::metadata(&self.artifact) else {
            return false;
        };
        if !meta.is_file() {
            return false;
        }
        match (self.baseline, meta.modified()) {
            (Some(before), Ok(now)) => now != before,
            _ => true,
        }
    }

    fn unwatch(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            drop(watcher);
            debug!(artifact = %self.artifact.display(), "Stopped watching for artifact");
        }
    }

    /// Start archival unless it already started. Returns whether this call won.
    fn trigger(&self) -> bool {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        self.events
            .status(format!("Detected output file {}", self.artifact.display()));
        self.events
            .emit(PipelineEvent::Archive(ArchiveEvent::Detected {
                path: self.artifact.clone(),
            }));

        self.unwatch();
        match self
            .worker
            .clone()
            .spawn(self.artifact.clone(), self.events.clone())
        {
            Ok(handle) => *self.handle.lock() = Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn archive worker");
                self.events
                    .emit(PipelineEvent::Archive(ArchiveEvent::Failed {
                        message: format!("failed to spawn archive worker: {e}"),
                    }));
            }
        }
        true
    }
}

/// Watches for one run's artifact.
pub struct ArchivalWatcher {
    shared: Arc<Shared>,
}

impl ArchivalWatcher {
    /// Start watching for `artifact`.
    ///
    /// Failing to set up notifications is not fatal: the watcher then relies on
    /// the end-of-run check in [`finish`](Self::finish).
    pub fn start(artifact: PathBuf, worker: ArchiveWorker, events: EventBus) -> Self {
        let file_name = artifact
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        let baseline = fs::metadata(&artifact).and_then(|m| m.modified()).ok();
        if baseline.is_some() {
            warn!(
                artifact = %artifact.display(),
                "Output file already present when watching began; it is archived only if rewritten during the run"
            );
        }
        let shared = Arc::new(Shared {
            artifact,
            file_name,
            baseline,
            worker,
            events,
            triggered: AtomicBool::new(false),
            watcher: Mutex::new(None),
            handle: Mutex::new(None),
        });

        match watch(&shared) {
            // An event may have won the trigger before the watcher was stored.
            Ok(watcher) if !shared.triggered.load(Ordering::SeqCst) => {
                *shared.watcher.lock() = Some(watcher)
            }
            Ok(_) => {}
            Err(e) => warn!(
                artifact = %shared.artifact.display(),
                error = %e,
                "File notifications unavailable, falling back to end-of-run check"
            ),
        }

        Self { shared }
    }

    /// Artifact being watched.
    pub fn artifact(&self) -> &Path {
        &self.shared.artifact
    }

    /// Whether archival has been started.
    pub fn is_triggered(&self) -> bool {
        self.shared.triggered.load(Ordering::SeqCst)
    }

    /// Whether notifications are still active.
    pub fn is_watching(&self) -> bool {
        self.shared.watcher.lock().is_some()
    }

    /// End of run: stop watching and archive a file the notifications missed.
    pub fn finish(&self) -> ArchivalStatus {
        self.shared.unwatch();
        if self.is_triggered() {
            return ArchivalStatus::Triggered;
        }
        if self.shared.produced_during_run() && self.shared.trigger() {
            return ArchivalStatus::Triggered;
        }

        let reason = if self.shared.artifact.is_file() {
            format!(
                "Output file {} predates the run and was not rewritten; archival skipped",
                self.shared.artifact.display()
            )
        } else {
            format!(
                "Output file {} was not produced; archival skipped",
                self.shared.artifact.display()
            )
        };
        self.shared.events.status(reason.clone());
        self.shared
            .events
            .emit(PipelineEvent::Archive(ArchiveEvent::Skipped { reason }));
        ArchivalStatus::Skipped
    }

    /// Wait up to `timeout` for the archive worker's result.
    ///
    /// `None` if archival never started or is still running.
    pub fn wait(&self, timeout: Duration) -> Option<Result<ArchiveRecord, ArchiveError>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut slot = self.shared.handle.lock();
                match slot.as_ref() {
                    Some(handle) if handle.is_finished() => {
                        let handle = slot.take()?;
                        return handle.join().ok();
                    }
                    None if !self.is_triggered() => return None,
                    _ => {}
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for ArchivalWatcher {
    fn drop(&mut self) {
        self.shared.unwatch();
    }
}

fn watch(shared: &Arc<Shared>) -> notify::Result<RecommendedWatcher> {
    let dir = match shared.artifact.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(notify::Error::io)?;

    let weak: Weak<Shared> = Arc::downgrade(shared);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
                );
                if relevant
                    && event
                        .paths
                        .iter()
                        .any(|p| shared.matches(p) && p.exists())
                {
                    shared.trigger();
                }
            }
            Err(e) => warn!(error = %e, "File watcher error"),
        }
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    debug!(dir = %dir.display(), "Watching for artifact");
    Ok(watcher)
}
