//! ArchiveWorker: numbering and relocation of run artifacts.

use regex::Regex;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use super::{ArchiveError, ArchiveEvent, IMAGE_DATA_DIR, RAW_DATA_DIR};
use crate::config::ArchiveConfig;
use crate::error::{AppResult, DaqError};
use crate::events::{EventBus, PipelineEvent};

static DESTINATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^R(\d{3})C(\d{3})$").expect("Invalid destination pattern"));

const MAX_COLUMN: u32 = 999;

/// Archive directory identifier, `R###C###`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DestinationId {
    /// Row number (`R` part)
    pub row: u32,
    /// Run sequence number (`C` part)
    pub column: u32,
}

impl DestinationId {
    /// Parse a directory name; `None` unless it is exactly `R###C###`.
    pub fn parse(name: &str) -> Option<Self> {
        let captures = DESTINATION_PATTERN.captures(name)?;
        Some(Self {
            row: captures[1].parse().ok()?,
            column: captures[2].parse().ok()?,
        })
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{:03}C{:03}", self.row, self.column)
    }
}

/// One successful archival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveRecord {
    /// `R###C###`
    pub destination_id: String,
    /// Where the artifact was
    pub source_path: PathBuf,
    /// Where the artifact is now
    pub destination_path: PathBuf,
}

/// Compute the identifier following the highest existing one under `root`.
///
/// The sequence number is the maximum `C` value over every `R###C###`
/// directory, plus one; gaps are never filled. An empty or missing root yields
/// `C001`. The row of the result is always `row`.
pub fn next_destination_id(root: &Path, row: u32) -> Result<DestinationId, ArchiveError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(DestinationId { row, column: 1 });
        }
        Err(source) => {
            return Err(ArchiveError::ScanRoot {
                root: root.to_path_buf(),
                source,
            })
        }
    };

    let mut highest = 0;
    for entry in entries {
        let entry = entry.map_err(|source| ArchiveError::ScanRoot {
            root: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(DestinationId::parse) {
            highest = highest.max(id.column);
        }
    }

    if highest >= MAX_COLUMN {
        return Err(ArchiveError::Exhausted { row });
    }
    Ok(DestinationId {
        row,
        column: highest + 1,
    })
}

/// Moves artifacts into the archive store.
#[derive(Debug, Clone)]
pub struct ArchiveWorker {
    root: PathBuf,
    row: u32,
    settle: Duration,
}

impl ArchiveWorker {
    /// Worker for `root`, numbering new runs in `row`.
    pub fn new(root: impl Into<PathBuf>, row: u32) -> Self {
        Self {
            root: root.into(),
            row,
            settle: Duration::ZERO,
        }
    }

    /// Worker built from the archive configuration.
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self::new(&config.root, config.row).with_settle(config.settle())
    }

    /// Delay applied by [`spawn`](Self::spawn) before moving.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Archive root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archive `source` synchronously.
    ///
    /// Creates `<root>/<id>/CCIDM` and `<root>/<id>/BISDM`, then moves the artifact
    /// to `<root>/<id>/CCIDM/<id>.csv`. A fresh destination directory is removed
    /// again if a later step fails.
    pub fn archive(&self, source: &Path) -> Result<ArchiveRecord, ArchiveError> {
        if !source.is_file() {
            return Err(ArchiveError::MissingSource(source.to_path_buf()));
        }

        fs::create_dir_all(&self.root).map_err(|e| ArchiveError::CreateDir {
            path: self.root.clone(),
            source: e,
        })?;

        let id = next_destination_id(&self.root, self.row)?;
        let destination_id = id.to_string();
        let run_dir = self.root.join(&destination_id);

        // create_dir, not create_dir_all: an existing directory means the id is taken
        fs::create_dir(&run_dir).map_err(|e| ArchiveError::CreateDir {
            path: run_dir.clone(),
            source: e,
        })?;

        let result = self.populate(&run_dir, &destination_id, source);
        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&run_dir) {
                warn!(path = %run_dir.display(), error = %e, "Could not remove incomplete archive directory");
            }
        }
        let destination_path = result?;

        info!(
            id = %destination_id,
            from = %source.display(),
            to = %destination_path.display(),
            "Artifact archived"
        );
        Ok(ArchiveRecord {
            destination_id,
            source_path: source.to_path_buf(),
            destination_path,
        })
    }

    fn populate(&self, run_dir: &Path, id: &str, source: &Path) -> Result<PathBuf, ArchiveError> {
        let raw_dir = run_dir.join(RAW_DATA_DIR);
        for dir in [raw_dir.clone(), run_dir.join(IMAGE_DATA_DIR)] {
            fs::create_dir(&dir).map_err(|e| ArchiveError::CreateDir {
                path: dir.clone(),
                source: e,
            })?;
        }

        let destination = raw_dir.join(format!("{id}.csv"));
        move_file(source, &destination).map_err(|e| ArchiveError::Move {
            from: source.to_path_buf(),
            to: destination.clone(),
            source: e,
        })?;
        Ok(destination)
    }

    /// Archive `source` on a dedicated thread, reporting the result on `events`.
    pub fn spawn(
        self,
        source: PathBuf,
        events: EventBus,
    ) -> AppResult<JoinHandle<Result<ArchiveRecord, ArchiveError>>> {
        thread::Builder::new()
            .name("archive-worker".into())
            .spawn(move || {
                if !self.settle.is_zero() {
                    thread::sleep(self.settle);
                }
                let result = self.archive(&source);
                report(&events, &result);
                result
            })
            .map_err(|source| DaqError::Thread {
                name: "archive-worker".into(),
                source,
            })
    }
}

/// Publish the archival result.
fn report(events: &EventBus, result: &Result<ArchiveRecord, ArchiveError>) {
    match result {
        Ok(record) => {
            events.status(format!(
                "Archived run data as {} ({})",
                record.destination_id,
                record.destination_path.display()
            ));
            events.emit(PipelineEvent::Archive(ArchiveEvent::Completed(
                record.clone(),
            )));
        }
        Err(e) => {
            error!(error = %e, "Archival failed");
            events.emit(PipelineEvent::Archive(ArchiveEvent::Failed {
                message: e.to_string(),
            }));
        }
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if fs::copy(from, to).is_err() {
                let _ = fs::remove_file(to);
                return Err(rename_err);
            }
            fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn mkdirs(root: &Path, names: &[&str]) {
        for name in names {
            fs::create_dir_all(root.join(name)).unwrap();
        }
    }

    #[test]
    fn parse_destination_ids() {
        assert_eq!(
            DestinationId::parse("R001C003"),
            Some(DestinationId { row: 1, column: 3 })
        );
        assert_eq!(DestinationId::parse("R1C3"), None);
        assert_eq!(DestinationId::parse("R001C003-old"), None);
        assert_eq!(DestinationId::parse("r001c003"), None);
        assert_eq!(DestinationId { row: 2, column: 45 }.to_string(), "R002C045");
    }

    #[test]
    fn next_id_uses_max_plus_one() {
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["R001C001", "R001C003"]);
        let id = next_destination_id(root.path(), 1).unwrap();
        assert_eq!(id.to_string(), "R001C004");
    }

    #[test]
    fn next_id_starts_at_one() {
        let root = TempDir::new().unwrap();
        assert_eq!(
            next_destination_id(root.path(), 1).unwrap().to_string(),
            "R001C001"
        );
        let missing = root.path().join("not-yet");
        assert_eq!(
            next_destination_id(&missing, 1).unwrap().to_string(),
            "R001C001"
        );
    }

    #[test]
    fn next_id_ignores_files_and_foreign_names() {
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["R001C002", "notes", "R1C9"]);
        fs::write(root.path().join("R001C050"), b"file, not a dir").unwrap();
        assert_eq!(
            next_destination_id(root.path(), 1).unwrap().to_string(),
            "R001C003"
        );
    }

    #[test]
    fn next_id_exhausted() {
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["R001C999"]);
        assert!(matches!(
            next_destination_id(root.path(), 1),
            Err(ArchiveError::Exhausted { row: 1 })
        ));
    }

    #[test]
    #[traced_test]
    fn archive_moves_and_renames() {
        let work = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["R001C001"]);
        let source = work.path().join("result.csv");
        fs::write(&source, "depth,diameter\n0.0,17.70\n").unwrap();

        let record = ArchiveWorker::new(root.path(), 1).archive(&source).unwrap();

        assert_eq!(record.destination_id, "R001C002");
        assert_eq!(
            record.destination_path,
            root.path().join("R001C002").join("CCIDM").join("R001C002.csv")
        );
        assert!(!source.exists());
        assert!(root.path().join("R001C002").join("BISDM").is_dir());
        assert_eq!(
            fs::read_to_string(&record.destination_path).unwrap(),
            "depth,diameter\n0.0,17.70\n"
        );
        assert!(logs_contain("Artifact archived"));
    }

    #[test]
    fn archive_missing_source_leaves_store_untouched() {
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["R001C001/CCIDM"]);
        let err = ArchiveWorker::new(root.path(), 1)
            .archive(&root.path().join("absent.csv"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::MissingSource(_)));

        let names: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("R001C001")]);
    }

    #[test]
    fn spawned_worker_reports_on_bus() {
        let work = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let source = work.path().join("result.csv");
        fs::write(&source, "x").unwrap();

        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let handle = ArchiveWorker::new(root.path(), 3)
            .spawn(source, bus)
            .unwrap();
        let record = handle.join().unwrap().unwrap();
        assert_eq!(record.destination_id, "R003C001");

        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::Archive(ArchiveEvent::Completed(r)) = event {
                assert_eq!(r, record);
                completed = true;
            }
        }
        assert!(completed);
    }
}
