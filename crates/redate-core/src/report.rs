use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RepairError;
use crate::repair::RepairOutcome;

/// Current report file format version
const REPORT_VERSION: u32 = 1;

/// Report filename, written into the base folder
pub const REPORT_FILENAME: &str = ".redate-report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    AlreadyCorrect,
    Repaired,
    Failed,
    /// No usable sidecar timestamp; the file was not touched
    Skipped,
}

/// What happened to one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub file: String,
    pub status: EntryStatus,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub destination: Option<PathBuf>,
    #[serde(default)]
    pub matched: Vec<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ReportEntry {
    pub fn from_outcome(file: &str, outcome: &RepairOutcome) -> Self {
        let status = match outcome {
            RepairOutcome::AlreadyCorrect { .. } => EntryStatus::AlreadyCorrect,
            RepairOutcome::Repaired { .. } => EntryStatus::Repaired,
            RepairOutcome::Failed {
                error: RepairError::InvalidTimestamp,
                ..
            } => EntryStatus::Skipped,
            RepairOutcome::Failed { .. } => EntryStatus::Failed,
        };
        Self {
            file: file.to_string(),
            status,
            date: outcome.date().map(|d| d.to_string()),
            destination: outcome.destination().map(Path::to_path_buf),
            matched: outcome.matched().iter().map(|f| f.to_string()).collect(),
            error_kind: outcome.error().map(|e| e.kind().to_string()),
            detail: outcome.error().map(|e| e.to_string()),
        }
    }
}

/// Outcome of one batch run, stored in `.redate-report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub version: u32,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub folder: PathBuf,
    pub entries: Vec<ReportEntry>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(folder: &Path) -> Self {
        Self {
            version: REPORT_VERSION,
            started: Utc::now(),
            finished: None,
            folder: folder.to_path_buf(),
            entries: Vec::new(),
            cancelled: false,
        }
    }

    pub fn record(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn finish(&mut self, cancelled: bool) {
        self.entries.sort_by(|a, b| a.file.cmp(&b.file));
        self.cancelled = cancelled;
        self.finished = Some(Utc::now());
    }

    pub fn count(&self, status: EntryStatus) -> u64 {
        self.entries.iter().filter(|e| e.status == status).count() as u64
    }

    /// Load a report from a base folder, if one exists.
    pub fn load(folder: &Path) -> anyhow::Result<Option<Self>> {
        let path = folder.join(REPORT_FILENAME);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Save to the base folder through a temp file and rename.
    pub fn save(&self, folder: &Path) -> anyhow::Result<PathBuf> {
        let path = folder.join(REPORT_FILENAME);
        let temp_path = folder.join(".redate-report.tmp");

        let writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer_pretty(writer, self)?;

        fs::rename(&temp_path, &path)?;
        Ok(path)
    }
}

/// Cooperative cancellation: checked before each file starts, never mid-file.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }
}

/// Error indicating the operation was cancelled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Operation cancelled")]
pub struct CancelledError;
