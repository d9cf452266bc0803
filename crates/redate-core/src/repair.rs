//! Per-file date repair: stage, pre-check, write, post-check, route.

use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::date::CanonicalDate;
use crate::engine::{MetadataEngine, TagSet, WriteFailure};
use crate::error::RepairError;
use crate::media::SourceFile;
use crate::stage::{Destination, StageFolders};
use crate::verify::{self, CheckedField};

/// How one repair ended.
#[derive(Debug)]
pub enum RepairOutcome {
    /// The working copy already carried the date; nothing was written.
    AlreadyCorrect {
        date: CanonicalDate,
        destination: PathBuf,
        matched: Vec<CheckedField>,
    },
    /// Tags were written and at least one checked field verified.
    Repaired {
        date: CanonicalDate,
        destination: PathBuf,
        matched: Vec<CheckedField>,
    },
    Failed {
        error: RepairError,
        date: Option<CanonicalDate>,
        /// Where the working copy ended up, if one was made
        destination: Option<PathBuf>,
    },
}

impl RepairOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RepairOutcome::Failed { .. })
    }

    pub fn date(&self) -> Option<&CanonicalDate> {
        match self {
            RepairOutcome::AlreadyCorrect { date, .. } | RepairOutcome::Repaired { date, .. } => {
                Some(date)
            }
            RepairOutcome::Failed { date, .. } => date.as_ref(),
        }
    }

    pub fn destination(&self) -> Option<&Path> {
        match self {
            RepairOutcome::AlreadyCorrect { destination, .. }
            | RepairOutcome::Repaired { destination, .. } => Some(destination),
            RepairOutcome::Failed { destination, .. } => destination.as_deref(),
        }
    }

    pub fn matched(&self) -> &[CheckedField] {
        match self {
            RepairOutcome::AlreadyCorrect { matched, .. }
            | RepairOutcome::Repaired { matched, .. } => matched,
            RepairOutcome::Failed { .. } => &[],
        }
    }

    pub fn error(&self) -> Option<&RepairError> {
        match self {
            RepairOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    fn failed(error: RepairError) -> Self {
        RepairOutcome::Failed {
            error,
            date: None,
            destination: None,
        }
    }
}

/// State carried through one repair. Lives only for the duration of the call.
struct ProcessingRecord {
    source: SourceFile,
    working: PathBuf,
    epoch: i64,
    date: CanonicalDate,
}

/// Drives the per-file state machine against a shared metadata engine.
pub struct DateRepairer<'e, E: MetadataEngine + ?Sized> {
    engine: &'e E,
    sync_mtime: bool,
}

impl<'e, E: MetadataEngine + ?Sized> DateRepairer<'e, E> {
    pub fn new(engine: &'e E) -> Self {
        Self {
            engine,
            sync_mtime: false,
        }
    }

    /// Also set the filesystem mtime of repaired files to the recovered time.
    pub fn with_sync_mtime(mut self, sync_mtime: bool) -> Self {
        self.sync_mtime = sync_mtime;
        self
    }

    /// Repair one file and report only whether it ended up in `success`.
    /// Never fails: every problem is logged and becomes `false`.
    pub fn repair_file_dates(&self, base_folder: &Path, source: &Path, timestamp: Option<i64>) -> bool {
        self.repair(base_folder, source, timestamp).is_success()
    }

    /// Repair one file, returning the detailed outcome.
    pub fn repair(&self, base_folder: &Path, source: &Path, timestamp: Option<i64>) -> RepairOutcome {
        let Some((epoch, date)) = timestamp
            .and_then(|epoch| CanonicalDate::from_epoch_seconds(epoch).map(|date| (epoch, date)))
        else {
            tracing::error!(
                file = %source.display(),
                "Error setting file dates: photoTakenTime is null, undefined, or invalid number."
            );
            return RepairOutcome::failed(RepairError::InvalidTimestamp);
        };

        let source = match SourceFile::new(source) {
            Ok(source) => source,
            Err(e) => return RepairOutcome::failed(e.into()),
        };

        let folders = StageFolders::new(base_folder);
        let working = match folders.ensure().and_then(|_| folders.stage(&source)) {
            Ok(working) => working,
            Err(e) => {
                tracing::error!(file = %source.filename, "Error setting file dates: {}", e);
                return RepairOutcome::Failed {
                    error: e.into(),
                    date: Some(date),
                    destination: None,
                };
            }
        };

        let record = ProcessingRecord {
            source,
            working,
            epoch,
            date,
        };
        tracing::info!("Setting file dates for: {}", record.source.filename);
        tracing::info!("Formatted Date for EXIF/XMP: {}", record.date);

        match self.run(&folders, &record) {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = match e {
                    RepairError::Unexpected(_) => e,
                    other => RepairError::Unexpected(other.to_string()),
                };
                tracing::error!(file = %record.source.filename, "Error setting file dates: {}", error);
                let destination = if record.working.exists() {
                    folders
                        .promote(&record.working, Destination::Error)
                        .map_err(|e| {
                            tracing::error!(file = %record.source.filename, "Could not move to error folder: {}", e);
                        })
                        .ok()
                } else {
                    None
                };
                RepairOutcome::Failed {
                    error,
                    date: Some(record.date),
                    destination,
                }
            }
        }
    }

    fn run(&self, folders: &StageFolders, record: &ProcessingRecord) -> Result<RepairOutcome, RepairError> {
        let before = verify::check(self.engine, &record.date, &record.working)?;
        if before.is_match() {
            tracing::info!("File dates already set correctly before writing. No need to write again.");
            let destination = folders.promote(&record.working, Destination::Success)?;
            self.apply_mtime(&destination, record.epoch);
            return Ok(RepairOutcome::AlreadyCorrect {
                date: record.date.clone(),
                destination,
                matched: before.matched,
            });
        }

        let tags = TagSet::for_date(&record.date);
        if let Err(e) = self.engine.write(&record.working, &tags) {
            match WriteFailure::of(&e) {
                WriteFailure::Benign(kind) => tracing::warn!(
                    file = %record.source.filename,
                    "ExifTool write failed due to {}, checking which dates were set anyway: {}",
                    kind,
                    e
                ),
                WriteFailure::Fatal => tracing::error!(
                    file = %record.source.filename,
                    "ExifTool write failed with a critical error: {}",
                    e
                ),
            }
        }

        let after = verify::check(self.engine, &record.date, &record.working)?;
        if after.is_match() {
            let destination = folders.promote(&record.working, Destination::Success)?;
            self.apply_mtime(&destination, record.epoch);
            if after.is_complete() {
                tracing::info!("File dates successfully set to: {}", record.date);
            } else {
                tracing::info!(
                    matched = ?after.matched,
                    "File dates successfully set to: {} (partial)",
                    record.date
                );
            }
            return Ok(RepairOutcome::Repaired {
                date: record.date.clone(),
                destination,
                matched: after.matched,
            });
        }

        let actual = after.actual.unwrap_or_else(|| "N/A".to_string());
        tracing::warn!(file = %record.source.filename, "File dates were not set correctly. Moving to error folder.");
        tracing::info!("Expected date: {}", record.date);
        tracing::info!("Actual date: {}", actual);
        let destination = folders.promote(&record.working, Destination::Error)?;
        Ok(RepairOutcome::Failed {
            error: RepairError::VerificationFailed {
                expected: record.date.to_string(),
                actual,
            },
            date: Some(record.date.clone()),
            destination: Some(destination),
        })
    }

    fn apply_mtime(&self, path: &Path, epoch: i64) {
        if !self.sync_mtime {
            return;
        }
        let ft = FileTime::from_unix_time(epoch, 0);
        if let Err(e) = filetime::set_file_mtime(path, ft) {
            tracing::warn!(path = %path.display(), "Could not set modification time: {}", e);
        }
    }
}
