pub mod date;
pub mod engine;
pub mod error;
pub mod extras;
pub mod fs_atomic;
pub mod media;
pub mod repair;
pub mod report;
pub mod scan;
pub mod stage;
pub mod verify;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::date::json::{timestamp_from_sidecar, SidecarIndex};
use crate::engine::MetadataEngine;
use crate::repair::{DateRepairer, RepairOutcome};
use crate::report::{EntryStatus, ReportEntry, RunReport};

pub use crate::date::CanonicalDate;
pub use crate::engine::ExifTool;
pub use crate::error::{EngineError, RepairError, StageError};
pub use crate::report::{CancellationToken, CancelledError, REPORT_FILENAME};

fn default_exiftool_path() -> PathBuf {
    PathBuf::from("exiftool")
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// How to start and talk to the metadata engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_exiftool_path")]
    pub exiftool_path: PathBuf,
    /// Upper bound for a single read or write call
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Passed before the arguments of every call
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exiftool_path: default_exiftool_path(),
            task_timeout_secs: default_task_timeout_secs(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOptions {
    /// Folder holding the exported media and their JSON sidecars
    pub folder: PathBuf,
    /// Worker threads, 0 for one per core
    #[serde(default)]
    pub jobs: usize,
    #[serde(default = "default_true")]
    pub sync_mtime: bool,
    #[serde(default = "default_true")]
    pub write_report: bool,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl RepairOptions {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            jobs: 0,
            sync_mtime: true,
            write_report: true,
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub total_media: u64,
    pub repaired: u64,
    pub already_correct: u64,
    pub failed: u64,
    /// Files without a usable sidecar timestamp
    pub skipped: u64,
    pub cancelled: bool,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

/// Control options for a batch run.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

/// Type alias for progress callback: (stage, current, total, message)
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter, emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: Mutex::new(Instant::now() - Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(PoisonError::into_inner);
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Repair every photo and video directly inside `options.folder`.
///
/// Each file's capture time comes from its JSON sidecar. Files run in parallel
/// against the one shared engine; cancellation stops new files from starting.
pub fn process_folder(
    options: &RepairOptions,
    engine: &dyn MetadataEngine,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<BatchResult> {
    let tp = ThrottledProgress::new(progress_callback);
    let folder = &options.folder;

    let entries = scan::list_entries(folder)
        .with_context(|| format!("cannot list {}", folder.display()))?;
    let sidecars = SidecarIndex::build(&entries);
    let media: Vec<&scan::Entry> = entries
        .iter()
        .filter(|e| !e.name.starts_with('.') && media::is_media_file(&e.name))
        .collect();
    tracing::info!(
        folder = %folder.display(),
        media = media.len(),
        sidecars = sidecars.len(),
        "Scanned folder"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()
        .context("cannot start worker threads")?;

    let repairer = DateRepairer::new(engine).with_sync_mtime(options.sync_mtime);
    let report = Mutex::new(RunReport::new(folder));
    let counter = AtomicU64::new(0);
    let cancelled = AtomicBool::new(false);
    let total = media.len() as u64;

    pool.install(|| {
        media.par_iter().for_each(|entry| {
            if let Some(ref token) = control.cancel_token {
                if token.check().is_err() {
                    cancelled.store(true, Ordering::SeqCst);
                    return;
                }
            }

            let timestamp = match sidecars.find(&entry.name) {
                Some(sidecar) => timestamp_from_sidecar(sidecar),
                None => {
                    tracing::warn!(file = %entry.name, "No JSON sidecar found");
                    None
                }
            };
            let outcome: RepairOutcome = repairer.repair(folder, &entry.full_path, timestamp);
            report
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(ReportEntry::from_outcome(&entry.name, &outcome));

            let current = counter.fetch_add(1, Ordering::Relaxed);
            tp.report("repair", current, total, &entry.name);
        });
    });

    let cancelled = cancelled.load(Ordering::SeqCst);
    let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.finish(cancelled);

    let report_path = if options.write_report {
        Some(report.save(folder)?)
    } else {
        None
    };

    Ok(BatchResult {
        total_media: total,
        repaired: report.count(EntryStatus::Repaired),
        already_correct: report.count(EntryStatus::AlreadyCorrect),
        failed: report.count(EntryStatus::Failed),
        skipped: report.count(EntryStatus::Skipped),
        cancelled,
        report_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use crate::stage::{ERROR_DIR, SUCCESS_DIR, WORKING_DIR};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "IMG_1.jpg", "jpeg");
        write(dir.path(), "IMG_1.jpg.json", r#"{"photoTakenTime":{"timestamp":"1609459200"}}"#);
        write(dir.path(), "IMG_2.jpg", "jpeg");
        write(dir.path(), "IMG_2.jpg.supplemental-metadata.json", r#"{"photoTakenTime":{"timestamp":"0"}}"#);
        write(dir.path(), "VID_3.mp4", "movie");
        write(dir.path(), "notes.txt", "not media");
        dir
    }

    fn no_progress(_: &str, _: u64, _: u64, _: &str) {}

    #[test]
    fn test_process_folder() {
        let dir = fixture();
        let engine = MemoryEngine::new();
        let mut options = RepairOptions::new(dir.path());
        options.jobs = 2;

        let result = process_folder(&options, &engine, &ProcessControl::new(), &no_progress).unwrap();
        assert_eq!(result.total_media, 3);
        assert_eq!(result.repaired, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.failed, 0);
        assert!(!result.cancelled);

        assert!(dir.path().join(SUCCESS_DIR).join("IMG_1.jpg").exists());
        assert!(!dir.path().join(ERROR_DIR).join("IMG_2.jpg").exists());
        assert!(!dir.path().join(WORKING_DIR).join("IMG_1.jpg").exists());
        assert!(dir.path().join("IMG_1.jpg").exists());

        let report = RunReport::load(dir.path()).unwrap().unwrap();
        assert_eq!(report.entries.len(), 3);
        assert_eq!(result.report_path, Some(dir.path().join(REPORT_FILENAME)));
    }

    #[test]
    fn test_rerun_keeps_single_copies() {
        let dir = fixture();
        let engine = MemoryEngine::new();
        let mut options = RepairOptions::new(dir.path());
        options.write_report = false;

        process_folder(&options, &engine, &ProcessControl::new(), &no_progress).unwrap();
        let again = process_folder(&options, &engine, &ProcessControl::new(), &no_progress).unwrap();
        assert_eq!(again.repaired, 1);
        assert_eq!(again.failed, 0);
        assert_eq!(engine.write_count(), 2);
        assert!(again.report_path.is_none());
        assert!(dir.path().join(SUCCESS_DIR).join("IMG_1.jpg").exists());
        assert!(!dir.path().join(ERROR_DIR).join("IMG_1.jpg").exists());
        assert!(engine.read(&dir.path().join("IMG_1.jpg")).unwrap().is_empty());
    }

    #[test]
    fn test_dated_source_needs_no_write() {
        let dir = fixture();
        let engine = MemoryEngine::new();
        let date = CanonicalDate::from_epoch_seconds(1609459200).unwrap();
        let mut tags = engine::TagMap::new();
        tags.insert("ExifIFD:DateTimeOriginal", date.as_str());
        engine.seed(&dir.path().join("IMG_1.jpg"), tags);

        let result =
            process_folder(&RepairOptions::new(dir.path()), &engine, &ProcessControl::new(), &no_progress)
                .unwrap();
        assert_eq!(result.already_correct, 1);
        assert_eq!(result.repaired, 0);
        assert_eq!(engine.write_count(), 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = fixture();
        let engine = MemoryEngine::new();
        let token = CancellationToken::new();
        token.cancel();
        let control = ProcessControl::new().with_cancel_token(token);

        let result =
            process_folder(&RepairOptions::new(dir.path()), &engine, &control, &no_progress).unwrap();
        assert!(result.cancelled);
        assert_eq!(result.repaired + result.skipped + result.failed, 0);
        assert!(!dir.path().join(SUCCESS_DIR).exists());
    }

    #[test]
    fn test_progress_reports_completion() {
        let dir = fixture();
        let engine = MemoryEngine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = move |stage: &str, current: u64, total: u64, _: &str| {
            sink.lock().unwrap().push((stage.to_string(), current, total));
        };

        let mut options = RepairOptions::new(dir.path());
        options.jobs = 1;
        process_folder(&options, &engine, &ProcessControl::new(), &cb).unwrap();
        let seen = seen.lock().unwrap();
        assert!(seen.contains(&("repair".to_string(), 2, 3)));
    }

    #[test]
    fn test_options_defaults_from_json() {
        let options: RepairOptions = serde_json::from_str(r#"{"folder": "/photos"}"#).unwrap();
        assert_eq!(options.folder, PathBuf::from("/photos"));
        assert!(options.sync_mtime);
        assert!(options.write_report);
        assert_eq!(options.engine.task_timeout_secs, 300);
        assert_eq!(options.engine.exiftool_path, PathBuf::from("exiftool"));
    }
}
