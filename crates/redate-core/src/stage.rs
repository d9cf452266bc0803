use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::StageError;
use crate::fs_atomic;
use crate::media::SourceFile;

pub const WORKING_DIR: &str = "working";
pub const SUCCESS_DIR: &str = "success";
pub const ERROR_DIR: &str = "error";

/// Terminal bucket for a working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Success,
    Error,
}

/// The `working` / `success` / `error` folders under one base folder.
#[derive(Debug, Clone)]
pub struct StageFolders {
    pub working: PathBuf,
    pub success: PathBuf,
    pub error: PathBuf,
}

impl StageFolders {
    pub fn new(base: &Path) -> Self {
        Self {
            working: base.join(WORKING_DIR),
            success: base.join(SUCCESS_DIR),
            error: base.join(ERROR_DIR),
        }
    }

    /// Create any missing stage folder. Existing folders and their contents are left alone.
    pub fn ensure(&self) -> Result<(), StageError> {
        for dir in [&self.working, &self.success, &self.error] {
            fs::create_dir_all(dir).map_err(|source| StageError::Create {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn working_path(&self, source: &SourceFile) -> PathBuf {
        self.working.join(&source.filename)
    }

    fn folder(&self, destination: Destination) -> &Path {
        match destination {
            Destination::Success => &self.success,
            Destination::Error => &self.error,
        }
    }

    /// Copy the source into `working`, replacing any stale copy of the same name.
    pub fn stage(&self, source: &SourceFile) -> Result<PathBuf, StageError> {
        let working = self.working_path(source);
        fs_atomic::copy_replace(&source.path, &working).map_err(|e| StageError::Copy {
            from: source.path.clone(),
            to: working.clone(),
            source: e,
        })?;
        Ok(working)
    }

    /// Move a working copy into its terminal folder, overwriting a same-named file there.
    /// A leftover copy in the other terminal folder from an earlier run is removed so the
    /// file only ever lives in one bucket.
    pub fn promote(&self, working: &Path, destination: Destination) -> Result<PathBuf, StageError> {
        let filename = working
            .file_name()
            .ok_or_else(|| StageError::MissingFileName(working.to_path_buf()))?;
        let target = self.folder(destination).join(filename);
        fs_atomic::move_replace(working, &target).map_err(|e| StageError::Move {
            from: working.to_path_buf(),
            to: target.clone(),
            message: e.to_string(),
        })?;

        let other = match destination {
            Destination::Success => self.error.join(filename),
            Destination::Error => self.success.join(filename),
        };
        if other.exists() {
            if let Err(e) = fs::remove_file(&other) {
                tracing::warn!(path = %other.display(), "Could not remove stale copy: {}", e);
            }
        }
        Ok(target)
    }
}
