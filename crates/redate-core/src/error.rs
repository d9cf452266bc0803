use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures talking to the metadata engine process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine process terminated")]
    Terminated,
    #[error("failed to read metadata from {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("failed to write metadata to {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Failures moving files between the stage folders.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("source path has no file name: {0}")]
    MissingFileName(PathBuf),
    #[error("cannot create folder {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot move {from} to {to}: {message}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },
}

/// Why a single file's repair ended in failure.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("photoTakenTime is missing, zero or not a valid number")]
    InvalidTimestamp,
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("dates were not set correctly (expected {expected}, found {actual})")]
    VerificationFailed { expected: String, actual: String },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl RepairError {
    /// Short machine-friendly name used in logs and the run report.
    pub fn kind(&self) -> &'static str {
        match self {
            RepairError::InvalidTimestamp => "invalid_timestamp",
            RepairError::Stage(_) => "stage_error",
            RepairError::VerificationFailed { .. } => "verification_failed",
            RepairError::Unexpected(_) => "unexpected_error",
        }
    }
}

impl From<EngineError> for RepairError {
    fn from(value: EngineError) -> Self {
        Self::Unexpected(value.to_string())
    }
}
