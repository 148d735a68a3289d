use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum FinalyzeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to encode queue message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Queue is closed")]
    Closed,

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// True when the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Database(e) => e.is_transient(),
            QueueError::Unavailable(_) => true,
            QueueError::Encode(_) | QueueError::Closed => false,
        }
    }
}

/// Failures of extraction or analysis. The `Display` text is what ends up
/// in a failed job's `error_message`.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Uploaded document is missing: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Analysis exceeded the time limit of {:?}", .0)]
    TimedOut(Duration),

    #[error("Analysis terminated unexpectedly")]
    Panicked,

    #[error("Analysis was cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Background processing is disabled")]
    AsyncDisabled,

    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to record job: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to enqueue job {job_id}: {source}")]
    Enqueue {
        job_id: String,
        #[source]
        source: QueueError,
    },
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} is not finished yet (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    #[error("Job {job_id} failed: {error_message}")]
    Failed {
        job_id: String,
        error_message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, FinalyzeError>;
