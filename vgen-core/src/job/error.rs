use std::path::PathBuf;

use thiserror::Error;

use super::models::JobStatus;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("job {job_id} not found")]
    NotFound { job_id: String },
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {job_id} is {status} and no longer accepts results")]
    NotRunning { job_id: String, status: JobStatus },
    #[error("job {job_id} has no planned variant {slot}")]
    UnknownSlot { job_id: String, slot: String },
    #[error("job {job_id} has corrupt column {column}: {value}")]
    Corrupt {
        job_id: String,
        column: &'static str,
        value: String,
    },
    #[error("store task did not finish: {0}")]
    Background(String),
    #[error("job store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

pub type JobResult<T> = std::result::Result<T, JobError>;
