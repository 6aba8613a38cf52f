//! Storage traits and error types

use crate::storage::{ResumeState, RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend for resume state
pub trait Storage {
    /// Records the start of a run and returns its id
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Sets the final status and finish time of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Loads everything a new run resumes from
    fn load_resume_state(&self) -> StorageResult<ResumeState>;

    /// Merges this run's state into what is stored
    ///
    /// Seen fingerprints accumulate; route health is overwritten per route.
    fn save_resume_state(&mut self, run_id: i64, state: &ResumeState) -> StorageResult<()>;

    /// Forgets all resume state (runs are kept)
    fn clear_resume_state(&mut self) -> StorageResult<()>;
}
