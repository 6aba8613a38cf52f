//! Storage module for resume state
//!
//! This module persists what a later run needs to pick up where this one
//! stopped:
//! - Fingerprints already seen, so finished work is not dispatched again
//! - Requests still pending when the run stopped
//! - Route health counters
//! - A run log keyed by configuration hash

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::routes::RouteSnapshot;
use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// A request that was queued or in flight when a run stopped
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
    pub depth: u32,
    pub priority: i32,
}

/// State carried from one run to the next
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeState {
    pub seen: Vec<String>,
    pub pending: Vec<PendingRequest>,
    pub routes: Vec<RouteSnapshot>,
}

impl ResumeState {
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty() && self.pending.is_empty() && self.routes.is_empty()
    }
}

/// Represents a dispatch run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a dispatch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
