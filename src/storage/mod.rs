//! Storage module for persisting crawl output and progress
//!
//! This module handles:
//! - Appending finalized records to the output stream
//! - SQLite checkpoints of the frontier and the in-flight table
//! - Run tracking and resumption support

mod schema;
mod sink;
mod sqlite;
mod traits;

pub use sink::{JsonlSink, MemorySink};
pub use sqlite::SqliteCheckpointStore;
pub use traits::{CheckpointStore, RecordSink, StorageError, StorageResult};

use crate::merge::InFlightRecord;
use crate::model::WorkItem;

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub checkpointed_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Everything needed to continue an interrupted crawl
///
/// `frontier` holds queued and in-flight WorkItems in dequeue order; the
/// pending counts in `records` already account for every one of them.
///
/// The stored `finalized` set only grows. A save adds its ids to the ones
/// already stored, so it need only carry ids finalized since the previous
/// save; a load returns all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    pub frontier: Vec<WorkItem>,
    pub records: Vec<InFlightRecord>,
    pub finalized: Vec<String>,
}

impl Checkpoint {
    pub fn is_empty(&self) -> bool {
        self.frontier.is_empty() && self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[RunStatus::Running, RunStatus::Completed] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }
}
