//! Storage traits and error types
//!
//! This module defines the trait interfaces for the record sink and the
//! checkpoint store, and their error type.

use crate::model::CatalogRecord;
use crate::storage::{Checkpoint, RunRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination of finalized records
///
/// Records arrive in finalization order. Every record handed to `append` must
/// be durable before the call returns.
pub trait RecordSink {
    fn append(&mut self, record: &CatalogRecord) -> StorageResult<()>;

    /// Flushes buffered output
    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

/// Persistence of crawl runs and their checkpoints
pub trait CheckpointStore {
    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets the most recent run
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run as completed with a finish timestamp
    fn complete_run(&mut self, run_id: i64) -> StorageResult<()>;

    /// Replaces the run's frontier and in-flight table and adds its finalized
    /// ids, atomically
    fn save_checkpoint(&mut self, run_id: i64, checkpoint: &Checkpoint) -> StorageResult<()>;

    /// Loads the run's latest checkpoint (empty if none was saved)
    fn load_checkpoint(&self, run_id: i64) -> StorageResult<Checkpoint>;
}
