//! SQLite checkpoint store
//!
//! This module provides a SQLite-based implementation of the CheckpointStore
//! trait. WorkItems and partial records are stored as JSON text.

use crate::merge::InFlightRecord;
use crate::model::WorkItem;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CheckpointStore, StorageError, StorageResult};
use crate::storage::{Checkpoint, RunRecord, RunStatus};
use crate::HarvestError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite checkpoint backend
pub struct SqliteCheckpointStore {
    conn: Connection,
}

impl SqliteCheckpointStore {
    /// Opens or creates the checkpoint database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteCheckpointStore)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn run_exists(&self, run_id: i64) -> StorageResult<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM runs WHERE id = ?1", params![run_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        checkpointed_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Running),
    })
}

impl CheckpointStore for SqliteCheckpointStore {
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, checkpointed_at, config_hash, status
             FROM runs ORDER BY id DESC LIMIT 1",
        )?;
        Ok(stmt.query_row([], run_from_row).optional()?)
    }

    fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![RunStatus::Completed.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn save_checkpoint(&mut self, run_id: i64, checkpoint: &Checkpoint) -> StorageResult<()> {
        if !self.run_exists(run_id)? {
            return Err(StorageError::RunNotFound(run_id));
        }

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM frontier WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM in_flight WHERE run_id = ?1", params![run_id])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO frontier (run_id, position, priority, stage, item)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, item) in checkpoint.frontier.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    position as i64,
                    item.priority.value(),
                    item.stage.as_str(),
                    serde_json::to_string(item)?,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO in_flight (run_id, id, pending, record) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in &checkpoint.records {
                let record = entry.record.as_ref().map(serde_json::to_string).transpose()?;
                stmt.execute(params![run_id, entry.id, entry.pending as i64, record])?;
            }

            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO finalized (run_id, id) VALUES (?1, ?2)")?;
            for id in &checkpoint.finalized {
                stmt.execute(params![run_id, id])?;
            }
        }

        tx.execute(
            "UPDATE runs SET checkpointed_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), run_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load_checkpoint(&self, run_id: i64) -> StorageResult<Checkpoint> {
        if !self.run_exists(run_id)? {
            return Err(StorageError::RunNotFound(run_id));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT item FROM frontier WHERE run_id = ?1 ORDER BY position")?;
        let frontier = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .map(|json| Ok(serde_json::from_str::<WorkItem>(&json?)?))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT id, pending, record FROM in_flight WHERE run_id = ?1 ORDER BY id")?;
        let records = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .map(|row| {
                let (id, pending, record) = row?;
                Ok(InFlightRecord {
                    id,
                    pending: pending.max(0) as usize,
                    record: record.map(|json| serde_json::from_str(&json)).transpose()?,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT id FROM finalized WHERE run_id = ?1 ORDER BY id")?;
        let finalized = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Checkpoint {
            frontier,
            records,
            finalized,
        })
    }
}
