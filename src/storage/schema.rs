//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the checkpoint database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    checkpointed_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Queued and in-flight WorkItems, in dequeue order
CREATE TABLE IF NOT EXISTS frontier (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    position INTEGER NOT NULL,
    priority INTEGER NOT NULL,
    stage TEXT NOT NULL,
    item TEXT NOT NULL,
    PRIMARY KEY (run_id, position)
);

-- Records seen but not yet finalized
CREATE TABLE IF NOT EXISTS in_flight (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    id TEXT NOT NULL,
    pending INTEGER NOT NULL,
    record TEXT,
    PRIMARY KEY (run_id, id)
);

-- Ids already handed to the record sink
CREATE TABLE IF NOT EXISTS finalized (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    id TEXT NOT NULL,
    PRIMARY KEY (run_id, id)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
