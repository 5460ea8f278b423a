//! Record sinks
//!
//! The crawl writes newline-delimited JSON, one finalized record per line, in
//! finalization order.

use crate::model::CatalogRecord;
use crate::storage::traits::{RecordSink, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Appends records to a JSON Lines file
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Opens the output file
    ///
    /// # Arguments
    ///
    /// * `path` - Path of the record stream
    /// * `truncate` - Start an empty stream instead of appending to it
    pub fn open(path: &Path, truncate: bool) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }

        Ok(Self {
            writer: BufWriter::new(options.open(path)?),
        })
    }
}

impl RecordSink for JsonlSink {
    fn append(&mut self, record: &CatalogRecord) -> StorageResult<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects records in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<CatalogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended so far, in order
    pub fn records(&self) -> Vec<CatalogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &CatalogRecord) -> StorageResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
