//! In-flight record table
//!
//! The engine owns every record that has been seen but not yet handed to the
//! sink. It counts, per id, the WorkItems still outstanding for that record; a
//! record is finalized the moment its count drops to zero.

use crate::merge::{merge_records, MergeConflict};
use crate::model::{CatalogRecord, ReaderEntry, WorkItem};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One entry of the in-flight table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightRecord {
    pub id: String,

    /// WorkItems still queued or being fetched for this id
    pub pending: usize,

    /// Partial assembled so far; `None` until a detail payload succeeded
    pub record: Option<CatalogRecord>,
}

/// Merge engine owning the in-flight table
#[derive(Debug, Default)]
pub struct MergeEngine {
    table: HashMap<String, InFlightRecord>,
    finalized: HashSet<String>,

    /// Ids finalized since the last saved checkpoint
    unsaved: Vec<String>,

    conflicts: u64,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the engine from a checkpoint
    pub fn restore(records: Vec<InFlightRecord>, finalized: Vec<String>) -> Self {
        Self {
            table: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            finalized: finalized.into_iter().collect(),
            unsaved: Vec::new(),
            conflicts: 0,
        }
    }

    /// Accounts for a WorkItem about to be enqueued
    ///
    /// Returns `false` when the item targets a record that was already
    /// finalized; such an item must be dropped.
    pub fn register(&mut self, item: &WorkItem) -> bool {
        let Some(id) = item.owner_id() else {
            return true;
        };
        if self.finalized.contains(id) {
            return false;
        }
        self.entry(id).pending += 1;
        true
    }

    /// Folds a partial record into the table
    pub fn contribute(&mut self, partial: CatalogRecord) -> Vec<MergeConflict> {
        let entry = self.entry(&partial.id);
        let conflicts = match entry.record.as_mut() {
            Some(existing) => merge_records(existing, partial),
            None => {
                entry.record = Some(partial);
                Vec::new()
            }
        };
        self.conflicts += conflicts.len() as u64;
        conflicts
    }

    /// Appends a reader entry to the owning record, deduplicating by content
    ///
    /// Returns whether the entry was new.
    pub fn add_reader_entry(&mut self, owner_id: &str, entry: ReaderEntry) -> bool {
        let slot = self.entry(owner_id);
        slot.record
            .get_or_insert_with(|| CatalogRecord::new(owner_id))
            .push_reader_entry(entry)
    }

    /// Marks one WorkItem of `id` as done (processed or dropped)
    ///
    /// Returns the finished record when nothing else is pending for it. A
    /// record that never received a detail payload is discarded instead.
    pub fn complete(&mut self, id: &str) -> Option<CatalogRecord> {
        let entry = self.table.get_mut(id)?;
        entry.pending = entry.pending.saturating_sub(1);
        if entry.pending > 0 {
            return None;
        }

        let entry = self.table.remove(id)?;
        let record = entry.record?;
        self.finalized.insert(record.id.clone());
        self.unsaved.push(record.id.clone());
        Some(record)
    }

    pub fn is_finalized(&self, id: &str) -> bool {
        self.finalized.contains(id)
    }

    pub fn pending_for(&self, id: &str) -> usize {
        self.table.get(id).map(|e| e.pending).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.table.len()
    }

    pub fn finalized_len(&self) -> usize {
        self.finalized.len()
    }

    /// Total merge conflicts seen since the engine was created
    pub fn conflict_count(&self) -> u64 {
        self.conflicts
    }

    /// Copy of the in-flight table, sorted by id for stable checkpoints
    pub fn snapshot(&self) -> Vec<InFlightRecord> {
        let mut records: Vec<_> = self.table.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Ids finalized since [`mark_finalized_saved`](Self::mark_finalized_saved)
    pub fn unsaved_finalized(&self) -> &[String] {
        &self.unsaved
    }

    pub fn mark_finalized_saved(&mut self) {
        self.unsaved.clear();
    }

    fn entry(&mut self, id: &str) -> &mut InFlightRecord {
        self.table
            .entry(id.to_string())
            .or_insert_with(|| InFlightRecord {
                id: id.to_string(),
                pending: 0,
                record: None,
            })
    }
}
