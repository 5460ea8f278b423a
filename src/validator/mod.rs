//! Integrity validator for a finished record stream
//!
//! Reads newline-delimited records, cross-checks every declared sub-resource
//! against the stream, and reports:
//!
//! - on the summary stream, `<id> <sub-resource count> <distinct reader dirs>`
//!   for every record with sub-resources and no defects
//! - on the defect stream, one line per broken reference, followed by the
//!   total of sub-resources that never resolved a reader
//!
//! The validator never modifies records.

use crate::model::CatalogRecord;
use crate::storage::StorageError;
use crate::HarvestError;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{BufRead, Write};

/// A broken reference between two records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Defect {
    /// The parent declares a sub-resource that is not in the stream
    MissingSubResource { parent: String, child: String },

    /// The sub-resource is in the stream but resolved no reader entry
    MissingReaderLink { parent: String, child: String },
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSubResource { parent, child } => {
                write!(f, "missing sub: {}->{}", parent, child)
            }
            Self::MissingReaderLink { parent, child } => {
                write!(f, "missing reader: {}->{}", parent, child)
            }
        }
    }
}

/// Summary line of a record whose sub-resources all check out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub id: String,
    pub sub_resource_count: usize,
    pub distinct_reader_dirs: usize,
}

impl fmt::Display for RecordSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.id, self.sub_resource_count, self.distinct_reader_dirs
        )
    }
}

/// Result of validating a record stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub summaries: Vec<RecordSummary>,
    pub defects: Vec<Defect>,
    pub missing_reader_count: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.defects.is_empty()
    }

    /// Writes summaries to `out` and defects plus the trailing count to `err`
    pub fn write<O: Write, E: Write>(&self, out: &mut O, err: &mut E) -> std::io::Result<()> {
        for summary in &self.summaries {
            writeln!(out, "{}", summary)?;
        }
        for defect in &self.defects {
            writeln!(err, "{}", defect)?;
        }
        writeln!(err, "missing reader count: {}", self.missing_reader_count)?;
        out.flush()?;
        err.flush()
    }
}

/// Reads a newline-delimited record stream, skipping blank lines
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<CatalogRecord>, HarvestError> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            StorageError::Serialization(format!("line {}: {}", index + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Cross-checks a record stream
///
/// When an id occurs more than once the last occurrence wins; records are
/// still reported in the order their ids first appeared.
pub fn validate_records(records: &[CatalogRecord]) -> ValidationReport {
    let mut order: Vec<&str> = Vec::new();
    let mut by_id: HashMap<&str, &CatalogRecord> = HashMap::new();
    for record in records {
        if by_id.insert(record.id.as_str(), record).is_none() {
            order.push(record.id.as_str());
        }
    }

    let mut report = ValidationReport::default();

    for id in order {
        let record = by_id[id];
        if record.sub_resources.is_empty() {
            continue;
        }

        let mut clean = true;
        let mut reader_dirs: HashSet<&str> = HashSet::new();

        for sub in &record.sub_resources {
            match by_id.get(sub.id.as_str()) {
                None => {
                    clean = false;
                    report.defects.push(Defect::MissingSubResource {
                        parent: record.id.clone(),
                        child: sub.id.clone(),
                    });
                }
                Some(child) if child.reader_entries.is_empty() => {
                    clean = false;
                    report.missing_reader_count += 1;
                    report.defects.push(Defect::MissingReaderLink {
                        parent: record.id.clone(),
                        child: sub.id.clone(),
                    });
                }
                Some(child) => {
                    reader_dirs.extend(child.reader_entries.iter().map(|e| e.directory_key()));
                }
            }
        }

        if clean {
            report.summaries.push(RecordSummary {
                id: record.id.clone(),
                sub_resource_count: record.sub_resources.len(),
                distinct_reader_dirs: reader_dirs.len(),
            });
        }
    }

    report
}
