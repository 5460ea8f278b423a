//! Merge logic for partial records
//!
//! Partial records for the same id arrive from different stages (listing page,
//! detail page, sub-resource expansion, reader metadata). They are reconciled by
//! a type-safe additive deep merge:
//!
//! - objects merge key by key, recursively
//! - lists of `{key, ...}` entries merge entry by entry on `key`, matching the
//!   n-th occurrence of a key in `incoming` to the n-th occurrence in `base`
//! - other lists append the incoming entries that are not already present
//! - scalars take the incoming value
//! - a type mismatch is reported as a [`MergeConflict`] and the more specific
//!   value is kept

mod engine;

pub use engine::{InFlightRecord, MergeEngine};

use crate::model::record::kind_name;
use crate::model::{CatalogRecord, SubResource};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// A type mismatch met while merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    /// JSON-pointer style location of the mismatch
    pub path: String,
    pub existing: &'static str,
    pub incoming: &'static str,
    /// Whether the incoming value replaced the existing one
    pub kept_incoming: bool,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type mismatch at {}: {} vs {}, kept {}",
            if self.path.is_empty() { "/" } else { &self.path },
            self.existing,
            self.incoming,
            if self.kept_incoming {
                self.incoming
            } else {
                self.existing
            }
        )
    }
}

/// Deep-merges `incoming` into `base`, returning every type mismatch met
pub fn deep_merge(base: &mut Value, incoming: Value) -> Vec<MergeConflict> {
    let mut conflicts = Vec::new();
    merge_value(base, incoming, String::new(), &mut conflicts);
    conflicts
}

/// Deep-merges two attribute maps
pub fn deep_merge_maps(base: &mut Map<String, Value>, incoming: Map<String, Value>) -> Vec<MergeConflict> {
    let mut conflicts = Vec::new();
    merge_map(base, incoming, "", &mut conflicts);
    conflicts
}

/// Appends the entries of `incoming` that `base` does not already contain
pub fn append_distinct<T: PartialEq>(base: &mut Vec<T>, incoming: Vec<T>) {
    for item in incoming {
        if !base.contains(&item) {
            base.push(item);
        }
    }
}

/// Folds the partial `incoming` into `base` (same id)
///
/// `incoming` is treated as the later, more specific source: its scalars win.
/// Sub-resources merge by id, reader entries accumulate without duplicates, a
/// parent id
/// once set is kept unless the incoming partial carries one, and the merged
/// flag is sticky.
pub fn merge_records(base: &mut CatalogRecord, incoming: CatalogRecord) -> Vec<MergeConflict> {
    debug_assert_eq!(base.id, incoming.id);

    let mut conflicts = deep_merge_maps(&mut base.attributes, incoming.attributes);
    merge_sub_resources(&mut base.sub_resources, incoming.sub_resources, &mut conflicts);
    append_distinct(&mut base.reader_entries, incoming.reader_entries);
    if incoming.parent_id.is_some() {
        base.parent_id = incoming.parent_id;
    }
    base.merged |= incoming.merged;
    conflicts
}

/// Folds sub-resources with a known id into the existing entry, appending new ids
fn merge_sub_resources(
    base: &mut Vec<SubResource>,
    incoming: Vec<SubResource>,
    conflicts: &mut Vec<MergeConflict>,
) {
    for sub in incoming {
        match base.iter_mut().find(|existing| existing.id == sub.id) {
            Some(existing) => {
                let path = format!("/sub_resources/{}", sub.id);
                merge_map(&mut existing.attributes, sub.attributes, &path, conflicts);
            }
            None => base.push(sub),
        }
    }
}

fn merge_value(base: &mut Value, incoming: Value, path: String, conflicts: &mut Vec<MergeConflict>) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            merge_map(base_map, incoming_map, &path, conflicts);
        }
        (Value::Array(base_list), Value::Array(incoming_list)) => {
            if is_keyed_list(base_list) && is_keyed_list(&incoming_list) {
                merge_keyed_list(base_list, incoming_list, &path, conflicts);
            } else {
                append_distinct(base_list, incoming_list);
            }
        }
        (_, Value::Null) => {}
        (base @ Value::Null, incoming) => *base = incoming,
        (base, incoming) if is_scalar(base) && is_scalar(&incoming) => *base = incoming,
        (base, incoming) => {
            let kept_incoming = specificity(&incoming) >= specificity(base);
            conflicts.push(MergeConflict {
                path,
                existing: kind_name(base),
                incoming: kind_name(&incoming),
                kept_incoming,
            });
            if kept_incoming {
                *base = incoming;
            }
        }
    }
}

fn merge_map(
    base: &mut Map<String, Value>,
    incoming: Map<String, Value>,
    path: &str,
    conflicts: &mut Vec<MergeConflict>,
) {
    for (key, value) in incoming {
        let child_path = format!("{}/{}", path, key);
        match base.get_mut(&key) {
            Some(existing) => merge_value(existing, value, child_path, conflicts),
            None => {
                base.insert(key, value);
            }
        }
    }
}

fn entry_key(entry: &Value) -> Option<&str> {
    entry.get("key").and_then(Value::as_str)
}

/// Every entry is an object carrying a string `key`
fn is_keyed_list(list: &[Value]) -> bool {
    list.iter().all(|entry| entry.is_object() && entry_key(entry).is_some())
}

fn merge_keyed_list(
    base: &mut Vec<Value>,
    incoming: Vec<Value>,
    path: &str,
    conflicts: &mut Vec<MergeConflict>,
) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for entry in incoming {
        let Some(key) = entry_key(&entry).map(str::to_string) else {
            continue;
        };
        let occurrence = seen.entry(key.clone()).or_insert(0);
        let target = base
            .iter()
            .enumerate()
            .filter(|(_, existing)| entry_key(existing) == Some(key.as_str()))
            .nth(*occurrence)
            .map(|(index, _)| index);
        *occurrence += 1;

        match target {
            Some(index) => {
                let child_path = format!("{}/{}", path, key);
                merge_value(&mut base[index], entry, child_path, conflicts);
            }
            None => base.push(entry),
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

/// Containers carry more structure than scalars
fn specificity(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => 1,
        Value::Array(_) | Value::Object(_) => 2,
    }
}
