use crate::model::{CatalogRecord, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Pipeline stage a WorkItem belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// One page of the paged catalog query
    Listing,

    /// The detail page of a single record
    ItemDetail,

    /// Reader metadata of a record's first file reference
    ReaderMetadata,

    /// Reader metadata of a subsequent volume of a multi-file record
    MultiFileReader,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::ItemDetail => "item_detail",
            Self::ReaderMetadata => "reader_metadata",
            Self::MultiFileReader => "multi_file_reader",
        }
    }

    pub fn all() -> [Stage; 4] {
        [
            Self::Listing,
            Self::ItemDetail,
            Self::ReaderMetadata,
            Self::MultiFileReader,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One independent paged query over the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingQuery {
    /// Seed name, used in logs
    pub seed: String,

    /// Facet value the query is restricted to
    pub filter: Option<String>,
}

/// Stage-specific metadata carried by a WorkItem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkContext {
    Listing {
        query: ListingQuery,
        page: u32,
    },
    Detail {
        id: String,
        /// Fields the listing page reported for this record
        listing_partial: Option<Box<CatalogRecord>>,
        /// Set when the record was reached as a sub-resource
        parent_id: Option<String>,
    },
    Reader {
        owner_id: String,
        /// Zero-based volume index of this reference
        volume: usize,
        /// File references still to resolve after this one, in volume order
        remaining: Vec<String>,
    },
}

/// A declarative unit of work: fetch `target`, then run the stage handler
///
/// WorkItems are never mutated once created; handlers derive new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub target: String,

    /// JSON body; when present the target is POSTed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    pub stage: Stage,
    pub priority: Priority,
    pub context: WorkContext,
}

impl WorkItem {
    pub fn listing(
        target: impl Into<String>,
        body: Value,
        query: ListingQuery,
        page: u32,
        priority: Priority,
    ) -> Self {
        Self {
            target: target.into(),
            body: Some(body),
            stage: Stage::Listing,
            priority,
            context: WorkContext::Listing { query, page },
        }
    }

    pub fn detail(
        target: impl Into<String>,
        id: impl Into<String>,
        listing_partial: Option<CatalogRecord>,
        parent_id: Option<String>,
        priority: Priority,
    ) -> Self {
        Self {
            target: target.into(),
            body: None,
            stage: Stage::ItemDetail,
            priority,
            context: WorkContext::Detail {
                id: id.into(),
                listing_partial: listing_partial.map(Box::new),
                parent_id,
            },
        }
    }

    /// Reader WorkItem for `target`, volume `volume` of `owner_id`
    ///
    /// The first volume is a `ReaderMetadata` item, later ones are
    /// `MultiFileReader` continuations.
    pub fn reader(
        target: impl Into<String>,
        owner_id: impl Into<String>,
        volume: usize,
        remaining: Vec<String>,
        priority: Priority,
    ) -> Self {
        let stage = if volume == 0 {
            Stage::ReaderMetadata
        } else {
            Stage::MultiFileReader
        };
        Self {
            target: target.into(),
            body: None,
            stage,
            priority,
            context: WorkContext::Reader {
                owner_id: owner_id.into(),
                volume,
                remaining,
            },
        }
    }

    /// Id of the record this item contributes to, if any
    pub fn owner_id(&self) -> Option<&str> {
        match &self.context {
            WorkContext::Listing { .. } => None,
            WorkContext::Detail { id, .. } => Some(id),
            WorkContext::Reader { owner_id, .. } => Some(owner_id),
        }
    }

    /// The reader item for the next volume, skipping this one
    ///
    /// Used both after a successful resolution and when this item was dropped,
    /// so later volumes are still resolved in order.
    pub fn next_volume(&self) -> Option<WorkItem> {
        let WorkContext::Reader {
            owner_id,
            volume,
            remaining,
        } = &self.context
        else {
            return None;
        };
        let (next, rest) = remaining.split_first()?;
        Some(WorkItem::reader(
            next.clone(),
            owner_id.clone(),
            volume + 1,
            rest.to_vec(),
            self.priority,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_stage_depends_on_volume() {
        let first = WorkItem::reader("u0", "A", 0, vec!["u1".into()], Priority::SEED);
        assert_eq!(first.stage, Stage::ReaderMetadata);

        let second = first.next_volume().unwrap();
        assert_eq!(second.stage, Stage::MultiFileReader);
        assert_eq!(second.target, "u1");
        assert_eq!(second.owner_id(), Some("A"));
        assert_eq!(second.priority, first.priority);
        assert!(second.next_volume().is_none());
    }

    #[test]
    fn test_next_volume_keeps_order() {
        let item = WorkItem::reader(
            "u0",
            "A",
            0,
            vec!["u1".into(), "u2".into(), "u3".into()],
            Priority::SEED,
        );
        let mut targets = vec![item.target.clone()];
        let mut current = item;
        while let Some(next) = current.next_volume() {
            targets.push(next.target.clone());
            current = next;
        }
        assert_eq!(targets, vec!["u0", "u1", "u2", "u3"]);
        assert!(matches!(
            current.context,
            WorkContext::Reader { volume: 3, .. }
        ));
    }

    #[test]
    fn test_owner_id() {
        let listing = WorkItem::listing(
            "https://x/list",
            serde_json::json!({"page": 1}),
            ListingQuery {
                seed: "a".into(),
                filter: None,
            },
            1,
            Priority::SEED,
        );
        assert_eq!(listing.owner_id(), None);
        assert!(listing.next_volume().is_none());

        let detail = WorkItem::detail("https://x/d?id=9", "9", None, None, Priority::SEED);
        assert_eq!(detail.owner_id(), Some("9"));
    }

    #[test]
    fn test_work_item_serde_roundtrip() {
        let mut partial = CatalogRecord::new("9");
        partial
            .attributes
            .insert("title".into(), serde_json::json!("Annals"));
        let item = WorkItem::detail(
            "https://x/d?id=9",
            "9",
            Some(partial),
            None,
            Priority::SEED.for_result(2),
        );
        let json = serde_json::to_string(&item).unwrap();
        let back: WorkItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
