//! Data model shared by the scheduler, the stage handlers and the merge engine
//!
//! - `WorkItem`: one declarative unit of work (target + stage + priority + context)
//! - `Priority`: the synthetic ordering key that encodes catalog position
//! - `CatalogRecord`: the canonical record assembled from partial sources

pub mod priority;
pub(crate) mod record;
mod work_item;

pub use priority::{Priority, MAX_PAGE_SIZE};
pub use record::{CatalogRecord, ReaderEntry, SubResource};
pub use work_item::{ListingQuery, Stage, WorkContext, WorkItem};
