//! Priority encoding for the frontier
//!
//! A priority is a single `i64` split into three nested ranks:
//!
//! ```text
//! | page band (high bits) | result slot (12 bits) | sub-item slot (12 bits) |
//! ```
//!
//! Bands decrease by exactly one `PAGE_STRIDE` per listing page, result slots
//! decrease with the position on the page, and sub-item slots decrease with the
//! ordinal of an embedded sub-resource. Larger values are dequeued first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest listing page the encoding can order strictly
pub const MAX_PAGE_SIZE: u32 = 4096;

const SUB_SLOTS: i64 = 1 << 12;
const ITEM_SLOTS: i64 = MAX_PAGE_SIZE as i64;
const PAGE_STRIDE: i64 = ITEM_SLOTS * SUB_SLOTS;

/// Ordering key of a WorkItem (higher is fetched first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i64);

impl Priority {
    /// Priority of the first listing page of every seed query
    pub const SEED: Priority = Priority(PAGE_STRIDE - 1);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// Priority of the listing page following the one at `self`
    ///
    /// Exactly one page unit lower, which puts it below every item derived
    /// from the current page.
    pub fn next_page(self) -> Self {
        Self(self.0.saturating_sub(PAGE_STRIDE))
    }

    /// Priority of the result at `position` on the page whose listing item has
    /// priority `self`
    pub fn for_result(self, position: usize) -> Self {
        let position = (position as i64).min(ITEM_SLOTS - 1);
        Self(self.band_floor() + (ITEM_SLOTS - 1 - position) * SUB_SLOTS + (SUB_SLOTS - 1))
    }

    /// Priority of the `ordinal`-th sub-resource embedded in the result at `self`
    pub fn for_sub_resource(self, ordinal: usize) -> Self {
        let slot_floor = self.0 - self.0.rem_euclid(SUB_SLOTS);
        let ordinal = (ordinal as i64).min(SUB_SLOTS - 2);
        Self(slot_floor + (SUB_SLOTS - 2 - ordinal))
    }

    /// Zero-based listing page index relative to the seed page
    pub fn page_index(self) -> i64 {
        Self::SEED.band() - self.band()
    }

    fn band(self) -> i64 {
        self.0.div_euclid(PAGE_STRIDE)
    }

    fn band_floor(self) -> i64 {
        self.band() * PAGE_STRIDE
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_on_a_page_keep_list_order() {
        let page = Priority::SEED;
        for i in 0..20 {
            assert!(page.for_result(i) > page.for_result(i + 1), "position {}", i);
        }
        assert!(page.for_result(0) > page.for_result(MAX_PAGE_SIZE as usize - 1));
    }

    #[test]
    fn test_next_page_is_below_every_item_of_current_page() {
        let page1 = Priority::SEED;
        let page2 = page1.next_page();

        let lowest_on_page1 = page1
            .for_result(MAX_PAGE_SIZE as usize - 1)
            .for_sub_resource(100);
        assert!(page2 < lowest_on_page1);
        assert!(page2.for_result(0) < lowest_on_page1);
        assert!(page2.for_result(0).for_sub_resource(0) < page1.for_result(9));
    }

    #[test]
    fn test_next_page_decrements_one_unit() {
        let page1 = Priority::SEED;
        let page3 = page1.next_page().next_page();
        assert_eq!(page1.value() - page3.value(), 2 * PAGE_STRIDE);
        assert_eq!(page3.page_index(), 2);
        assert_eq!(page1.page_index(), 0);
    }

    #[test]
    fn test_sub_resources_sit_between_neighbouring_results() {
        let page = Priority::SEED.next_page();
        let first = page.for_result(3);
        let second = page.for_result(4);

        let subs: Vec<_> = (0..5).map(|j| first.for_sub_resource(j)).collect();
        assert!(subs.iter().all(|s| *s < first && *s > second));
        assert!(subs.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_result_priority_of_page_below_seed_stays_in_band() {
        let page2 = Priority::SEED.next_page();
        assert_eq!(page2.for_result(0).page_index(), 1);
        assert_eq!(page2.for_result(7).for_sub_resource(2).page_index(), 1);
    }
}
