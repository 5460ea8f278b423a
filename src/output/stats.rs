//! Crawl statistics
//!
//! Counters kept by the coordinator while a crawl runs, logged periodically
//! and printed once the frontier drains.

use crate::model::Stage;
use std::collections::HashMap;
use std::time::Duration;

/// Per-stage WorkItem counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub dispatched: u64,
    pub completed: u64,
    pub dropped: u64,
}

/// Crawl statistics summary
#[derive(Debug, Clone, Default)]
pub struct CrawlStatistics {
    pub stages: HashMap<Stage, StageCounts>,

    /// Records handed to the sink
    pub records_emitted: u64,

    /// Records discarded because their detail payload never arrived
    pub records_dropped: u64,

    /// WorkItems skipped because their record was already finalized
    pub duplicates_skipped: u64,

    /// Type mismatches met while merging partial records
    pub merge_conflicts: u64,

    /// Self-referential sub-resources removed by policy
    pub sub_resources_filtered: u64,

    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl CrawlStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut StageCounts {
        self.stages.entry(stage).or_default()
    }

    pub fn record_dispatch(&mut self, stage: Stage) {
        self.stage_mut(stage).dispatched += 1;
    }

    pub fn record_completion(&mut self, stage: Stage) {
        self.stage_mut(stage).completed += 1;
    }

    pub fn record_drop(&mut self, stage: Stage) {
        self.stage_mut(stage).dropped += 1;
    }

    pub fn stage(&self, stage: Stage) -> StageCounts {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    /// WorkItems finished so far, successfully or not
    pub fn total_finished(&self) -> u64 {
        self.stages.values().map(|c| c.completed + c.dropped).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.stages.values().map(|c| c.dropped).sum()
    }
}

/// Logs a one-line progress report
pub fn log_progress(stats: &CrawlStatistics, frontier_size: usize, in_flight_records: usize) {
    let rate = if stats.elapsed.as_secs_f64() > 0.0 {
        stats.total_finished() as f64 / stats.elapsed.as_secs_f64()
    } else {
        0.0
    };
    tracing::info!(
        finished = stats.total_finished(),
        dropped = stats.total_dropped(),
        records = stats.records_emitted,
        frontier = frontier_size,
        in_flight = in_flight_records,
        "Progress: {:.2} items/sec",
        rate
    );
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Work Items by Stage:");
    for stage in Stage::all() {
        let counts = stats.stage(stage);
        println!(
            "  {}: {} dispatched, {} completed, {} dropped",
            stage, counts.dispatched, counts.completed, counts.dropped
        );
    }
    println!();

    println!("Records:");
    println!("  Emitted: {}", stats.records_emitted);
    println!("  Dropped: {}", stats.records_dropped);
    println!("  Duplicate work items skipped: {}", stats.duplicates_skipped);
    println!("  Self-referential sub-resources removed: {}", stats.sub_resources_filtered);
    println!("  Merge conflicts: {}", stats.merge_conflicts);
    println!();

    let finished = stats.total_finished();
    let success_rate = if finished > 0 {
        ((finished - stats.total_dropped()) as f64 / finished as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Success Rate: {:.1}% ({} / {} work items completed) in {:.1}s",
        success_rate,
        finished - stats.total_dropped(),
        finished,
        stats.elapsed.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_counters() {
        let mut stats = CrawlStatistics::new();
        stats.record_dispatch(Stage::Listing);
        stats.record_completion(Stage::Listing);
        stats.record_dispatch(Stage::ReaderMetadata);
        stats.record_drop(Stage::ReaderMetadata);

        assert_eq!(
            stats.stage(Stage::Listing),
            StageCounts {
                dispatched: 1,
                completed: 1,
                dropped: 0
            }
        );
        assert_eq!(stats.stage(Stage::ItemDetail), StageCounts::default());
        assert_eq!(stats.total_finished(), 2);
        assert_eq!(stats.total_dropped(), 1);
    }
}
