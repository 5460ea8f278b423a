//! Output module for crawl reporting
//!
//! This module handles:
//! - Recording crawl statistics and metrics
//! - Periodic progress reports
//! - The end-of-run summary

pub mod stats;

pub use stats::{log_progress, print_statistics, CrawlStatistics, StageCounts};
