//! Crawler module for walking the catalog
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry logic
//! - Decoding script-embedded payloads
//! - The per-stage parse handlers
//! - Priority scheduling under a concurrency limit
//! - Overall crawl coordination

mod coordinator;
pub mod extract;
mod fetcher;
mod handlers;
mod scheduler;

pub use coordinator::{run_crawl, Coordinator};
pub use fetcher::{build_http_client, Fetcher};
pub use handlers::{StageHandlers, StageOutput, SubResourcePolicy};
pub use scheduler::{ScheduledFetch, Scheduler};
