//! Configuration module for Stacks-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use stacks_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Listing page size: {}", config.catalog.page_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CatalogConfig, Config, CrawlerConfig, DetailConfig, OriginConfig, OutputConfig, PolicyConfig,
    ReaderConfig, SeedEntry,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
