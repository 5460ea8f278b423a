//! Stacks-Harvest: an order-preserving digital library catalog harvester
//!
//! This crate walks a paginated library catalog, resolves every record's detail
//! page and reader metadata, merges the partial field sets discovered along the
//! way into one canonical record per catalog entry, and checks the finished
//! corpus for referential integrity.

pub mod config;
pub mod crawler;
pub mod merge;
pub mod model;
pub mod output;
pub mod storage;
pub mod validator;

use thiserror::Error;

/// Main error type for Stacks-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawl task failed: {0}")]
    Task(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors surfaced by the fetch dispatcher
///
/// `Transient` never leaves the dispatcher: it is retried until it either
/// succeeds or turns into `Exhausted`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Transient failure for {target}: {reason}")]
    Transient { target: String, reason: String },

    #[error("Retries exhausted for {target} after {attempts} attempts: {reason}")]
    Exhausted {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("Permanent failure for {target}: {reason}")]
    Permanent {
        target: String,
        status: Option<u16>,
        reason: String,
    },
}

impl FetchError {
    /// Whether the dispatcher should try the same target again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors raised while decoding a fetched payload
///
/// A parse error is fatal to the WorkItem that produced the payload only.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("API contract violation: {0}")]
    ContractViolation(String),

    #[error("Variable `{0}` not found in payload")]
    MissingVariable(String),

    #[error("Malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(String),
}

/// Result type alias for Stacks-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for payload decoding
pub type ParseResult<T> = std::result::Result<T, ParseError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{CatalogRecord, Priority, ReaderEntry, Stage, SubResource, WorkItem};
pub use validator::{validate_records, ValidationReport};
