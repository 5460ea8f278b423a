use serde::Deserialize;

/// Main configuration structure for Stacks-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub origin: OriginConfig,
    pub catalog: CatalogConfig,
    pub detail: DetailConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub output: OutputConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of simultaneous dispatcher calls
    #[serde(rename = "max-concurrent-fetches")]
    pub max_concurrent_fetches: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Number of extra attempts for transient failures
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between attempts on the same target (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Completed WorkItems between two checkpoint saves
    #[serde(rename = "checkpoint-interval", default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
}

/// The origin every request is sent to
#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    /// Base URL used to resolve relative reader references
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Static session cookie attached to every request
    #[serde(default)]
    pub cookie: Option<String>,

    /// User-Agent header value
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Paged listing query configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Endpoint the paged JSON query is POSTed to
    #[serde(rename = "listing-url")]
    pub listing_url: String,

    /// Results per listing page
    #[serde(rename = "page-size")]
    pub page_size: u32,

    #[serde(rename = "search-id", default)]
    pub search_id: String,

    #[serde(rename = "sort-order", default = "default_sort_order")]
    pub sort_order: String,

    /// Optional site identifier sent as `wfwfid`
    #[serde(rename = "site-id", default)]
    pub site_id: Option<String>,

    /// Facet used to partition the catalog into seeds
    #[serde(rename = "filter-field", default)]
    pub filter_field: Option<String>,

    /// Largest `totalRecords` the API answers correctly for one query
    #[serde(rename = "total-records-cap", default = "default_total_records_cap")]
    pub total_records_cap: u64,

    /// Value of `code` in a successful listing response
    #[serde(rename = "success-code", default = "default_success_code")]
    pub success_code: i64,

    #[serde(default)]
    pub seeds: Vec<SeedEntry>,
}

/// One independent listing query
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub name: String,

    /// Facet value; `None` walks the unfiltered catalog
    #[serde(default)]
    pub filter: Option<String>,
}

/// Item-detail stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetailConfig {
    /// Detail URL containing an `{id}` placeholder
    #[serde(rename = "url-template")]
    pub url_template: String,

    /// Name of the script variable holding the detail JSON
    pub variable: String,

    /// Field keys whose entries carry reader file references
    #[serde(rename = "reader-field-keys", default = "default_reader_field_keys")]
    pub reader_field_keys: Vec<String>,
}

/// Reader-metadata stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Path fragment identifying the legacy HTML viewer
    #[serde(rename = "legacy-viewer-marker", default = "default_legacy_marker")]
    pub legacy_viewer_marker: String,

    /// Query parameter of the legacy viewer carrying the blob path
    #[serde(rename = "legacy-file-param", default = "default_legacy_param")]
    pub legacy_file_param: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            legacy_viewer_marker: default_legacy_marker(),
            legacy_file_param: default_legacy_param(),
        }
    }
}

/// Data-set specific filtering policy
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Attribute or field key holding a sub-resource's type tag
    #[serde(rename = "self-reference-tag-key", default)]
    pub self_reference_tag_key: Option<String>,

    /// Tag values that mark a sub-resource as a reference back to its parent
    #[serde(rename = "self-reference-tags", default)]
    pub self_reference_tags: Vec<String>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the newline-delimited record stream
    #[serde(rename = "records-path")]
    pub records_path: String,

    /// Path to the SQLite checkpoint database
    #[serde(rename = "checkpoint-path")]
    pub checkpoint_path: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_checkpoint_interval() -> u32 {
    100
}

fn default_user_agent() -> String {
    format!("stacks-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_sort_order() -> String {
    "default".to_string()
}

fn default_total_records_cap() -> u64 {
    100_000
}

fn default_success_code() -> i64 {
    1
}

fn default_reader_field_keys() -> Vec<String> {
    vec!["获取方式".to_string(), "阅读".to_string()]
}

fn default_legacy_marker() -> String {
    "viewer.html".to_string()
}

fn default_legacy_param() -> String {
    "file".to_string()
}
