use crate::config::types::{
    CatalogConfig, Config, CrawlerConfig, DetailConfig, OriginConfig, OutputConfig, PolicyConfig,
    ReaderConfig,
};
use crate::model::MAX_PAGE_SIZE;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_origin_config(&config.origin)?;
    validate_catalog_config(&config.catalog)?;
    validate_detail_config(&config.detail)?;
    validate_reader_config(&config.reader)?;
    validate_policy_config(&config.policy)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_fetches must be between 1 and 100, got {}",
            config.max_concurrent_fetches
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_retries > 20 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 20, got {}",
            config.max_retries
        )));
    }

    if config.checkpoint_interval < 1 {
        return Err(ConfigError::Validation(
            "checkpoint_interval must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_origin_config(config: &OriginConfig) -> Result<(), ConfigError> {
    validate_http_url("base_url", &config.base_url)?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if let Some(cookie) = &config.cookie {
        if cookie.contains('\n') || cookie.contains('\r') {
            return Err(ConfigError::Validation(
                "cookie cannot contain line breaks".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    validate_http_url("listing_url", &config.listing_url)?;

    if config.page_size < 1 || config.page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, config.page_size
        )));
    }

    if config.total_records_cap == 0 {
        return Err(ConfigError::Validation(
            "total_records_cap must be >= 1".to_string(),
        ));
    }

    if config.seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[catalog.seeds]] entry is required".to_string(),
        ));
    }

    let filtered = config.seeds.iter().any(|seed| seed.filter.is_some());
    if filtered && config.filter_field.is_none() {
        return Err(ConfigError::Validation(
            "seeds with a filter require catalog.filter-field".to_string(),
        ));
    }

    for (i, seed) in config.seeds.iter().enumerate() {
        if seed.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "seed #{} has an empty name",
                i + 1
            )));
        }
        if config.seeds[..i].iter().any(|other| other.name == seed.name) {
            return Err(ConfigError::Validation(format!(
                "duplicate seed name '{}'",
                seed.name
            )));
        }
    }

    Ok(())
}

fn validate_detail_config(config: &DetailConfig) -> Result<(), ConfigError> {
    if !config.url_template.contains("{id}") {
        return Err(ConfigError::Validation(format!(
            "detail url_template must contain '{{id}}', got '{}'",
            config.url_template
        )));
    }
    validate_http_url("url_template", &config.url_template.replace("{id}", "0"))?;
    validate_identifier("detail variable", &config.variable)?;

    if config.reader_field_keys.is_empty() {
        return Err(ConfigError::Validation(
            "reader_field_keys cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_reader_config(config: &ReaderConfig) -> Result<(), ConfigError> {
    if config.legacy_viewer_marker.is_empty() {
        return Err(ConfigError::Validation(
            "legacy_viewer_marker cannot be empty".to_string(),
        ));
    }
    if config.legacy_file_param.is_empty() {
        return Err(ConfigError::Validation(
            "legacy_file_param cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_policy_config(config: &PolicyConfig) -> Result<(), ConfigError> {
    if !config.self_reference_tags.is_empty() && config.self_reference_tag_key.is_none() {
        return Err(ConfigError::Validation(
            "self_reference_tags require self_reference_tag_key".to_string(),
        ));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.records_path.is_empty() {
        return Err(ConfigError::Validation(
            "records_path cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_path.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_path cannot be empty".to_string(),
        ));
    }

    if config.records_path == config.checkpoint_path {
        return Err(ConfigError::Validation(
            "records_path and checkpoint_path must differ".to_string(),
        ));
    }

    Ok(())
}

/// Requires an absolute http(s) URL
fn validate_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", name, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            name, value
        )));
    }

    Ok(())
}

/// Script variable names: ASCII letters, digits, `_` and `$`, not starting with a digit
fn validate_identifier(name: &str, value: &str) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && !value.starts_with(|c: char| c.is_ascii_digit())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if !valid {
        return Err(ConfigError::Validation(format!(
            "{} must be a plain identifier, got '{}'",
            name, value
        )));
    }

    Ok(())
}
