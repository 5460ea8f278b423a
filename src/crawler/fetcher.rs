//! Fetch dispatcher
//!
//! This module performs every network call of the crawl:
//! - Building the HTTP client with the session cookie and user agent
//! - GET for plain targets, POST with a JSON body for listing queries
//! - Retrying transient failures with a fixed delay
//! - Classifying failures as transient or permanent
//!
//! | Condition | Action |
//! |-----------|--------|
//! | HTTP 2xx | Return the body |
//! | HTTP 408, 429, 5xx | Retry, then `Exhausted` |
//! | Timeout, connection error, body read error | Retry, then `Exhausted` |
//! | Other HTTP status | Immediate `Permanent` |
//! | Invalid target, redirect loop | Immediate `Permanent` |

use crate::config::{CrawlerConfig, OriginConfig};
use crate::model::WorkItem;
use crate::{ConfigError, FetchError, HarvestError};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;

/// Maximum number of redirects followed for a single request
const MAX_REDIRECTS: usize = 10;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `origin` - Origin settings (user agent, session cookie)
/// * `crawler` - Crawler settings (request timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(HarvestError)` - The cookie is not a valid header value or the
///   client could not be built
pub fn build_http_client(
    origin: &OriginConfig,
    crawler: &CrawlerConfig,
) -> Result<Client, HarvestError> {
    let mut headers = HeaderMap::new();
    if let Some(cookie) = &origin.cookie {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| ConfigError::Validation(format!("invalid session cookie: {}", e)))?;
        headers.insert(COOKIE, value);
    }

    let client = Client::builder()
        .user_agent(origin.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(crawler.request_timeout_secs))
        .connect_timeout(Duration::from_secs(crawler.request_timeout_secs.min(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()?;

    Ok(client)
}

/// Turns WorkItems into raw response bodies
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl Fetcher {
    /// Creates a fetcher from the crawl configuration
    pub fn new(origin: &OriginConfig, crawler: &CrawlerConfig) -> Result<Self, HarvestError> {
        Ok(Self::with_client(
            build_http_client(origin, crawler)?,
            crawler.max_retries,
            Duration::from_millis(crawler.retry_delay_ms),
        ))
    }

    pub fn with_client(client: Client, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            max_retries,
            retry_delay,
        }
    }

    /// Fetches the item's target, retrying transient failures
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The response body
    /// * `Err(FetchError::Exhausted)` - Every attempt failed transiently
    /// * `Err(FetchError::Permanent)` - A failure that retrying cannot fix
    pub async fn fetch(&self, item: &WorkItem) -> Result<String, FetchError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.fetch_once(item).await {
                Ok(body) => return Ok(body),
                Err(FetchError::Transient { target, reason }) => {
                    if attempts > self.max_retries {
                        return Err(FetchError::Exhausted {
                            target,
                            attempts,
                            reason,
                        });
                    }
                    tracing::debug!(
                        target = %target,
                        stage = %item.stage,
                        attempt = attempts,
                        reason = %reason,
                        "Transient fetch failure, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, item: &WorkItem) -> Result<String, FetchError> {
        let request = match &item.body {
            Some(body) => self.client.post(&item.target).json(body),
            None => self.client.get(&item.target),
        };

        let response = request
            .send()
            .await
            .map_err(|e| classify_error(&item.target, e))?;

        let status = response.status();
        if is_transient_status(status) {
            return Err(FetchError::Transient {
                target: item.target.clone(),
                reason: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Permanent {
                target: item.target.clone(),
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status),
            });
        }

        response.text().await.map_err(|e| FetchError::Transient {
            target: item.target.clone(),
            reason: format!("failed to read body: {}", e),
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Classifies a request error that happened before a status was received
fn classify_error(target: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        FetchError::Transient {
            target: target.to_string(),
            reason: error.to_string(),
        }
    } else {
        FetchError::Permanent {
            target: target.to_string(),
            status: error.status().map(|s| s.as_u16()),
            reason: error.to_string(),
        }
    }
}
