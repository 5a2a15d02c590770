//! HTTP client for catalog and detail pages
//!
//! A single reqwest client behind a `governor` rate limiter. Catalog fetches
//! are retried with the shared [`RetryPolicy`]; client errors other than 429
//! are final.

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info};

use crate::crawling::extractor::{CatalogSource, ExtractionError};
use crate::crawling::retry::RetryPolicy;
use crate::infrastructure::config::CatalogConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
    pub retry: RetryPolicy,
}

impl From<&CatalogConfig> for HttpClientConfig {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout_secs: config.request_timeout_secs,
            requests_per_second: config.requests_per_second,
            retry: config.fetch_retry.clone(),
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from(&CatalogConfig::default())
    }
}

/// Rate-limited page fetcher
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    retry: RetryPolicy,
}

fn status_error(url: &str, status: StatusCode) -> ExtractionError {
    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    ExtractionError::fetch(url, format!("HTTP {status}"), retryable)
}

impl HttpClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).context("Rate limit must be greater than 0")?,
        );

        info!("🌐 HTTP client ready ({} req/s)", config.requests_per_second);
        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            retry: config.retry.clone(),
        })
    }

    /// Single rate-limited GET returning the body text.
    pub async fn get_text_once(&self, url: &str) -> Result<String, ExtractionError> {
        self.rate_limiter.until_ready().await;
        debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractionError::fetch(url, e.to_string(), true))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ExtractionError::fetch(url, format!("Failed to read body: {e}"), true))?;
        debug!("Fetched {} ({} chars)", url, text.len());
        Ok(text)
    }

    /// GET with the configured retry policy.
    pub async fn get_text(&self, url: &str) -> Result<String, ExtractionError> {
        self.retry
            .run(url, ExtractionError::is_retryable, |_| self.get_text_once(url))
            .await
            .result
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl CatalogSource for HttpClient {
    async fn fetch_catalog(&self, url: &str) -> Result<String, ExtractionError> {
        self.get_text(url).await
    }
}
