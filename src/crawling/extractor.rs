//! Catalog extraction: fetch each category page and parse it into candidates
//!
//! Fetching and parsing sit behind traits so the catalog-specific markup
//! heuristics stay swappable. A failing category is logged and skipped; the
//! other categories of the cycle are unaffected.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::Product;
use crate::infrastructure::config::CatalogConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionError {
    #[error("fetch failed for {url}: {message}")]
    Fetch {
        url: String,
        message: String,
        /// Whether another attempt could succeed (network error, 5xx, 429)
        retryable: bool,
    },
    #[error("parse failed: {0}")]
    Parse(String),
}

impl ExtractionError {
    pub fn fetch(url: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Fetch {
            url: url.to_string(),
            message: message.into(),
            retryable,
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { retryable: true, .. })
    }
}

/// Source of raw catalog payloads.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self, url: &str) -> Result<String, ExtractionError>;
}

/// Where a payload came from, handed to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseContext {
    pub category: String,
    pub region: String,
    pub page_url: String,
}

/// Turns one raw payload into candidate records.
pub trait CandidateParser: Send + Sync {
    fn parse_candidates(&self, payload: &str, ctx: &ParseContext) -> Result<Vec<Product>, ExtractionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEndpoint {
    pub category: String,
    pub url: String,
}

/// Candidates from one extraction pass plus the categories that failed.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub candidates: Vec<Product>,
    pub failed_categories: Vec<(String, ExtractionError)>,
    /// Categories attempted in the pass
    pub attempted: usize,
}

impl ExtractionReport {
    /// Every attempted category failed. A category that succeeds with no
    /// candidates still counts as a success.
    pub fn all_failed(&self) -> bool {
        !self.failed_categories.is_empty() && self.failed_categories.len() == self.attempted
    }
}

pub struct Extractor {
    source: Arc<dyn CatalogSource>,
    parser: Arc<dyn CandidateParser>,
    region: String,
    endpoints: Vec<CatalogEndpoint>,
}

impl Extractor {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        parser: Arc<dyn CandidateParser>,
        region: impl Into<String>,
        endpoints: Vec<CatalogEndpoint>,
    ) -> Self {
        Self {
            source,
            parser,
            region: region.into(),
            endpoints,
        }
    }

    /// One endpoint per configured category page under `base_url`.
    pub fn from_config(
        source: Arc<dyn CatalogSource>,
        parser: Arc<dyn CandidateParser>,
        config: &CatalogConfig,
    ) -> Self {
        let base = config.base_url.trim_end_matches('/');
        let endpoints = config
            .category_pages
            .iter()
            .map(|page| CatalogEndpoint {
                category: page.category.clone(),
                url: format!("{}/{}", base, page.path.trim_start_matches('/')),
            })
            .collect();
        Self::new(source, parser, config.region.clone(), endpoints)
    }

    pub fn endpoints(&self) -> &[CatalogEndpoint] {
        &self.endpoints
    }

    async fn extract_category(&self, endpoint: &CatalogEndpoint) -> Result<Vec<Product>, ExtractionError> {
        let payload = self.source.fetch_catalog(&endpoint.url).await?;
        let ctx = ParseContext {
            category: endpoint.category.clone(),
            region: self.region.clone(),
            page_url: endpoint.url.clone(),
        };
        self.parser.parse_candidates(&payload, &ctx)
    }

    /// Extract every category concurrently. Candidates sharing an identity
    /// within one pass are collapsed to the first seen.
    pub async fn extract(&self) -> ExtractionReport {
        let started = Instant::now();
        let results = join_all(self.endpoints.iter().map(|endpoint| async move {
            (endpoint, self.extract_category(endpoint).await)
        }))
        .await;

        let mut report = ExtractionReport {
            attempted: results.len(),
            ..ExtractionReport::default()
        };
        let mut seen = HashSet::new();
        for (endpoint, result) in results {
            match result {
                Ok(candidates) => {
                    debug!("📄 {} yielded {} candidates", endpoint.category, candidates.len());
                    report
                        .candidates
                        .extend(candidates.into_iter().filter(|c| seen.insert(c.id.clone())));
                }
                Err(e) => {
                    warn!("⚠️ Skipping category {} this cycle: {}", endpoint.category, e);
                    report.failed_categories.push((endpoint.category.clone(), e));
                }
            }
        }

        info!(
            "🔍 Extracted {} candidates from {} categories in {:?} ({} failed)",
            report.candidates.len(),
            self.endpoints.len(),
            started.elapsed(),
            report.failed_categories.len()
        );
        report
    }
}
