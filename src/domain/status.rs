//! Aggregate statistics and scraper run status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeState {
    #[default]
    Never,
    Running,
    Success,
    Failed,
}

/// Outcome of the most recent ingestion cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperStatus {
    pub state: ScrapeState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub products_scraped: usize,
    pub duration_ms: u64,
}

impl ScraperStatus {
    pub fn running(now: DateTime<Utc>) -> Self {
        Self {
            state: ScrapeState::Running,
            last_run_at: Some(now),
            ..Self::default()
        }
    }

    pub fn succeeded(now: DateTime<Utc>, products_scraped: usize, duration_ms: u64) -> Self {
        Self {
            state: ScrapeState::Success,
            last_run_at: Some(now),
            error: None,
            products_scraped,
            duration_ms,
        }
    }

    pub fn failed(now: DateTime<Utc>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            state: ScrapeState::Failed,
            last_run_at: Some(now),
            error: Some(error.into()),
            products_scraped: 0,
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_products: usize,
    pub available_products: usize,
    pub categories: BTreeMap<String, usize>,
    pub last_scrape_at: Option<DateTime<Utc>>,
    pub total_subscriptions: usize,
    pub total_watches: usize,
}
