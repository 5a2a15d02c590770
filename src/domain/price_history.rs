//! Bounded per-product price history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::product::PriceTrend;

/// Sliding window size; the oldest entry is evicted first on overflow.
pub const MAX_HISTORY_PER_PRODUCT: usize = 100;

/// Number of trailing points the trend and score look at.
pub const TREND_WINDOW: usize = 3;

/// Relative change beyond which a trend is called rising or falling.
const TREND_THRESHOLD: f64 = 0.02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub product_id: String,
    pub price: f64,
    pub discount: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only, time-ordered price points for one product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceHistory {
    entries: VecDeque<PriceHistoryEntry>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries, keeping only the newest `limit`.
    pub fn from_entries(entries: Vec<PriceHistoryEntry>, limit: usize) -> Self {
        let mut history = Self { entries: VecDeque::from(entries) };
        history.trim(limit);
        history
    }

    /// Append and evict from the front until at most `limit` entries remain.
    /// Returns how many entries were evicted.
    pub fn push_bounded(&mut self, entry: PriceHistoryEntry, limit: usize) -> usize {
        self.entries.push_back(entry);
        self.trim(limit)
    }

    fn trim(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > limit.max(1) {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&PriceHistoryEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceHistoryEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<PriceHistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.price).collect()
    }

    /// `(lowest, highest)` over the window.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        let mut prices = self.entries.iter().map(|e| e.price);
        let first = prices.next()?;
        Some(prices.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p))))
    }

    /// Relative change across the trailing [`TREND_WINDOW`] points, if there are enough.
    pub fn recent_change(&self) -> Option<f64> {
        if self.entries.len() < TREND_WINDOW {
            return None;
        }
        let start = self.entries[self.entries.len() - TREND_WINDOW].price;
        let end = self.entries[self.entries.len() - 1].price;
        if start == 0.0 {
            return None;
        }
        Some((end - start) / start)
    }

    pub fn trend(&self) -> PriceTrend {
        match self.recent_change() {
            Some(change) if change < -TREND_THRESHOLD => PriceTrend::Falling,
            Some(change) if change > TREND_THRESHOLD => PriceTrend::Rising,
            _ => PriceTrend::Stable,
        }
    }
}
