//! Subscriptions: new-arrival predicate bundles and per-product price watches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::product::StockStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("invalid delivery target: {0}")]
    InvalidTarget(String),
    #[error("invalid price range: min {min} > max {max}")]
    InvalidPriceRange { min: u64, max: u64 },
    #[error("subscription not found: {0}")]
    NotFound(String),
}

/// Predicate dimensions. Every empty list matches everything; prices of 0
/// leave that side of the range open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionFilter {
    pub categories: Vec<String>,
    pub models: Vec<String>,
    pub chips: Vec<String>,
    pub storages: Vec<String>,
    pub memories: Vec<String>,
    pub keywords: Vec<String>,
    pub stock_statuses: Vec<StockStatus>,
    pub min_price: f64,
    pub max_price: f64,
}

impl SubscriptionFilter {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn validate(&self) -> Result<(), SubscriptionError> {
        if self.min_price > 0.0 && self.max_price > 0.0 && self.min_price > self.max_price {
            return Err(SubscriptionError::InvalidPriceRange {
                min: self.min_price as u64,
                max: self.max_price as u64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub filter: SubscriptionFilter,
    /// Delivery token handed to the notifier
    pub target: String,
    pub enabled: bool,
    pub paused: bool,
    pub notification_count: u64,
    #[serde(default)]
    pub notified_product_ids: BTreeSet<String>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, target: impl Into<String>, filter: SubscriptionFilter) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            filter,
            target: target.into(),
            enabled: true,
            paused: false,
            notification_count: 0,
            notified_product_ids: BTreeSet::new(),
            last_notified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enabled, not paused and holding a delivery target.
    pub fn is_deliverable(&self) -> bool {
        self.enabled && !self.paused && !self.target.trim().is_empty()
    }

    pub fn has_notified(&self, product_id: &str) -> bool {
        self.notified_product_ids.contains(product_id)
    }
}

/// Price-change subscription scoped to a single product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceWatch {
    pub id: String,
    pub product_id: String,
    pub target: String,
    /// Fire at or below this price; 0 fires on any drop
    pub target_price: f64,
    pub created_at: DateTime<Utc>,
}

impl PriceWatch {
    pub fn new(product_id: impl Into<String>, target: impl Into<String>, target_price: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            target: target.into(),
            target_price,
            created_at: Utc::now(),
        }
    }

    /// Whether a move from `old_price` to `new_price` should notify this watch.
    pub fn should_fire(&self, old_price: f64, new_price: f64) -> bool {
        if self.target_price > 0.0 {
            new_price <= self.target_price
        } else {
            new_price < old_price
        }
    }
}

/// Targets are opaque tokens; they only need to be non-empty and whitespace free.
pub fn validate_target(target: &str) -> Result<(), SubscriptionError> {
    if target.is_empty() || target.chars().any(char::is_whitespace) {
        return Err(SubscriptionError::InvalidTarget(mask_target(target)));
    }
    Ok(())
}

/// First four and last four characters around `****`.
pub fn mask_target(target: &str) -> String {
    let chars: Vec<char> = target.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", false)]
    #[case("abc def", false)]
    #[case("abc\tdef", false)]
    #[case("xT7dKq2bZ9", true)]
    fn target_validation(#[case] target: &str, #[case] ok: bool) {
        assert_eq!(validate_target(target).is_ok(), ok);
    }

    #[test]
    fn masking_keeps_edges_only() {
        assert_eq!(mask_target("abcd1234efgh"), "abcd****efgh");
        assert_eq!(mask_target("short"), "****");
    }

    #[rstest]
    #[case(7_800.0, 8_000.0, 7_500.0, true)]
    #[case(7_800.0, 8_000.0, 7_900.0, false)]
    #[case(7_800.0, 7_500.0, 7_700.0, true)]
    #[case(0.0, 8_000.0, 7_999.0, true)]
    #[case(0.0, 8_000.0, 8_100.0, false)]
    fn watch_firing(#[case] target_price: f64, #[case] old: f64, #[case] new: f64, #[case] fires: bool) {
        let watch = PriceWatch::new("mac:1", "key", target_price);
        assert_eq!(watch.should_fire(old, new), fires);
    }

    #[test]
    fn deliverability() {
        let mut sub = Subscription::new("m-series", "key123", SubscriptionFilter::default());
        assert!(sub.is_deliverable());
        sub.paused = true;
        assert!(!sub.is_deliverable());
        sub.paused = false;
        sub.target.clear();
        assert!(!sub.is_deliverable());
    }

    #[test]
    fn inverted_price_range_is_rejected() {
        let filter = SubscriptionFilter {
            min_price: 9_000.0,
            max_price: 5_000.0,
            ..SubscriptionFilter::default()
        };
        assert!(filter.validate().is_err());
    }
}
