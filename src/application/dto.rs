//! Data transfer objects for the catalog service

use serde::{Deserialize, Serialize};

use crate::application::recommendation::UseCase;
use crate::domain::{PriceHistoryEntry, Product, StockStatus, SubscriptionFilter};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionDto {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Push key of the subscriber
    pub target: String,
    #[serde(default)]
    pub filter: SubscriptionFilter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSubscriptionDto {
    pub name: String,
    #[serde(default)]
    pub filter: SubscriptionFilter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWatchDto {
    pub product_id: String,
    pub target: String,
    /// 0 watches for any drop
    #[serde(default)]
    pub target_price: f64,
}

/// Product listing filter. Results are ordered by value score, best first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductQueryDto {
    pub category: Option<String>,
    pub stock_status: Option<StockStatus>,
    pub max_price: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductWithHistoryDto {
    pub product: Product,
    pub history: Vec<PriceHistoryEntry>,
}

/// Recommendation request. Budget bounds are never relaxed; category, chip
/// and storage are dropped when nothing matches them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecommendationDto {
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    /// Base category ("Mac") or family ("MacBook Air")
    pub category: Option<String>,
    pub use_case: Option<UseCase>,
    pub chip: Option<String>,
    pub storage_min_gb: Option<u32>,
    pub storage_max_gb: Option<u32>,
    /// Favour pricier products among similar scores
    pub prefer_high: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub product: Product,
    pub score: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptionsDto {
    pub chips: Vec<String>,
    pub storages: Vec<String>,
    pub memories: Vec<String>,
    pub screen_sizes: Vec<String>,
    pub colors: Vec<String>,
    pub models: Vec<String>,
}
