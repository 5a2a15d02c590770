//! Canonical product record
//!
//! `Product` doubles as the extraction candidate: the extractor fills the
//! listing fields and the identity, the store owns every derived field
//! (score, lowest/highest, trend and both timestamps).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::identity::product_id;
use super::specs::ProductSpecs;

/// Stock availability as reported by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    #[default]
    Available,
    Limited,
    SoldOut,
}

impl StockStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Limited => "limited",
            Self::SoldOut => "sold_out",
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "available" | "in_stock" => Ok(Self::Available),
            "limited" => Ok(Self::Limited),
            "sold_out" | "soldout" | "sold-out" => Ok(Self::SoldOut),
            other => Err(format!("unknown stock status: {other}")),
        }
    }
}

/// Direction of the most recent price movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceTrend {
    Falling,
    Rising,
    #[default]
    Stable,
}

impl PriceTrend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Falling => "falling",
            Self::Rising => "rising",
            Self::Stable => "stable",
        }
    }
}

impl FromStr for PriceTrend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "falling" => Ok(Self::Falling),
            "rising" => Ok(Self::Rising),
            "stable" => Ok(Self::Stable),
            other => Err(format!("unknown price trend: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub region: String,
    pub price: f64,
    pub original_price: f64,
    pub discount: f64,
    pub stock_status: StockStatus,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub product_url: String,
    /// Raw specification string as shown on the listing
    #[serde(default)]
    pub specs: String,
    #[serde(default)]
    pub specs_detail: ProductSpecs,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub value_score: f64,
    #[serde(default)]
    pub lowest_price: f64,
    #[serde(default)]
    pub highest_price: f64,
    #[serde(default)]
    pub price_trend: PriceTrend,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Build a fresh candidate whose identity derives from `(category, signature)`.
    pub fn candidate(category: &str, region: &str, name: &str, signature: &str, price: f64) -> Self {
        let now = Utc::now();
        Self {
            id: product_id(category, signature),
            name: name.to_string(),
            category: category.to_string(),
            region: region.to_string(),
            price,
            original_price: price,
            discount: 0.0,
            stock_status: StockStatus::Available,
            image_url: String::new(),
            product_url: String::new(),
            specs: String::new(),
            specs_detail: ProductSpecs::default(),
            description: String::new(),
            value_score: 0.0,
            lowest_price: price,
            highest_price: price,
            price_trend: PriceTrend::Stable,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the list price and derive the discount percentage from it.
    pub fn with_original_price(mut self, original_price: f64) -> Self {
        self.original_price = original_price;
        self.discount = discount_percent(self.price, original_price);
        self
    }

    pub fn with_url(mut self, product_url: impl Into<String>) -> Self {
        self.product_url = product_url.into();
        self
    }

    pub fn with_stock(mut self, stock_status: StockStatus) -> Self {
        self.stock_status = stock_status;
        self
    }

    /// Whether the record already carries data only the detail page provides.
    pub fn has_enrichment(&self) -> bool {
        !self.description.trim().is_empty() || self.specs_detail.has_detail_items()
    }

    /// Lowercase name plus raw and typed spec text, used by keyword predicates.
    pub fn search_text(&self) -> String {
        format!(
            "{} {} {}",
            self.name.to_lowercase(),
            self.specs.to_lowercase(),
            self.specs_detail.search_text()
        )
    }
}

/// `(1 - price / original) * 100`, or 0 when either side is missing.
pub fn discount_percent(price: f64, original_price: f64) -> f64 {
    if price > 0.0 && original_price > 0.0 {
        (1.0 - price / original_price) * 100.0
    } else {
        0.0
    }
}
