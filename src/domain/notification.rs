//! Notification delivery log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product::Product;
use super::subscription::mask_target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewArrival,
    PriceDrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// One delivery attempt. Only `read_at` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub subscription_id: String,
    pub kind: NotificationKind,
    pub product_id: String,
    pub product_name: String,
    pub category: String,
    pub price: f64,
    pub old_price: Option<f64>,
    pub product_url: String,
    pub image_url: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub target_masked: String,
    /// blake3 of the delivery target, used to filter history without storing the token
    pub target_digest: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn new(
        subscription_id: &str,
        kind: NotificationKind,
        product: &Product,
        old_price: Option<f64>,
        target: &str,
        outcome: Result<(), String>,
    ) -> Self {
        let (status, error) = match outcome {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(e) => (DeliveryStatus::Failed, Some(e)),
        };
        Self {
            id: format!("nh-{}", Uuid::new_v4().simple()),
            subscription_id: subscription_id.to_string(),
            kind,
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            category: product.category.clone(),
            price: product.price,
            old_price,
            product_url: product.product_url.clone(),
            image_url: product.image_url.clone(),
            status,
            error,
            target_masked: mask_target(target),
            target_digest: target_digest(target),
            created_at: Utc::now(),
            read_at: None,
        }
    }

    pub const fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

pub fn target_digest(target: &str) -> String {
    blake3::hash(target.as_bytes()).to_hex().to_string()
}
