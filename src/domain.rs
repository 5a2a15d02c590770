//! Domain module - catalog records, subscriptions and the pure rules over them
//!
//! Everything here is free of I/O and shared state:
//! - `product` / `specs`: the canonical product record and its typed specification set
//! - `identity`: stable product identity derivation
//! - `price_history` / `value_score`: bounded history window and the derived ranking metric
//! - `subscription` / `notification`: user predicates, price watches and the delivery log
//! - `status`: aggregate statistics and scraper run status

pub mod identity;
pub mod notification;
pub mod price_history;
pub mod product;
pub mod specs;
pub mod status;
pub mod subscription;
pub mod value_score;

pub use identity::{normalize_signature, product_id, signature};
pub use notification::{DeliveryStatus, NotificationKind, NotificationRecord};
pub use price_history::{MAX_HISTORY_PER_PRODUCT, PriceHistory, PriceHistoryEntry};
pub use product::{PriceTrend, Product, StockStatus};
pub use specs::ProductSpecs;
pub use status::{ScrapeState, ScraperStatus, StoreStats};
pub use subscription::{PriceWatch, Subscription, SubscriptionError, SubscriptionFilter};
