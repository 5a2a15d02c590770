//! Notification dispatch
//!
//! New arrivals are delivered at most once successfully per (subscription,
//! product): the notified-set is checked before matching and only grows on a
//! successful send, inside the store's write lock. Price changes fan out to
//! every watch concurrently and are not deduplicated.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::matcher::matches;
use super::notifier::{Notifier, new_arrival_message, price_change_message};
use crate::domain::{DeliveryStatus, NotificationKind, NotificationRecord, PriceWatch, Product, Subscription};
use crate::store::ProductStore;

/// Counts from one dispatch call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub matched: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchSummary {
    pub const fn attempted(&self) -> usize {
        self.sent + self.failed
    }
}

impl std::ops::AddAssign for DispatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.matched += other.matched;
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    store: Arc<ProductStore>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, store: Arc<ProductStore>) -> Self {
        Self { notifier, store }
    }

    async fn record(&self, record: NotificationRecord) {
        // Memory already holds the record; the next persist picks it up.
        if let Err(e) = self.store.record_delivery(record).await {
            error!("❌ Failed to persist notification record: {}", e);
        }
    }

    /// Deliver a newly seen product to matching subscriptions, one at a time.
    pub async fn dispatch_new_arrival(&self, product: &Product, subscriptions: &[Subscription]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let message = new_arrival_message(product);

        for listed in subscriptions {
            // The slice may predate pauses, edits, deletes and earlier sends
            // of this cycle; decide on the stored record only.
            let Some(sub) = self.store.get_subscription(&listed.id).await else {
                debug!("Subscription {} was removed, skipping", listed.id);
                summary.skipped += 1;
                continue;
            };
            if !sub.is_deliverable() {
                summary.skipped += 1;
                continue;
            }
            if sub.has_notified(&product.id) {
                debug!("Subscription {} already notified for {}", sub.id, product.id);
                summary.skipped += 1;
                continue;
            }
            if !matches(product, &sub.filter) {
                continue;
            }
            summary.matched += 1;

            let outcome = self.notifier.send(&sub.target, &message.title, &message.body).await;
            match &outcome {
                Ok(()) => {
                    summary.sent += 1;
                    info!("📨 New arrival {} sent to subscription {}", product.name, sub.name);
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("⚠️ New arrival notification failed for subscription {}: {}", sub.id, e);
                }
            }

            let record = NotificationRecord::new(
                &sub.id,
                NotificationKind::NewArrival,
                product,
                None,
                &sub.target,
                outcome.map_err(|e| e.to_string()),
            );
            self.record(record).await;
        }
        summary
    }

    /// Notify every watch whose condition the move satisfies, concurrently.
    pub async fn dispatch_price_change(
        &self,
        product: &Product,
        old_price: f64,
        new_price: f64,
        watches: &[PriceWatch],
    ) -> DispatchSummary {
        let message = price_change_message(product, old_price, new_price);
        let firing: Vec<&PriceWatch> = watches
            .iter()
            .filter(|w| w.product_id == product.id && w.should_fire(old_price, new_price))
            .collect();

        let sends = firing.iter().map(|watch| {
            let message = &message;
            async move {
                let outcome = self.notifier.send(&watch.target, &message.title, &message.body).await;
                if let Err(e) = &outcome {
                    warn!("⚠️ Price notification failed for watch {}: {}", watch.id, e);
                }
                let record = NotificationRecord::new(
                    &watch.id,
                    NotificationKind::PriceDrop,
                    product,
                    Some(old_price),
                    &watch.target,
                    outcome.map_err(|e| e.to_string()),
                );
                let sent = record.status == DeliveryStatus::Sent;
                self.record(record).await;
                sent
            }
        });
        let results = join_all(sends).await;

        let sent = results.iter().filter(|sent| **sent).count();
        let summary = DispatchSummary {
            matched: firing.len(),
            sent,
            failed: firing.len() - sent,
            skipped: watches.len() - firing.len(),
        };
        if summary.matched > 0 {
            info!(
                "💸 Price change {} ¥{:.2} → ¥{:.2}: {} sent, {} failed",
                product.name, old_price, new_price, summary.sent, summary.failed
            );
        }
        summary
    }
}
