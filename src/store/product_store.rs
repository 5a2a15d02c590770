//! Product store: identity resolution, upsert, price history and subscriptions
//!
//! All reads and writes go through a single `tokio::sync::RwLock`. Writers
//! compute the full record before swapping it in, so readers never observe a
//! half-merged product. Mutations are applied in memory first and persisted
//! afterwards; a failed persist is reported to the caller but never rolled
//! back, the in-memory state stays authoritative until the next successful
//! persist.
//!
//! Every mutation marks the keys it touched. A persist hands only those
//! records to backends with keyed writes; other backends get the full
//! snapshot. Keys of a failed write stay marked for the next one.

#![allow(clippy::significant_drop_tightening)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::backend::{BackendError, MemoryBackend, StoreBackend, StoreDelta, StoreSnapshot};
use crate::domain::notification::target_digest;
use crate::domain::subscription::validate_target;
use crate::domain::value_score::value_score;
use crate::domain::{
    DeliveryStatus, MAX_HISTORY_PER_PRODUCT, NotificationKind, NotificationRecord, PriceHistory,
    PriceHistoryEntry, PriceWatch, Product, ProductSpecs, ScraperStatus, StockStatus, StoreStats,
    Subscription, SubscriptionError, SubscriptionFilter,
};

/// Prices closer than this are the same price.
const PRICE_EPSILON: f64 = 0.005;

fn prices_differ(a: f64, b: f64) -> bool {
    (a - b).abs() > PRICE_EPSILON
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] BackendError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result of merging one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpsertOutcome {
    pub price_changed: bool,
    /// Previously stored price for existing records, 0 for new ones
    pub old_price: f64,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    pub items: Vec<NotificationRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Keys touched since the last successful write
#[derive(Debug, Default)]
struct DirtyKeys {
    products: BTreeSet<String>,
    history: BTreeSet<String>,
    subscriptions: BTreeSet<String>,
    watches: BTreeSet<String>,
    notifications: HashSet<String>,
    status: bool,
}

impl DirtyKeys {
    fn absorb(&mut self, other: Self) {
        self.products.extend(other.products);
        self.history.extend(other.history);
        self.subscriptions.extend(other.subscriptions);
        self.watches.extend(other.watches);
        self.notifications.extend(other.notifications);
        self.status |= other.status;
    }
}

#[derive(Debug, Default)]
struct StoreState {
    products: HashMap<String, Product>,
    history: HashMap<String, PriceHistory>,
    subscriptions: HashMap<String, Subscription>,
    watches: HashMap<String, PriceWatch>,
    notifications: Vec<NotificationRecord>,
    scraper_status: ScraperStatus,
    last_scrape_at: Option<DateTime<Utc>>,
    dirty: DirtyKeys,
}

impl StoreState {
    fn from_snapshot(snapshot: StoreSnapshot, history_limit: usize) -> Self {
        Self {
            products: snapshot.products.into_iter().collect(),
            history: snapshot
                .history
                .into_iter()
                .map(|(id, entries)| (id, PriceHistory::from_entries(entries, history_limit)))
                .collect(),
            subscriptions: snapshot.subscriptions.into_iter().collect(),
            watches: snapshot.watches.into_iter().collect(),
            notifications: snapshot.notifications,
            scraper_status: snapshot.scraper_status,
            last_scrape_at: snapshot.last_scrape_at,
            dirty: DirtyKeys::default(),
        }
    }

    fn to_delta(&self, dirty: &DirtyKeys) -> StoreDelta {
        let mut delta = StoreDelta::default();
        for id in &dirty.products {
            match self.products.get(id) {
                Some(product) => delta.products.push(product.clone()),
                None => delta.removed_products.push(id.clone()),
            }
        }
        for id in &dirty.history {
            if let Some(history) = self.history.get(id) {
                delta.history.insert(id.clone(), history.to_vec());
            }
        }
        for id in &dirty.subscriptions {
            match self.subscriptions.get(id) {
                Some(sub) => delta.subscriptions.push(sub.clone()),
                None => delta.removed_subscriptions.push(id.clone()),
            }
        }
        for id in &dirty.watches {
            match self.watches.get(id) {
                Some(watch) => delta.watches.push(watch.clone()),
                None => delta.removed_watches.push(id.clone()),
            }
        }
        if !dirty.notifications.is_empty() {
            delta.notifications = self
                .notifications
                .iter()
                .filter(|r| dirty.notifications.contains(&r.id))
                .cloned()
                .collect();
        }
        if dirty.status {
            delta.scraper_status = Some((self.scraper_status.clone(), self.last_scrape_at));
        }
        delta
    }

    fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            products: self.products.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            history: self.history.iter().map(|(k, v)| (k.clone(), v.to_vec())).collect(),
            subscriptions: self
                .subscriptions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            watches: self.watches.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            notifications: self.notifications.clone(),
            scraper_status: self.scraper_status.clone(),
            last_scrape_at: self.last_scrape_at,
        }
    }

    fn subscription_mut(&mut self, id: &str) -> Result<&mut Subscription, StoreError> {
        self.subscriptions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {id}")))
    }
}

fn history_entry(product_id: &str, price: f64, discount: f64, at: DateTime<Utc>) -> PriceHistoryEntry {
    PriceHistoryEntry {
        product_id: product_id.to_string(),
        price,
        discount,
        recorded_at: at,
    }
}

pub struct ProductStore {
    state: RwLock<StoreState>,
    backend: Arc<dyn StoreBackend>,
    /// Serializes snapshot+persist so an older snapshot never lands after a newer one
    persist_gate: Mutex<()>,
    history_limit: usize,
}

impl ProductStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_history_limit(backend, MAX_HISTORY_PER_PRODUCT)
    }

    pub fn with_history_limit(backend: Arc<dyn StoreBackend>, history_limit: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            backend,
            persist_gate: Mutex::new(()),
            history_limit: history_limit.max(1),
        }
    }

    /// Store over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Replace in-memory state with the backend's last snapshot.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let snapshot = self.backend.load().await.inspect_err(|e| {
            error!("❌ Failed to load store from {} backend: {}", self.backend.name(), e);
        })?;
        let restored = StoreState::from_snapshot(snapshot, self.history_limit);
        let count = restored.products.len();
        *self.state.write().await = restored;
        info!("📦 Loaded {} products from {} backend", count, self.backend.name());
        Ok(count)
    }

    /// Write the records changed since the last write.
    pub async fn persist(&self) -> Result<(), StoreError> {
        if !self.backend.supports_delta() {
            return self.persist_all().await;
        }
        let _gate = self.persist_gate.lock().await;
        let (dirty, delta) = {
            let mut state = self.state.write().await;
            let dirty = std::mem::take(&mut state.dirty);
            let delta = state.to_delta(&dirty);
            (dirty, delta)
        };
        if delta.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.backend.apply(&delta).await {
            error!("❌ Write to {} backend failed: {}", self.backend.name(), e);
            self.state.write().await.dirty.absorb(dirty);
            return Err(e.into());
        }
        debug!("💾 Wrote {} changed records", delta.len());
        Ok(())
    }

    /// Rewrite the backend from the full in-memory state.
    pub async fn persist_all(&self) -> Result<(), StoreError> {
        let _gate = self.persist_gate.lock().await;
        let (dirty, snapshot) = {
            let mut state = self.state.write().await;
            (std::mem::take(&mut state.dirty), state.to_snapshot())
        };
        if let Err(e) = self.backend.persist(&snapshot).await {
            error!("❌ Persist to {} backend failed: {}", self.backend.name(), e);
            self.state.write().await.dirty.absorb(dirty);
            return Err(e.into());
        }
        debug!("💾 Persisted {} products", snapshot.products.len());
        Ok(())
    }

    /// Merge a candidate into memory without persisting.
    ///
    /// Returns the stored record together with the outcome. Batch callers
    /// merge many candidates and then call [`Self::persist`] once.
    pub async fn merge(&self, candidate: Product) -> (Product, UpsertOutcome) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        self.merge_locked(&mut state, candidate, now)
    }

    /// Merge and persist one candidate.
    pub async fn upsert(&self, candidate: Product) -> Result<UpsertOutcome, StoreError> {
        let (_, outcome) = self.merge(candidate).await;
        self.persist().await?;
        Ok(outcome)
    }

    fn merge_locked(
        &self,
        state: &mut StoreState,
        mut candidate: Product,
        now: DateTime<Utc>,
    ) -> (Product, UpsertOutcome) {
        let id = candidate.id.clone();

        let outcome = if let Some(existing) = state.products.get(&id) {
            let old_price = existing.price;
            let old_discount = existing.discount;
            let price_changed = prices_differ(old_price, candidate.price);

            candidate.created_at = existing.created_at;
            if candidate.description.trim().is_empty() {
                candidate.description.clone_from(&existing.description);
            }
            candidate.specs_detail.merge_missing(&existing.specs_detail);
            if candidate.specs.is_empty() {
                candidate.specs.clone_from(&existing.specs);
            }
            if candidate.image_url.is_empty() {
                candidate.image_url.clone_from(&existing.image_url);
            }
            if candidate.product_url.is_empty() {
                candidate.product_url.clone_from(&existing.product_url);
            }

            if price_changed {
                let history = state.history.entry(id.clone()).or_default();
                // The previous price must be the tail before the new point goes in.
                let tail_is_previous = history
                    .last()
                    .is_some_and(|entry| !prices_differ(entry.price, old_price));
                if !tail_is_previous {
                    history.push_bounded(history_entry(&id, old_price, old_discount, now), self.history_limit);
                }
                history.push_bounded(
                    history_entry(&id, candidate.price, candidate.discount, now),
                    self.history_limit,
                );
                state.dirty.history.insert(id.clone());
                info!(
                    "💰 Price change for {} ({}): {:.2} → {:.2}",
                    candidate.name, id, old_price, candidate.price
                );
            }

            UpsertOutcome { price_changed, old_price, is_new: false }
        } else {
            candidate.created_at = now;
            state.history.insert(
                id.clone(),
                PriceHistory::from_entries(
                    vec![history_entry(&id, candidate.price, candidate.discount, now)],
                    self.history_limit,
                ),
            );
            state.dirty.history.insert(id.clone());
            debug!("🆕 New product {} ({})", candidate.name, id);
            UpsertOutcome { price_changed: false, old_price: 0.0, is_new: true }
        };

        candidate.updated_at = now;
        let history = state.history.entry(id.clone()).or_default();
        let (lowest, highest) = history.min_max().unwrap_or((candidate.price, candidate.price));
        candidate.lowest_price = lowest;
        candidate.highest_price = highest;
        candidate.price_trend = history.trend();
        candidate.value_score =
            value_score(candidate.price, candidate.stock_status, history, candidate.created_at, now);

        state.dirty.products.insert(id.clone());
        state.products.insert(id, candidate.clone());
        (candidate, outcome)
    }

    /// Apply detail-page data to a stored record without touching its price.
    /// A non-empty description replaces the stored one; specs only fill gaps
    /// and extend the residual map. Returns false when the record is gone.
    pub async fn enrich(&self, id: &str, description: &str, specs: &ProductSpecs) -> Result<bool, StoreError> {
        let found = {
            let mut state = self.state.write().await;
            if let Some(product) = state.products.get_mut(id) {
                let description = description.trim();
                if !description.is_empty() {
                    product.description = description.to_string();
                }
                product.specs_detail.merge_missing(specs);
                product.updated_at = Utc::now();
                state.dirty.products.insert(id.to_string());
                true
            } else {
                false
            }
        };
        if found {
            debug!("✨ Enriched {}", id);
            self.persist().await?;
        }
        Ok(found)
    }

    // ---- product reads ----

    /// All products, most recently updated first.
    pub async fn get_all(&self) -> Vec<Product> {
        let state = self.state.read().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        products
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Product> {
        self.state.read().await.products.get(id).cloned()
    }

    pub async fn get_by_category(&self, category: &str) -> Vec<Product> {
        let mut products: Vec<Product> = self
            .get_all()
            .await
            .into_iter()
            .filter(|p| p.category.eq_ignore_ascii_case(category))
            .collect();
        products.sort_by(|a, b| b.value_score.total_cmp(&a.value_score));
        products
    }

    pub async fn get_history(&self, id: &str) -> Vec<PriceHistoryEntry> {
        self.state
            .read()
            .await
            .history
            .get(id)
            .map(PriceHistory::to_vec)
            .unwrap_or_default()
    }

    pub async fn categories(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut categories: Vec<String> = state.products.values().map(|p| p.category.clone()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Records that still lack detail-page data.
    pub async fn unenriched(&self) -> Vec<Product> {
        let state = self.state.read().await;
        state.products.values().filter(|p| !p.has_enrichment()).cloned().collect()
    }

    pub async fn get_stats(&self) -> StoreStats {
        let state = self.state.read().await;
        let mut categories = BTreeMap::new();
        let mut available = 0;
        for product in state.products.values() {
            *categories.entry(product.category.clone()).or_insert(0) += 1;
            if product.stock_status == StockStatus::Available {
                available += 1;
            }
        }
        StoreStats {
            total_products: state.products.len(),
            available_products: available,
            categories,
            last_scrape_at: state.last_scrape_at,
            total_subscriptions: state.subscriptions.len(),
            total_watches: state.watches.len(),
        }
    }

    /// Drop every product of a region together with its history and watches.
    pub async fn remove_region(&self, region: &str) -> Result<usize, StoreError> {
        let removed = {
            let mut state = self.state.write().await;
            let ids: Vec<String> = state
                .products
                .values()
                .filter(|p| p.region == region)
                .map(|p| p.id.clone())
                .collect();
            for id in &ids {
                state.products.remove(id);
                state.history.remove(id);
                state.dirty.products.insert(id.clone());
            }
            let orphaned: Vec<String> = state
                .watches
                .values()
                .filter(|w| ids.contains(&w.product_id))
                .map(|w| w.id.clone())
                .collect();
            for id in orphaned {
                state.watches.remove(&id);
                state.dirty.watches.insert(id);
            }
            ids.len()
        };
        info!("🗑️ Removed {} products for region {}", removed, region);
        self.persist().await?;
        Ok(removed)
    }

    // ---- scraper status ----

    pub async fn scraper_status(&self) -> ScraperStatus {
        self.state.read().await.scraper_status.clone()
    }

    /// Record a cycle status. A successful status also stamps the last scrape time.
    pub async fn set_scraper_status(&self, status: ScraperStatus) {
        let mut state = self.state.write().await;
        if status.state == crate::domain::ScrapeState::Success {
            state.last_scrape_at = status.last_run_at;
        }
        state.scraper_status = status;
        state.dirty.status = true;
    }

    // ---- subscriptions ----

    pub async fn add_subscription(&self, subscription: Subscription) -> Result<Subscription, StoreError> {
        validate_target(&subscription.target)?;
        subscription.filter.validate()?;
        {
            let mut state = self.state.write().await;
            state.subscriptions.insert(subscription.id.clone(), subscription.clone());
            state.dirty.subscriptions.insert(subscription.id.clone());
        }
        info!("🔔 Added subscription {} ({})", subscription.name, subscription.id);
        self.persist().await?;
        Ok(subscription)
    }

    /// Replace name and predicates; counter, notified-set and target stay.
    pub async fn update_subscription(
        &self,
        id: &str,
        name: String,
        filter: SubscriptionFilter,
    ) -> Result<Subscription, StoreError> {
        filter.validate()?;
        let updated = {
            let mut state = self.state.write().await;
            let sub = state.subscription_mut(id)?;
            sub.name = name;
            sub.filter = filter;
            sub.updated_at = Utc::now();
            let updated = sub.clone();
            state.dirty.subscriptions.insert(updated.id.clone());
            updated
        };
        self.persist().await?;
        Ok(updated)
    }

    pub async fn remove_subscription(&self, id: &str) -> Result<Subscription, StoreError> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state
                .subscriptions
                .remove(id)
                .ok_or_else(|| StoreError::NotFound(format!("subscription {id}")))?;
            state.dirty.subscriptions.insert(id.to_string());
            removed
        };
        info!("🗑️ Removed subscription {} ({})", removed.name, id);
        self.persist().await?;
        Ok(removed)
    }

    pub async fn set_paused(&self, id: &str, paused: bool) -> Result<Subscription, StoreError> {
        let updated = {
            let mut state = self.state.write().await;
            let sub = state.subscription_mut(id)?;
            sub.paused = paused;
            sub.updated_at = Utc::now();
            let updated = sub.clone();
            state.dirty.subscriptions.insert(updated.id.clone());
            updated
        };
        info!("⏯️ Subscription {} paused={}", id, paused);
        self.persist().await?;
        Ok(updated)
    }

    pub async fn get_subscription(&self, id: &str) -> Option<Subscription> {
        self.state.read().await.subscriptions.get(id).cloned()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        let state = self.state.read().await;
        let mut subs: Vec<Subscription> = state.subscriptions.values().cloned().collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        subs
    }

    // ---- price watches ----

    pub async fn add_watch(&self, watch: PriceWatch) -> Result<PriceWatch, StoreError> {
        validate_target(&watch.target)?;
        {
            let mut state = self.state.write().await;
            if !state.products.contains_key(&watch.product_id) {
                return Err(StoreError::NotFound(format!("product {}", watch.product_id)));
            }
            state.watches.insert(watch.id.clone(), watch.clone());
            state.dirty.watches.insert(watch.id.clone());
        }
        self.persist().await?;
        Ok(watch)
    }

    pub async fn remove_watch(&self, id: &str) -> Result<PriceWatch, StoreError> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state
                .watches
                .remove(id)
                .ok_or_else(|| StoreError::NotFound(format!("watch {id}")))?;
            state.dirty.watches.insert(id.to_string());
            removed
        };
        self.persist().await?;
        Ok(removed)
    }

    pub async fn watches_for(&self, product_id: &str) -> Vec<PriceWatch> {
        let state = self.state.read().await;
        state.watches.values().filter(|w| w.product_id == product_id).cloned().collect()
    }

    pub async fn watches(&self) -> Vec<PriceWatch> {
        self.state.read().await.watches.values().cloned().collect()
    }

    // ---- notification log ----

    /// Append a delivery record. A successful new-arrival delivery also adds
    /// the product to the subscription's notified-set and bumps its counter,
    /// in the same critical section. Returns whether the notified-set grew.
    pub async fn record_delivery(&self, record: NotificationRecord) -> Result<bool, StoreError> {
        let grew = {
            let mut state = self.state.write().await;
            let mut grew = false;
            if record.kind == NotificationKind::NewArrival && record.status == DeliveryStatus::Sent {
                if let Some(sub) = state.subscriptions.get_mut(&record.subscription_id) {
                    grew = sub.notified_product_ids.insert(record.product_id.clone());
                    sub.notification_count += 1;
                    sub.last_notified_at = Some(record.created_at);
                    state.dirty.subscriptions.insert(record.subscription_id.clone());
                }
            }
            state.dirty.notifications.insert(record.id.clone());
            state.notifications.push(record);
            grew
        };
        self.persist().await?;
        Ok(grew)
    }

    /// Newest-first page of the records delivered to `target`. Pages start at 1.
    pub async fn notification_history(&self, target: &str, page: usize, page_size: usize) -> NotificationPage {
        self.notification_history_for(target, None, page, page_size).await
    }

    /// Like [`Self::notification_history`], optionally narrowed to one
    /// subscription or watch id.
    pub async fn notification_history_for(
        &self,
        target: &str,
        subscription_id: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> NotificationPage {
        let digest = target_digest(target);
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let state = self.state.read().await;
        let matching: Vec<&NotificationRecord> = state
            .notifications
            .iter()
            .rev()
            .filter(|r| r.target_digest == digest)
            .filter(|r| subscription_id.is_none_or(|id| r.subscription_id == id))
            .collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .cloned()
            .collect();
        NotificationPage { items, total, page, page_size }
    }

    pub async fn mark_read(&self, record_id: &str) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            let record = state
                .notifications
                .iter_mut()
                .find(|r| r.id == record_id)
                .ok_or_else(|| StoreError::NotFound(format!("notification {record_id}")))?;
            if record.read_at.is_none() {
                record.read_at = Some(Utc::now());
            }
            state.dirty.notifications.insert(record_id.to_string());
        }
        self.persist().await
    }

    pub async fn mark_all_read(&self, target: &str) -> Result<usize, StoreError> {
        let digest = target_digest(target);
        let marked = {
            let mut state = self.state.write().await;
            let now = Utc::now();
            let mut marked = Vec::new();
            for record in state.notifications.iter_mut().filter(|r| r.target_digest == digest) {
                if record.read_at.is_none() {
                    record.read_at = Some(now);
                    marked.push(record.id.clone());
                }
            }
            let count = marked.len();
            state.dirty.notifications.extend(marked);
            count
        };
        if marked > 0 {
            self.persist().await?;
        }
        Ok(marked)
    }

    pub async fn unread_count(&self, target: &str) -> usize {
        let digest = target_digest(target);
        self.state
            .read()
            .await
            .notifications
            .iter()
            .filter(|r| r.target_digest == digest && !r.is_read())
            .count()
    }

    /// Successful deliveries for one (subscription, product) pair.
    pub async fn sent_count(&self, subscription_id: &str, product_id: &str) -> usize {
        self.state
            .read()
            .await
            .notifications
            .iter()
            .filter(|r| {
                r.subscription_id == subscription_id
                    && r.product_id == product_id
                    && r.status == DeliveryStatus::Sent
            })
            .count()
    }
}
