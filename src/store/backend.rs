//! Persistence boundary for the product store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::domain::{
    NotificationRecord, PriceHistoryEntry, PriceWatch, Product, ScraperStatus, Subscription,
};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Everything the store needs to rebuild itself after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub products: BTreeMap<String, Product>,
    pub history: BTreeMap<String, Vec<PriceHistoryEntry>>,
    pub subscriptions: BTreeMap<String, Subscription>,
    pub watches: BTreeMap<String, PriceWatch>,
    pub notifications: Vec<NotificationRecord>,
    pub scraper_status: ScraperStatus,
    pub last_scrape_at: Option<DateTime<Utc>>,
}

impl StoreSnapshot {
    /// Fold a set of keyed changes into this snapshot.
    pub fn apply(&mut self, delta: &StoreDelta) {
        for id in &delta.removed_products {
            self.products.remove(id);
            self.history.remove(id);
        }
        for product in &delta.products {
            self.products.insert(product.id.clone(), product.clone());
        }
        for (id, window) in &delta.history {
            self.history.insert(id.clone(), window.clone());
        }
        for id in &delta.removed_subscriptions {
            self.subscriptions.remove(id);
        }
        for sub in &delta.subscriptions {
            self.subscriptions.insert(sub.id.clone(), sub.clone());
        }
        for id in &delta.removed_watches {
            self.watches.remove(id);
        }
        for watch in &delta.watches {
            self.watches.insert(watch.id.clone(), watch.clone());
        }
        for record in &delta.notifications {
            match self.notifications.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => self.notifications.push(record.clone()),
            }
        }
        if let Some((status, last_scrape_at)) = &delta.scraper_status {
            self.scraper_status = status.clone();
            self.last_scrape_at = *last_scrape_at;
        }
    }
}

/// Records changed since the last write, keyed by id.
///
/// Present records are upserted, `removed_*` ids are deleted. `history`
/// carries the full current window of every product whose history changed.
/// Notifications keep their log order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreDelta {
    pub products: Vec<Product>,
    pub removed_products: Vec<String>,
    pub history: BTreeMap<String, Vec<PriceHistoryEntry>>,
    pub subscriptions: Vec<Subscription>,
    pub removed_subscriptions: Vec<String>,
    pub watches: Vec<PriceWatch>,
    pub removed_watches: Vec<String>,
    pub notifications: Vec<NotificationRecord>,
    pub scraper_status: Option<(ScraperStatus, Option<DateTime<Utc>>)>,
}

impl StoreDelta {
    /// Number of records written.
    pub fn len(&self) -> usize {
        self.products.len()
            + self.removed_products.len()
            + self.history.len()
            + self.subscriptions.len()
            + self.removed_subscriptions.len()
            + self.watches.len()
            + self.removed_watches.len()
            + self.notifications.len()
            + usize::from(self.scraper_status.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait StoreBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Load the last persisted snapshot; an empty snapshot when nothing exists yet.
    async fn load(&self) -> Result<StoreSnapshot, BackendError>;

    /// Replace everything with `snapshot`.
    async fn persist(&self, snapshot: &StoreSnapshot) -> Result<(), BackendError>;

    /// Whether [`StoreBackend::apply`] is available. Backends without keyed
    /// storage get a full [`StoreBackend::persist`] on every write instead.
    fn supports_delta(&self) -> bool {
        false
    }

    /// Write only the changed records.
    async fn apply(&self, _delta: &StoreDelta) -> Result<(), BackendError> {
        Err(BackendError::Unavailable(format!("{} backend has no keyed writes", self.name())))
    }
}

/// Volatile backend. `fail_persist` makes every write fail until cleared.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshot: Mutex<Option<StoreSnapshot>>,
    fail_persist: AtomicBool,
    persist_count: AtomicUsize,
    apply_count: AtomicUsize,
    last_delta_len: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Full snapshot rewrites so far
    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::SeqCst)
    }

    /// Keyed writes so far
    pub fn apply_count(&self) -> usize {
        self.apply_count.load(Ordering::SeqCst)
    }

    pub fn last_delta_len(&self) -> usize {
        self.last_delta_len.load(Ordering::SeqCst)
    }

    pub async fn last_persisted(&self) -> Option<StoreSnapshot> {
        self.snapshot.lock().await.clone()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<StoreSnapshot, BackendError> {
        Ok(self.snapshot.lock().await.clone().unwrap_or_default())
    }

    async fn persist(&self, snapshot: &StoreSnapshot) -> Result<(), BackendError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory backend set to fail".into()));
        }
        *self.snapshot.lock().await = Some(snapshot.clone());
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn supports_delta(&self) -> bool {
        true
    }

    async fn apply(&self, delta: &StoreDelta) -> Result<(), BackendError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory backend set to fail".into()));
        }
        self.snapshot.lock().await.get_or_insert_with(StoreSnapshot::default).apply(delta);
        self.apply_count.fetch_add(1, Ordering::SeqCst);
        self.last_delta_len.store(delta.len(), Ordering::SeqCst);
        Ok(())
    }
}
