//! Detail enrichment pipeline
//!
//! A bounded queue feeds a fixed pool of workers that fetch each product's
//! detail page and write the description and specs back into the store.
//! Admission never blocks: when the queue is full the product is dropped and
//! picked up again by a later cycle, since it is still unenriched.
//!
//! Workers share one receiver behind a mutex. Cancellation is checked between
//! items only; a fetch that is mid-retry runs to completion.

#![allow(clippy::significant_drop_tightening)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crawling::retry::RetryPolicy;
use crate::domain::{Product, ProductSpecs};
use crate::infrastructure::config::EnrichmentConfig;
use crate::store::ProductStore;

/// Data scraped from one product detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductDetail {
    pub description: String,
    pub specs: ProductSpecs,
}

impl ProductDetail {
    pub fn is_empty(&self) -> bool {
        self.description.trim().is_empty() && self.specs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichmentError {
    #[error("detail fetch failed: {0}")]
    Fetch(String),
    #[error("detail page had no usable data")]
    Empty,
}

/// Fetches and parses one product's detail page. Called once per attempt.
#[async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch_detail(&self, product: &Product) -> Result<ProductDetail, EnrichmentError>;
}

/// Lifetime counters. `queue_len` is sampled when read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailStats {
    pub total_queued: u64,
    pub total_processed: u64,
    pub total_success: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    pub queue_len: usize,
}

struct PipelineShared {
    store: Arc<ProductStore>,
    fetcher: Arc<dyn DetailFetcher>,
    retry: RetryPolicy,
    receiver: Mutex<mpsc::Receiver<Product>>,
    /// Ids queued or being worked on
    pending: Mutex<HashSet<String>>,
    stats: Mutex<DetailStats>,
    cancellation_token: CancellationToken,
}

impl PipelineShared {
    async fn fetch_once(&self, product: &Product) -> Result<ProductDetail, EnrichmentError> {
        let detail = self.fetcher.fetch_detail(product).await?;
        if detail.is_empty() {
            return Err(EnrichmentError::Empty);
        }
        Ok(detail)
    }

    async fn process(&self, worker_id: usize, product: Product) {
        let already_enriched = self
            .store
            .get_by_id(&product.id)
            .await
            .is_some_and(|current| current.has_enrichment());

        let succeeded = if already_enriched {
            debug!("[Worker {}] {} already enriched, skipping", worker_id, product.id);
            None
        } else {
            let label = format!("Detail fetch for {}", product.id);
            let outcome = self
                .retry
                .run(&label, |_: &EnrichmentError| true, |_| self.fetch_once(&product))
                .await;
            self.stats.lock().await.total_retries += u64::from(outcome.attempts.saturating_sub(1));

            match outcome.result {
                Ok(detail) => {
                    match self.store.enrich(&product.id, &detail.description, &detail.specs).await {
                        Ok(true) => debug!("[Worker {}] ✅ Enriched {}", worker_id, product.id),
                        Ok(false) => debug!("[Worker {}] {} vanished before enrichment", worker_id, product.id),
                        Err(e) => error!("[Worker {}] ❌ Failed to persist enrichment for {}: {}", worker_id, product.id, e),
                    }
                    Some(true)
                }
                Err(e) => {
                    warn!(
                        "[Worker {}] ⚠️ Giving up on {} after {} attempts: {}",
                        worker_id, product.id, outcome.attempts, e
                    );
                    Some(false)
                }
            }
        };

        self.pending.lock().await.remove(&product.id);
        let mut stats = self.stats.lock().await;
        stats.total_processed += 1;
        match succeeded {
            Some(true) => stats.total_success += 1,
            Some(false) => stats.total_failed += 1,
            None => {}
        }
    }

    async fn next_item(&self) -> Option<Product> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            () = self.cancellation_token.cancelled() => None,
            item = receiver.recv() => item,
        }
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<PipelineShared>) {
    debug!("[Worker {}] started", worker_id);
    while let Some(product) = shared.next_item().await {
        shared.process(worker_id, product).await;
    }
    debug!("[Worker {}] stopped", worker_id);
}

pub struct DetailPipeline {
    shared: Arc<PipelineShared>,
    sender: Mutex<Option<mpsc::Sender<Product>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
    stats_interval: Duration,
    non_enrichable_regions: Vec<String>,
}

impl DetailPipeline {
    /// Build the queue. Workers are spawned by [`DetailPipeline::start`].
    pub fn new(config: &EnrichmentConfig, fetcher: Arc<dyn DetailFetcher>, store: Arc<ProductStore>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shared = Arc::new(PipelineShared {
            store,
            fetcher,
            retry: config.retry.clone(),
            receiver: Mutex::new(receiver),
            pending: Mutex::new(HashSet::new()),
            stats: Mutex::new(DetailStats::default()),
            cancellation_token: CancellationToken::new(),
        });
        Self {
            shared,
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(Vec::new()),
            workers: config.workers.max(1),
            stats_interval: Duration::from_secs(config.stats_interval_secs.max(1)),
            non_enrichable_regions: config
                .non_enrichable_regions
                .iter()
                .map(|r| r.trim().to_lowercase())
                .collect(),
        }
    }

    /// Spawn the workers and the stats reporter. Calling it again is a no-op.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() || self.shared.cancellation_token.is_cancelled() {
            return;
        }

        for worker_id in 0..self.workers {
            handles.push(tokio::spawn(worker_loop(worker_id, Arc::clone(&self.shared))));
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.stats_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shared.cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let stats = *shared.stats.lock().await;
                        info!(
                            "📊 Enrichment: {} queued, {} processed, {} ok, {} failed, {} retries",
                            stats.total_queued, stats.total_processed, stats.total_success,
                            stats.total_failed, stats.total_retries
                        );
                    }
                }
            }
        }));

        info!("🚀 Detail pipeline started with {} workers", self.workers);
    }

    fn admits(&self, product: &Product) -> bool {
        !product.has_enrichment()
            && !product.product_url.trim().is_empty()
            && !self
                .non_enrichable_regions
                .iter()
                .any(|r| r.eq_ignore_ascii_case(product.region.trim()))
    }

    /// Queue eligible products without blocking. Returns how many were
    /// accepted; the rest were ineligible, already pending, or hit a full
    /// queue.
    pub async fn enqueue(&self, products: Vec<Product>) -> usize {
        let sender = self.sender.lock().await;
        let Some(sender) = sender.as_ref() else {
            debug!("Detail pipeline is shut down, ignoring {} products", products.len());
            return 0;
        };

        let mut pending = self.shared.pending.lock().await;
        let mut accepted = 0;
        let mut dropped = 0;
        for product in products {
            if !self.admits(&product) || pending.contains(&product.id) {
                continue;
            }
            let id = product.id.clone();
            match sender.try_send(product) {
                Ok(()) => {
                    pending.insert(id);
                    accepted += 1;
                }
                Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
        drop(pending);

        if dropped > 0 {
            warn!("⚠️ Detail queue full, dropped {} products until next cycle", dropped);
        }
        if accepted > 0 {
            self.shared.stats.lock().await.total_queued += accepted as u64;
            debug!("📥 Queued {} products for enrichment", accepted);
        }
        accepted
    }

    /// Queue every stored product that still lacks detail data.
    pub async fn enqueue_unenriched(&self, store: &ProductStore) -> usize {
        self.enqueue(store.unenriched().await).await
    }

    pub async fn stats(&self) -> DetailStats {
        let mut stats = *self.shared.stats.lock().await;
        stats.queue_len = self
            .sender
            .lock()
            .await
            .as_ref()
            .map_or(0, |s| s.max_capacity() - s.capacity());
        stats
    }

    /// Stop accepting work, let workers finish their current item, and drop
    /// whatever is still queued. Returns the number of dropped items. Safe to
    /// call more than once.
    pub async fn shutdown(&self) -> usize {
        self.shared.cancellation_token.cancel();
        self.sender.lock().await.take();

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("❌ Enrichment task ended abnormally: {}", e);
            }
        }

        let mut drained = 0;
        {
            let mut receiver = self.shared.receiver.lock().await;
            while receiver.try_recv().is_ok() {
                drained += 1;
            }
        }
        self.shared.pending.lock().await.clear();

        if drained > 0 {
            info!("🛑 Detail pipeline stopped, {} queued products dropped", drained);
        } else {
            debug!("🛑 Detail pipeline stopped");
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFetcher {
        calls: AtomicU32,
        detail: Option<ProductDetail>,
    }

    impl CountingFetcher {
        fn failing() -> Self {
            Self { calls: AtomicU32::new(0), detail: None }
        }

        fn returning(description: &str) -> Self {
            Self {
                calls: AtomicU32::new(0),
                detail: Some(ProductDetail { description: description.into(), specs: ProductSpecs::default() }),
            }
        }
    }

    #[async_trait]
    impl DetailFetcher for CountingFetcher {
        async fn fetch_detail(&self, _product: &Product) -> Result<ProductDetail, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.detail
                .clone()
                .ok_or_else(|| EnrichmentError::Fetch("connection reset".into()))
        }
    }

    fn config(queue_capacity: usize) -> EnrichmentConfig {
        EnrichmentConfig {
            workers: 1,
            queue_capacity,
            ..EnrichmentConfig::default()
        }
    }

    fn product(n: usize, region: &str) -> Product {
        Product::candidate("Mac", region, &format!("Mac mini {n}"), &format!("mac mini {n}"), 3_799.0)
            .with_url(format!("https://example.test/p/{n}"))
    }

    #[tokio::test]
    async fn full_queue_drops_without_counting() {
        let store = Arc::new(ProductStore::in_memory());
        let pipeline = DetailPipeline::new(&config(2), Arc::new(CountingFetcher::failing()), store);

        assert_eq!(pipeline.enqueue(vec![product(1, "cn"), product(2, "cn")]).await, 2);
        assert_eq!(pipeline.enqueue(vec![product(3, "cn")]).await, 0);

        let stats = pipeline.stats().await;
        assert_eq!(stats.total_queued, 2);
        assert_eq!(stats.queue_len, 2);
        assert_eq!(pipeline.shutdown().await, 2);
    }

    #[tokio::test]
    async fn ineligible_products_are_not_admitted() {
        let store = Arc::new(ProductStore::in_memory());
        let pipeline = DetailPipeline::new(&config(10), Arc::new(CountingFetcher::failing()), store);

        let mut enriched = product(1, "cn");
        enriched.description = "Already described".into();
        let mut no_url = product(2, "cn");
        no_url.product_url.clear();
        let hk = product(3, "hk");

        assert_eq!(pipeline.enqueue(vec![enriched, no_url, hk]).await, 0);
        assert_eq!(pipeline.enqueue(vec![product(4, "cn"), product(4, "cn")]).await, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_fetch_is_attempted_exactly_max_attempts() {
        let store = Arc::new(ProductStore::in_memory());
        let record = product(1, "cn");
        store.upsert(record.clone()).await.unwrap();
        let fetcher = Arc::new(CountingFetcher::failing());
        let pipeline = DetailPipeline::new(&config(10), fetcher.clone(), store.clone());
        pipeline.start().await;

        assert_eq!(pipeline.enqueue(vec![record]).await, 1);
        while pipeline.stats().await.total_processed == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let stats = pipeline.stats().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_retries, 2);
        assert_eq!(store.unenriched().await.len(), 1);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn successful_fetch_updates_store() {
        let store = Arc::new(ProductStore::in_memory());
        let record = product(1, "cn");
        store.upsert(record.clone()).await.unwrap();
        let fetcher = Arc::new(CountingFetcher::returning("A tiny desktop with an M2 chip."));
        let pipeline = DetailPipeline::new(&config(10), fetcher.clone(), store.clone());
        pipeline.start().await;

        pipeline.enqueue(vec![record.clone()]).await;
        while pipeline.stats().await.total_processed == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let stored = store.get_by_id(&record.id).await.unwrap();
        assert_eq!(stored.description, "A tiny desktop with an M2 chip.");
        assert_eq!(pipeline.stats().await.total_success, 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Already enriched records are skipped without another fetch.
        assert_eq!(pipeline.enqueue_unenriched(&store).await, 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes_admission() {
        let store = Arc::new(ProductStore::in_memory());
        let pipeline = DetailPipeline::new(&config(10), Arc::new(CountingFetcher::failing()), store);
        pipeline.start().await;

        pipeline.shutdown().await;
        assert_eq!(pipeline.shutdown().await, 0);
        assert_eq!(pipeline.enqueue(vec![product(1, "cn")]).await, 0);
    }
}
