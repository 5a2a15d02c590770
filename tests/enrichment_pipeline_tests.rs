//! Detail pipeline behaviour under retries, backpressure and shutdown.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use refurb_watch_lib::crawling::{DetailFetcher, DetailPipeline, EnrichmentError, ProductDetail, RetryPolicy};
use refurb_watch_lib::domain::{Product, ProductSpecs};
use refurb_watch_lib::infrastructure::config::EnrichmentConfig;
use refurb_watch_lib::store::{MemoryBackend, ProductStore};

/// Fails the first `failures` calls per product, then returns a detail.
struct FlakyFetcher {
    failures: u32,
    calls: Mutex<HashMap<String, u32>>,
}

impl FlakyFetcher {
    fn new(failures: u32) -> Self {
        Self { failures, calls: Mutex::new(HashMap::new()) }
    }

    async fn calls_for(&self, id: &str) -> u32 {
        self.calls.lock().await.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DetailFetcher for FlakyFetcher {
    async fn fetch_detail(&self, product: &Product) -> Result<ProductDetail, EnrichmentError> {
        let mut calls = self.calls.lock().await;
        let count = calls.entry(product.id.clone()).or_insert(0);
        *count += 1;
        if *count <= self.failures {
            return Err(EnrichmentError::Fetch("status 503".into()));
        }
        let mut specs = ProductSpecs::default();
        specs.insert_detail("Memory", "16GB");
        Ok(ProductDetail { description: format!("Detail text for {}", product.name), specs })
    }
}

/// Takes `delay` per fetch and always succeeds.
struct SlowFetcher {
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl DetailFetcher for SlowFetcher {
    async fn fetch_detail(&self, product: &Product) -> Result<ProductDetail, EnrichmentError> {
        self.calls.lock().await.push(product.id.clone());
        tokio::time::sleep(self.delay).await;
        Ok(ProductDetail { description: "Slowly fetched".into(), specs: ProductSpecs::default() })
    }
}

fn config(capacity: usize) -> EnrichmentConfig {
    EnrichmentConfig {
        workers: 2,
        queue_capacity: capacity,
        retry: RetryPolicy::new(3, 500, 5_000, 2.0),
        ..EnrichmentConfig::default()
    }
}

async fn seeded_store(count: usize) -> (Arc<ProductStore>, Vec<Product>) {
    let store = Arc::new(ProductStore::in_memory());
    let mut products = Vec::new();
    for n in 0..count {
        let product = Product::candidate("iPad", "cn", &format!("iPad Air {n}"), &format!("ipad air {n}"), 4_399.0)
            .with_url(format!("https://refurb.example/p/{n}"));
        store.upsert(product.clone()).await.unwrap();
        products.push(product);
    }
    (store, products)
}

async fn wait_until_processed(pipeline: &DetailPipeline, expected: u64) {
    while pipeline.stats().await.total_processed < expected {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_then_enriched() {
    let (store, products) = seeded_store(3).await;
    let fetcher = Arc::new(FlakyFetcher::new(2));
    let pipeline = DetailPipeline::new(&config(10), fetcher.clone(), store.clone());
    pipeline.start().await;

    assert_eq!(pipeline.enqueue_unenriched(&store).await, 3);
    wait_until_processed(&pipeline, 3).await;

    let stats = pipeline.stats().await;
    assert_eq!(stats.total_success, 3);
    assert_eq!(stats.total_failed, 0);
    assert_eq!(stats.total_retries, 6);
    for product in &products {
        assert_eq!(fetcher.calls_for(&product.id).await, 3);
        let stored = store.get_by_id(&product.id).await.unwrap();
        assert!(stored.description.starts_with("Detail text for iPad Air"));
        assert_eq!(stored.specs_detail.memory.as_deref(), Some("16GB"));
    }
    assert!(store.unenriched().await.is_empty());
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_record_for_next_cycle() {
    let (store, products) = seeded_store(1).await;
    let fetcher = Arc::new(FlakyFetcher::new(u32::MAX));
    let pipeline = DetailPipeline::new(&config(10), fetcher.clone(), store.clone());
    pipeline.start().await;

    pipeline.enqueue(products.clone()).await;
    wait_until_processed(&pipeline, 1).await;

    assert_eq!(fetcher.calls_for(&products[0].id).await, 3);
    assert_eq!(pipeline.stats().await.total_failed, 1);
    // Still unenriched, so it is eligible again.
    assert_eq!(pipeline.enqueue_unenriched(&store).await, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn full_queue_rejects_without_blocking() {
    let (store, products) = seeded_store(3).await;
    let pipeline = DetailPipeline::new(&config(2), Arc::new(FlakyFetcher::new(0)), store);

    assert_eq!(pipeline.enqueue(products[..2].to_vec()).await, 2);
    assert_eq!(pipeline.enqueue(products[2..].to_vec()).await, 0);

    let stats = pipeline.stats().await;
    assert_eq!(stats.total_queued, 2);
    assert_eq!(stats.queue_len, 2);
    assert_eq!(pipeline.shutdown().await, 2);
    assert_eq!(pipeline.stats().await.queue_len, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_finishes_current_item_and_drops_the_rest() {
    let (store, products) = seeded_store(3).await;
    let fetcher = Arc::new(SlowFetcher { delay: Duration::from_millis(200), calls: Mutex::new(Vec::new()) });
    let pipeline = DetailPipeline::new(&EnrichmentConfig { workers: 1, ..config(10) }, fetcher.clone(), store.clone());
    pipeline.start().await;

    assert_eq!(pipeline.enqueue(products.clone()).await, 3);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let dropped = pipeline.shutdown().await;

    assert_eq!(dropped, 2);
    assert_eq!(*fetcher.calls.lock().await, vec![products[0].id.clone()]);
    let stats = pipeline.stats().await;
    assert_eq!(stats.total_success, 1);
    assert_eq!(stats.total_processed, 1);
    assert_eq!(store.get_by_id(&products[0].id).await.unwrap().description, "Slowly fetched");
    assert_eq!(store.unenriched().await.len(), 2);
    assert_eq!(pipeline.enqueue(products).await, 0);
}

#[tokio::test(start_paused = true)]
async fn enrichment_writes_single_records() {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(ProductStore::new(backend.clone()));
    for n in 0..4 {
        let product = Product::candidate("Mac", "cn", &format!("MacBook Pro {n}"), &format!("macbook pro {n}"), 12_999.0)
            .with_url(format!("https://refurb.example/mbp/{n}"));
        store.merge(product).await;
    }
    store.persist().await.unwrap();
    let writes_before = backend.apply_count();

    let pipeline = DetailPipeline::new(
        &EnrichmentConfig { workers: 1, ..config(10) },
        Arc::new(FlakyFetcher::new(0)),
        store.clone(),
    );
    pipeline.start().await;
    assert_eq!(pipeline.enqueue_unenriched(&store).await, 4);
    wait_until_processed(&pipeline, 4).await;
    pipeline.shutdown().await;

    assert_eq!(backend.persist_count(), 0);
    assert_eq!(backend.apply_count() - writes_before, 4);
    assert_eq!(backend.last_delta_len(), 1);
    let written = backend.last_persisted().await.unwrap();
    assert!(written.products.values().all(|p| p.description.starts_with("Detail text for")));
}

#[test]
fn default_backoff_is_strictly_increasing() {
    let schedule = EnrichmentConfig::default().retry.backoff_schedule();
    assert_eq!(schedule.len(), 2);
    assert!(schedule.windows(2).all(|w| w[0] < w[1]));
}
