//! Ingestion scheduler
//!
//! One cycle runs extraction and the store merge in line, records its status,
//! persists once, and then hands new and price-changed records to the
//! dispatcher on a spawned task and unenriched records to the detail
//! pipeline. Cycles are serialized by a mutex; enrichment and notification
//! overlap with later cycles.

#![allow(clippy::significant_drop_tightening)]

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crawling::enrichment::DetailPipeline;
use crate::crawling::extractor::Extractor;
use crate::domain::{Product, ScraperStatus};
use crate::notify::{DispatchSummary, NotificationDispatcher};
use crate::store::ProductStore;

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("all {0} categories failed: {1}")]
    AllCategoriesFailed(usize, String),
    #[error("scheduler is stopped")]
    Stopped,
}

/// What one cycle did. Dispatch results arrive later through
/// [`IngestionScheduler::wait_for_dispatch`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub new_products: usize,
    pub price_changes: usize,
    pub enqueued: usize,
    pub failed_categories: usize,
}

pub struct IngestionScheduler {
    extractor: Arc<Extractor>,
    store: Arc<ProductStore>,
    dispatcher: Arc<NotificationDispatcher>,
    pipeline: Arc<DetailPipeline>,
    interval: Duration,
    cycle_lock: Mutex<()>,
    cancellation_token: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    dispatches: Mutex<Vec<JoinHandle<DispatchSummary>>>,
}

impl IngestionScheduler {
    pub fn new(
        extractor: Arc<Extractor>,
        store: Arc<ProductStore>,
        dispatcher: Arc<NotificationDispatcher>,
        pipeline: Arc<DetailPipeline>,
        interval: Duration,
    ) -> Self {
        Self {
            extractor,
            store,
            dispatcher,
            pipeline,
            interval: interval.max(Duration::from_secs(1)),
            cycle_lock: Mutex::new(()),
            cancellation_token: CancellationToken::new(),
            loop_handle: Mutex::new(None),
            dispatches: Mutex::new(Vec::new()),
        }
    }

    pub fn pipeline(&self) -> &Arc<DetailPipeline> {
        &self.pipeline
    }

    /// Start the detail workers and the periodic loop. The first cycle runs
    /// immediately. Calling it again while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut loop_handle = self.loop_handle.lock().await;
        if loop_handle.is_some() || self.cancellation_token.is_cancelled() {
            return;
        }
        self.pipeline.start().await;

        let scheduler = Arc::clone(self);
        *loop_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = scheduler.cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.run_cycle().await {
                            warn!("⚠️ Scheduled cycle failed: {}", e);
                        }
                    }
                }
            }
            debug!("Scheduler loop exited");
        }));
        info!("⏰ Scheduler started, interval {:?}", self.interval);
    }

    /// Run a cycle now. Waits for a running cycle to finish first.
    pub async fn scrape_now(&self) -> Result<CycleReport, IngestionError> {
        info!("🖐️ Manual scrape requested");
        self.run_cycle().await
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, IngestionError> {
        let _cycle = self.cycle_lock.lock().await;
        if self.cancellation_token.is_cancelled() {
            return Err(IngestionError::Stopped);
        }

        let started = Instant::now();
        self.store.set_scraper_status(ScraperStatus::running(Utc::now())).await;

        let extraction = self.extractor.extract().await;
        let failed_categories = extraction.failed_categories.len();
        if extraction.all_failed() {
            let reasons = extraction
                .failed_categories
                .iter()
                .map(|(category, e)| format!("{category}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            let err = IngestionError::AllCategoriesFailed(failed_categories, reasons);
            self.store
                .set_scraper_status(ScraperStatus::failed(Utc::now(), err.to_string(), elapsed_ms(started)))
                .await;
            if let Err(e) = self.store.persist().await {
                error!("❌ Failed to persist cycle status: {}", e);
            }
            error!("❌ Cycle failed: {}", err);
            return Err(err);
        }

        let mut report = CycleReport {
            candidates: extraction.candidates.len(),
            failed_categories,
            ..CycleReport::default()
        };
        let mut new_products = Vec::new();
        let mut price_changes = Vec::new();
        let mut unenriched = Vec::new();
        for candidate in extraction.candidates {
            let (stored, outcome) = self.store.merge(candidate).await;
            if outcome.is_new {
                new_products.push(stored.clone());
            } else if outcome.price_changed {
                price_changes.push((stored.clone(), outcome.old_price));
            }
            if !stored.has_enrichment() {
                unenriched.push(stored);
            }
        }
        report.new_products = new_products.len();
        report.price_changes = price_changes.len();

        // Status and merged records land in the same write.
        self.store
            .set_scraper_status(ScraperStatus::succeeded(Utc::now(), report.candidates, elapsed_ms(started)))
            .await;
        if let Err(e) = self.store.persist().await {
            error!("❌ Failed to persist cycle results: {}", e);
        }

        report.enqueued = self.pipeline.enqueue(unenriched).await;
        if !new_products.is_empty() || !price_changes.is_empty() {
            self.spawn_dispatch(new_products, price_changes).await;
        }

        info!(
            "✅ Cycle done in {:?}: {} candidates, {} new, {} price changes, {} queued for details",
            started.elapsed(),
            report.candidates,
            report.new_products,
            report.price_changes,
            report.enqueued
        );
        Ok(report)
    }

    async fn spawn_dispatch(&self, new_products: Vec<Product>, price_changes: Vec<(Product, f64)>) {
        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = tokio::spawn(async move {
            let mut summary = DispatchSummary::default();
            let subscriptions = store.subscriptions().await;
            for product in &new_products {
                summary += dispatcher.dispatch_new_arrival(product, &subscriptions).await;
            }
            for (product, old_price) in &price_changes {
                let watches = store.watches_for(&product.id).await;
                summary += dispatcher
                    .dispatch_price_change(product, *old_price, product.price, &watches)
                    .await;
            }
            summary
        });

        let mut dispatches = self.dispatches.lock().await;
        dispatches.retain(|h| !h.is_finished());
        dispatches.push(handle);
    }

    /// Wait for every dispatch spawned so far and sum their results.
    pub async fn wait_for_dispatch(&self) -> DispatchSummary {
        let handles: Vec<_> = self.dispatches.lock().await.drain(..).collect();
        let mut summary = DispatchSummary::default();
        for handle in handles {
            match handle.await {
                Ok(s) => summary += s,
                Err(e) => error!("❌ Dispatch task ended abnormally: {}", e),
            }
        }
        summary
    }

    /// Stop the loop, let in-flight dispatches finish, and shut the detail
    /// pipeline down. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("❌ Scheduler loop ended abnormally: {}", e);
            }
        }
        self.wait_for_dispatch().await;
        self.pipeline.shutdown().await;
        info!("🛑 Scheduler stopped");
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::enrichment::{DetailFetcher, EnrichmentError, ProductDetail};
    use crate::crawling::extractor::{CandidateParser, CatalogEndpoint, CatalogSource, ExtractionError, ParseContext};
    use crate::domain::{ScrapeState, Subscription, SubscriptionFilter};
    use crate::infrastructure::config::EnrichmentConfig;
    use crate::notify::{Notifier, NotifyError};
    use crate::store::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ToggleSource {
        down: AtomicBool,
    }

    #[async_trait]
    impl CatalogSource for ToggleSource {
        async fn fetch_catalog(&self, url: &str) -> Result<String, ExtractionError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(ExtractionError::fetch(url, "503", true));
            }
            Ok("Mac mini M2=3799\nMacBook Air M3=7999".to_string())
        }
    }

    /// `name=price` per line
    struct PairParser;

    impl CandidateParser for PairParser {
        fn parse_candidates(&self, payload: &str, ctx: &ParseContext) -> Result<Vec<Product>, ExtractionError> {
            payload
                .lines()
                .map(|line| {
                    let (name, price) = line
                        .split_once('=')
                        .ok_or_else(|| ExtractionError::Parse(line.to_string()))?;
                    let price = price.parse().map_err(|_| ExtractionError::Parse(line.to_string()))?;
                    Ok(Product::candidate(&ctx.category, &ctx.region, name, &name.to_lowercase(), price))
                })
                .collect()
        }
    }

    struct NoDetails;

    #[async_trait]
    impl DetailFetcher for NoDetails {
        async fn fetch_detail(&self, _product: &Product) -> Result<ProductDetail, EnrichmentError> {
            Err(EnrichmentError::Empty)
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl Notifier for AcceptAll {
        async fn send(&self, _target: &str, _title: &str, _body: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn scheduler(source: Arc<ToggleSource>) -> (Arc<ProductStore>, IngestionScheduler) {
        scheduler_over(source, Arc::new(MemoryBackend::new()))
    }

    fn scheduler_over(source: Arc<ToggleSource>, backend: Arc<MemoryBackend>) -> (Arc<ProductStore>, IngestionScheduler) {
        let store = Arc::new(ProductStore::new(backend));
        let extractor = Arc::new(Extractor::new(
            source,
            Arc::new(PairParser),
            "cn",
            vec![CatalogEndpoint { category: "Mac".into(), url: "https://example.test/mac".into() }],
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(Arc::new(AcceptAll), store.clone()));
        let pipeline = Arc::new(DetailPipeline::new(&EnrichmentConfig::default(), Arc::new(NoDetails), store.clone()));
        let scheduler = IngestionScheduler::new(extractor, store.clone(), dispatcher, pipeline, Duration::from_secs(60));
        (store, scheduler)
    }

    #[tokio::test]
    async fn cycle_ingests_and_notifies_once() {
        let (store, scheduler) = scheduler(Arc::new(ToggleSource { down: AtomicBool::new(false) }));
        store
            .add_subscription(Subscription::new("all", "barkkey0001", SubscriptionFilter::default()))
            .await
            .unwrap();

        let first = scheduler.run_cycle().await.unwrap();
        assert_eq!(first.candidates, 2);
        assert_eq!(first.new_products, 2);
        assert_eq!(scheduler.wait_for_dispatch().await.sent, 2);

        let second = scheduler.scrape_now().await.unwrap();
        assert_eq!(second.new_products, 0);
        assert_eq!(scheduler.wait_for_dispatch().await.sent, 0);

        let status = store.scraper_status().await;
        assert_eq!(status.state, ScrapeState::Success);
        assert_eq!(status.products_scraped, 2);
        assert!(store.get_stats().await.last_scrape_at.is_some());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn cycle_status_is_written_with_the_cycle() {
        let backend = Arc::new(MemoryBackend::new());
        let (_store, scheduler) = scheduler_over(Arc::new(ToggleSource { down: AtomicBool::new(false) }), backend.clone());

        scheduler.run_cycle().await.unwrap();

        let written = backend.last_persisted().await.unwrap();
        assert_eq!(written.products.len(), 2);
        assert_eq!(written.scraper_status.state, ScrapeState::Success);
        assert!(written.last_scrape_at.is_some());
        assert_eq!(backend.apply_count(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn all_categories_failing_marks_status_failed() {
        let source = Arc::new(ToggleSource { down: AtomicBool::new(true) });
        let (store, scheduler) = scheduler(source);

        assert!(matches!(scheduler.run_cycle().await, Err(IngestionError::AllCategoriesFailed(1, _))));
        let status = store.scraper_status().await;
        assert_eq!(status.state, ScrapeState::Failed);
        assert!(status.error.unwrap().contains("503"));
        assert!(store.get_all().await.is_empty());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_refuses_new_cycles() {
        let (_store, scheduler) = scheduler(Arc::new(ToggleSource { down: AtomicBool::new(false) }));
        let scheduler = Arc::new(scheduler);
        scheduler.start().await;
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(matches!(scheduler.scrape_now().await, Err(IngestionError::Stopped)));
    }
}
