//! Catalog query and command service
//!
//! Thin layer over `ProductStore` that validates input and maps store errors
//! into `anyhow` for callers. Manual scrapes go through the scheduler so they
//! serialize with the periodic cycle.

use anyhow::{Result, anyhow};
use std::sync::Arc;
use tracing::info;

use crate::application::dto::{
    CreateSubscriptionDto, CreateWatchDto, FilterOptionsDto, ProductQueryDto, ProductWithHistoryDto, Recommendation,
    RecommendationDto, UpdateSubscriptionDto,
};
use crate::application::filter_options::filter_options;
use crate::application::recommendation::recommend;
use crate::crawling::scheduler::{CycleReport, IngestionScheduler};
use crate::domain::{PriceHistoryEntry, PriceWatch, Product, ScraperStatus, StoreStats, Subscription};
use crate::store::{NotificationPage, ProductStore};

pub struct CatalogService {
    store: Arc<ProductStore>,
    scheduler: Option<Arc<IngestionScheduler>>,
}

impl CatalogService {
    pub const fn new(store: Arc<ProductStore>) -> Self {
        Self { store, scheduler: None }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<IngestionScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    // ---- products ----

    pub async fn get_all(&self) -> Vec<Product> {
        self.store.get_all().await
    }

    pub async fn search_products(&self, query: &ProductQueryDto) -> Vec<Product> {
        let products = match &query.category {
            Some(category) => self.store.get_by_category(category).await,
            None => self.store.get_all().await,
        };
        let mut products: Vec<Product> = products
            .into_iter()
            .filter(|p| query.stock_status.is_none_or(|s| p.stock_status == s))
            .filter(|p| query.max_price.is_none_or(|max| p.price <= max))
            .collect();
        products.sort_by(|a, b| b.value_score.total_cmp(&a.value_score).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            products.truncate(limit);
        }
        products
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Product> {
        self.store.get_by_id(id).await
    }

    pub async fn get_history(&self, id: &str) -> Vec<PriceHistoryEntry> {
        self.store.get_history(id).await
    }

    pub async fn get_product_with_history(&self, id: &str) -> Result<ProductWithHistoryDto> {
        let product = self
            .store
            .get_by_id(id)
            .await
            .ok_or_else(|| anyhow!("Product not found: {}", id))?;
        let history = self.store.get_history(id).await;
        Ok(ProductWithHistoryDto { product, history })
    }

    pub async fn get_stats(&self) -> StoreStats {
        self.store.get_stats().await
    }

    pub async fn categories(&self) -> Vec<String> {
        self.store.categories().await
    }

    async fn products_in(&self, category: Option<&str>) -> Vec<Product> {
        match category.map(str::trim).filter(|c| !c.is_empty()) {
            Some(category) => self.store.get_by_category(category).await,
            None => self.store.get_all().await,
        }
    }

    /// Distinct spec values over one category, or the whole catalog.
    pub async fn filter_options(&self, category: Option<&str>) -> FilterOptionsDto {
        filter_options(&self.products_in(category).await)
    }

    pub async fn recommend(&self, request: &RecommendationDto) -> Result<Vec<Recommendation>> {
        let negative = |v: Option<f64>| v.is_some_and(|v| v < 0.0 || !v.is_finite());
        if negative(request.budget_min) || negative(request.budget_max) {
            return Err(anyhow!("Budget cannot be negative"));
        }
        if let (Some(min), Some(max)) = (request.budget_min, request.budget_max) {
            if min > max {
                return Err(anyhow!("Minimum budget {} exceeds maximum {}", min, max));
            }
        }
        if let (Some(min), Some(max)) = (request.storage_min_gb, request.storage_max_gb) {
            if min > max {
                return Err(anyhow!("Minimum storage {}GB exceeds maximum {}GB", min, max));
            }
        }
        let results = recommend(&self.store.get_all().await, request);
        info!("🎯 {} recommendations", results.len());
        Ok(results)
    }

    pub async fn remove_region(&self, region: &str) -> Result<usize> {
        if region.trim().is_empty() {
            return Err(anyhow!("Region cannot be empty"));
        }
        Ok(self.store.remove_region(region.trim()).await?)
    }

    // ---- scraping ----

    pub async fn scraper_status(&self) -> ScraperStatus {
        self.store.scraper_status().await
    }

    pub async fn scrape_now(&self) -> Result<CycleReport> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| anyhow!("Scheduler is not configured"))?;
        Ok(scheduler.scrape_now().await?)
    }

    // ---- subscriptions ----

    pub async fn add_subscription(&self, dto: CreateSubscriptionDto) -> Result<Subscription> {
        if dto.name.trim().is_empty() {
            return Err(anyhow!("Subscription name cannot be empty"));
        }
        let mut subscription = Subscription::new(dto.name.trim(), dto.target.trim(), dto.filter);
        subscription.description = dto.description;
        Ok(self.store.add_subscription(subscription).await?)
    }

    pub async fn update_subscription(&self, id: &str, dto: UpdateSubscriptionDto) -> Result<Subscription> {
        if dto.name.trim().is_empty() {
            return Err(anyhow!("Subscription name cannot be empty"));
        }
        Ok(self
            .store
            .update_subscription(id, dto.name.trim().to_string(), dto.filter)
            .await?)
    }

    pub async fn remove_subscription(&self, id: &str) -> Result<Subscription> {
        Ok(self.store.remove_subscription(id).await?)
    }

    pub async fn pause(&self, id: &str) -> Result<Subscription> {
        Ok(self.store.set_paused(id, true).await?)
    }

    pub async fn resume(&self, id: &str) -> Result<Subscription> {
        Ok(self.store.set_paused(id, false).await?)
    }

    pub async fn list_subscriptions(&self) -> Vec<Subscription> {
        self.store.subscriptions().await
    }

    // ---- price watches ----

    pub async fn add_watch(&self, dto: CreateWatchDto) -> Result<PriceWatch> {
        if dto.target_price < 0.0 || !dto.target_price.is_finite() {
            return Err(anyhow!("Invalid target price: {}", dto.target_price));
        }
        let watch = PriceWatch::new(dto.product_id, dto.target.trim(), dto.target_price);
        let watch = self.store.add_watch(watch).await?;
        info!("👀 Watching {} (target ¥{:.2})", watch.product_id, watch.target_price);
        Ok(watch)
    }

    pub async fn remove_watch(&self, id: &str) -> Result<PriceWatch> {
        Ok(self.store.remove_watch(id).await?)
    }

    pub async fn watches_for(&self, product_id: &str) -> Vec<PriceWatch> {
        self.store.watches_for(product_id).await
    }

    pub async fn list_watches(&self) -> Vec<PriceWatch> {
        self.store.watches().await
    }

    // ---- notification history ----

    /// Records delivered to `target`, optionally only those of one subscription or watch.
    pub async fn notification_history(
        &self,
        target: &str,
        subscription_id: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> NotificationPage {
        self.store
            .notification_history_for(target, subscription_id, page, page_size)
            .await
    }

    pub async fn mark_read(&self, record_id: &str) -> Result<()> {
        Ok(self.store.mark_read(record_id).await?)
    }

    pub async fn mark_all_read(&self, target: &str) -> Result<usize> {
        Ok(self.store.mark_all_read(target).await?)
    }

    pub async fn unread_count(&self, target: &str) -> usize {
        self.store.unread_count(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StockStatus, SubscriptionFilter};
    use tokio_test::{assert_err, assert_ok};

    async fn service_with_products() -> CatalogService {
        let store = Arc::new(ProductStore::in_memory());
        for (name, price, stock) in [
            ("Mac mini M2", 3_799.0, StockStatus::Available),
            ("MacBook Air M3", 7_999.0, StockStatus::Available),
            ("MacBook Pro M3 Max", 23_999.0, StockStatus::SoldOut),
        ] {
            let product = Product::candidate("Mac", "cn", name, &name.to_lowercase(), price).with_stock(stock);
            store.merge(product).await;
        }
        CatalogService::new(store)
    }

    #[tokio::test]
    async fn search_filters_and_limits() {
        let service = service_with_products().await;

        let available = service
            .search_products(&ProductQueryDto {
                stock_status: Some(StockStatus::Available),
                max_price: Some(5_000.0),
                ..ProductQueryDto::default()
            })
            .await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "Mac mini M2");

        let limited = service
            .search_products(&ProductQueryDto { limit: Some(2), ..ProductQueryDto::default() })
            .await;
        assert_eq!(limited.len(), 2);
        assert_eq!(service.categories().await, vec!["Mac".to_string()]);
    }

    #[tokio::test]
    async fn subscription_lifecycle() {
        let service = service_with_products().await;
        let sub = assert_ok!(
            service
                .add_subscription(CreateSubscriptionDto {
                    name: "cheap macs".into(),
                    description: String::new(),
                    target: "barkkey0001".into(),
                    filter: SubscriptionFilter { max_price: 5_000.0, ..SubscriptionFilter::default() },
                })
                .await
        );

        assert!(assert_ok!(service.pause(&sub.id).await).paused);
        assert!(!assert_ok!(service.resume(&sub.id).await).paused);
        assert_eq!(service.list_subscriptions().await.len(), 1);
        assert_ok!(service.remove_subscription(&sub.id).await);
        assert!(service.list_subscriptions().await.is_empty());
        assert_err!(service.pause(&sub.id).await);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let service = service_with_products().await;
        assert_err!(
            service
                .add_subscription(CreateSubscriptionDto {
                    name: "bad".into(),
                    description: String::new(),
                    target: "has space".into(),
                    filter: SubscriptionFilter::default(),
                })
                .await
        );
        assert_err!(
            service
                .add_watch(CreateWatchDto { product_id: "mac:missing".into(), target: "barkkey0001".into(), target_price: 0.0 })
                .await
        );
        assert_err!(service.scrape_now().await);
        assert_err!(service.remove_region(" ").await);
    }

    #[tokio::test]
    async fn filter_options_follow_category() {
        let service = service_with_products().await;
        let mut ipad = Product::candidate("iPad", "cn", "iPad Air 11 M2", "ipad air 11 m2", 4_099.0);
        ipad.specs_detail.chip = Some("M2".into());
        service.store.merge(ipad).await;

        let macs = service.filter_options(Some("Mac")).await;
        assert_eq!(macs.models, vec!["Mac mini", "MacBook Air", "MacBook Pro"]);
        assert!(macs.chips.is_empty());

        let all = service.filter_options(None).await;
        assert_eq!(all.chips, vec!["M2"]);
        assert_eq!(all.models.len(), 4);
    }

    #[tokio::test]
    async fn recommendations_validate_and_rank() {
        let service = service_with_products().await;
        let results = assert_ok!(
            service
                .recommend(&RecommendationDto { budget_max: Some(10_000.0), ..RecommendationDto::default() })
                .await
        );
        assert_eq!(results.len(), 2);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

        assert_err!(
            service
                .recommend(&RecommendationDto {
                    budget_min: Some(9_000.0),
                    budget_max: Some(1_000.0),
                    ..RecommendationDto::default()
                })
                .await
        );
        assert_err!(
            service
                .recommend(&RecommendationDto { budget_max: Some(-1.0), ..RecommendationDto::default() })
                .await
        );
    }

    #[tokio::test]
    async fn watches_are_listed_per_product() {
        let service = service_with_products().await;
        let product = service.get_all().await.remove(0);
        let watch = assert_ok!(
            service
                .add_watch(CreateWatchDto { product_id: product.id.clone(), target: "barkkey0001".into(), target_price: 0.0 })
                .await
        );

        assert_eq!(service.watches_for(&product.id).await, vec![watch.clone()]);
        assert_eq!(service.list_watches().await.len(), 1);
        assert_ok!(service.remove_watch(&watch.id).await);
        assert!(service.watches_for(&product.id).await.is_empty());

        let detail = assert_ok!(service.get_product_with_history(&product.id).await);
        assert_eq!(detail.history.len(), 1);
    }
}
