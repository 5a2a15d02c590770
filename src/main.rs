use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use refurb_watch_lib::crawling::{DetailPipeline, Extractor, IngestionScheduler};
use refurb_watch_lib::infrastructure::config::{AppConfig, ConfigManager, StorageKind};
use refurb_watch_lib::infrastructure::{
    BarkNotifier, BootstrapCatalogParser, HtmlDetailFetcher, HttpClient, HttpClientConfig, JsonFileBackend,
    SqliteBackend, init_logging_with_config, log_system_info,
};
use refurb_watch_lib::notify::NotificationDispatcher;
use refurb_watch_lib::store::{MemoryBackend, ProductStore, StoreBackend};

const SQLITE_FILE_NAME: &str = "refurb_watch.db";

async fn open_backend(config: &AppConfig) -> Result<Arc<dyn StoreBackend>> {
    let data_dir = &config.storage.data_dir;
    let backend: Arc<dyn StoreBackend> = match config.storage.backend {
        StorageKind::Json => Arc::new(JsonFileBackend::new(data_dir.clone())),
        StorageKind::Sqlite => Arc::new(
            SqliteBackend::open(&data_dir.join(SQLITE_FILE_NAME))
                .await
                .context("Failed to open SQLite store")?,
        ),
        StorageKind::Memory => {
            warn!("⚠️ Using in-memory storage, nothing will survive a restart");
            Arc::new(MemoryBackend::new())
        }
    };
    Ok(backend)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigManager::new()?.initialize_on_first_run().await?;
    init_logging_with_config(config.logging.clone())?;
    log_system_info();

    let backend = open_backend(&config).await?;
    let store = Arc::new(ProductStore::new(backend));
    let loaded = store.load().await.context("Failed to load store")?;
    info!("📦 Loaded {} products from {} storage", loaded, store.backend_name());

    let http = Arc::new(HttpClient::new(&HttpClientConfig::from(&config.catalog))?);
    let extractor = Arc::new(Extractor::from_config(
        http.clone(),
        Arc::new(BootstrapCatalogParser::new()),
        &config.catalog,
    ));
    let pipeline = Arc::new(DetailPipeline::new(
        &config.enrichment,
        Arc::new(HtmlDetailFetcher::new(http)),
        store.clone(),
    ));
    let notifier = Arc::new(BarkNotifier::new(&config.notifier)?);
    let dispatcher = Arc::new(NotificationDispatcher::new(notifier, store.clone()));

    let scheduler = Arc::new(IngestionScheduler::new(
        extractor,
        store.clone(),
        dispatcher,
        pipeline.clone(),
        Duration::from_secs(config.catalog.scrape_interval_secs),
    ));
    scheduler.start().await;
    let backfilled = pipeline.enqueue_unenriched(&store).await;
    if backfilled > 0 {
        info!("📥 Backfilling details for {} stored products", backfilled);
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("🛑 Shutdown requested");

    scheduler.stop().await;
    if let Err(e) = store.persist_all().await {
        error!("❌ Final persist failed: {}", e);
    }
    info!("👋 refurb-watch stopped");
    Ok(())
}
