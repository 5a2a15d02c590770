//! JSON file persistence
//!
//! One pretty-printed file per concern under the data directory. Each file is
//! written to a `.tmp` sibling and renamed into place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::domain::{NotificationRecord, PriceHistoryEntry, PriceWatch, Product, ScraperStatus, Subscription};
use crate::store::{BackendError, StoreBackend, StoreSnapshot};

const PRODUCTS_FILE: &str = "products.json";
const HISTORY_FILE: &str = "history.json";
const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";
const NOTIFICATIONS_FILE: &str = "notification_history.json";
const META_FILE: &str = "meta.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SubscriptionsFile {
    new_arrival: BTreeMap<String, Subscription>,
    price_watches: BTreeMap<String, PriceWatch>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MetaFile {
    scraper_status: ScraperStatus,
    last_scrape_at: Option<DateTime<Utc>>,
}

pub struct JsonFileBackend {
    data_dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    async fn read_or_default<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T, BackendError> {
        let path = self.data_dir.join(file);
        match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(T::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, starting empty", path.display());
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic<T: Serialize + Sync>(&self, file: &str, value: &T) -> Result<(), BackendError> {
        let path = self.data_dir.join(file);
        let tmp = self.data_dir.join(format!("{file}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn load(&self) -> Result<StoreSnapshot, BackendError> {
        let products: BTreeMap<String, Product> = self.read_or_default(PRODUCTS_FILE).await?;
        let history: BTreeMap<String, Vec<PriceHistoryEntry>> = self.read_or_default(HISTORY_FILE).await?;
        let subscriptions: SubscriptionsFile = self.read_or_default(SUBSCRIPTIONS_FILE).await?;
        let notifications: Vec<NotificationRecord> = self.read_or_default(NOTIFICATIONS_FILE).await?;
        let meta: MetaFile = self.read_or_default(META_FILE).await?;

        info!("📂 Loaded JSON store from {}", self.data_dir.display());
        Ok(StoreSnapshot {
            products,
            history,
            subscriptions: subscriptions.new_arrival,
            watches: subscriptions.price_watches,
            notifications,
            scraper_status: meta.scraper_status,
            last_scrape_at: meta.last_scrape_at,
        })
    }

    async fn persist(&self, snapshot: &StoreSnapshot) -> Result<(), BackendError> {
        fs::create_dir_all(&self.data_dir).await?;

        self.write_atomic(PRODUCTS_FILE, &snapshot.products).await?;
        self.write_atomic(HISTORY_FILE, &snapshot.history).await?;
        self.write_atomic(
            SUBSCRIPTIONS_FILE,
            &SubscriptionsFile {
                new_arrival: snapshot.subscriptions.clone(),
                price_watches: snapshot.watches.clone(),
            },
        )
        .await?;
        self.write_atomic(NOTIFICATIONS_FILE, &snapshot.notifications).await?;
        self.write_atomic(
            META_FILE,
            &MetaFile {
                scraper_status: snapshot.scraper_status.clone(),
                last_scrape_at: snapshot.last_scrape_at,
            },
        )
        .await?;
        Ok(())
    }
}
