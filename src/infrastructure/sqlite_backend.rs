//! SQLite persistence via sqlx
//!
//! Products, history, subscriptions and notifications get their own tables;
//! nested values (specs, predicate lists) are stored as JSON payload columns.
//! Keyed writes upsert or delete single rows; a full persist replaces the
//! table contents. Both run inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::domain::{NotificationRecord, PriceHistoryEntry, PriceWatch, Product, ScraperStatus, Subscription};
use crate::store::{BackendError, StoreBackend, StoreDelta, StoreSnapshot};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        region TEXT NOT NULL,
        price REAL NOT NULL,
        value_score REAL NOT NULL DEFAULT 0,
        payload TEXT NOT NULL,
        updated_at DATETIME NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS price_history (
        product_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        price REAL NOT NULL,
        discount REAL NOT NULL,
        recorded_at DATETIME NOT NULL,
        PRIMARY KEY (product_id, seq)
    )",
    r"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        seq INTEGER NOT NULL,
        payload TEXT NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_products_category ON products (category)",
    "CREATE INDEX IF NOT EXISTS idx_products_value_score ON products (value_score DESC)",
];

const KIND_NEW_ARRIVAL: &str = "new_arrival";
const KIND_PRICE_WATCH: &str = "price_watch";
const META_SCRAPER_STATUS: &str = "scraper_status";
const META_LAST_SCRAPE: &str = "last_scrape_at";

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(db_path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.migrate().await?;
        info!("🗄️ SQLite store ready at {}", db_path.display());
        Ok(backend)
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), BackendError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn meta_value(&self, key: &str) -> Result<Option<String>, BackendError> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("value")).transpose()?)
    }
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self) -> Result<StoreSnapshot, BackendError> {
        let mut snapshot = StoreSnapshot::default();

        for row in sqlx::query("SELECT payload FROM products").fetch_all(&self.pool).await? {
            let payload: String = row.try_get("payload")?;
            let product: Product = serde_json::from_str(&payload)?;
            snapshot.products.insert(product.id.clone(), product);
        }

        let mut history: BTreeMap<String, Vec<PriceHistoryEntry>> = BTreeMap::new();
        let rows = sqlx::query(
            "SELECT product_id, price, discount, recorded_at FROM price_history ORDER BY product_id, seq",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let product_id: String = row.try_get("product_id")?;
            let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;
            history.entry(product_id.clone()).or_default().push(PriceHistoryEntry {
                product_id,
                price: row.try_get("price")?,
                discount: row.try_get("discount")?,
                recorded_at,
            });
        }
        snapshot.history = history;

        for row in sqlx::query("SELECT kind, payload FROM subscriptions").fetch_all(&self.pool).await? {
            let kind: String = row.try_get("kind")?;
            let payload: String = row.try_get("payload")?;
            if kind == KIND_PRICE_WATCH {
                let watch: PriceWatch = serde_json::from_str(&payload)?;
                snapshot.watches.insert(watch.id.clone(), watch);
            } else {
                let sub: Subscription = serde_json::from_str(&payload)?;
                snapshot.subscriptions.insert(sub.id.clone(), sub);
            }
        }

        for row in sqlx::query("SELECT payload FROM notifications ORDER BY seq").fetch_all(&self.pool).await? {
            let payload: String = row.try_get("payload")?;
            snapshot.notifications.push(serde_json::from_str::<NotificationRecord>(&payload)?);
        }

        if let Some(status) = self.meta_value(META_SCRAPER_STATUS).await? {
            snapshot.scraper_status = serde_json::from_str::<ScraperStatus>(&status)?;
        }
        if let Some(last) = self.meta_value(META_LAST_SCRAPE).await? {
            snapshot.last_scrape_at = serde_json::from_str(&last)?;
        }

        debug!("Loaded {} products from SQLite", snapshot.products.len());
        Ok(snapshot)
    }

    async fn persist(&self, snapshot: &StoreSnapshot) -> Result<(), BackendError> {
        let mut tx = self.pool.begin().await?;

        for table in ["products", "price_history", "subscriptions", "notifications", "meta"] {
            sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
        }
        for product in snapshot.products.values() {
            upsert_product(&mut tx, product).await?;
        }
        for (product_id, entries) in &snapshot.history {
            replace_history(&mut tx, product_id, entries).await?;
        }
        for sub in snapshot.subscriptions.values() {
            upsert_subscription_row(&mut tx, &sub.id, KIND_NEW_ARRIVAL, serde_json::to_string(sub)?).await?;
        }
        for watch in snapshot.watches.values() {
            upsert_subscription_row(&mut tx, &watch.id, KIND_PRICE_WATCH, serde_json::to_string(watch)?).await?;
        }
        for record in &snapshot.notifications {
            upsert_notification(&mut tx, record).await?;
        }
        write_status(&mut tx, &snapshot.scraper_status, snapshot.last_scrape_at).await?;

        tx.commit().await?;
        Ok(())
    }

    fn supports_delta(&self) -> bool {
        true
    }

    async fn apply(&self, delta: &StoreDelta) -> Result<(), BackendError> {
        let mut tx = self.pool.begin().await?;

        for id in &delta.removed_products {
            sqlx::query("DELETE FROM products WHERE id = ?").bind(id).execute(&mut *tx).await?;
            sqlx::query("DELETE FROM price_history WHERE product_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for product in &delta.products {
            upsert_product(&mut tx, product).await?;
        }
        for (product_id, entries) in &delta.history {
            replace_history(&mut tx, product_id, entries).await?;
        }
        for id in delta.removed_subscriptions.iter().chain(&delta.removed_watches) {
            sqlx::query("DELETE FROM subscriptions WHERE id = ?").bind(id).execute(&mut *tx).await?;
        }
        for sub in &delta.subscriptions {
            upsert_subscription_row(&mut tx, &sub.id, KIND_NEW_ARRIVAL, serde_json::to_string(sub)?).await?;
        }
        for watch in &delta.watches {
            upsert_subscription_row(&mut tx, &watch.id, KIND_PRICE_WATCH, serde_json::to_string(watch)?).await?;
        }
        for record in &delta.notifications {
            upsert_notification(&mut tx, record).await?;
        }
        if let Some((status, last_scrape_at)) = &delta.scraper_status {
            write_status(&mut tx, status, *last_scrape_at).await?;
        }

        tx.commit().await?;
        debug!("Applied {} keyed writes to SQLite", delta.len());
        Ok(())
    }
}

async fn upsert_product(conn: &mut SqliteConnection, product: &Product) -> Result<(), BackendError> {
    sqlx::query(
        "INSERT INTO products (id, category, region, price, value_score, payload, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             category = excluded.category,
             region = excluded.region,
             price = excluded.price,
             value_score = excluded.value_score,
             payload = excluded.payload,
             updated_at = excluded.updated_at",
    )
    .bind(&product.id)
    .bind(&product.category)
    .bind(&product.region)
    .bind(product.price)
    .bind(product.value_score)
    .bind(serde_json::to_string(product)?)
    .bind(product.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// History rows of one product are replaced by its current window.
async fn replace_history(
    conn: &mut SqliteConnection,
    product_id: &str,
    entries: &[PriceHistoryEntry],
) -> Result<(), BackendError> {
    sqlx::query("DELETE FROM price_history WHERE product_id = ?")
        .bind(product_id)
        .execute(&mut *conn)
        .await?;
    for (seq, entry) in entries.iter().enumerate() {
        sqlx::query(
            "INSERT INTO price_history (product_id, seq, price, discount, recorded_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(i64::try_from(seq).unwrap_or(i64::MAX))
        .bind(entry.price)
        .bind(entry.discount)
        .bind(entry.recorded_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_subscription_row(
    conn: &mut SqliteConnection,
    id: &str,
    kind: &str,
    payload: String,
) -> Result<(), BackendError> {
    sqlx::query(
        "INSERT INTO subscriptions (id, kind, payload) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET kind = excluded.kind, payload = excluded.payload",
    )
    .bind(id)
    .bind(kind)
    .bind(payload)
    .execute(conn)
    .await?;
    Ok(())
}

/// New records go to the end of the log; known ones keep their position.
async fn upsert_notification(conn: &mut SqliteConnection, record: &NotificationRecord) -> Result<(), BackendError> {
    sqlx::query(
        "INSERT INTO notifications (id, seq, payload)
         VALUES (?, (SELECT COALESCE(MAX(seq), -1) + 1 FROM notifications), ?)
         ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
    )
    .bind(&record.id)
    .bind(serde_json::to_string(record)?)
    .execute(conn)
    .await?;
    Ok(())
}

async fn write_status(
    conn: &mut SqliteConnection,
    status: &ScraperStatus,
    last_scrape_at: Option<DateTime<Utc>>,
) -> Result<(), BackendError> {
    for (key, value) in [
        (META_SCRAPER_STATUS, serde_json::to_string(status)?),
        (META_LAST_SCRAPE, serde_json::to_string(&last_scrape_at)?),
    ] {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
