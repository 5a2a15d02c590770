//! Configuration infrastructure
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults (`defaults` module)
//! 2. The JSON config file in the user config directory
//! 3. Environment variables prefixed `REFURB_WATCH`, nested with `__`
//!    (e.g. `REFURB_WATCH__ENRICHMENT__WORKERS=4`)

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::derivable_impls)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::crawling::retry::RetryPolicy;

/// Default values shared by config structs and call sites
pub mod defaults {
    pub const APP_DIR_NAME: &str = "refurb-watch";
    pub const CONFIG_FILE_NAME: &str = "refurb_watch_config.json";
    pub const ENV_PREFIX: &str = "REFURB_WATCH";

    pub const CATALOG_BASE_URL: &str = "https://www.apple.com.cn/shop/refurbished";
    pub const REGION: &str = "cn";
    pub const SCRAPE_INTERVAL_SECS: u64 = 300;
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const REQUESTS_PER_SECOND: u32 = 2;
    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)";

    pub const ENRICHMENT_WORKERS: usize = 3;
    pub const ENRICHMENT_QUEUE_CAPACITY: usize = 1000;
    pub const ENRICHMENT_STATS_INTERVAL_SECS: u64 = 30;

    pub const MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 2_000;
    pub const RETRY_MAX_DELAY_MS: u64 = 10_000;
    pub const RETRY_MULTIPLIER: f64 = 2.0;

    pub const NOTIFIER_SERVER_URL: &str = "https://api.day.app";
    pub const NOTIFIER_TIMEOUT_SECS: u64 = 10;

    pub const DATA_DIR: &str = "./data";
    pub const LOG_LEVEL: &str = "info";
    pub const LOG_MAX_FILES: u32 = 7;
    pub const TIMEZONE_OFFSET_HOURS: i32 = 8;
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub enrichment: EnrichmentConfig,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Catalog endpoints and request behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub region: String,
    pub category_pages: Vec<CategoryPage>,
    pub scrape_interval_secs: u64,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub requests_per_second: u32,
    pub fetch_retry: RetryPolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let category_pages = [
            ("Mac", "mac"),
            ("iPad", "ipad"),
            ("Watch", "watch"),
            ("AirPods", "airpods"),
            ("HomePod", "homepod"),
            ("Accessories", "accessories"),
        ]
        .into_iter()
        .map(|(category, path)| CategoryPage {
            category: category.to_string(),
            path: path.to_string(),
        })
        .collect();

        Self {
            base_url: defaults::CATALOG_BASE_URL.to_string(),
            region: defaults::REGION.to_string(),
            category_pages,
            scrape_interval_secs: defaults::SCRAPE_INTERVAL_SECS,
            user_agent: defaults::USER_AGENT.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            requests_per_second: defaults::REQUESTS_PER_SECOND,
            fetch_retry: RetryPolicy::new(defaults::MAX_ATTEMPTS, 1_000, defaults::RETRY_MAX_DELAY_MS, 2.0),
        }
    }
}

/// One catalog listing page; `path` is relative to `CatalogConfig::base_url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPage {
    pub category: String,
    pub path: String,
}

/// Detail enrichment worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// Regions without detail pages
    pub non_enrichable_regions: Vec<String>,
    pub stats_interval_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: defaults::ENRICHMENT_WORKERS,
            queue_capacity: defaults::ENRICHMENT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
            non_enrichable_regions: vec!["hk".to_string()],
            stats_interval_secs: defaults::ENRICHMENT_STATS_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub server_url: String,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: defaults::NOTIFIER_SERVER_URL.to_string(),
            timeout_secs: defaults::NOTIFIER_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageKind,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            data_dir: PathBuf::from(defaults::DATA_DIR),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Directory for log files; defaults to `logs/` next to the executable
    pub log_dir: Option<PathBuf>,

    /// Number of log files to keep (older files are deleted on startup)
    pub max_files: u32,

    pub auto_cleanup_logs: bool,

    /// Fixed UTC offset used for log timestamps
    pub timezone_offset_hours: i32,

    /// Module-specific level filters (e.g. "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            timezone_offset_hours: defaults::TIMEZONE_OFFSET_HOURS,
            module_filters: HashMap::new(),
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);
        Ok(config_dir)
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join(defaults::CONFIG_FILE_NAME);
        Ok(Self { config_path })
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self { config_path: config_path.into() }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write defaults on first run, otherwise load.
    pub async fn initialize_on_first_run(&self) -> Result<AppConfig> {
        if self.config_path.exists() {
            return self.load_config();
        }
        info!("🎉 First run detected - initializing default configuration");
        let config = AppConfig::default();
        self.save_config(&config).await?;
        fs::create_dir_all(&config.storage.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {:?}", config.storage.data_dir))?;
        info!("✅ Initial configuration setup completed");
        Ok(config)
    }

    /// Layer defaults, the config file (if present) and environment overrides.
    pub fn load_config(&self) -> Result<AppConfig> {
        let defaults_json =
            serde_json::to_string(&AppConfig::default()).context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(&defaults_json, config::FileFormat::Json));

        if self.config_path.exists() {
            builder = builder.add_source(
                config::File::from(self.config_path.as_path())
                    .format(config::FileFormat::Json)
                    .required(false),
            );
            info!("Loaded configuration from: {:?}", self.config_path);
        } else {
            warn!("⚠️ Configuration file not found, using defaults: {:?}", self.config_path);
        }

        let layered = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build layered configuration")?;

        layered
            .try_deserialize::<AppConfig>()
            .context("Failed to deserialize configuration")
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;
        info!("💾 Configuration saved to: {:?}", self.config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_consistent() {
        let config = AppConfig::default();
        assert_eq!(config.enrichment.queue_capacity, 1000);
        assert_eq!(config.enrichment.retry.max_attempts, 3);
        assert_eq!(config.catalog.category_pages.len(), 6);
        assert!(config.logging.console_output);
    }

    #[tokio::test]
    async fn save_then_load_keeps_overrides() -> Result<()> {
        let dir = tempdir()?;
        let manager = ConfigManager::with_path(dir.path().join("config.json"));

        let mut config = AppConfig::default();
        config.enrichment.workers = 7;
        config.storage.backend = StorageKind::Sqlite;
        manager.save_config(&config).await?;

        let loaded = manager.load_config()?;
        assert_eq!(loaded.enrichment.workers, 7);
        assert_eq!(loaded.storage.backend, StorageKind::Sqlite);
        Ok(())
    }

    #[tokio::test]
    async fn partial_file_falls_back_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{ "catalog": { "scrape_interval_secs": 60 } }"#).await?;

        let loaded = ConfigManager::with_path(&path).load_config()?;
        assert_eq!(loaded.catalog.scrape_interval_secs, 60);
        assert_eq!(loaded.catalog.region, defaults::REGION);
        assert_eq!(loaded.enrichment.workers, defaults::ENRICHMENT_WORKERS);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_uses_defaults() -> Result<()> {
        let dir = tempdir()?;
        let loaded = ConfigManager::with_path(dir.path().join("absent.json")).load_config()?;
        assert_eq!(loaded, AppConfig::default());
        Ok(())
    }
}
