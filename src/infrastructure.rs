//! Infrastructure: configuration, logging, persistence backends, HTTP and
//! the catalog-specific parsers and notifier

pub mod bark_notifier;
pub mod catalog_parser;
pub mod config;
pub mod detail_parser;
pub mod http_client;
pub mod json_backend;
pub mod logging;
pub mod specs_parser;
pub mod sqlite_backend;

pub use bark_notifier::BarkNotifier;
pub use catalog_parser::BootstrapCatalogParser;
pub use config::{AppConfig, ConfigManager, StorageKind};
pub use detail_parser::{HtmlDetailFetcher, parse_detail_page};
pub use http_client::{HttpClient, HttpClientConfig};
pub use json_backend::JsonFileBackend;
pub use logging::{get_log_directory, init_logging, init_logging_with_config, log_system_info};
pub use specs_parser::parse_title_specs;
pub use sqlite_backend::SqliteBackend;
