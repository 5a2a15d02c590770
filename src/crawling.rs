//! Catalog ingestion
//!
//! - `extractor`: fetch category pages and turn them into candidate records
//! - `enrichment`: bounded worker pool that fills in detail-page data
//! - `retry`: shared exponential backoff policy
//! - `scheduler`: periodic and manual ingestion cycles

pub mod enrichment;
pub mod extractor;
pub mod retry;
pub mod scheduler;

pub use enrichment::{DetailFetcher, DetailPipeline, DetailStats, EnrichmentError, ProductDetail};
pub use extractor::{
    CandidateParser, CatalogEndpoint, CatalogSource, ExtractionError, ExtractionReport, Extractor, ParseContext,
};
pub use retry::{RetryOutcome, RetryPolicy};
pub use scheduler::{CycleReport, IngestionError, IngestionScheduler};
