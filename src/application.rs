//! Application layer
//!
//! `CatalogService` is the query and command surface over the store and the
//! scheduler; `dto` holds its request and response shapes. `recommendation`
//! and `filter_options` are pure functions over product listings.

pub mod catalog_service;
pub mod dto;
pub mod filter_options;
pub mod recommendation;

pub use catalog_service::CatalogService;
pub use dto::{
    CreateSubscriptionDto, CreateWatchDto, FilterOptionsDto, ProductQueryDto, ProductWithHistoryDto, Recommendation,
    RecommendationDto, UpdateSubscriptionDto,
};
pub use recommendation::UseCase;
