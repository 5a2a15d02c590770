//! Identity & upsert store
//!
//! `ProductStore` owns every product, price history, subscription, watch and
//! notification record behind one read/write lock. Durable storage sits
//! behind the `StoreBackend` trait.

pub mod backend;
pub mod product_store;

pub use backend::{BackendError, MemoryBackend, StoreBackend, StoreDelta, StoreSnapshot};
pub use product_store::{NotificationPage, ProductStore, StoreError, UpsertOutcome};
