//! refurb-watch - refurbished catalog harvester
//!
//! Periodically extracts the refurbished catalog, keeps one canonical record
//! per product with a bounded price history, enriches records from their
//! detail pages in the background, and alerts subscribers about new arrivals
//! and price moves.

pub mod application;
pub mod crawling;
pub mod domain;
pub mod infrastructure;
pub mod notify;
pub mod store;
