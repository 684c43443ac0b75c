//! linkharvest: resilient URL resolution and content scraping
//!
//! Turns a list of candidate URLs (often shortened or tracking links) into
//! article records:
//! - Redirect resolution (HTTP and meta refresh) backed by a SQLite cache
//! - Concurrent fetching with an extractor chain and paywall heuristics
//! - Duplicate suppression on raw URLs, normalized URLs and content hashes
//! - Fixed-size batches with crash-safe checkpoints and resume

pub mod batch;
pub mod config;
pub mod scraping;
pub mod types;
pub mod util;

pub use config::Config;
pub use types::*;
