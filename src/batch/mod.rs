//! Batch checkpoint manager
//!
//! Splits the candidate list into fixed-size batches, drives the worker pool
//! over each batch, and commits one immutable CSV file per batch. Progress
//! between commits is kept crash-safe by a JSONL spill file, the seen-URL
//! tracker and an atomically rewritten checkpoint.
//!
//! Layout of an output directory:
//! - `scraped_batch_NNNN.csv`: committed batches, 1-based and contiguous
//! - `scraped_batch_NNNN.partial.jsonl`: records of the batch in progress
//! - `scraping_progress.json`: the checkpoint
//! - `processed_urls.txt`: seen-URL tracker (location configurable)
//! - `url_cache.db`: resolution cache (location configurable)

pub mod checkpoint;
pub mod coordinator;
pub mod output;
pub mod progress;
pub mod source;

pub use checkpoint::{BatchCheckpoint, RunStats, CHECKPOINT_FILE};
pub use coordinator::{BatchCoordinator, RunSummary};
pub use output::{combine_batches, BatchFiles, CombineSummary};
pub use progress::BatchProgress;
pub use source::{load_input, InputError, LoadedInput};

use std::path::PathBuf;
use thiserror::Error;

use crate::scraping::cache::CacheError;

/// Resource-level failures that stop a run
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Input error: {0}")]
    Input(#[from] InputError),
    #[error("Failed to build HTTP clients: {0}")]
    Http(#[from] reqwest::Error),
}

impl BatchError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>) -> impl FnOnce(csv::Error) -> Self {
        let path = path.into();
        move |source| Self::Csv { path, source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>) -> impl FnOnce(serde_json::Error) -> Self {
        let path = path.into();
        move |source| Self::Json { path, source }
    }
}
