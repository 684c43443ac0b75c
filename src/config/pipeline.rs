//! Pipeline, batching and re-scrape configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input, output and batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input CSV with at least an `original_url` column
    pub input: Option<PathBuf>,
    /// Directory receiving batch files, checkpoint, tracker and cache
    pub output_dir: PathBuf,
    /// URLs per batch
    pub batch_size: usize,
    /// Concurrent worker tasks
    pub workers: usize,
    /// Delay each worker waits between successive requests (milliseconds)
    pub request_delay_ms: u64,
    /// Start from this batch number (1-based) instead of the detected resume point
    pub resume_from_batch: Option<usize>,
    /// Stop after this many batches
    pub max_batches: Option<usize>,
    /// Persist progress every N completed URLs inside a batch
    pub checkpoint_interval: usize,
    /// Ignore cached resolutions and resolve again
    pub force_refresh: bool,
    /// Re-resolve URLs whose cached resolution failed
    pub retry_failed_resolutions: bool,
    /// Minimum extracted text length (characters) accepted from an extractor
    pub min_text_length: usize,
    /// Policy deciding whether a re-scrape improved on a prior word count
    pub improvement: ImprovementPolicy,
    /// Override for the resolution cache database
    pub cache_file: Option<PathBuf>,
    /// Override for the seen-URL tracker file
    pub tracker_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: None,
            output_dir: PathBuf::from("scraped_content"),
            batch_size: 500,
            workers: 20,
            request_delay_ms: 100,
            resume_from_batch: None,
            max_batches: None,
            checkpoint_interval: 50,
            force_refresh: false,
            retry_failed_resolutions: true,
            min_text_length: 100,
            improvement: ImprovementPolicy::default(),
            cache_file: None,
            tracker_file: None,
        }
    }
}

/// How a new word count is compared against a previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImprovementMode {
    /// new > old * min_ratio
    Ratio,
    /// new > old + min_increase
    Absolute,
    /// Both thresholds must be exceeded
    Both,
    /// Either threshold is enough
    Either,
}

/// Tunable rule for "content improved" after a re-scrape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImprovementPolicy {
    pub mode: ImprovementMode,
    pub min_ratio: f64,
    pub min_increase: usize,
}

impl Default for ImprovementPolicy {
    fn default() -> Self {
        Self {
            mode: ImprovementMode::Both,
            min_ratio: 1.2,
            min_increase: 100,
        }
    }
}

impl ImprovementPolicy {
    /// Whether `new` words is an improvement over `old` words
    pub fn is_improved(&self, old: usize, new: usize) -> bool {
        let by_ratio = new as f64 > old as f64 * self.min_ratio;
        let by_increase = new > old + self.min_increase;
        match self.mode {
            ImprovementMode::Ratio => by_ratio,
            ImprovementMode::Absolute => by_increase,
            ImprovementMode::Both => by_ratio && by_increase,
            ImprovementMode::Either => by_ratio || by_increase,
        }
    }
}
