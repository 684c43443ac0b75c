//! Run checkpoint (`scraping_progress.json`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::BatchError;
use crate::types::{ContentRecord, ErrorKind};

pub const CHECKPOINT_FILE: &str = "scraping_progress.json";

/// Aggregate counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// `already_scraped` plus `duplicate_content`
    pub duplicates: usize,
    pub paywalled: usize,
}

impl RunStats {
    pub fn record(&mut self, record: &ContentRecord) {
        self.total_processed += 1;
        match record.error {
            Some(ErrorKind::AlreadyScraped | ErrorKind::DuplicateContent) => self.duplicates += 1,
            _ if record.success => self.successful += 1,
            _ => self.failed += 1,
        }
        if record.paywall_detected {
            self.paywalled += 1;
        }
    }
}

/// Persisted progress of a batched run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    pub run_id: Uuid,
    /// Batch in progress (or last one worked on)
    pub current_batch: usize,
    pub total_batches: usize,
    pub batch_total_urls: usize,
    pub batch_completed_urls: usize,
    pub last_completed_batch: usize,
    pub stats: RunStats,
    pub last_processed_url: Option<String>,
    pub completion_percentage: f64,
    pub shutdown_clean: bool,
    pub updated_at: DateTime<Utc>,
}

impl BatchCheckpoint {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            current_batch: 0,
            total_batches: 0,
            batch_total_urls: 0,
            batch_completed_urls: 0,
            last_completed_batch: 0,
            stats: RunStats::default(),
            last_processed_url: None,
            completion_percentage: 0.0,
            shutdown_clean: false,
            updated_at: Utc::now(),
        }
    }

    /// Recompute derived fields before saving
    pub fn refresh(&mut self) {
        self.completion_percentage = if self.total_batches == 0 {
            0.0
        } else {
            let in_batch = if self.batch_total_urls > 0 && self.current_batch > self.last_completed_batch {
                self.batch_completed_urls as f64 / self.batch_total_urls as f64
            } else {
                0.0
            };
            ((self.last_completed_batch as f64 + in_batch) / self.total_batches as f64 * 100.0)
                .min(100.0)
        };
        self.updated_at = Utc::now();
    }

    /// Write atomically: temp file in the same directory, then rename
    pub fn save(&mut self, path: &Path) -> Result<(), BatchError> {
        self.refresh();
        let json = serde_json::to_string_pretty(self).map_err(BatchError::json(path))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(BatchError::io(&tmp))?;
        std::fs::rename(&tmp, path).map_err(BatchError::io(path))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let json = std::fs::read_to_string(path).map_err(BatchError::io(path))?;
        serde_json::from_str(&json).map_err(BatchError::json(path))
    }

    /// Load when present; a corrupt checkpoint is logged and ignored
    pub fn load_optional(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::load(path) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                tracing::warn!("Ignoring unreadable checkpoint: {}", e);
                None
            }
        }
    }
}
