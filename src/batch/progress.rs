//! Terminal progress for batched runs

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use super::RunStats;
use crate::util::truncate_str;

/// Progress bar over all URLs of a run (hidden in quiet mode)
pub struct BatchProgress {
    progress_bar: Option<ProgressBar>,
    start_time: Instant,
}

impl BatchProgress {
    pub fn new(total_urls: u64, quiet: bool) -> Self {
        let progress_bar = if !quiet {
            let pb = ProgressBar::new(total_urls);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        Self {
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// Advance by one record
    pub fn record_done(&self, batch: usize, url: &str, stats: &RunStats) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(1);
            pb.set_message(format!(
                "batch {} | {:.1} urls/s | ok {} | failed {} | dup {} | paywall {} | {}",
                batch,
                self.rate(stats.total_processed),
                stats.successful,
                stats.failed,
                stats.duplicates,
                stats.paywalled,
                truncate_str(url, 40)
            ));
        }
    }

    /// Show a status line without advancing
    pub fn note(&self, message: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.set_message(message.to_string());
        }
    }

    pub fn rate(&self, processed: usize) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            processed as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn finish(&self, stats: &RunStats) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_with_message(format!(
                "Done! {} ok, {} failed, {} duplicates, {} paywalled",
                stats.successful, stats.failed, stats.duplicates, stats.paywalled
            ));
        }
    }

    pub fn abandon(&self, message: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.abandon_with_message(message.to_string());
        }
    }
}
