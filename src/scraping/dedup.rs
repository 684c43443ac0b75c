//! Duplicate filtering for URLs and content
//!
//! Three membership layers, checked in order:
//! - Layer 1: raw original/resolved URLs
//! - Layer 2: normalized URLs
//! - Layer 3: content hashes of successfully scraped text
//!
//! Layers 1 and 2 are seeded from the seen-URL tracker and prior batch files.
//! Workers `claim` URLs in memory only. `mark` is called once a record has
//! landed and queues tracker lines, which `flush_pending` appends to disk after
//! the records they describe have been persisted.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::normalize_url;

#[derive(Default)]
struct Layers {
    raw: HashSet<String>,
    normalized: HashSet<String>,
    content: HashSet<String>,
    /// URLs already in the tracker file or queued for it
    tracked: HashSet<String>,
    pending: Vec<String>,
}

impl Layers {
    fn contains_url(&self, url: &str) -> bool {
        self.raw.contains(url) || self.normalized.contains(&normalize_url(url))
    }

    fn insert_url(&mut self, url: &str) {
        if url.is_empty() {
            return;
        }
        self.raw.insert(url.to_string());
        self.normalized.insert(normalize_url(url));
    }
}

/// Counts per layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterSizes {
    pub raw: usize,
    pub normalized: usize,
    pub content: usize,
}

/// Single authority for "has this already been processed"
pub struct DuplicateFilter {
    layers: Mutex<Layers>,
    tracker: Option<PathBuf>,
}

impl DuplicateFilter {
    /// Filter with no persisted tracker
    pub fn in_memory() -> Self {
        Self {
            layers: Mutex::new(Layers::default()),
            tracker: None,
        }
    }

    /// Load the seen-URL tracker; a missing or unreadable file is a cold start
    pub fn load(tracker: &Path) -> Self {
        let mut layers = Layers::default();
        match std::fs::File::open(tracker) {
            Ok(file) => {
                let mut loaded = 0usize;
                for line in BufReader::new(file).lines() {
                    match line {
                        Ok(line) => {
                            let url = line.trim();
                            if !url.is_empty() {
                                layers.insert_url(url);
                                layers.tracked.insert(url.to_string());
                                loaded += 1;
                            }
                        }
                        Err(e) => {
                            warn!(
                                "Stopped reading tracker {} after {} lines: {}",
                                tracker.display(),
                                loaded,
                                e
                            );
                            break;
                        }
                    }
                }
                info!("Loaded {} tracked URLs from {}", loaded, tracker.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No tracker at {}, starting fresh", tracker.display());
            }
            Err(e) => {
                warn!(
                    "Tracker {} is unreadable ({}), starting fresh",
                    tracker.display(),
                    e
                );
            }
        }
        Self {
            layers: Mutex::new(layers),
            tracker: Some(tracker.to_path_buf()),
        }
    }

    /// Seed layers from a record of an earlier run
    pub fn seed(&self, original: &str, resolved: &str, content_hash: Option<&str>) {
        let mut layers = self.layers.lock();
        layers.insert_url(original);
        layers.insert_url(resolved);
        if let Some(hash) = content_hash.filter(|h| !h.is_empty()) {
            layers.content.insert(hash.to_string());
        }
    }

    /// Whether either URL is already known by raw or normalized form
    pub fn seen(&self, original: &str, resolved: Option<&str>) -> bool {
        let layers = self.layers.lock();
        layers.contains_url(original) || resolved.is_some_and(|r| layers.contains_url(r))
    }

    /// Record both URLs as processed and queue them for the tracker
    pub fn mark(&self, original: &str, resolved: Option<&str>) {
        let mut layers = self.layers.lock();
        for url in std::iter::once(original).chain(resolved) {
            if url.is_empty() {
                continue;
            }
            layers.insert_url(url);
            if layers.tracked.insert(url.to_string()) {
                layers.pending.push(url.to_string());
            }
        }
    }

    /// Atomically check and insert in memory; `false` when either URL was
    /// already known
    pub fn claim(&self, original: &str, resolved: Option<&str>) -> bool {
        let mut layers = self.layers.lock();
        if layers.contains_url(original) || resolved.is_some_and(|r| layers.contains_url(r)) {
            return false;
        }
        layers.insert_url(original);
        if let Some(resolved) = resolved {
            layers.insert_url(resolved);
        }
        true
    }

    /// Resolved-side claim for a URL whose original was claimed earlier
    pub fn claim_resolved(&self, original: &str, resolved: &str) -> bool {
        let mut layers = self.layers.lock();
        if normalize_url(resolved) != normalize_url(original) && layers.contains_url(resolved) {
            return false;
        }
        layers.insert_url(resolved);
        true
    }

    /// Layer 3: `true` if the hash was new and is now claimed
    pub fn claim_content(&self, hash: &str) -> bool {
        self.layers.lock().content.insert(hash.to_string())
    }

    pub fn has_content(&self, hash: &str) -> bool {
        self.layers.lock().content.contains(hash)
    }

    /// Append queued tracker lines to disk, returning how many were written
    pub fn flush_pending(&self) -> std::io::Result<usize> {
        let pending = std::mem::take(&mut self.layers.lock().pending);
        let Some(tracker) = &self.tracker else {
            return Ok(0);
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let write = || -> std::io::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(tracker)?;
            let mut buf = String::with_capacity(pending.iter().map(|p| p.len() + 1).sum());
            for url in &pending {
                buf.push_str(url);
                buf.push('\n');
            }
            file.write_all(buf.as_bytes())?;
            file.flush()
        };

        match write() {
            Ok(()) => Ok(pending.len()),
            Err(e) => {
                // keep the lines for the next attempt
                let mut layers = self.layers.lock();
                let mut restored = pending;
                restored.append(&mut layers.pending);
                layers.pending = restored;
                Err(e)
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.layers.lock().pending.len()
    }

    pub fn sizes(&self) -> FilterSizes {
        let layers = self.layers.lock();
        FilterSizes {
            raw: layers.raw.len(),
            normalized: layers.normalized.len(),
            content: layers.content.len(),
        }
    }
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::in_memory()
    }
}
