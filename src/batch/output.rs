//! Batch files, spill files and combining

use regex::Regex;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

use super::BatchError;
use crate::scraping::DuplicateFilter;
use crate::types::ContentRecord;

static BATCH_FILE: OnceLock<Regex> = OnceLock::new();

fn batch_file_regex() -> &'static Regex {
    BATCH_FILE.get_or_init(|| Regex::new(r"^scraped_batch_(\d+)\.csv$").expect("batch file pattern must compile"))
}

/// Naming and I/O for the files of one output directory
#[derive(Debug, Clone)]
pub struct BatchFiles {
    dir: PathBuf,
}

impl BatchFiles {
    /// Use `dir`, creating it when missing
    pub fn create(dir: &Path) -> Result<Self, BatchError> {
        std::fs::create_dir_all(dir).map_err(BatchError::io(dir))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    /// Use an existing directory without creating it
    pub fn open(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn batch_path(&self, batch: usize) -> PathBuf {
        self.dir.join(format!("scraped_batch_{:04}.csv", batch))
    }

    pub fn spill_path(&self, batch: usize) -> PathBuf {
        self.dir.join(format!("scraped_batch_{:04}.partial.jsonl", batch))
    }

    /// Committed batch numbers, ascending
    pub fn completed_batches(&self) -> Result<Vec<usize>, BatchError> {
        let mut batches = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(batches),
            Err(e) => return Err(BatchError::io(&self.dir)(e)),
        };
        for entry in entries {
            let entry = entry.map_err(BatchError::io(&self.dir))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(caps) = batch_file_regex().captures(name) {
                if let Ok(n) = caps[1].parse::<usize>() {
                    batches.push(n);
                }
            }
        }
        batches.sort_unstable();
        Ok(batches)
    }

    /// Highest committed batch, 0 when none
    pub fn last_completed(&self) -> Result<usize, BatchError> {
        let batches = self.completed_batches()?;
        let expected: Vec<usize> = (1..=batches.len()).collect();
        if batches != expected {
            warn!("Batch files in {} are not contiguous: {:?}", self.dir.display(), batches);
        }
        Ok(batches.last().copied().unwrap_or(0))
    }

    /// Write a batch file once; the file appears complete or not at all
    pub fn write_batch(&self, batch: usize, records: &[ContentRecord]) -> Result<PathBuf, BatchError> {
        let path = self.batch_path(batch);
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp).map_err(BatchError::csv(&tmp))?;
            for record in records {
                writer.serialize(record).map_err(BatchError::csv(&tmp))?;
            }
            writer.flush().map_err(BatchError::io(&tmp))?;
        }
        std::fs::rename(&tmp, &path).map_err(BatchError::io(&path))?;
        Ok(path)
    }

    pub fn read_batch(&self, batch: usize) -> Result<Vec<ContentRecord>, BatchError> {
        read_records(&self.batch_path(batch))
    }

    /// Append records to the batch's spill file
    pub fn append_spill(&self, batch: usize, records: &[ContentRecord]) -> Result<(), BatchError> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.spill_path(batch);
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record).map_err(BatchError::json(&path))?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(BatchError::io(&path))?;
        file.write_all(buf.as_bytes()).map_err(BatchError::io(&path))?;
        file.sync_data().map_err(BatchError::io(&path))?;
        Ok(())
    }

    /// Records of a spill file; a torn last line is dropped
    pub fn read_spill(&self, batch: usize) -> Result<Vec<ContentRecord>, BatchError> {
        let path = self.spill_path(batch);
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BatchError::io(&path)(e)),
        };
        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(BatchError::io(&path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ContentRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping bad line {} of {}: {}", n + 1, path.display(), e),
            }
        }
        Ok(records)
    }

    pub fn remove_spill(&self, batch: usize) -> Result<(), BatchError> {
        let path = self.spill_path(batch);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BatchError::io(&path)(e)),
        }
    }

    /// Spill files of batches other than `keep`, left behind by older runs
    pub fn stale_spills(&self, keep: usize) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let keep = self.spill_path(keep);
        entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("scraped_batch_") && n.ends_with(".partial.jsonl"))
            })
            .filter(|p| *p != keep)
            .collect()
    }

    /// Seed the duplicate filter from every committed batch file.
    /// Returns the number of records seen.
    pub fn seed_filter(&self, filter: &DuplicateFilter) -> Result<usize, BatchError> {
        let mut seeded = 0;
        for batch in self.completed_batches()? {
            let records = match self.read_batch(batch) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Cannot read batch {} for duplicate seeding: {}", batch, e);
                    continue;
                }
            };
            for record in &records {
                seed_record(filter, record);
            }
            seeded += records.len();
        }
        Ok(seeded)
    }
}

/// Put a persisted record's URLs and content hash into the filter
pub(crate) fn seed_record(filter: &DuplicateFilter, record: &ContentRecord) {
    let hash = record.content_hash.as_deref().filter(|_| record.success);
    filter.seed(&record.original_url, &record.scrape_url, hash);
}

fn read_records(path: &Path) -> Result<Vec<ContentRecord>, BatchError> {
    let mut reader = csv::Reader::from_path(path).map_err(BatchError::csv(path))?;
    reader
        .deserialize()
        .collect::<Result<Vec<ContentRecord>, _>>()
        .map_err(BatchError::csv(path))
}

/// Totals from `combine_batches`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombineSummary {
    pub batches: usize,
    pub rows: usize,
    pub dropped_duplicates: usize,
    pub successful: usize,
    pub paywalled: usize,
}

/// Concatenate all committed batches in order into one CSV, keeping the first
/// row per `original_url`
pub fn combine_batches(files: &BatchFiles, out: &Path) -> Result<CombineSummary, BatchError> {
    let mut summary = CombineSummary::default();
    let mut emitted: HashSet<String> = HashSet::new();
    let mut writer = csv::Writer::from_path(out).map_err(BatchError::csv(out))?;

    for batch in files.completed_batches()? {
        summary.batches += 1;
        for record in files.read_batch(batch)? {
            if !emitted.insert(record.original_url.clone()) {
                summary.dropped_duplicates += 1;
                continue;
            }
            summary.rows += 1;
            if record.success {
                summary.successful += 1;
            }
            if record.paywall_detected {
                summary.paywalled += 1;
            }
            writer.serialize(&record).map_err(BatchError::csv(out))?;
        }
    }
    writer.flush().map_err(BatchError::io(out))?;

    info!(
        "Combined {} batches into {}: {} rows, {} successful, {} paywalled, {} duplicates dropped",
        summary.batches,
        out.display(),
        summary.rows,
        summary.successful,
        summary.paywalled,
        summary.dropped_duplicates
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, PaywallInfo, PaywallType, UrlResolution};
    use tempfile::TempDir;

    fn record(original: &str, resolved: &str, text: &str) -> ContentRecord {
        let mut r = ContentRecord::from_resolution(&UrlResolution::pre_resolved(original, resolved));
        r.success = true;
        r.text = text.to_string();
        r.word_count = text.split_whitespace().count();
        r.content_hash = Some(crate::types::ContentHash::compute(text).0);
        r.title = Some("A, \"quoted\" title".to_string());
        r.set_paywall(PaywallInfo {
            detected: true,
            paywall_type: PaywallType::Soft,
            confidence: 0.95,
            indicators: vec!["known_domain: cnn.com".to_string(), "subscription: subscribe".to_string()],
            snippet: None,
        });
        r
    }

    #[test]
    fn test_batch_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let files = BatchFiles::create(dir.path()).unwrap();
        let mut failed = ContentRecord::skipped("http://dead.example/", ErrorKind::Timeout);
        failed.scrape_url = "http://dead.example/".to_string();
        let records = vec![
            record("http://t.co/a", "https://a.example/story", "line one\nline two, with comma"),
            failed,
        ];

        let path = files.write_batch(1, &records).unwrap();
        assert!(path.ends_with("scraped_batch_0001.csv"));
        assert!(!dir.path().join("scraped_batch_0001.csv.tmp").exists());

        let back = files.read_batch(1).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].text, records[0].text);
        assert_eq!(back[0].paywall_indicators, records[0].paywall_indicators);
        assert_eq!(back[0].title, records[0].title);
        assert_eq!(back[0].paywall_type, PaywallType::Soft);
        assert_eq!(back[1].error, Some(ErrorKind::Timeout));
        assert_eq!(back[1].status_code, None);
    }

    #[test]
    fn test_batch_header_columns() {
        let dir = TempDir::new().unwrap();
        let files = BatchFiles::create(dir.path()).unwrap();
        files
            .write_batch(1, &[record("http://t.co/a", "https://a.example/", "text")])
            .unwrap();
        let content = std::fs::read_to_string(files.batch_path(1)).unwrap();
        let header = content.lines().next().unwrap();
        assert!(header.starts_with("original_url,scrape_url,resolved_url_normalized,domain,"));
        assert!(header.ends_with("content_improved,response_time,scraped_at"));
    }

    #[test]
    fn test_completed_batches_scan() {
        let dir = TempDir::new().unwrap();
        let files = BatchFiles::create(dir.path()).unwrap();
        assert_eq!(files.last_completed().unwrap(), 0);
        for n in [2, 1, 3] {
            files.write_batch(n, &[]).unwrap();
        }
        std::fs::write(dir.path().join("scraped_batch_0004.partial.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("notes.csv"), "").unwrap();
        assert_eq!(files.completed_batches().unwrap(), vec![1, 2, 3]);
        assert_eq!(files.last_completed().unwrap(), 3);
    }

    #[test]
    fn test_spill_append_and_torn_line() {
        let dir = TempDir::new().unwrap();
        let files = BatchFiles::create(dir.path()).unwrap();
        files
            .append_spill(2, &[record("http://t.co/a", "https://a.example/", "one")])
            .unwrap();
        files
            .append_spill(2, &[record("http://t.co/b", "https://b.example/", "two")])
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(files.spill_path(2)).unwrap();
        file.write_all(b"{\"original_url\": \"http://t.co/c\"").unwrap();

        let records = files.read_spill(2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].original_url, "http://t.co/b");
        assert_eq!(files.stale_spills(3), vec![files.spill_path(2)]);
        assert!(files.stale_spills(2).is_empty());

        files.remove_spill(2).unwrap();
        files.remove_spill(2).unwrap();
        assert!(files.read_spill(2).unwrap().is_empty());
    }

    #[test]
    fn test_seed_filter_and_combine() {
        let dir = TempDir::new().unwrap();
        let files = BatchFiles::create(dir.path()).unwrap();
        files
            .write_batch(1, &[record("http://t.co/a", "https://a.example/story", "alpha")])
            .unwrap();
        files
            .write_batch(
                2,
                &[
                    record("http://t.co/b", "https://b.example/story", "beta"),
                    record("http://t.co/a", "https://a.example/story", "alpha"),
                ],
            )
            .unwrap();

        let filter = DuplicateFilter::in_memory();
        assert_eq!(files.seed_filter(&filter).unwrap(), 3);
        assert!(filter.seen("http://t.co/a?utm_source=x", None));
        assert!(filter.seen("http://unknown.example/", Some("https://b.example/story/")));
        assert!(filter.has_content(&crate::types::ContentHash::compute("beta").0));

        let out = dir.path().join("combined.csv");
        let summary = combine_batches(&files, &out).unwrap();
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.dropped_duplicates, 1);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.paywalled, 2);
        let mut reader = csv::Reader::from_path(&out).unwrap();
        assert_eq!(reader.records().count(), 2);
    }
}
