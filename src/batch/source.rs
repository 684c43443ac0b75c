//! Candidate URL input
//!
//! A CSV file with at least an `original_url` column. Optional columns:
//! `resolution_success` + `resolved_url` from an earlier resolution stage, and
//! `old_word_count` / `previous_word_count` from an earlier scrape.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::scraping::UrlTask;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read input {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },
    #[error("input {0} has no `original_url` column")]
    MissingColumn(PathBuf),
}

/// Parsed input file
#[derive(Debug, Default)]
pub struct LoadedInput {
    pub tasks: Vec<UrlTask>,
    /// Rows dropped because an earlier stage failed to resolve them
    pub failed_resolutions: usize,
    /// Rows with an empty `original_url`
    pub empty_rows: usize,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Load candidate URLs from a CSV file
pub fn load_input(path: &Path) -> Result<LoadedInput, InputError> {
    let read_err = |source| InputError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(read_err)?;

    let headers = reader.headers().map_err(read_err)?.clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let original_col = column("original_url").ok_or_else(|| InputError::MissingColumn(path.to_path_buf()))?;
    let success_col = column("resolution_success");
    let resolved_col = column("resolved_url");
    let words_col = column("old_word_count").or_else(|| column("previous_word_count"));

    let mut input = LoadedInput::default();
    for row in reader.records() {
        let row = row.map_err(read_err)?;
        let original = row.get(original_col).unwrap_or_default();
        if original.is_empty() {
            input.empty_rows += 1;
            continue;
        }

        let resolved = resolved_col
            .and_then(|c| row.get(c))
            .filter(|r| !r.is_empty());
        let pre_resolved = match success_col.and_then(|c| row.get(c)).and_then(parse_flag) {
            Some(false) => {
                input.failed_resolutions += 1;
                continue;
            }
            Some(true) => resolved.map(str::to_string),
            None => None,
        };
        let old_word_count = words_col
            .and_then(|c| row.get(c))
            .and_then(|w| w.parse::<f64>().ok())
            .filter(|w| *w >= 0.0)
            .map(|w| w as usize);

        input.tasks.push(UrlTask {
            original_url: original.to_string(),
            pre_resolved,
            old_word_count,
        });
    }

    if input.failed_resolutions > 0 {
        info!(
            "Skipped {} rows whose earlier resolution failed",
            input.failed_resolutions
        );
    }
    info!("Loaded {} candidate URLs from {}", input.tasks.len(), path.display());
    Ok(input)
}
