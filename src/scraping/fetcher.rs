//! Content fetching
//!
//! GETs the resolved URL, hands the HTML to the extractor chain on the
//! blocking pool, and fills a `ContentRecord`. Pages whose text hash was
//! already claimed are kept as `duplicate_content` records without text.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::extractor::{ContentExtractor, ExtractorConfig};
use super::trust::{content_type, is_html, read_body_capped, HttpClients};
use super::DuplicateFilter;
use crate::config::{NetworkConfig, PipelineConfig};
use crate::types::{ContentHash, ContentRecord, ErrorKind, UrlResolution};

/// Record plus the HTML it came from, for the paywall detector
#[derive(Debug)]
pub struct FetchOutcome {
    pub record: ContentRecord,
    /// Set whenever an HTML body was read, even if extraction failed
    pub html: Option<String>,
}

/// Fetch-and-extract stage
pub struct FetchEngine {
    extractor: Arc<ContentExtractor>,
    timeout: Duration,
    max_body_bytes: usize,
}

impl FetchEngine {
    pub fn new(network: &NetworkConfig, pipeline: &PipelineConfig) -> Self {
        let extractor = ContentExtractor::new(ExtractorConfig {
            min_text_length: pipeline.min_text_length,
        });
        Self::with_extractor(Arc::new(extractor), network)
    }

    pub fn with_extractor(extractor: Arc<ContentExtractor>, network: &NetworkConfig) -> Self {
        Self {
            extractor,
            timeout: network.fetch_timeout(),
            max_body_bytes: network.max_body_bytes,
        }
    }

    /// Fetch the resolved URL and extract its content.
    ///
    /// Never fails: every problem is recorded in the returned record's `error`.
    pub async fn fetch_and_extract(
        &self,
        clients: &HttpClients,
        resolution: &UrlResolution,
        filter: &DuplicateFilter,
    ) -> FetchOutcome {
        let start = Instant::now();
        let mut record = ContentRecord::from_resolution(resolution);
        let html = self.fetch_into(clients, &mut record, filter).await;
        record.response_time = resolution.response_time + start.elapsed().as_secs_f64();
        if let Some(error) = record.error {
            debug!("Scrape of {} failed: {}", record.scrape_url, error);
        }
        FetchOutcome { record, html }
    }

    async fn fetch_into(
        &self,
        clients: &HttpClients,
        record: &mut ContentRecord,
        filter: &DuplicateFilter,
    ) -> Option<String> {
        let outcome = clients.get(&record.scrape_url, self.timeout).await;
        let response = match outcome.result {
            Ok(response) => response,
            Err(kind) => {
                record.fail(kind);
                return None;
            }
        };

        let status = response.status().as_u16();
        record.status_code = Some(status);
        if status != 200 {
            record.fail(ErrorKind::Http(status));
            return None;
        }
        if !is_html(&content_type(&response)) {
            record.fail(ErrorKind::NotHtmlContent);
            return None;
        }

        let final_url = response.url().clone();
        let html = match read_body_capped(response, self.max_body_bytes).await {
            Ok(html) => html,
            Err(kind) => {
                record.fail(kind);
                return None;
            }
        };

        let extracted = {
            let extractor = self.extractor.clone();
            let body = html.clone();
            tokio::task::spawn_blocking(move || extractor.extract(&body, &final_url)).await
        };
        let content = match extracted {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Extraction task for {} failed: {}", record.scrape_url, e);
                record.fail(ErrorKind::Unexpected);
                return Some(html);
            }
        };

        let metadata = content.metadata;
        record.title = metadata.title;
        record.author = metadata.author;
        record.publish_date = metadata.publish_date;
        record.description = metadata.description;
        record.language = metadata.language;
        record.extraction_method = Some(content.method);

        if content.text.is_empty() {
            record.fail(ErrorKind::NoContentExtracted);
            return Some(html);
        }

        let hash = ContentHash::compute(&content.text);
        let claimed = filter.claim_content(hash.as_str());
        record.content_hash = Some(hash.into());
        if !claimed {
            record.fail(ErrorKind::DuplicateContent);
            return Some(html);
        }

        record.text = content.text;
        record.word_count = content.word_count;
        record.success = true;
        record.error = None;
        Some(html)
    }
}
