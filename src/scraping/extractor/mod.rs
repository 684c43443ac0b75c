//! Content extraction from HTML
//!
//! An ordered chain of strategies, each tried until one yields at least
//! `min_text_length` characters:
//! - readability: main-content scoring
//! - boilerplate: content containers, paragraph text only
//! - raw text: whole body minus navigation and scripts
//!
//! Metadata (title, author, date, description, language) is read from the
//! same parsed document regardless of which strategy produced the text.

mod metadata;
mod text;
mod types;

pub use types::*;

use scraper::{Html, Selector};
use std::collections::HashMap;
use url::Url;

use crate::types::{word_count, ExtractionMethod};

/// One way of turning a page into article text
pub trait ExtractionStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// Extracted text, or `None` when the strategy found nothing
    fn extract(&self, html: &str, document: &Html, url: &Url) -> Option<String>;
}

/// Content extractor
pub struct ContentExtractor {
    pub(crate) config: ExtractorConfig,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    /// Pre-compiled meta selectors: maps meta name to (name selector, property selector)
    pub(crate) meta_selectors: HashMap<String, (Option<Selector>, Option<Selector>)>,
}

impl ContentExtractor {
    /// Create an extractor with the default strategy chain
    pub fn new(config: ExtractorConfig) -> Self {
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(text::ReadabilityStrategy),
            Box::new(text::BoilerplateStrategy::new()),
            Box::new(text::RawTextStrategy::new()),
        ];
        Self::with_strategies(config, strategies)
    }

    /// Create an extractor with a custom strategy chain
    pub fn with_strategies(
        config: ExtractorConfig,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
    ) -> Self {
        let meta_names = [
            "og:title",
            "og:description",
            "og:locale",
            "twitter:title",
            "twitter:description",
            "title",
            "description",
            "author",
            "article:author",
            "date",
            "language",
            "article:published_time",
        ];

        let mut meta_selectors = HashMap::with_capacity(meta_names.len());
        for name in &meta_names {
            let name_sel = Selector::parse(&format!("meta[name='{}']", name)).ok();
            let prop_sel = Selector::parse(&format!("meta[property='{}']", name)).ok();
            meta_selectors.insert(name.to_string(), (name_sel, prop_sel));
        }

        Self {
            config,
            strategies,
            meta_selectors,
        }
    }

    /// Run the strategy chain over a page.
    ///
    /// Never fails: when no strategy produces enough text the result carries
    /// `ExtractionMethod::Failed` and empty text, but metadata is still filled.
    pub fn extract(&self, html: &str, url: &Url) -> ExtractedContent {
        let document = Html::parse_document(html);
        let metadata = self.extract_metadata(&document);

        for strategy in &self.strategies {
            let Some(text) = strategy.extract(html, &document, url) else {
                tracing::trace!("{} produced nothing for {}", strategy.method(), url);
                continue;
            };
            if text.chars().count() >= self.config.min_text_length {
                return ExtractedContent {
                    word_count: word_count(&text),
                    text,
                    method: strategy.method(),
                    metadata,
                };
            }
            tracing::trace!(
                "{} output too short for {} ({} chars)",
                strategy.method(),
                url,
                text.chars().count()
            );
        }

        ExtractedContent {
            text: String::new(),
            method: ExtractionMethod::Failed,
            word_count: 0,
            metadata,
        }
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}
