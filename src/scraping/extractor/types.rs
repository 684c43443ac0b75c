//! Content extraction types

use crate::types::ExtractionMethod;

/// Configuration for content extraction
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Minimum text length in characters for an extractor's output to count
    pub min_text_length: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_text_length: 100,
        }
    }
}

/// Page-level metadata read from the DOM
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    /// RFC 3339 when the page's date could be parsed, raw text otherwise
    pub publish_date: Option<String>,
    pub language: Option<String>,
}

/// Output of the extractor chain
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// Main text, empty when `method` is `Failed`
    pub text: String,
    pub method: ExtractionMethod,
    pub word_count: usize,
    pub metadata: PageMetadata,
}

impl ExtractedContent {
    pub fn is_empty(&self) -> bool {
        self.method == ExtractionMethod::Failed
    }
}
