//! Core types for the resolution and scraping pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Error taxonomy
// ============================================================================

/// Per-URL failure classification recorded in the `error` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ErrorKind {
    Timeout,
    ConnectionError,
    SslError,
    /// Non-2xx final status
    Http(u16),
    NotHtmlContent,
    NoContentExtracted,
    DuplicateContent,
    AlreadyScraped,
    Unexpected,
}

impl ErrorKind {
    /// Errors caused by the network path rather than the remote site
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::ConnectionError => f.write_str("connection_error"),
            Self::SslError => f.write_str("ssl_error"),
            Self::Http(status) => write!(f, "http_{}", status),
            Self::NotHtmlContent => f.write_str("not_html_content"),
            Self::NoContentExtracted => f.write_str("no_content_extracted"),
            Self::DuplicateContent => f.write_str("duplicate_content"),
            Self::AlreadyScraped => f.write_str("already_scraped"),
            Self::Unexpected => f.write_str("unexpected"),
        }
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "connection_error" => Ok(Self::ConnectionError),
            "ssl_error" => Ok(Self::SslError),
            "not_html_content" => Ok(Self::NotHtmlContent),
            "no_content_extracted" => Ok(Self::NoContentExtracted),
            "duplicate_content" => Ok(Self::DuplicateContent),
            "already_scraped" => Ok(Self::AlreadyScraped),
            "unexpected" => Ok(Self::Unexpected),
            other => other
                .strip_prefix("http_")
                .and_then(|code| code.parse::<u16>().ok())
                .map(Self::Http)
                .ok_or_else(|| format!("unknown error kind: {}", other)),
        }
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for ErrorKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Paywall and extraction enums
// ============================================================================

/// Paywall severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaywallType {
    Hard,
    Soft,
    Generic,
    #[default]
    None,
}

impl fmt::Display for PaywallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hard => "hard",
            Self::Soft => "soft",
            Self::Generic => "generic",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Which extractor produced the record's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Readability,
    Boilerplate,
    RawText,
    /// Every extractor ran and none produced usable text
    Failed,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Readability => "readability",
            Self::Boilerplate => "boilerplate",
            Self::RawText => "raw_text",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of the paywall heuristic
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaywallInfo {
    pub detected: bool,
    pub paywall_type: PaywallType,
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub snippet: Option<String>,
}

// ============================================================================
// Content identity
// ============================================================================

/// Exact content hash using SHA256 (64-character hex string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Hash of lower-cased, whitespace-collapsed text
    pub fn compute(text: &str) -> Self {
        let normalized = Self::normalize_text(text);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        ContentHash(hex::encode(hasher.finalize()))
    }

    fn normalize_text(text: &str) -> String {
        let lower = text.to_lowercase();
        let mut result = String::with_capacity(lower.len());
        for (i, word) in lower.split_whitespace().enumerate() {
            if i > 0 {
                result.push(' ');
            }
            result.push_str(word);
        }
        result
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Whitespace-token count
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ============================================================================
// URL resolution
// ============================================================================

/// Outcome of following a URL's redirect chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlResolution {
    pub original_url: String,
    /// Final URL reached (last URL attempted on failure)
    pub resolved_url: String,
    pub normalized_url: String,
    pub domain: String,
    pub status_code: Option<u16>,
    pub redirect_count: usize,
    /// A final HTTP response was obtained
    pub success: bool,
    /// Destination differs from the requested input URL
    pub resolution_worked: bool,
    /// Hop budget ran out before the chain ended
    pub truncated: bool,
    /// Certificate verification was disabled for this result
    pub relaxed_tls: bool,
    pub error: Option<ErrorKind>,
    /// Seconds spent resolving
    pub response_time: f64,
    pub cached_at: DateTime<Utc>,
}

impl UrlResolution {
    /// Resolution carried over from an earlier pipeline stage
    pub fn pre_resolved(original_url: &str, resolved_url: &str) -> Self {
        let normalized_url = crate::scraping::normalize_url(resolved_url);
        Self {
            original_url: original_url.to_string(),
            resolved_url: resolved_url.to_string(),
            domain: crate::scraping::domain_of(resolved_url),
            normalized_url,
            status_code: None,
            redirect_count: 0,
            success: true,
            resolution_worked: crate::scraping::resolver::destination_changed(original_url, resolved_url),
            truncated: false,
            relaxed_tls: false,
            error: None,
            response_time: 0.0,
            cached_at: Utc::now(),
        }
    }

    /// Resolution that never reached a final response
    pub fn failed(original_url: &str, last_url: &str, error: ErrorKind) -> Self {
        Self {
            original_url: original_url.to_string(),
            resolved_url: last_url.to_string(),
            normalized_url: crate::scraping::normalize_url(last_url),
            domain: crate::scraping::domain_of(last_url),
            status_code: None,
            redirect_count: 0,
            success: false,
            resolution_worked: crate::scraping::resolver::destination_changed(original_url, last_url),
            truncated: false,
            relaxed_tls: false,
            error: Some(error),
            response_time: 0.0,
            cached_at: Utc::now(),
        }
    }
}

// ============================================================================
// Content records
// ============================================================================

/// One row of a batch output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub original_url: String,
    pub scrape_url: String,
    pub resolved_url_normalized: String,
    pub domain: String,
    pub redirect_count: usize,
    pub resolution_worked: bool,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<ErrorKind>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub text: String,
    pub word_count: usize,
    pub content_hash: Option<String>,
    pub extraction_method: Option<ExtractionMethod>,
    pub paywall_detected: bool,
    pub paywall_type: PaywallType,
    pub paywall_confidence: f64,
    #[serde(with = "indicator_list")]
    pub paywall_indicators: Vec<String>,
    pub paywall_snippet: Option<String>,
    pub content_improved: Option<bool>,
    /// Seconds spent resolving and fetching
    pub response_time: f64,
    pub scraped_at: DateTime<Utc>,
}

impl ContentRecord {
    /// Empty record for a URL that has been resolved (or failed to resolve)
    pub fn from_resolution(resolution: &UrlResolution) -> Self {
        Self {
            original_url: resolution.original_url.clone(),
            scrape_url: resolution.resolved_url.clone(),
            resolved_url_normalized: resolution.normalized_url.clone(),
            domain: resolution.domain.clone(),
            redirect_count: resolution.redirect_count,
            resolution_worked: resolution.resolution_worked,
            status_code: resolution.status_code,
            success: false,
            error: resolution.error,
            title: None,
            author: None,
            publish_date: None,
            description: None,
            language: None,
            text: String::new(),
            word_count: 0,
            content_hash: None,
            extraction_method: None,
            paywall_detected: false,
            paywall_type: PaywallType::None,
            paywall_confidence: 0.0,
            paywall_indicators: Vec::new(),
            paywall_snippet: None,
            content_improved: None,
            response_time: resolution.response_time,
            scraped_at: Utc::now(),
        }
    }

    /// Record for a URL skipped before any network work
    pub fn skipped(original_url: &str, error: ErrorKind) -> Self {
        let mut record = Self::from_resolution(&UrlResolution::failed(original_url, original_url, error));
        record.resolution_worked = false;
        record
    }

    /// Mark the record failed, dropping any extracted text
    pub fn fail(&mut self, error: ErrorKind) {
        self.success = false;
        self.error = Some(error);
        self.text.clear();
        self.word_count = 0;
    }

    pub fn set_paywall(&mut self, info: PaywallInfo) {
        self.paywall_detected = info.detected;
        self.paywall_type = info.paywall_type;
        self.paywall_confidence = info.confidence;
        self.paywall_indicators = info.indicators;
        self.paywall_snippet = info.snippet;
    }

}

/// Indicator lists are stored as one `"; "`-joined cell
mod indicator_list {
    use serde::{Deserialize, Deserializer, Serializer};

    const SEPARATOR: &str = "; ";

    pub fn serialize<S: Serializer>(items: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&items.join(SEPARATOR))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(raw
            .split(SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}
