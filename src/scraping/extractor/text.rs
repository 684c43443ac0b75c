//! Text extraction strategies and whitespace normalization

use scraper::{ElementRef, Html, Selector};
use std::io::Cursor;
use url::Url;

use super::ExtractionStrategy;
use crate::types::ExtractionMethod;

/// Elements whose text never counts as content
const NOISE_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form",
    "iframe", "svg", "button",
];

/// Elements that start a new line in the collected text
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "section", "article", "pre", "figcaption", "dd", "dt",
];

/// Readability-style main-content scoring
pub(super) struct ReadabilityStrategy;

impl ExtractionStrategy for ReadabilityStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Readability
    }

    fn extract(&self, html: &str, _document: &Html, url: &Url) -> Option<String> {
        let mut cursor = Cursor::new(html.as_bytes());
        let product = readability::extractor::extract(&mut cursor, url).ok()?;
        Some(normalize_whitespace(&product.text))
    }
}

/// Container-selector search keeping paragraph text only
pub(super) struct BoilerplateStrategy {
    containers: Vec<Selector>,
    paragraphs: Option<Selector>,
}

impl BoilerplateStrategy {
    pub(super) fn new() -> Self {
        // Selectors for main content (in priority order)
        let containers: Vec<Selector> = [
            "article",
            "main",
            "[role='main']",
            ".article-body",
            ".story-body",
            ".post-content",
            ".article-content",
            ".entry-content",
            "#content",
            ".content",
        ]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect();
        let paragraphs = Selector::parse("p, h2, h3, blockquote, li").ok();
        Self {
            containers,
            paragraphs,
        }
    }
}

impl ExtractionStrategy for BoilerplateStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Boilerplate
    }

    fn extract(&self, _html: &str, document: &Html, _url: &Url) -> Option<String> {
        let mut best: Option<String> = None;
        for selector in &self.containers {
            for container in document.select(selector) {
                let blocks: Vec<String> = match &self.paragraphs {
                    Some(paragraphs) => container
                        .select(paragraphs)
                        .filter(|block| !inside_noise(*block))
                        .map(|block| normalize_whitespace(&collect_text(block)))
                        .filter(|text| !text.is_empty())
                        .collect(),
                    None => Vec::new(),
                };
                let text = if blocks.is_empty() {
                    normalize_whitespace(&collect_text(container))
                } else {
                    blocks.join("\n\n")
                };
                if best.as_ref().map_or(true, |b| text.len() > b.len()) {
                    best = Some(text);
                }
            }
            // first selector with any candidate wins
            if best.as_ref().is_some_and(|b| !b.is_empty()) {
                break;
            }
        }
        best.filter(|b| !b.is_empty())
    }
}

/// All visible body text minus navigation and script noise
pub(super) struct RawTextStrategy {
    body: Option<Selector>,
}

impl RawTextStrategy {
    pub(super) fn new() -> Self {
        Self {
            body: Selector::parse("body").ok(),
        }
    }
}

impl ExtractionStrategy for RawTextStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::RawText
    }

    fn extract(&self, _html: &str, document: &Html, _url: &Url) -> Option<String> {
        let root = self
            .body
            .as_ref()
            .and_then(|sel| document.select(sel).next())
            .unwrap_or_else(|| document.root_element());
        let text = normalize_whitespace(&collect_text(root));
        (!text.is_empty()).then_some(text)
    }
}

/// Whether an element sits inside a noise element such as `nav`
fn inside_noise(element: ElementRef<'_>) -> bool {
    element.ancestors().any(|a| {
        a.value()
            .as_element()
            .is_some_and(|e| NOISE_ELEMENTS.contains(&e.name()))
    })
}

/// Text of `root`, skipping noise subtrees and breaking lines at block elements
pub(super) fn collect_text(root: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in root.descendants() {
        if let Some(text_node) = node.value().as_text() {
            let skipped = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| NOISE_ELEMENTS.contains(&e.name()))
            });
            if skipped {
                continue;
            }
            let t = text_node.trim();
            if !t.is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push(' ');
                }
                text.push_str(t);
            }
        } else if let Some(elem) = node.value().as_element() {
            if BLOCK_ELEMENTS.contains(&elem.name()) && !text.is_empty() {
                text.push_str("\n\n");
            }
        }
    }
    text
}

/// Normalize whitespace: collapse runs of spaces on each line, preserve
/// paragraph breaks (double newlines), and trim trailing whitespace.
pub(super) fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut consecutive_newlines = 0u32;

    for line in text.split('\n') {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");

        if trimmed.is_empty() {
            consecutive_newlines += 1;
            continue;
        }

        if !result.is_empty() {
            if consecutive_newlines >= 1 {
                result.push_str("\n\n");
            } else {
                result.push('\n');
            }
        }

        consecutive_newlines = 0;
        result.push_str(&trimmed);
    }

    result
}
