//! Metadata extraction: title, author, dates, language, description, JSON-LD

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use std::collections::HashMap;

use super::types::PageMetadata;
use super::ContentExtractor;

impl ContentExtractor {
    /// Read page metadata from an already-parsed document
    pub(super) fn extract_metadata(&self, document: &Html) -> PageMetadata {
        let json_ld = self.extract_json_ld(document);

        let title = json_ld
            .get("headline")
            .cloned()
            .or_else(|| self.get_meta_content(document, "og:title"))
            .or_else(|| self.get_meta_content(document, "twitter:title"))
            .or_else(|| self.extract_title(document));

        let description = self
            .get_meta_content(document, "description")
            .or_else(|| self.get_meta_content(document, "og:description"))
            .or_else(|| self.get_meta_content(document, "twitter:description"))
            .or_else(|| json_ld.get("description").cloned());

        let author = json_ld
            .get("author")
            .cloned()
            .or_else(|| self.extract_author(document));

        let publish_date = json_ld
            .get("datePublished")
            .cloned()
            .or_else(|| self.extract_date(document))
            .map(|raw| match Self::parse_date(&raw) {
                Some(dt) => dt.to_rfc3339(),
                None => raw,
            });

        let language = self.extract_language(document);

        PageMetadata {
            title,
            description,
            author,
            publish_date,
            language,
        }
    }

    /// Extract page title from `<title>`, then the first `<h1>`
    pub(super) fn extract_title(&self, document: &Html) -> Option<String> {
        for tag in ["title", "h1"] {
            if let Ok(selector) = Selector::parse(tag) {
                if let Some(elem) = document.select(&selector).next() {
                    let title = elem.text().collect::<String>().trim().to_string();
                    if !title.is_empty() {
                        return Some(title);
                    }
                }
            }
        }
        None
    }

    /// Extract author
    pub(super) fn extract_author(&self, document: &Html) -> Option<String> {
        if let Some(author) = self
            .get_meta_content(document, "author")
            .or_else(|| self.get_meta_content(document, "article:author"))
        {
            return Some(author);
        }

        // Try schema.org and common byline class names
        for class in &["[itemprop='author']", ".author", ".byline", "[rel='author']"] {
            if let Ok(selector) = Selector::parse(class) {
                if let Some(elem) = document.select(&selector).next() {
                    let text = elem.text().collect::<String>().trim().to_string();
                    if !text.is_empty() && text.len() < 100 {
                        return Some(text);
                    }
                }
            }
        }

        None
    }

    /// Raw publication date from meta tags or a `<time datetime>` element
    pub(super) fn extract_date(&self, document: &Html) -> Option<String> {
        for name in &["article:published_time", "date"] {
            if let Some(date) = self.get_meta_content(document, name) {
                return Some(date);
            }
        }

        if let Ok(selector) = Selector::parse("time[datetime]") {
            if let Some(elem) = document.select(&selector).next() {
                if let Some(datetime) = elem.value().attr("datetime") {
                    let trimmed = datetime.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
        }

        None
    }

    /// Extract language
    pub(super) fn extract_language(&self, document: &Html) -> Option<String> {
        if let Ok(selector) = Selector::parse("html") {
            if let Some(html_elem) = document.select(&selector).next() {
                if let Some(lang) = html_elem.value().attr("lang") {
                    let lang = lang.trim();
                    if !lang.is_empty() {
                        return Some(lang.to_string());
                    }
                }
            }
        }

        self.get_meta_content(document, "language")
            .or_else(|| self.get_meta_content(document, "og:locale"))
    }

    /// Get meta content by name or property
    pub(super) fn get_meta_content(&self, document: &Html, name: &str) -> Option<String> {
        let (name_sel, prop_sel) = self.meta_selectors.get(name)?;
        for selector in [name_sel, prop_sel].into_iter().flatten() {
            if let Some(elem) = document.select(selector).next() {
                if let Some(content) = elem.value().attr("content") {
                    let trimmed = content.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
        }
        None
    }

    /// Extract JSON-LD structured data
    fn extract_json_ld(&self, document: &Html) -> HashMap<String, String> {
        let mut data = HashMap::new();

        if let Ok(selector) = Selector::parse("script[type='application/ld+json']") {
            for script in document.select(&selector) {
                let json_text = script.text().collect::<String>();
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&json_text) {
                    Self::flatten_json_ld(&value, &mut data);
                }
            }
        }

        data
    }

    /// Flatten JSON-LD to simple key-value pairs, first value wins
    fn flatten_json_ld(value: &serde_json::Value, data: &mut HashMap<String, String>) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map {
                    match val {
                        serde_json::Value::String(s) => {
                            data.entry(key.clone()).or_insert_with(|| s.clone());
                        }
                        serde_json::Value::Object(nested) => {
                            // nested author/publisher objects
                            if let Some(name) = nested.get("name").and_then(|n| n.as_str()) {
                                data.entry(key.clone()).or_insert_with(|| name.to_string());
                            }
                        }
                        serde_json::Value::Array(arr) => {
                            for item in arr {
                                if let (Some(name), "author") =
                                    (item.get("name").and_then(|n| n.as_str()), key.as_str())
                                {
                                    data.entry(key.clone()).or_insert_with(|| name.to_string());
                                } else {
                                    Self::flatten_json_ld(item, data);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr {
                    Self::flatten_json_ld(item, data);
                }
            }
            _ => {}
        }
    }

    /// Parse a date string into DateTime
    pub(super) fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
        let date_str = date_str.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
            return Some(dt.with_timezone(&Utc));
        }

        if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
            return Some(dt.with_timezone(&Utc));
        }

        let formats = [
            "%Y-%m-%d",
            "%Y/%m/%d",
            "%d-%m-%Y",
            "%d/%m/%Y",
            "%d.%m.%Y",
            "%B %d, %Y",
            "%b %d, %Y",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S",
        ];

        for format in &formats {
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(date_str, format) {
                return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
            if let Ok(naive) = chrono::NaiveDate::parse_from_str(date_str, format) {
                if let Some(naive_dt) = naive.and_hms_opt(0, 0, 0) {
                    return Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
                }
            }
        }

        None
    }
}
