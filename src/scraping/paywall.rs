//! Paywall heuristics
//!
//! A known-domain table gives a fixed severity. Otherwise a fixed, ordered set
//! of weighted patterns is scored over the lower-cased HTML. The result is a
//! pure function of (url, html).

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::domain_of;
use crate::config::PaywallConfig;
use crate::types::{PaywallInfo, PaywallType};
use crate::util::{collapse_whitespace, take_chars, window};

/// Confidence assigned by a known-domain hit and the overall cap
const MAX_CONFIDENCE: f64 = 0.95;
/// Bonus when at least `MULTI_MATCH_COUNT` distinct patterns match
const MULTI_MATCH_BONUS: f64 = 0.2;
const MULTI_MATCH_COUNT: usize = 3;
/// Bonus for a short (teaser) body with at least one indicator
const SHORT_BODY_BONUS: f64 = 0.1;

const SNIPPET_BEFORE: usize = 50;
const SNIPPET_AFTER: usize = 100;
const SNIPPET_MAX_CHARS: usize = 200;

struct PaywallPattern {
    name: &'static str,
    regex: Regex,
    weight: f64,
}

static PATTERNS: OnceLock<Vec<PaywallPattern>> = OnceLock::new();

fn patterns() -> &'static [PaywallPattern] {
    PATTERNS.get_or_init(|| {
        [
            (
                "subscription",
                r"\b(subscribe|subscription|premium|membership|login|sign.?in|register|paywall|metered)\b",
                0.7,
            ),
            (
                "metered_access",
                r"\b(limited.?access|free.?articles|remaining.?articles|article.?limit)\b",
                0.8,
            ),
            (
                "continue_reading",
                r"\b(continue.?reading|read.?more|unlock|unlimited.?access)\b",
                0.6,
            ),
            (
                "paywall_class",
                r#"class=["'](?:[^"']*\s)?(paywall|subscription|premium|metered)"#,
                0.8,
            ),
            (
                "limit_reached",
                r"\b(you.?have.?reached.?your.?limit|subscribe.?to.?continue)\b",
                0.9,
            ),
        ]
        .into_iter()
        .map(|(name, pattern, weight)| PaywallPattern {
            name,
            regex: Regex::new(pattern).expect("paywall pattern must compile"),
            weight,
        })
        .collect()
    })
}

/// Heuristic paywall classifier
#[derive(Debug, Clone)]
pub struct PaywallDetector {
    known_domains: BTreeMap<String, PaywallType>,
    short_body_bytes: usize,
    threshold: f64,
}

impl PaywallDetector {
    pub fn new(config: &PaywallConfig) -> Self {
        Self {
            known_domains: config
                .known_domains
                .iter()
                .map(|(domain, severity)| {
                    let domain = domain.trim().to_lowercase();
                    let domain = domain.strip_prefix("www.").unwrap_or(&domain).to_string();
                    (domain, *severity)
                })
                .collect(),
            short_body_bytes: config.short_body_bytes,
            threshold: config.detection_threshold,
        }
    }

    /// Severity for a host, matching the domain itself or any parent domain
    pub fn known_severity(&self, url: &str) -> Option<(&str, PaywallType)> {
        let domain = domain_of(url);
        let mut candidate = domain.as_str();
        loop {
            if let Some((known, severity)) = self.known_domains.get_key_value(candidate) {
                return Some((known.as_str(), *severity));
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return None,
            }
        }
    }

    /// Classify a fetched page
    pub fn detect(&self, url: &str, html: &str) -> PaywallInfo {
        if let Some((domain, severity)) = self.known_severity(url) {
            if severity != PaywallType::None {
                return PaywallInfo {
                    detected: true,
                    paywall_type: severity,
                    confidence: MAX_CONFIDENCE,
                    indicators: vec![format!("known_domain: {}", domain)],
                    snippet: None,
                };
            }
        }

        let lower = html.to_lowercase();
        let mut indicators = Vec::new();
        let mut weights = Vec::new();
        let mut first_match: Option<(usize, usize)> = None;

        for pattern in patterns() {
            if let Some(m) = pattern.regex.find(&lower) {
                indicators.push(format!("{}: {}", pattern.name, m.as_str()));
                weights.push(pattern.weight);
                if first_match.map_or(true, |(start, _)| m.start() < start) {
                    first_match = Some((m.start(), m.end()));
                }
            }
        }

        if weights.is_empty() {
            return PaywallInfo::default();
        }

        let mut confidence = weights.iter().sum::<f64>() / weights.len() as f64;
        if weights.len() >= MULTI_MATCH_COUNT {
            confidence += MULTI_MATCH_BONUS;
        }
        if html.len() < self.short_body_bytes {
            confidence += SHORT_BODY_BONUS;
        }
        let confidence = confidence.min(MAX_CONFIDENCE);
        let detected = confidence > self.threshold;

        let snippet = first_match.map(|(start, end)| {
            let raw = window(
                &lower,
                start.saturating_sub(SNIPPET_BEFORE),
                end.max(start + SNIPPET_AFTER),
            );
            take_chars(&collapse_whitespace(raw), SNIPPET_MAX_CHARS)
        });

        PaywallInfo {
            detected,
            paywall_type: if detected {
                PaywallType::Generic
            } else {
                PaywallType::None
            },
            confidence,
            indicators,
            snippet,
        }
    }
}

impl Default for PaywallDetector {
    fn default() -> Self {
        Self::new(&PaywallConfig::default())
    }
}
