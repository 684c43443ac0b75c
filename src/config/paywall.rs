//! Paywall heuristic configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::PaywallType;

const HARD_PAYWALL_DOMAINS: &[&str] = &[
    "politiken.dk",
    "berlingske.dk",
    "nytimes.com",
    "wsj.com",
    "ft.com",
    "economist.com",
    "telegraph.co.uk",
    "standard.co.uk",
    "cityam.com",
    "bloomberg.com",
];

const SOFT_PAYWALL_DOMAINS: &[&str] = &[
    "washingtonpost.com",
    "theguardian.com",
    "independent.co.uk",
    "dailymail.co.uk",
    "mirror.co.uk",
    "express.co.uk",
    "thesun.co.uk",
    "metro.co.uk",
    "reuters.com",
    "cnn.com",
];

const FREE_DOMAINS: &[&str] = &["bbc.com", "bbc.co.uk", "dr.dk", "tv2.dk"];

/// Paywall detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaywallConfig {
    /// Domain (without `www.`) to fixed severity
    pub known_domains: BTreeMap<String, PaywallType>,
    /// Bodies shorter than this many bytes count as teaser pages
    pub short_body_bytes: usize,
    /// Confidence above which a page is flagged
    pub detection_threshold: f64,
}

impl Default for PaywallConfig {
    fn default() -> Self {
        let mut known_domains = BTreeMap::new();
        for (domains, severity) in [
            (HARD_PAYWALL_DOMAINS, PaywallType::Hard),
            (SOFT_PAYWALL_DOMAINS, PaywallType::Soft),
            (FREE_DOMAINS, PaywallType::None),
        ] {
            for domain in domains {
                known_domains.insert(domain.to_string(), severity);
            }
        }
        Self {
            known_domains,
            short_body_bytes: 1500,
            detection_threshold: 0.5,
        }
    }
}
