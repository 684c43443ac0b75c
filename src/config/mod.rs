//! Configuration for linkharvest

mod logging;
mod network;
mod paywall;
mod pipeline;

pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use network::{ConnectivityConfig, NetworkConfig};
pub use paywall::PaywallConfig;
pub use pipeline::{ImprovementMode, ImprovementPolicy, PipelineConfig};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::PaywallType;

/// Default user agent for resolver, fetcher and connectivity probes
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Default configuration file name written by `init`
pub const DEFAULT_CONFIG_FILE: &str = "linkharvest.toml";

/// Main configuration for a scraping run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input, output and batching
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// HTTP clients, timeouts and connectivity monitoring
    #[serde(default)]
    pub network: NetworkConfig,
    /// Paywall heuristics
    #[serde(default)]
    pub paywall: PaywallConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// SQLite resolution cache location
    pub fn cache_path(&self) -> PathBuf {
        self.pipeline
            .cache_file
            .clone()
            .unwrap_or_else(|| self.pipeline.output_dir.join("url_cache.db"))
    }

    /// Seen-URL tracker location
    pub fn tracker_path(&self) -> PathBuf {
        self.pipeline
            .tracker_file
            .clone()
            .unwrap_or_else(|| self.pipeline.output_dir.join("processed_urls.txt"))
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Pipeline validation
        if self.pipeline.batch_size == 0 {
            errors.push("batch_size must be positive".to_string());
        }
        if self.pipeline.workers == 0 {
            errors.push("workers must be positive".to_string());
        }
        if self.pipeline.checkpoint_interval == 0 {
            errors.push("checkpoint_interval must be positive".to_string());
        }
        if self.pipeline.output_dir.as_os_str().is_empty() {
            errors.push("output_dir must not be empty".to_string());
        }
        if self.pipeline.resume_from_batch == Some(0) {
            errors.push("resume_from_batch is 1-based and must be positive".to_string());
        }
        if self.pipeline.max_batches == Some(0) {
            errors.push("max_batches must be positive when set".to_string());
        }
        if self.pipeline.improvement.min_ratio < 1.0 {
            errors.push("improvement.min_ratio must be >= 1.0".to_string());
        }

        // Network validation
        if self.network.resolve_timeout_secs == 0 {
            errors.push("resolve_timeout_secs must be positive".to_string());
        }
        if self.network.fetch_timeout_secs == 0 {
            errors.push("fetch_timeout_secs must be positive".to_string());
        }
        if self.network.connect_timeout_secs == 0 {
            errors.push("connect_timeout_secs must be positive".to_string());
        }
        if self.network.max_hops == 0 {
            errors.push("max_hops must be positive".to_string());
        }
        if self.network.max_body_bytes == 0 {
            errors.push("max_body_bytes must be positive".to_string());
        }
        if let Some(proxy) = &self.network.proxy {
            if url::Url::parse(proxy).is_err() {
                errors.push(format!("proxy is not a valid URL: {}", proxy));
            }
        }
        if self.network.connectivity.error_threshold == 0 {
            errors.push("connectivity.error_threshold must be positive".to_string());
        }
        if self.network.connectivity.probe_interval_secs == 0 {
            errors.push("connectivity.probe_interval_secs must be positive".to_string());
        }
        if url::Url::parse(&self.network.connectivity.probe_url).is_err() {
            errors.push(format!(
                "connectivity.probe_url is not a valid URL: {}",
                self.network.connectivity.probe_url
            ));
        }

        // Paywall validation
        if self.paywall.detection_threshold <= 0.0 || self.paywall.detection_threshold >= 1.0 {
            errors.push("detection_threshold must be between 0.0 and 1.0 (exclusive)".to_string());
        }
        for (domain, severity) in &self.paywall.known_domains {
            if *severity == PaywallType::Generic {
                errors.push(format!(
                    "known paywall domain '{}' must be hard, soft or none",
                    domain
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
