//! HTTP client and connectivity configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::DEFAULT_USER_AGENT;

/// HTTP settings shared by the resolver and the content fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// User agent string
    pub user_agent: String,
    /// Per-request timeout while following redirects (seconds)
    pub resolve_timeout_secs: u64,
    /// Per-request timeout for the content fetch (seconds)
    pub fetch_timeout_secs: u64,
    /// TCP/TLS connect timeout (seconds)
    pub connect_timeout_secs: u64,
    /// Maximum redirect hops (HTTP and meta refresh) per URL
    pub max_hops: usize,
    /// Maximum response body size read for resolution and extraction
    pub max_body_bytes: usize,
    /// Optional proxy (`http://`, `socks5://`, `socks5h://`)
    pub proxy: Option<String>,
    /// Retry once without certificate verification after a TLS failure
    pub relaxed_tls_retry: bool,
    /// Degraded-connectivity handling
    pub connectivity: ConnectivityConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            resolve_timeout_secs: 30,
            fetch_timeout_secs: 15,
            connect_timeout_secs: 10,
            max_hops: 10,
            max_body_bytes: 5 * 1024 * 1024,
            proxy: None,
            relaxed_tls_retry: true,
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Pause-and-probe settings used when the network path goes down
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Consecutive transport errors that trigger a pause
    pub error_threshold: usize,
    /// URL fetched to decide whether connectivity is back
    pub probe_url: String,
    /// Seconds between probes while paused
    pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            error_threshold: 10,
            probe_url: "http://ipinfo.io/ip".to_string(),
            probe_interval_secs: 30,
        }
    }
}

impl ConnectivityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}
