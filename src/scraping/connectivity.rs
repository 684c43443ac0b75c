//! Degraded-connectivity detection
//!
//! Workers report every network outcome. A run of consecutive transport
//! errors (timeouts, refused connections) past the threshold marks the path
//! as down; the dispatcher then pauses and probes until it comes back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::HttpClients;
use crate::config::{ConnectivityConfig, NetworkConfig};
use crate::types::ErrorKind;

pub struct ConnectivityMonitor {
    consecutive: AtomicUsize,
    threshold: usize,
    probe_url: String,
    probe_interval: Duration,
    probe_timeout: Duration,
}

impl ConnectivityMonitor {
    pub fn new(config: &ConnectivityConfig, network: &NetworkConfig) -> Self {
        Self {
            consecutive: AtomicUsize::new(0),
            threshold: config.error_threshold.max(1),
            probe_url: config.probe_url.clone(),
            probe_interval: config.probe_interval(),
            probe_timeout: network.connect_timeout(),
        }
    }

    /// Report the outcome of one URL that touched the network
    pub fn record(&self, error: Option<ErrorKind>) {
        match error {
            Some(kind) if kind.is_transport() => {
                self.consecutive.fetch_add(1, Ordering::Relaxed);
            }
            // no evidence either way
            Some(ErrorKind::Unexpected | ErrorKind::AlreadyScraped) => {}
            _ => self.consecutive.store(0, Ordering::Relaxed),
        }
    }

    pub fn consecutive_errors(&self) -> usize {
        self.consecutive.load(Ordering::Relaxed)
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive_errors() >= self.threshold
    }

    /// Probe until the path is back. Returns `false` if cancelled first.
    pub async fn wait_until_online(&self, clients: &HttpClients, cancel: &CancellationToken) -> bool {
        warn!(
            "{} consecutive network errors, pausing dispatch and probing {} every {:?}",
            self.consecutive_errors(),
            self.probe_url,
            self.probe_interval
        );
        let mut probes = 0usize;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            probes += 1;
            if clients.probe(&self.probe_url, self.probe_timeout).await {
                self.consecutive.store(0, Ordering::Relaxed);
                info!("Connectivity restored after {} probe(s), resuming", probes);
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.probe_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(threshold: usize, probe_url: String) -> ConnectivityMonitor {
        let config = ConnectivityConfig {
            error_threshold: threshold,
            probe_url,
            probe_interval_secs: 1,
        };
        ConnectivityMonitor::new(&config, &NetworkConfig::default())
    }

    #[test]
    fn test_threshold_and_reset() {
        let m = monitor(3, "http://127.0.0.1:1/".to_string());
        m.record(Some(ErrorKind::Timeout));
        m.record(Some(ErrorKind::ConnectionError));
        assert!(!m.is_degraded());
        m.record(Some(ErrorKind::Unexpected));
        assert_eq!(m.consecutive_errors(), 2);
        m.record(Some(ErrorKind::Timeout));
        assert!(m.is_degraded());

        m.record(Some(ErrorKind::Http(404)));
        assert_eq!(m.consecutive_errors(), 0);
        m.record(Some(ErrorKind::Timeout));
        m.record(None);
        assert!(!m.is_degraded());
    }

    #[tokio::test]
    async fn test_wait_returns_when_probe_succeeds() {
        let app = axum::Router::new().route("/ip", axum::routing::get(|| async { "127.0.0.1" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let m = monitor(1, format!("http://{}/ip", addr));
        m.record(Some(ErrorKind::Timeout));
        assert!(m.is_degraded());

        let clients = HttpClients::new(&NetworkConfig::default()).unwrap();
        assert!(m.wait_until_online(&clients, &CancellationToken::new()).await);
        assert!(!m.is_degraded());
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let m = monitor(1, format!("http://127.0.0.1:{}/", port));
        let clients = HttpClients::new(&NetworkConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        assert!(!m.wait_until_online(&clients, &cancel).await);
    }
}
