//! HTTP clients and the strict-then-relaxed TLS trust policy
//!
//! Each worker owns one `HttpClients`: a certificate-verifying client and a
//! relaxed twin used only after a TLS failure. Neither follows redirects on
//! its own; the resolver walks chains hop by hop.

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::types::ErrorKind;

/// Which client served a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    Strict,
    Relaxed,
}

/// Outcome of a request under the trust policy
#[derive(Debug)]
pub struct Trusted<T> {
    pub result: Result<T, ErrorKind>,
    pub mode: TrustMode,
}

impl<T> Trusted<T> {
    pub fn relaxed(&self) -> bool {
        self.mode == TrustMode::Relaxed
    }
}

/// Two-step policy: a strict attempt, then one relaxed attempt on `ssl_error`
#[derive(Debug, Clone, Copy)]
pub struct TrustPolicy {
    relaxed_retry: bool,
}

impl TrustPolicy {
    pub fn new(relaxed_retry: bool) -> Self {
        Self { relaxed_retry }
    }

    /// Whether a strict failure earns a relaxed retry
    pub fn retries(&self, error: ErrorKind) -> bool {
        self.relaxed_retry && error == ErrorKind::SslError
    }

    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Trusted<T>
    where
        F: FnMut(TrustMode) -> Fut,
        Fut: Future<Output = Result<T, ErrorKind>>,
    {
        match attempt(TrustMode::Strict).await {
            Err(error) if self.retries(error) => {
                tracing::debug!("TLS verification failed, retrying without verification");
                Trusted {
                    result: attempt(TrustMode::Relaxed).await,
                    mode: TrustMode::Relaxed,
                }
            }
            result => Trusted {
                result,
                mode: TrustMode::Strict,
            },
        }
    }
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Per-worker client pair
#[derive(Clone)]
pub struct HttpClients {
    strict: reqwest::Client,
    relaxed: reqwest::Client,
    policy: TrustPolicy,
}

impl HttpClients {
    pub fn new(config: &NetworkConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            strict: Self::build(config, false)?,
            relaxed: Self::build(config, true)?,
            policy: TrustPolicy::new(config.relaxed_tls_retry),
        })
    }

    fn build(config: &NetworkConfig, accept_invalid_certs: bool) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(config.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .gzip(true)
            .brotli(true);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        builder.build()
    }

    pub fn client(&self, mode: TrustMode) -> &reqwest::Client {
        match mode {
            TrustMode::Strict => &self.strict,
            TrustMode::Relaxed => &self.relaxed,
        }
    }

    /// GET a URL without following redirects
    pub async fn get(&self, url: &str, timeout: Duration) -> Trusted<reqwest::Response> {
        self.policy
            .run(|mode| {
                let request = self.client(mode).get(url).timeout(timeout);
                async move { request.send().await.map_err(|e| classify_error(&e)) }
            })
            .await
    }

    /// Whether `url` answers with any HTTP response
    pub async fn probe(&self, url: &str, timeout: Duration) -> bool {
        match self.get(url, timeout).await.result {
            Ok(response) => {
                tracing::debug!("Probe {} answered {}", url, response.status());
                true
            }
            Err(e) => {
                tracing::debug!("Probe {} failed: {}", url, e);
                false
            }
        }
    }
}

/// Map a transport error onto the per-URL error taxonomy
pub fn classify_error(error: &reqwest::Error) -> ErrorKind {
    if error.is_timeout() {
        return ErrorKind::Timeout;
    }
    if is_tls_failure(error) {
        return ErrorKind::SslError;
    }
    if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
        return ErrorKind::ConnectionError;
    }
    ErrorKind::Unexpected
}

/// Searches the source chain only; the top-level message carries the URL
fn is_tls_failure(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(err) = source {
        let message = err.to_string().to_lowercase();
        if ["certificate", "tls", "ssl", "handshake"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            return true;
        }
        source = err.source();
    }
    false
}

/// Read at most `max_bytes` of a response body, decoded lossily as UTF-8
pub async fn read_body_capped(
    mut response: reqwest::Response,
    max_bytes: usize,
) -> Result<String, ErrorKind> {
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| classify_error(&e))? {
        let room = max_bytes.saturating_sub(body.len());
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            tracing::debug!("Body of {} cut at {} bytes", response.url(), max_bytes);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Content type of a response, lower-cased, empty when absent
pub fn content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase()
}

/// HTML-ish content types
pub fn is_html(content_type: &str) -> bool {
    content_type.contains("text/html") || content_type.contains("application/xhtml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_policy_retries_ssl_once() {
        let calls = AtomicUsize::new(0);
        let outcome = TrustPolicy::new(true)
            .run(|mode| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match mode {
                        TrustMode::Strict => Err(ErrorKind::SslError),
                        TrustMode::Relaxed => Ok(7),
                    }
                }
            })
            .await;
        assert_eq!(outcome.result, Ok(7));
        assert!(outcome.relaxed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_policy_keeps_relaxed_failure() {
        let outcome: Trusted<()> = TrustPolicy::new(true)
            .run(|_| async { Err(ErrorKind::SslError) })
            .await;
        assert_eq!(outcome.result, Err(ErrorKind::SslError));
        assert_eq!(outcome.mode, TrustMode::Relaxed);
    }

    #[tokio::test]
    async fn test_policy_does_not_retry_other_errors() {
        let calls = AtomicUsize::new(0);
        let outcome: Trusted<()> = TrustPolicy::new(true)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ErrorKind::Timeout) }
            })
            .await;
        assert_eq!(outcome.result, Err(ErrorKind::Timeout));
        assert!(!outcome.relaxed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_disabled() {
        let outcome: Trusted<()> = TrustPolicy::new(false)
            .run(|_| async { Err(ErrorKind::SslError) })
            .await;
        assert_eq!(outcome.mode, TrustMode::Strict);
        assert!(!TrustPolicy::new(false).retries(ErrorKind::SslError));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let clients = HttpClients::new(&NetworkConfig::default()).unwrap();
        let outcome = clients
            .get(&format!("http://127.0.0.1:{}/", port), Duration::from_secs(5))
            .await;
        assert_eq!(outcome.result.err(), Some(ErrorKind::ConnectionError));
        assert!(!clients.probe(&format!("http://127.0.0.1:{}/", port), Duration::from_secs(5)).await);
    }

    #[test]
    fn test_is_html() {
        assert!(is_html("text/html; charset=utf-8"));
        assert!(is_html("application/xhtml+xml"));
        assert!(!is_html("application/pdf"));
        assert!(!is_html(""));
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let config = NetworkConfig {
            proxy: Some("not a proxy url".to_string()),
            ..Default::default()
        };
        assert!(HttpClients::new(&config).is_err());
    }
}
