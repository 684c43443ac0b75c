//! Redirect resolution
//!
//! Follows HTTP 3xx chains and HTML meta-refresh directives hop by hop, with a
//! hard hop budget so circular chains terminate. Results are cached under the
//! original URL's normalized form.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use super::trust::{content_type, is_html, read_body_capped, HttpClients};
use super::{domain_of, normalize_url, CacheStore};
use crate::config::{NetworkConfig, PipelineConfig};
use crate::types::{ErrorKind, UrlResolution};

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

static META_REFRESH_URL: OnceLock<Regex> = OnceLock::new();

fn meta_refresh_url_regex() -> &'static Regex {
    META_REFRESH_URL.get_or_init(|| {
        Regex::new(r#"(?i)url\s*=\s*['"]?([^'";]+)"#).expect("meta refresh pattern must compile")
    })
}

/// Target of a `<meta http-equiv="refresh" content="N;URL=...">` tag,
/// resolved against the page URL
pub fn meta_refresh_target(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("meta[http-equiv]").ok()?;
    let content = document
        .select(&selector)
        .find(|meta| {
            meta.value()
                .attr("http-equiv")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"))
        })?
        .value()
        .attr("content")?;
    let target = meta_refresh_url_regex().captures(content)?.get(1)?.as_str().trim();
    if target.is_empty() {
        return None;
    }
    base.join(target).ok()
}

/// Parse an input URL, assuming `http://` when the scheme is missing
fn parse_input(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        // `host:port/path` parses with the host as its scheme
        Ok(_) if !raw.contains("://") => Url::parse(&format!("http://{}", raw)).ok(),
        Ok(_) => None,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("http://{}", raw)).ok(),
        Err(_) => None,
    }
}

/// Input carries its own http(s) scheme
fn has_scheme(raw: &str) -> bool {
    Url::parse(raw.trim()).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// The URL actually requested for an input: the input itself when it has a
/// scheme, otherwise its `http://` form
pub fn request_url(raw: &str) -> String {
    if has_scheme(raw) {
        return raw.to_string();
    }
    parse_input(raw).map_or_else(|| raw.to_string(), |url| url.to_string())
}

/// Whether `resolved` differs from what requesting `original` hits directly
pub fn destination_changed(original: &str, resolved: &str) -> bool {
    request_url(original) != resolved
}

/// Cache-backed redirect resolver
pub struct Resolver {
    cache: Arc<CacheStore>,
    max_hops: usize,
    timeout: Duration,
    max_body_bytes: usize,
    force_refresh: bool,
    retry_failed: bool,
}

impl Resolver {
    pub fn new(cache: Arc<CacheStore>, network: &NetworkConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            cache,
            max_hops: network.max_hops,
            timeout: network.resolve_timeout(),
            max_body_bytes: network.max_body_bytes,
            force_refresh: pipeline.force_refresh,
            retry_failed: pipeline.retry_failed_resolutions,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Resolve a URL, consulting the cache first
    pub async fn resolve(&self, clients: &HttpClients, url: &str) -> UrlResolution {
        if !self.force_refresh {
            match self.cache.get(url) {
                Ok(Some(hit)) if hit.success || !self.retry_failed => return rebind(hit, url),
                Ok(_) => {}
                Err(e) => warn!("Cache lookup failed for {}: {}", url, e),
            }
        }

        let resolution = self.follow(clients, url).await;
        if let Err(e) = self.cache.put(&resolution) {
            warn!("Cache write failed for {}: {}", url, e);
        }
        resolution
    }

    /// Walk the redirect chain over the network
    async fn follow(&self, clients: &HttpClients, original: &str) -> UrlResolution {
        let start = Instant::now();
        let Some(mut current) = parse_input(original) else {
            debug!("Unparseable URL {}", original);
            return UrlResolution::failed(original, original, ErrorKind::Unexpected);
        };

        let mut hops = 0usize;
        let mut relaxed_tls = false;
        let mut truncated = false;

        let status = loop {
            let outcome = clients.get(current.as_str(), self.timeout).await;
            relaxed_tls |= outcome.relaxed();
            let response = match outcome.result {
                Ok(response) => response,
                Err(kind) => {
                    debug!("Resolution of {} failed at {}: {}", original, current, kind);
                    let last = if hops == 0 { request_url(original) } else { current.to_string() };
                    let mut failed = UrlResolution::failed(original, &last, kind);
                    failed.redirect_count = hops;
                    failed.relaxed_tls = relaxed_tls;
                    failed.response_time = start.elapsed().as_secs_f64();
                    return failed;
                }
            };

            let status = response.status().as_u16();
            let next = if REDIRECT_STATUSES.contains(&status) {
                response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|location| current.join(location.trim()).ok())
            } else if status == 200 && is_html(&content_type(&response)) {
                match read_body_capped(response, self.max_body_bytes).await {
                    Ok(body) => meta_refresh_target(&body, &current).filter(|t| *t != current),
                    Err(_) => None,
                }
            } else {
                None
            };

            match next {
                Some(_) if hops >= self.max_hops => {
                    debug!("Hop budget of {} exhausted for {}", self.max_hops, original);
                    truncated = true;
                    break status;
                }
                Some(next) => {
                    hops += 1;
                    debug!("Hop {} for {}: {}", hops, original, next);
                    current = next;
                }
                None => break status,
            }
        };

        let resolved_url = if hops == 0 {
            request_url(original)
        } else {
            current.to_string()
        };

        UrlResolution {
            original_url: original.to_string(),
            normalized_url: normalize_url(&resolved_url),
            domain: domain_of(&resolved_url),
            resolution_worked: destination_changed(original, &resolved_url),
            resolved_url,
            status_code: Some(status),
            redirect_count: hops,
            success: true,
            truncated,
            relaxed_tls,
            error: None,
            response_time: start.elapsed().as_secs_f64(),
            cached_at: chrono::Utc::now(),
        }
    }
}

/// Re-key a cached resolution to the URL that was asked for. Variants that
/// share a cache key may differ in their original text.
fn rebind(mut hit: UrlResolution, url: &str) -> UrlResolution {
    if hit.redirect_count == 0 {
        hit.resolved_url = request_url(url);
    }
    hit.original_url = url.to_string();
    hit.resolution_worked = destination_changed(url, &hit.resolved_url);
    hit
}
