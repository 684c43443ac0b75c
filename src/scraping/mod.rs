//! URL resolution and content scraping
//!
//! Per-URL work runs inside the worker pool as a fixed sequence:
//! duplicate check, redirect resolution (through the SQLite cache), content
//! fetch and extraction, content-hash duplicate check, paywall scoring.
//!
//! Key components:
//! - `normalize_url`: canonical form used for every duplicate comparison
//! - `CacheStore`: persistent resolution cache keyed by normalized URL
//! - `DuplicateFilter`: raw / normalized / content-hash membership layers
//! - `Resolver`: HTTP and meta-refresh redirect following with a hop budget
//! - `FetchEngine`: content GET and extractor chain
//! - `PaywallDetector`: domain table plus pattern scoring
//! - `WorkerPool`: bounded set of workers each owning its HTTP clients

pub mod cache;
pub mod connectivity;
pub mod dedup;
pub mod extractor;
pub mod fetcher;
pub mod paywall;
pub mod pool;
pub mod resolver;
pub mod trust;

pub use cache::CacheStore;
pub use connectivity::ConnectivityMonitor;
pub use dedup::DuplicateFilter;
pub use extractor::ContentExtractor;
pub use fetcher::FetchEngine;
pub use paywall::PaywallDetector;
pub use pool::{UrlPipeline, UrlTask, WorkerPool};
pub use resolver::Resolver;
pub use trust::{HttpClients, TrustPolicy};

/// Tracking query parameters stripped during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "ref",
    "source",
    "campaign",
    "medium",
];

/// Characters kept percent-encoded inside a path segment after decoding
const PATH_RESERVED: &[char] = &['%', '/', '?', '#'];

/// Characters kept percent-encoded inside a query key or value after decoding
const QUERY_RESERVED: &[char] = &['%', '&', '=', '+', '#'];

/// Normalize a URL for duplicate comparison
///
/// - Lowercases scheme and host
/// - Decodes percent-encoding, keeping structural characters escaped
/// - Strips the fragment
/// - Removes tracking parameters, keeping the order of the rest
/// - Removes trailing slashes from the path
///
/// Works on the raw string so unparseable input still gets a stable key.
/// `normalize_url(&normalize_url(u)) == normalize_url(u)` for every input.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_fragment = match trimmed.find('#') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    };

    let (scheme, rest) = split_scheme(without_fragment);
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let authority = rest[..authority_end].to_lowercase();
    let tail = &rest[authority_end..];
    let (path, query) = match tail.find('?') {
        Some(idx) => (&tail[..idx], Some(&tail[idx + 1..])),
        None => (tail, None),
    };

    let path = path
        .split('/')
        .map(|segment| reencode(&decode(segment), PATH_RESERVED))
        .collect::<Vec<_>>()
        .join("/");
    let path = path.trim_end_matches('/');

    let mut normalized = String::with_capacity(trimmed.len());
    if let Some(scheme) = scheme {
        normalized.push_str(&scheme);
        normalized.push_str("://");
    }
    normalized.push_str(&authority);
    normalized.push_str(path);

    if let Some(query) = query {
        let params: Vec<String> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .filter_map(|param| {
                let (key, value) = match param.split_once('=') {
                    Some((k, v)) => (decode(k), Some(decode(v))),
                    None => (decode(param), None),
                };
                if is_tracking_param(&key) {
                    return None;
                }
                let mut out = reencode(&key, QUERY_RESERVED);
                if let Some(value) = value {
                    out.push('=');
                    out.push_str(&reencode(&value, QUERY_RESERVED));
                }
                Some(out)
            })
            .collect();
        if !params.is_empty() {
            normalized.push('?');
            normalized.push_str(&params.join("&"));
        }
    }

    normalized.trim().to_string()
}

/// Host of a URL, lowercased and without `www.`
pub fn domain_of(raw: &str) -> String {
    let host = match url::Url::parse(raw.trim()) {
        Ok(parsed) => parsed.host_str().map(str::to_lowercase),
        Err(_) => None,
    };
    let host = host.unwrap_or_else(|| {
        let (_, rest) = split_scheme(raw.trim());
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..end];
        let without_user = authority.rsplit('@').next().unwrap_or(authority);
        without_user
            .split(':')
            .next()
            .unwrap_or(without_user)
            .to_lowercase()
    });
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Split off a leading `scheme://`, lowercasing the scheme
fn split_scheme(url: &str) -> (Option<String>, &str) {
    if let Some(idx) = url.find("://") {
        let scheme = &url[..idx];
        let valid = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            return (Some(scheme.to_ascii_lowercase()), &url[idx + 3..]);
        }
    }
    (None, url)
}

/// Percent-decode, leaving input with invalid UTF-8 escapes untouched
fn decode(s: &str) -> String {
    match urlencoding::decode(s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.to_string(),
    }
}

/// Escape reserved, whitespace and control characters
fn reencode(s: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if reserved.contains(&c) || c.is_whitespace() || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_url_normalization() {
        assert_eq!(
            normalize_url("HTTPS://WWW.Example.COM/Path/?utm_source=x#section"),
            "https://www.example.com/Path"
        );
        assert_eq!(
            normalize_url("https://example.com/a?b=1&utm_medium=m&c=2&fbclid=z"),
            "https://example.com/a?b=1&c=2"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
    }

    #[test]
    fn tracking_params_are_case_insensitive() {
        assert_eq!(
            normalize_url("https://a.com/x?UTM_Source=1&Ref=abc&id=7"),
            "https://a.com/x?id=7"
        );
        assert_eq!(
            normalize_url("https://a.com/x?utm_whatever=1&campaign=c&medium=m"),
            "https://a.com/x"
        );
    }

    #[test]
    fn remaining_params_keep_their_order() {
        assert_eq!(
            normalize_url("https://a.com/?z=1&gclid=g&a=2&m=3"),
            "https://a.com?z=1&a=2&m=3"
        );
    }

    #[test]
    fn percent_encoding_is_decoded() {
        assert_eq!(
            normalize_url("https://a.com/caf%C3%A9/%7Euser"),
            "https://a.com/café/~user"
        );
        // structural characters stay escaped
        assert_eq!(
            normalize_url("https://a.com/a%2Fb?q=x%26y"),
            "https://a.com/a%2Fb?q=x%26y"
        );
        assert_eq!(
            normalize_url("https://a.com/a%20b"),
            "https://a.com/a%20b"
        );
    }

    #[test]
    fn shortener_variants_share_a_key() {
        assert_eq!(
            normalize_url("http://bit.ly/abc"),
            normalize_url("http://bit.ly/abc?utm_source=x")
        );
    }

    #[test]
    fn schemeless_input_is_stable() {
        assert_eq!(normalize_url("WWW.Example.com/Story/"), "www.example.com/Story");
        assert_eq!(normalize_url("   "), "");
    }

    #[test]
    fn embedded_url_in_query_is_not_a_scheme() {
        assert_eq!(
            normalize_url("a.com/r?u=http://b.com/x"),
            "a.com/r?u=http://b.com/x"
        );
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://WWW.NYTimes.com/2024/x"), "nytimes.com");
        assert_eq!(domain_of("http://user@Sub.Example.org:8080/"), "sub.example.org");
        assert_eq!(domain_of("example.net/path"), "example.net");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(raw in ".{0,80}") {
            let once = normalize_url(&raw);
            prop_assert_eq!(normalize_url(&once), once);
        }

        #[test]
        fn normalize_is_idempotent_for_url_like_input(
            scheme in "(http|HTTPS|ftp)",
            host in "[a-zA-Z0-9.-]{1,20}",
            path in "(/[a-zA-Z0-9%._~ -]{0,8}){0,4}/?",
            query in "([a-zA-Z_]{1,8}=[a-zA-Z0-9%+&=]{0,8}&?){0,4}",
            fragment in "[a-z0-9]{0,6}",
        ) {
            let raw = format!("{}://{}{}?{}#{}", scheme, host, path, query, fragment);
            let once = normalize_url(&raw);
            prop_assert_eq!(normalize_url(&once), once);
        }

        #[test]
        fn tracking_param_position_does_not_matter(
            params in proptest::collection::vec("[a-z]{1,6}=[a-z0-9]{1,6}", 0..5),
            tracker in "(utm_source|fbclid|gclid|ref)=[a-z0-9]{1,6}",
            pos in 0usize..6,
        ) {
            let base = format!("https://a.com/p?{}", params.join("&"));
            let mut with_tracker = params.clone();
            let pos = pos.min(with_tracker.len());
            with_tracker.insert(pos, tracker);
            let tracked = format!("https://a.com/p?{}", with_tracker.join("&"));
            let expected = normalize_url(&base);
            prop_assert_eq!(normalize_url(&tracked), expected);
        }
    }
}
