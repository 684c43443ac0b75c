//! Persistent resolution cache
//!
//! One SQLite row per normalized original URL. Lookups go through here before
//! any redirect resolution touches the network, so repeated runs over
//! overlapping inputs only pay for new URLs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::normalize_url;
use crate::types::{ErrorKind, UrlResolution};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache at {path} is unreadable and could not be recreated: {source}")]
    Unrecoverable {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

const SCHEMA: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;

    CREATE TABLE IF NOT EXISTS url_cache (
        key TEXT PRIMARY KEY,
        original_url TEXT NOT NULL,
        resolved_url TEXT NOT NULL,
        normalized_url TEXT NOT NULL,
        domain TEXT NOT NULL,
        status_code INTEGER,
        redirect_count INTEGER NOT NULL,
        success INTEGER NOT NULL,
        resolution_worked INTEGER NOT NULL,
        truncated INTEGER NOT NULL,
        relaxed_tls INTEGER NOT NULL,
        error TEXT,
        response_time REAL NOT NULL,
        cached_at TEXT NOT NULL
    );
"#;

/// Cache key for a URL: SHA256 of its normalized form
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_url(url).as_bytes());
    hex::encode(hasher.finalize())
}

/// SQLite-backed map from normalized original URL to its resolution
pub struct CacheStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl CacheStore {
    /// Open (or create) the cache file.
    ///
    /// A file that is not a usable database is moved aside and replaced with
    /// an empty cache; only a failure to create the replacement is an error.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = match Self::open_and_init(path) {
            Ok(conn) => conn,
            Err(e) => {
                let aside = path.with_extension(format!(
                    "corrupt-{}.db",
                    Utc::now().format("%Y%m%d%H%M%S")
                ));
                warn!(
                    "Cache {} is unreadable ({}), moving it to {} and starting cold",
                    path.display(),
                    e,
                    aside.display()
                );
                std::fs::rename(path, &aside)?;
                Self::open_and_init(path).map_err(|source| CacheError::Unrecoverable {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        };

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        info!(
            "Opened resolution cache {} ({} entries)",
            path.display(),
            store.len()?
        );
        Ok(store)
    }

    /// Cache that lives only for the current process
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn open_and_init(path: &Path) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(rusqlite::Error::InvalidQuery);
        }
        Ok(conn)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Cached resolution for a URL, keyed by its normalized form
    pub fn get(&self, url: &str) -> Result<Option<UrlResolution>, CacheError> {
        let key = cache_key(url);
        let conn = self.conn.lock();
        let resolution = conn
            .query_row(
                r#"
                SELECT original_url, resolved_url, normalized_url, domain, status_code,
                       redirect_count, success, resolution_worked, truncated, relaxed_tls,
                       error, response_time, cached_at
                FROM url_cache WHERE key = ?1
                "#,
                params![key],
                row_to_resolution,
            )
            .optional()?;
        if resolution.is_some() {
            debug!("Cache hit for {}", url);
        }
        Ok(resolution)
    }

    /// Insert or replace the entry for `resolution.original_url`
    pub fn put(&self, resolution: &UrlResolution) -> Result<(), CacheError> {
        let key = cache_key(&resolution.original_url);
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO url_cache (
                key, original_url, resolved_url, normalized_url, domain, status_code,
                redirect_count, success, resolution_worked, truncated, relaxed_tls,
                error, response_time, cached_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                key,
                resolution.original_url,
                resolution.resolved_url,
                resolution.normalized_url,
                resolution.domain,
                resolution.status_code,
                resolution.redirect_count as i64,
                resolution.success,
                resolution.resolution_worked,
                resolution.truncated,
                resolution.relaxed_tls,
                resolution.error.map(|e| e.to_string()),
                resolution.response_time,
                resolution.cached_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Number of cached resolutions
    pub fn len(&self) -> Result<usize, CacheError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM url_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

fn row_to_resolution(row: &Row<'_>) -> rusqlite::Result<UrlResolution> {
    let error: Option<String> = row.get(10)?;
    let cached_at: String = row.get(12)?;
    let redirect_count: i64 = row.get(5)?;
    Ok(UrlResolution {
        original_url: row.get(0)?,
        resolved_url: row.get(1)?,
        normalized_url: row.get(2)?,
        domain: row.get(3)?,
        status_code: row.get(4)?,
        redirect_count: redirect_count.max(0) as usize,
        success: row.get(6)?,
        resolution_worked: row.get(7)?,
        truncated: row.get(8)?,
        relaxed_tls: row.get(9)?,
        error: error.and_then(|e| e.parse::<ErrorKind>().ok()),
        response_time: row.get(11)?,
        cached_at: DateTime::parse_from_rfc3339(&cached_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolution(original: &str, resolved: &str) -> UrlResolution {
        let mut r = UrlResolution::pre_resolved(original, resolved);
        r.status_code = Some(200);
        r.redirect_count = 2;
        r.response_time = 0.25;
        r
    }

    #[test]
    fn test_put_and_get() {
        let cache = CacheStore::in_memory().unwrap();
        assert!(cache.get("http://bit.ly/abc").unwrap().is_none());

        let r = resolution("http://bit.ly/abc", "https://news.example.com/story");
        cache.put(&r).unwrap();

        let hit = cache.get("http://bit.ly/abc").unwrap().unwrap();
        assert_eq!(hit.resolved_url, "https://news.example.com/story");
        assert_eq!(hit.redirect_count, 2);
        assert_eq!(hit.status_code, Some(200));
        assert!(hit.resolution_worked);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_lookup_uses_normalized_key() {
        let cache = CacheStore::in_memory().unwrap();
        cache
            .put(&resolution("http://bit.ly/abc", "https://a.com/x"))
            .unwrap();
        assert!(cache
            .get("http://BIT.ly/abc/?utm_source=twitter#frag")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_one_entry_per_normalized_url() {
        let cache = CacheStore::in_memory().unwrap();
        cache
            .put(&resolution("http://bit.ly/abc", "https://a.com/old"))
            .unwrap();
        cache
            .put(&resolution("http://bit.ly/abc?fbclid=1", "https://a.com/new"))
            .unwrap();
        assert_eq!(cache.len().unwrap(), 1);
        let hit = cache.get("http://bit.ly/abc").unwrap().unwrap();
        assert_eq!(hit.resolved_url, "https://a.com/new");
    }

    #[test]
    fn test_failed_resolution_round_trips_error() {
        let cache = CacheStore::in_memory().unwrap();
        let r = UrlResolution::failed("https://down.example", "https://down.example", ErrorKind::Timeout);
        cache.put(&r).unwrap();
        let hit = cache.get("https://down.example").unwrap().unwrap();
        assert!(!hit.success);
        assert_eq!(hit.error, Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache").join("url_cache.db");
        {
            let cache = CacheStore::open(&path).unwrap();
            cache
                .put(&resolution("https://t.co/xyz", "https://b.org/article"))
                .unwrap();
        }
        let cache = CacheStore::open(&path).unwrap();
        let hit = cache.get("https://t.co/xyz").unwrap().unwrap();
        assert_eq!(hit.resolved_url, "https://b.org/article");
    }

    #[test]
    fn test_corrupt_file_starts_cold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("url_cache.db");
        std::fs::write(&path, b"this is definitely not an sqlite database, just noise").unwrap();

        let cache = CacheStore::open(&path).unwrap();
        assert!(cache.is_empty().unwrap());
        cache
            .put(&resolution("https://t.co/1", "https://b.org/1"))
            .unwrap();
        assert_eq!(cache.len().unwrap(), 1);

        let moved_aside = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains("corrupt-"));
        assert!(moved_aside);
    }
}
