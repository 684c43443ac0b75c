use anyhow::{Context, Result};
use linkharvest::config::Config;
use linkharvest::scraping::{CacheStore, HttpClients, Resolver};
use std::sync::Arc;
use tracing::info;

pub async fn resolve_urls(config: Config, urls: Vec<String>, json: bool) -> Result<()> {
    let cache_path = config.cache_path();
    let cache = Arc::new(
        CacheStore::open(&cache_path)
            .with_context(|| format!("Failed to open cache {}", cache_path.display()))?,
    );
    let clients = HttpClients::new(&config.network).context("Failed to build HTTP clients")?;
    let resolver = Resolver::new(cache, &config.network, &config.pipeline);

    info!("Resolving {} URLs", urls.len());
    for url in &urls {
        let resolution = resolver.resolve(&clients, url).await;
        if json {
            println!("{}", serde_json::to_string(&resolution)?);
            continue;
        }
        let status = resolution
            .status_code
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let outcome = match resolution.error {
            Some(error) => error.to_string(),
            None if resolution.truncated => "truncated".to_string(),
            None => "ok".to_string(),
        };
        println!(
            "{} -> {} [status {}, {} hops, {}]",
            resolution.original_url, resolution.resolved_url, status, resolution.redirect_count, outcome
        );
    }
    Ok(())
}
