//! End-to-end tests for linkharvest
//!
//! Each test serves a small news site from an in-process axum server and runs
//! the batch pipeline against it in a temporary output directory.

use axum::extract::Path as AxumPath;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use linkharvest::batch::{combine_batches, load_input, BatchCheckpoint, BatchCoordinator, BatchFiles, CHECKPOINT_FILE};
use linkharvest::config::Config;
use linkharvest::scraping::UrlTask;
use linkharvest::types::{ContentRecord, ErrorKind, PaywallType};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn article(topic: &str) -> String {
    format!(
        "<html lang=\"en\"><head><title>{topic}</title>\
         <meta name=\"author\" content=\"Desk Reporter\"></head><body>\
         <nav>Home | World | Sport</nav><article>\
         <p>Residents gathered on Tuesday to discuss {topic}, which has divided opinion across the town.</p>\
         <p>Officials said a decision on {topic} would follow a public consultation later this year.</p>\
         </article><footer>Contact us</footer></body></html>"
    )
}

fn paywalled() -> String {
    format!(
        "<html><head><title>Members only</title></head><body><article>\
         <p>The first paragraph of this exclusive investigation is free to read for everyone who visits.</p>\
         <div class=\"paywall\">Subscribe to continue reading. You have reached your limit of free articles.</div>\
         </article>{}</body></html>",
        "<p>padding</p>".repeat(100)
    )
}

async fn serve() -> String {
    let app = Router::new()
        .route(
            "/s/:id",
            get(|AxumPath(id): AxumPath<String>| async move {
                (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, format!("/story/{}", id))])
            }),
        )
        .route(
            "/story/:id",
            get(|AxumPath(id): AxumPath<String>| async move { Html(article(&format!("the {} proposal", id))) }),
        )
        .route(
            "/slow/:id",
            get(|AxumPath(id): AxumPath<String>| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Html(article(&format!("the delayed {} report", id)))
            }),
        )
        .route("/mirror/:id", get(|| async { Html(article("the bridge proposal")) }))
        .route(
            "/refresh",
            get(|| async {
                Html("<html><head><meta http-equiv=\"refresh\" content=\"0; url=/story/refreshed\"></head></html>")
            }),
        )
        .route("/members", get(|| async { Html(paywalled()) }))
        .route("/feed.json", get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{}") }))
        .route("/gone", get(|| async { StatusCode::NOT_FOUND.into_response() }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(dir: &Path, batch_size: usize, workers: usize) -> Config {
    let mut config = Config::default();
    config.pipeline.output_dir = dir.to_path_buf();
    config.pipeline.batch_size = batch_size;
    config.pipeline.workers = workers;
    config.pipeline.request_delay_ms = 0;
    config.pipeline.checkpoint_interval = 2;
    config
}

fn write_input(dir: &Path, urls: &[String]) -> std::path::PathBuf {
    let path = dir.join("input.csv");
    let mut content = String::from("original_url\n");
    for url in urls {
        content.push_str(url);
        content.push('\n');
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn all_records(dir: &Path) -> Vec<(usize, ContentRecord)> {
    let files = BatchFiles::open(dir);
    let mut records = Vec::new();
    for batch in files.completed_batches().unwrap() {
        for record in files.read_batch(batch).unwrap() {
            records.push((batch, record));
        }
    }
    records
}

/// No URL in two batch files, no repeated hash outside `duplicate_content`,
/// contiguous batch numbers
fn assert_output_invariants(dir: &Path) {
    let files = BatchFiles::open(dir);
    let batches = files.completed_batches().unwrap();
    assert_eq!(batches, (1..=batches.len()).collect::<Vec<_>>());

    let records = all_records(dir);
    let mut seen_urls = HashSet::new();
    let mut seen_hashes = HashSet::new();
    for (batch, record) in &records {
        assert!(
            seen_urls.insert(record.original_url.clone()),
            "{} appears twice (batch {})",
            record.original_url,
            batch
        );
        assert_ne!(record.error, Some(ErrorKind::AlreadyScraped));
        if record.error != Some(ErrorKind::DuplicateContent) {
            if let Some(hash) = &record.content_hash {
                assert!(seen_hashes.insert(hash.clone()), "hash {} repeated", hash);
            }
        }
    }
}

#[tokio::test]
async fn test_full_run_end_to_end() {
    let base = serve().await;
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");

    let urls = vec![
        format!("{}/s/bridge", base),
        format!("{}/s/library", base),
        format!("{}/refresh", base),
        format!("{}/members", base),
        format!("{}/feed.json", base),
        format!("{}/gone", base),
        format!("{}/mirror/1", base),
        format!("{}/s/bridge?utm_source=newsletter", base),
    ];
    let input = load_input(&write_input(dir.path(), &urls)).unwrap();

    let summary = BatchCoordinator::new(config(&out, 3, 1))
        .with_quiet(true)
        .run(input.tasks, CancellationToken::new())
        .await
        .unwrap();
    assert!(!summary.interrupted);
    assert_eq!(summary.batches_written, vec![1, 2, 3]);
    assert_eq!(summary.stats.total_processed, 8);
    assert_output_invariants(&out);

    let records: HashMap<String, ContentRecord> = all_records(&out)
        .into_iter()
        .map(|(_, r)| (r.original_url.clone(), r))
        .collect();
    // the utm variant is counted but not written
    assert_eq!(records.len(), 7);
    assert_eq!(summary.stats.duplicates, 2);

    let bridge = &records[&format!("{}/s/bridge", base)];
    assert!(bridge.success);
    assert_eq!(bridge.scrape_url, format!("{}/story/bridge", base));
    assert_eq!(bridge.redirect_count, 1);
    assert_eq!(bridge.author.as_deref(), Some("Desk Reporter"));
    assert_eq!(bridge.language.as_deref(), Some("en"));
    assert!(bridge.text.contains("public consultation"));

    let refreshed = &records[&format!("{}/refresh", base)];
    assert_eq!(refreshed.scrape_url, format!("{}/story/refreshed", base));
    assert!(refreshed.success);

    let members = &records[&format!("{}/members", base)];
    assert!(members.paywall_detected);
    assert_eq!(members.paywall_type, PaywallType::Generic);
    assert!(!members.paywall_indicators.is_empty());

    assert_eq!(
        records[&format!("{}/feed.json", base)].error,
        Some(ErrorKind::NotHtmlContent)
    );
    assert_eq!(records[&format!("{}/gone", base)].error, Some(ErrorKind::Http(404)));
    assert_eq!(
        records[&format!("{}/mirror/1", base)].error,
        Some(ErrorKind::DuplicateContent)
    );

    let checkpoint = BatchCheckpoint::load(&out.join(CHECKPOINT_FILE)).unwrap();
    assert!(checkpoint.shutdown_clean);
    assert_eq!(checkpoint.completion_percentage, 100.0);

    let combined = dir.path().join("combined.csv");
    let combine = combine_batches(&BatchFiles::open(&out), &combined).unwrap();
    assert_eq!(combine.rows, 7);
    assert_eq!(combine.paywalled, 1);
}

#[tokio::test]
async fn test_resume_after_interruption() {
    let base = serve().await;
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let tasks: Vec<UrlTask> = (1..=10)
        .map(|i| UrlTask::new(format!("{}/slow/{}", base, i)))
        .collect();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });
    let first = BatchCoordinator::new(config(&out, 6, 1))
        .with_quiet(true)
        .run(tasks.clone(), cancel)
        .await
        .unwrap();
    assert!(first.interrupted);
    assert_output_invariants(&out);
    let before: HashSet<String> = all_records(&out)
        .into_iter()
        .filter(|(_, r)| r.success)
        .map(|(_, r)| r.original_url)
        .collect();
    assert!(before.len() < 10);
    let checkpoint = BatchCheckpoint::load(&out.join(CHECKPOINT_FILE)).unwrap();
    assert!(checkpoint.shutdown_clean);

    let second = BatchCoordinator::new(config(&out, 6, 2))
        .with_quiet(true)
        .run(tasks, CancellationToken::new())
        .await
        .unwrap();
    assert!(!second.interrupted);
    assert_eq!(second.skipped_known, first.stats.total_processed);
    assert_output_invariants(&out);

    let after: HashSet<String> = all_records(&out)
        .into_iter()
        .filter(|(_, r)| r.success)
        .map(|(_, r)| r.original_url)
        .collect();
    assert!(after.is_superset(&before));
    assert_eq!(after.len(), 10);
}

#[tokio::test]
async fn test_duplicates_suppressed_across_runs() {
    let base = serve().await;
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");

    let first_urls = vec![format!("{}/s/harbour", base), format!("{}/s/museum", base)];
    BatchCoordinator::new(config(&out, 10, 2))
        .with_quiet(true)
        .run(first_urls.iter().map(UrlTask::new).collect(), CancellationToken::new())
        .await
        .unwrap();

    // a restart reloads the tracker, batch files and cache from disk
    let second_urls = vec![
        format!("{}/s/harbour?utm_campaign=spring", base),
        format!("{}/story/museum/", base),
        format!("{}/s/park", base),
        format!("{}/mirror/2", base),
    ];
    let second = BatchCoordinator::new(config(&out, 10, 1))
        .with_quiet(true)
        .run(second_urls.iter().map(UrlTask::new).collect(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.skipped_known, 2);
    assert_eq!(second.batches_written, vec![2]);
    assert_output_invariants(&out);

    let batch = BatchFiles::open(&out).read_batch(2).unwrap();
    let originals: HashSet<String> = batch.iter().map(|r| r.original_url.clone()).collect();
    assert_eq!(
        originals,
        HashSet::from([format!("{}/s/park", base), format!("{}/mirror/2", base)])
    );
    // mirror/2 serves fresh text, so it is kept
    assert!(batch.iter().all(|r| r.success));

    let tracker = std::fs::read_to_string(out.join("processed_urls.txt")).unwrap();
    assert!(tracker.lines().any(|l| l == format!("{}/story/park", base)));
}
