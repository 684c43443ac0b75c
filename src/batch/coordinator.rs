//! Batch coordinator that drives a full scraping run

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::output::seed_record;
use super::{BatchCheckpoint, BatchError, BatchFiles, BatchProgress, RunStats, CHECKPOINT_FILE};
use crate::config::{Config, LogFormat};
use crate::scraping::{CacheStore, DuplicateFilter, HttpClients, UrlPipeline, UrlTask, WorkerPool};
use crate::types::{ContentRecord, ErrorKind};

/// What a run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub input_urls: usize,
    /// Input URLs dropped before batching because an earlier run handled them
    pub skipped_known: usize,
    pub batches_written: Vec<usize>,
    /// Counters for this run only
    pub stats: RunStats,
    /// Stopped by the cancellation token before all work was dispatched
    pub interrupted: bool,
    pub elapsed_secs: f64,
}

/// Batch checkpoint manager
pub struct BatchCoordinator {
    config: Config,
    quiet: bool,
}

impl BatchCoordinator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            quiet: false,
        }
    }

    /// Set quiet mode (no progress bar)
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Process `tasks` in batches of `batch_size`, resuming after whatever the
    /// output directory already holds.
    ///
    /// Cancelling `cancel` stops dispatch, drains in-flight work and commits
    /// the partial batch; the run then returns `Ok` with `interrupted` set.
    pub async fn run(
        &self,
        tasks: Vec<UrlTask>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, BatchError> {
        let pipeline_cfg = &self.config.pipeline;
        let files = BatchFiles::create(&pipeline_cfg.output_dir)?;
        let checkpoint_path = files.dir().join(CHECKPOINT_FILE);
        let cache = Arc::new(CacheStore::open(&self.config.cache_path())?);
        let filter = Arc::new(DuplicateFilter::load(&self.config.tracker_path()));

        let last_completed = files.last_completed()?;
        let seeded = files.seed_filter(&filter)?;
        debug!("Seeded duplicate filter from {} prior records", seeded);

        let next_batch = last_completed + 1;
        for stale in files.stale_spills(next_batch) {
            warn!("Removing stale partial file {}", stale.display());
            std::fs::remove_file(&stale).map_err(BatchError::io(&stale))?;
        }
        let orphan = files.read_spill(next_batch)?;
        if !orphan.is_empty() {
            info!(
                "Recovered {} records of interrupted batch {}",
                orphan.len(),
                next_batch
            );
            for record in &orphan {
                seed_record(&filter, record);
                filter.mark(&record.original_url, Some(&record.scrape_url));
            }
        }

        let input_urls = tasks.len();
        let remaining: Vec<UrlTask> = tasks
            .into_iter()
            .filter(|t| !filter.seen(&t.original_url, t.pre_resolved.as_deref()))
            .collect();
        let skipped_known = input_urls - remaining.len();
        if skipped_known > 0 {
            info!("Skipping {} URLs handled by earlier runs", skipped_known);
        }

        let mut batches = into_batches(remaining, pipeline_cfg.batch_size);
        if let Some(resume) = pipeline_cfg.resume_from_batch {
            if resume <= last_completed {
                warn!(
                    "resume_from_batch {} is already committed, continuing at batch {}",
                    resume, next_batch
                );
            } else {
                let skip = (resume - next_batch).min(batches.len());
                if skip > 0 {
                    info!("Skipping {} batches of pending work (resume_from_batch {})", skip, resume);
                    batches.drain(..skip);
                }
            }
        }
        if batches.is_empty() && !orphan.is_empty() {
            batches.push(Vec::new());
        }
        let total_batches = last_completed + batches.len();
        if let Some(max) = pipeline_cfg.max_batches {
            batches.truncate(max);
        }

        let mut checkpoint = BatchCheckpoint::new(Uuid::new_v4());
        if let Some(previous) = BatchCheckpoint::load_optional(&checkpoint_path) {
            if !previous.shutdown_clean {
                warn!(
                    "Previous run {} did not shut down cleanly (last URL: {})",
                    previous.run_id,
                    previous.last_processed_url.as_deref().unwrap_or("none")
                );
            }
            checkpoint.stats = previous.stats;
        }
        checkpoint.current_batch = last_completed;
        checkpoint.last_completed_batch = last_completed;
        checkpoint.total_batches = total_batches;

        let run_urls: usize = batches.iter().map(Vec::len).sum::<usize>() + orphan.len();
        info!(
            "Run {}: {} batches to process ({} URLs), resuming after batch {} of {}",
            checkpoint.run_id,
            batches.len(),
            run_urls,
            last_completed,
            total_batches
        );

        let quiet = self.quiet
            || self.config.logging.format == LogFormat::Json
            || !std::io::stderr().is_terminal();
        let pipeline = Arc::new(UrlPipeline::new(&self.config, cache, filter.clone()));
        let mut pool = WorkerPool::start(pipeline.clone(), &self.config, pipeline_cfg.workers)?;
        let probe_clients = HttpClients::new(&self.config.network)?;

        let mut run = BatchRun {
            files,
            checkpoint,
            checkpoint_path,
            tracker_path: self.config.tracker_path(),
            filter,
            pipeline,
            probe_clients,
            progress: BatchProgress::new(run_urls as u64, quiet),
            stats: RunStats::default(),
            checkpoint_interval: pipeline_cfg.checkpoint_interval.max(1),
            batches_written: Vec::new(),
        };

        let result = run.drive(&mut pool, batches, orphan, &cancel).await;
        pool.close().await;

        match result {
            Ok(interrupted) => {
                run.checkpoint.shutdown_clean = true;
                run.checkpoint.save(&run.checkpoint_path)?;
                if interrupted {
                    run.progress.abandon("Interrupted");
                    info!("Run interrupted, progress saved");
                } else {
                    run.progress.finish(&run.stats);
                }
                info!(
                    "Run {} finished: {} processed, {} ok, {} failed, {} duplicates, {} paywalled ({:.1} urls/s)",
                    run.checkpoint.run_id,
                    run.stats.total_processed,
                    run.stats.successful,
                    run.stats.failed,
                    run.stats.duplicates,
                    run.stats.paywalled,
                    run.progress.rate(run.stats.total_processed)
                );
                Ok(RunSummary {
                    run_id: run.checkpoint.run_id,
                    input_urls,
                    skipped_known,
                    batches_written: run.batches_written,
                    stats: run.stats,
                    interrupted,
                    elapsed_secs: run.progress.elapsed_secs(),
                })
            }
            Err(e) => {
                error!("Run failed: {}", e);
                run.progress.abandon("Failed");
                run.checkpoint.shutdown_clean = false;
                if let Err(save_err) = run.checkpoint.save(&run.checkpoint_path) {
                    error!("Could not save checkpoint after failure: {}", save_err);
                }
                Err(e)
            }
        }
    }
}

fn into_batches(tasks: Vec<UrlTask>, size: usize) -> Vec<Vec<UrlTask>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(tasks.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for task in tasks {
        current.push(task);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// State of one run between batches
struct BatchRun {
    files: BatchFiles,
    checkpoint: BatchCheckpoint,
    checkpoint_path: PathBuf,
    tracker_path: PathBuf,
    filter: Arc<DuplicateFilter>,
    pipeline: Arc<UrlPipeline>,
    probe_clients: HttpClients,
    progress: BatchProgress,
    stats: RunStats,
    checkpoint_interval: usize,
    batches_written: Vec<usize>,
}

/// Records of the batch in progress
struct OpenBatch {
    number: usize,
    records: Vec<ContentRecord>,
    /// Records before this index are already in the spill file
    spilled: usize,
    since_checkpoint: usize,
}

impl BatchRun {
    /// Returns `true` when stopped by cancellation
    async fn drive(
        &mut self,
        pool: &mut WorkerPool,
        batches: Vec<Vec<UrlTask>>,
        mut orphan: Vec<ContentRecord>,
        cancel: &CancellationToken,
    ) -> Result<bool, BatchError> {
        let first = self.checkpoint.last_completed_batch + 1;
        for (i, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(true);
            }
            let number = first + i;
            let recovered = std::mem::take(&mut orphan);

            self.checkpoint.current_batch = number;
            self.checkpoint.batch_total_urls = batch.len() + recovered.len();
            self.checkpoint.batch_completed_urls = recovered.len();
            self.checkpoint.save(&self.checkpoint_path)?;
            info!("Starting batch {} ({} URLs)", number, batch.len());

            let mut open = OpenBatch {
                number,
                spilled: recovered.len(),
                records: recovered,
                since_checkpoint: 0,
            };
            let interrupted = self.dispatch(pool, batch, &mut open, cancel).await?;
            self.commit(open, interrupted)?;
            if interrupted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Feed one batch through the pool and collect every result
    async fn dispatch(
        &mut self,
        pool: &mut WorkerPool,
        batch: Vec<UrlTask>,
        open: &mut OpenBatch,
        cancel: &CancellationToken,
    ) -> Result<bool, BatchError> {
        let connectivity = self.pipeline.connectivity().clone();
        let mut queue = batch.into_iter();
        let mut in_flight = 0usize;
        let mut interrupted = false;

        loop {
            while !interrupted && in_flight < pool.capacity() {
                if cancel.is_cancelled() {
                    info!("Shutdown requested, draining {} in-flight URLs", in_flight);
                    interrupted = true;
                    break;
                }
                if connectivity.is_degraded() {
                    self.persist_progress(open)?;
                    self.progress.note("paused: waiting for connectivity");
                    if !connectivity.wait_until_online(&self.probe_clients, cancel).await {
                        interrupted = true;
                        break;
                    }
                }
                let Some(task) = queue.next() else {
                    break;
                };
                if !pool.submit(task).await {
                    error!("Worker pool stopped accepting tasks");
                    interrupted = true;
                    break;
                }
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            let Some(record) = pool.recv().await else {
                error!("Worker pool closed with {} URLs in flight", in_flight);
                break;
            };
            in_flight -= 1;
            self.handle_record(open, record)?;
        }
        Ok(interrupted)
    }

    fn handle_record(&mut self, open: &mut OpenBatch, record: ContentRecord) -> Result<(), BatchError> {
        debug!(
            "{} -> {} ({})",
            record.original_url,
            record.scrape_url,
            record.error.map(|e| e.to_string()).unwrap_or_else(|| "ok".to_string())
        );
        self.stats.record(&record);
        self.checkpoint.stats.record(&record);
        self.checkpoint.batch_completed_urls += 1;
        self.progress
            .record_done(open.number, &record.original_url, &self.checkpoint.stats);
        self.checkpoint.last_processed_url = Some(record.original_url.clone());

        if record.error != Some(ErrorKind::AlreadyScraped) {
            self.filter.mark(&record.original_url, Some(&record.scrape_url));
            open.records.push(record);
        }

        open.since_checkpoint += 1;
        if open.since_checkpoint >= self.checkpoint_interval {
            self.persist_progress(open)?;
        }
        Ok(())
    }

    /// Spill unsaved records, then flush the tracker, then save the checkpoint
    fn persist_progress(&mut self, open: &mut OpenBatch) -> Result<(), BatchError> {
        self.files
            .append_spill(open.number, &open.records[open.spilled..])?;
        open.spilled = open.records.len();
        open.since_checkpoint = 0;
        self.filter
            .flush_pending()
            .map_err(BatchError::io(&self.tracker_path))?;
        self.checkpoint.save(&self.checkpoint_path)
    }

    /// Write the batch file, then flush the tracker and drop the spill file
    fn commit(&mut self, open: OpenBatch, interrupted: bool) -> Result<(), BatchError> {
        if interrupted && open.records.is_empty() {
            self.filter
                .flush_pending()
                .map_err(BatchError::io(&self.tracker_path))?;
            return Ok(());
        }

        let path = self.files.write_batch(open.number, &open.records)?;
        self.filter
            .flush_pending()
            .map_err(BatchError::io(&self.tracker_path))?;
        self.files.remove_spill(open.number)?;

        self.checkpoint.last_completed_batch = open.number;
        self.checkpoint.save(&self.checkpoint_path)?;
        self.batches_written.push(open.number);
        info!(
            "Committed batch {} with {} records to {}",
            open.number,
            open.records.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path as AxumPath;
    use axum::http::{header, StatusCode};
    use axum::response::Html;
    use axum::routing::get;
    use axum::Router;
    use tempfile::TempDir;

    fn article(topic: &str) -> String {
        format!(
            "<html><head><title>{topic}</title></head><body><article>\
             <p>Reporting on {topic} continues with statements from several residents and local officials.</p>\
             <p>The council meets again next month to review the {topic} plans in more detail.</p>\
             </article></body></html>"
        )
    }

    async fn serve() -> String {
        let app = Router::new()
            .route(
                "/s/:id",
                get(|AxumPath(id): AxumPath<String>| async move {
                    (StatusCode::FOUND, [(header::LOCATION, format!("/story/{}", id))])
                }),
            )
            .route(
                "/story/:id",
                get(|AxumPath(id): AxumPath<String>| async move { Html(article(&format!("topic {}", id))) }),
            )
            .route("/health", get(|| async { "ok" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(dir: &TempDir, batch_size: usize) -> Config {
        let mut config = Config::default();
        config.pipeline.output_dir = dir.path().to_path_buf();
        config.pipeline.batch_size = batch_size;
        config.pipeline.workers = 2;
        config.pipeline.request_delay_ms = 0;
        config.pipeline.checkpoint_interval = 2;
        config
    }

    fn tasks(base: &str, ids: impl IntoIterator<Item = usize>) -> Vec<UrlTask> {
        ids.into_iter()
            .map(|i| UrlTask::new(format!("{}/s/{}", base, i)))
            .collect()
    }

    #[test]
    fn test_into_batches() {
        let tasks: Vec<UrlTask> = (0..7).map(|i| UrlTask::new(i.to_string())).collect();
        let batches = into_batches(tasks, 3);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);
        assert!(into_batches(Vec::new(), 3).is_empty());
    }

    #[tokio::test]
    async fn test_full_run_writes_contiguous_batches() {
        let base = serve().await;
        let dir = TempDir::new().unwrap();
        let coordinator = BatchCoordinator::new(config(&dir, 3)).with_quiet(true);

        let summary = coordinator
            .run(tasks(&base, 1..=7), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.batches_written, vec![1, 2, 3]);
        assert_eq!(summary.stats.successful, 7);
        assert!(!summary.interrupted);

        let files = BatchFiles::open(dir.path());
        assert_eq!(files.completed_batches().unwrap(), vec![1, 2, 3]);
        assert_eq!(files.read_batch(3).unwrap().len(), 1);
        assert!(files.stale_spills(0).is_empty());

        let checkpoint = BatchCheckpoint::load(&dir.path().join(CHECKPOINT_FILE)).unwrap();
        assert!(checkpoint.shutdown_clean);
        assert_eq!(checkpoint.last_completed_batch, 3);
        assert_eq!(checkpoint.total_batches, 3);
        assert_eq!(checkpoint.completion_percentage, 100.0);
        assert_eq!(checkpoint.stats.successful, 7);

        let tracker = std::fs::read_to_string(dir.path().join("processed_urls.txt")).unwrap();
        assert!(tracker.lines().any(|l| l == format!("{}/s/4", base)));
        assert!(tracker.lines().any(|l| l == format!("{}/story/4", base)));
    }

    #[tokio::test]
    async fn test_max_batches_then_resume() {
        let base = serve().await;
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, 2);
        cfg.pipeline.max_batches = Some(1);

        let first = BatchCoordinator::new(cfg.clone())
            .with_quiet(true)
            .run(tasks(&base, 1..=5), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.batches_written, vec![1]);

        cfg.pipeline.max_batches = None;
        let second = BatchCoordinator::new(cfg)
            .with_quiet(true)
            .run(tasks(&base, 1..=5), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.skipped_known, 2);
        assert_eq!(second.batches_written, vec![2, 3]);
        assert_eq!(second.stats.total_processed, 3);

        let checkpoint = BatchCheckpoint::load(&dir.path().join(CHECKPOINT_FILE)).unwrap();
        // carried over from the first run
        assert_eq!(checkpoint.stats.successful, 5);
    }

    #[tokio::test]
    async fn test_resume_override_is_clamped_or_skips() {
        let base = serve().await;
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, 2);
        cfg.pipeline.max_batches = Some(1);
        BatchCoordinator::new(cfg.clone())
            .with_quiet(true)
            .run(tasks(&base, 1..=2), CancellationToken::new())
            .await
            .unwrap();

        // batch 1 is committed; asking for it again continues at 2
        cfg.pipeline.resume_from_batch = Some(1);
        let clamped = BatchCoordinator::new(cfg.clone())
            .with_quiet(true)
            .run(tasks(&base, 1..=4), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(clamped.batches_written, vec![2]);

        // pending work is [5,6] [7,8]; resuming at batch 4 skips [5,6]
        cfg.pipeline.resume_from_batch = Some(4);
        let skipped = BatchCoordinator::new(cfg)
            .with_quiet(true)
            .run(tasks(&base, 1..=8), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(skipped.batches_written, vec![3]);
        let files = BatchFiles::open(dir.path());
        let originals: Vec<String> = files
            .read_batch(3)
            .unwrap()
            .into_iter()
            .map(|r| r.original_url)
            .collect();
        assert!(originals.contains(&format!("{}/s/7", base)));
        assert!(!originals.contains(&format!("{}/s/5", base)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let base = serve().await;
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = BatchCoordinator::new(config(&dir, 3))
            .with_quiet(true)
            .run(tasks(&base, 1..=4), cancel)
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert!(summary.batches_written.is_empty());
        let checkpoint = BatchCheckpoint::load(&dir.path().join(CHECKPOINT_FILE)).unwrap();
        assert!(checkpoint.shutdown_clean);
        assert_eq!(checkpoint.last_completed_batch, 0);
    }

    #[tokio::test]
    async fn test_orphaned_spill_is_merged() {
        let base = serve().await;
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, 5);

        // a crashed run left two records of batch 1 behind
        let files = BatchFiles::create(dir.path()).unwrap();
        let mut recovered = Vec::new();
        for i in [1, 2] {
            let mut r = ContentRecord::from_resolution(&crate::types::UrlResolution::pre_resolved(
                &format!("{}/s/{}", base, i),
                &format!("{}/story/{}", base, i),
            ));
            r.success = true;
            r.text = article(&format!("topic {}", i));
            recovered.push(r);
        }
        files.append_spill(1, &recovered).unwrap();
        std::fs::write(files.spill_path(7), "").unwrap();

        let summary = BatchCoordinator::new(cfg)
            .with_quiet(true)
            .run(tasks(&base, 1..=4), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.skipped_known, 2);
        assert_eq!(summary.batches_written, vec![1]);
        assert_eq!(summary.stats.total_processed, 2);

        let batch = files.read_batch(1).unwrap();
        assert_eq!(batch.len(), 4);
        assert!(!files.spill_path(1).exists());
        assert!(!files.spill_path(7).exists());
    }

    #[tokio::test]
    async fn test_pause_on_degraded_connectivity() {
        let base = serve().await;
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, 10);
        cfg.pipeline.workers = 1;
        cfg.network.connectivity.error_threshold = 2;
        cfg.network.connectivity.probe_url = format!("{}/health", base);
        cfg.network.connectivity.probe_interval_secs = 1;

        let mut input: Vec<UrlTask> = (1..=3)
            .map(|i| UrlTask::new(format!("http://127.0.0.1:1/dead/{}", i)))
            .collect();
        input.extend(tasks(&base, 1..=2));

        let summary = BatchCoordinator::new(cfg)
            .with_quiet(true)
            .run(input, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.stats.total_processed, 5);
        assert_eq!(summary.stats.failed, 3);
        assert_eq!(summary.stats.successful, 2);
        let batch = BatchFiles::open(dir.path()).read_batch(1).unwrap();
        assert_eq!(
            batch
                .iter()
                .filter(|r| r.error == Some(ErrorKind::ConnectionError))
                .count(),
            3
        );
    }
}
