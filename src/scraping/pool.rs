//! Worker pool
//!
//! `UrlPipeline` is the per-URL sequence (claim, resolve, fetch and extract,
//! paywall scoring). `WorkerPool` runs it on N workers that pull from one
//! bounded queue; each worker owns its own `HttpClients` so connection pools
//! are reused across that worker's tasks without being shared.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{
    CacheStore, ConnectivityMonitor, DuplicateFilter, FetchEngine, HttpClients, PaywallDetector,
    Resolver,
};
use crate::config::{Config, ImprovementPolicy};
use crate::types::{ContentRecord, ErrorKind, UrlResolution};

/// One input row scheduled for scraping
#[derive(Debug, Clone, PartialEq)]
pub struct UrlTask {
    pub original_url: String,
    /// Resolved URL from an earlier stage; skips network resolution
    pub pre_resolved: Option<String>,
    /// Word count of an earlier scrape, for the improvement check
    pub old_word_count: Option<usize>,
}

impl UrlTask {
    pub fn new(original_url: impl Into<String>) -> Self {
        Self {
            original_url: original_url.into(),
            pre_resolved: None,
            old_word_count: None,
        }
    }
}

/// The per-URL stages and the state they share
pub struct UrlPipeline {
    resolver: Resolver,
    fetcher: FetchEngine,
    paywall: PaywallDetector,
    filter: Arc<DuplicateFilter>,
    connectivity: Arc<ConnectivityMonitor>,
    improvement: ImprovementPolicy,
}

impl UrlPipeline {
    pub fn new(config: &Config, cache: Arc<CacheStore>, filter: Arc<DuplicateFilter>) -> Self {
        Self {
            resolver: Resolver::new(cache, &config.network, &config.pipeline),
            fetcher: FetchEngine::new(&config.network, &config.pipeline),
            paywall: PaywallDetector::new(&config.paywall),
            filter,
            connectivity: Arc::new(ConnectivityMonitor::new(
                &config.network.connectivity,
                &config.network,
            )),
            improvement: config.pipeline.improvement.clone(),
        }
    }

    pub fn filter(&self) -> &Arc<DuplicateFilter> {
        &self.filter
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Run every stage for one URL. Always yields a record.
    pub async fn process(&self, clients: &HttpClients, task: UrlTask) -> ContentRecord {
        let original = task.original_url.as_str();
        if !self.filter.claim(original, None) {
            debug!("Skipping already scraped {}", original);
            return ContentRecord::skipped(original, ErrorKind::AlreadyScraped);
        }

        let resolution = match &task.pre_resolved {
            Some(resolved) => UrlResolution::pre_resolved(original, resolved),
            None => self.resolver.resolve(clients, original).await,
        };
        if !resolution.success {
            self.connectivity.record(resolution.error);
            return ContentRecord::from_resolution(&resolution);
        }
        if !self.filter.claim_resolved(original, &resolution.resolved_url) {
            debug!(
                "Skipping {}: destination {} already scraped",
                original, resolution.resolved_url
            );
            let mut record = ContentRecord::from_resolution(&resolution);
            record.fail(ErrorKind::AlreadyScraped);
            return record;
        }

        let outcome = self
            .fetcher
            .fetch_and_extract(clients, &resolution, &self.filter)
            .await;
        self.connectivity.record(outcome.record.error);

        let mut record = outcome.record;
        if let Some(html) = outcome.html {
            record.set_paywall(self.paywall.detect(&record.scrape_url, &html));
        }
        if let Some(old) = task.old_word_count {
            record.content_improved =
                Some(record.success && self.improvement.is_improved(old, record.word_count));
        }
        record
    }
}

/// Bounded pool of scraping workers
pub struct WorkerPool {
    task_tx: mpsc::Sender<UrlTask>,
    result_rx: mpsc::UnboundedReceiver<ContentRecord>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    /// Start `workers` workers, each with its own HTTP clients
    pub fn start(
        pipeline: Arc<UrlPipeline>,
        config: &Config,
        workers: usize,
    ) -> Result<Self, reqwest::Error> {
        let workers = workers.max(1);
        let capacity = workers * 2;
        let (task_tx, task_rx) = mpsc::channel::<UrlTask>(capacity);
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let task_rx = Arc::new(AsyncMutex::new(task_rx));
        let delay = Duration::from_millis(config.pipeline.request_delay_ms);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let clients = HttpClients::new(&config.network)?;
            let worker = Worker {
                id,
                pipeline: pipeline.clone(),
                clients,
                task_rx: task_rx.clone(),
                result_tx: result_tx.clone(),
                delay,
            };
            handles.push(tokio::spawn(worker.run()));
        }
        debug!("Started {} workers (request delay {:?})", workers, delay);

        Ok(Self {
            task_tx,
            result_rx,
            workers: handles,
            capacity,
        })
    }

    /// Tasks that can be in flight without `submit` waiting on the queue
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a task; `false` once every worker has stopped
    pub async fn submit(&self, task: UrlTask) -> bool {
        self.task_tx.send(task).await.is_ok()
    }

    /// Next finished record, in completion order
    pub async fn recv(&mut self) -> Option<ContentRecord> {
        self.result_rx.recv().await
    }

    /// Stop accepting tasks and wait for the workers to exit
    pub async fn close(self) {
        drop(self.task_tx);
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("Worker exited abnormally: {}", e);
            }
        }
    }
}

struct Worker {
    id: usize,
    pipeline: Arc<UrlPipeline>,
    clients: HttpClients,
    task_rx: Arc<AsyncMutex<mpsc::Receiver<UrlTask>>>,
    result_tx: mpsc::UnboundedSender<ContentRecord>,
    delay: Duration,
}

impl Worker {
    async fn run(self) {
        loop {
            let task = {
                let mut rx = self.task_rx.lock().await;
                rx.recv().await
            };
            let Some(task) = task else {
                break;
            };

            let original = task.original_url.clone();
            let pipeline = self.pipeline.clone();
            let clients = self.clients.clone();
            // a panic in one URL must still produce a record
            let record = match tokio::spawn(async move { pipeline.process(&clients, task).await }).await {
                Ok(record) => record,
                Err(e) => {
                    error!("Worker {} task for {} panicked: {}", self.id, original, e);
                    ContentRecord::skipped(&original, ErrorKind::Unexpected)
                }
            };

            let touched_network = record.error != Some(ErrorKind::AlreadyScraped);
            if self.result_tx.send(record).is_err() {
                break;
            }
            if touched_network && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        debug!("Worker {} stopped", self.id);
    }
}
