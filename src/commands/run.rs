use anyhow::{Context, Result};
use linkharvest::batch::{load_input, BatchCoordinator};
use linkharvest::config::Config;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line values that replace configuration file values
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub input: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub max_hops: Option<usize>,
    pub delay_ms: Option<u64>,
    pub resume_from_batch: Option<usize>,
    pub max_batches: Option<usize>,
    pub proxy: Option<String>,
    pub force_refresh: bool,
    pub quiet: bool,
}

impl RunOverrides {
    fn apply(&self, config: &mut Config) {
        let pipeline = &mut config.pipeline;
        if let Some(input) = &self.input {
            pipeline.input = Some(input.clone());
        }
        if let Some(dir) = &self.output_dir {
            pipeline.output_dir = dir.clone();
        }
        if let Some(n) = self.batch_size {
            pipeline.batch_size = n;
        }
        if let Some(n) = self.workers {
            pipeline.workers = n;
        }
        if let Some(ms) = self.delay_ms {
            pipeline.request_delay_ms = ms;
        }
        if self.resume_from_batch.is_some() {
            pipeline.resume_from_batch = self.resume_from_batch;
        }
        if self.max_batches.is_some() {
            pipeline.max_batches = self.max_batches;
        }
        if self.force_refresh {
            pipeline.force_refresh = true;
        }

        let network = &mut config.network;
        if let Some(secs) = self.timeout_secs {
            network.resolve_timeout_secs = secs;
            network.fetch_timeout_secs = secs;
        }
        if let Some(hops) = self.max_hops {
            network.max_hops = hops;
        }
        if let Some(proxy) = &self.proxy {
            network.proxy = Some(proxy.clone());
        }
    }
}

pub async fn run_pipeline(mut config: Config, overrides: RunOverrides) -> Result<()> {
    overrides.apply(&mut config);
    config.validate()?;

    let input_path = config
        .pipeline
        .input
        .clone()
        .context("No input file given (use --input or set pipeline.input)")?;
    let input = load_input(&input_path)?;
    if input.tasks.is_empty() {
        warn!("No URLs to process in {}", input_path.display());
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight URLs (press Ctrl+C again to abort)");
            signal_token.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    info!(
        "Scraping {} URLs into {} ({} workers, batches of {})",
        input.tasks.len(),
        config.pipeline.output_dir.display(),
        config.pipeline.workers,
        config.pipeline.batch_size
    );
    let summary = BatchCoordinator::new(config)
        .with_quiet(overrides.quiet)
        .run(input.tasks, cancel)
        .await
        .context("Scraping run failed")?;

    let stats = summary.stats;
    println!("\nRun Summary");
    println!("===========");
    println!("Input URLs:          {}", summary.input_urls);
    println!("Already handled:     {}", summary.skipped_known);
    println!("Batches written:     {}", summary.batches_written.len());
    println!("Processed:           {}", stats.total_processed);
    println!("Successful:          {}", stats.successful);
    println!("Failed:              {}", stats.failed);
    println!("Duplicates:          {}", stats.duplicates);
    println!("Paywalled:           {}", stats.paywalled);
    println!("Elapsed time:        {:.1}s", summary.elapsed_secs);
    if summary.interrupted {
        println!("\nInterrupted; run the same command again to resume.");
    }
    Ok(())
}
