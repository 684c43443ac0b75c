//! linkharvest: resolve short links and scrape article content in resumable batches

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::RunOverrides;
use linkharvest::config::{init_logging, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "linkharvest")]
#[command(about = "Resolve redirecting URLs and scrape their content in resumable batches")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "linkharvest.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and scrape every URL of an input CSV
    Run {
        /// Input CSV with an `original_url` column
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory for batches, checkpoint, tracker and cache
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// URLs per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Per-request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Maximum redirect hops
        #[arg(long)]
        max_hops: Option<usize>,

        /// Delay between requests of one worker in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Start at this batch number
        #[arg(long)]
        resume_from_batch: Option<usize>,

        /// Stop after this many batches
        #[arg(long)]
        max_batches: Option<usize>,

        /// Proxy URL (http://, socks5://, socks5h://)
        #[arg(long)]
        proxy: Option<String>,

        /// Ignore cached resolutions
        #[arg(long)]
        force_refresh: bool,

        /// Quiet mode (no progress bar)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Resolve URLs through the cache and print the results
    Resolve {
        /// URLs to resolve
        #[arg(required = true)]
        urls: Vec<String>,

        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the checkpoint of an output directory
    Status {
        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Concatenate all batch files into one CSV
    Combine {
        /// Combined CSV path
        #[arg(long)]
        out: PathBuf,

        /// Output directory holding the batch files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// File or directory to write to
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(Some(cli.config.as_path()))?;
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Run {
            input,
            output_dir,
            batch_size,
            workers,
            timeout,
            max_hops,
            delay_ms,
            resume_from_batch,
            max_batches,
            proxy,
            force_refresh,
            quiet,
        } => {
            let overrides = RunOverrides {
                input,
                output_dir,
                batch_size,
                workers,
                timeout_secs: timeout,
                max_hops,
                delay_ms,
                resume_from_batch,
                max_batches,
                proxy,
                force_refresh,
                quiet,
            };
            commands::run_pipeline(config, overrides).await
        }
        Commands::Resolve { urls, json } => commands::resolve_urls(config, urls, json).await,
        Commands::Status { output_dir } => {
            if let Some(dir) = output_dir {
                config.pipeline.output_dir = dir;
            }
            commands::show_status(config).await
        }
        Commands::Combine { out, output_dir } => {
            if let Some(dir) = output_dir {
                config.pipeline.output_dir = dir;
            }
            commands::combine_outputs(config, out).await
        }
        Commands::Init { path, force } => commands::init_config(path, force).await,
    }
}
