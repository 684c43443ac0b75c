use anyhow::{Context, Result};
use linkharvest::batch::{combine_batches, BatchFiles};
use linkharvest::config::Config;
use std::path::PathBuf;

pub async fn combine_outputs(config: Config, out: PathBuf) -> Result<()> {
    let files = BatchFiles::open(&config.pipeline.output_dir);
    let summary = combine_batches(&files, &out)
        .with_context(|| format!("Failed to combine batches into {}", out.display()))?;

    println!("Combined {} batch files into {}", summary.batches, out.display());
    println!("Rows:       {}", summary.rows);
    println!("Successful: {}", summary.successful);
    println!("Paywalled:  {}", summary.paywalled);
    if summary.dropped_duplicates > 0 {
        println!("Dropped {} repeated URLs", summary.dropped_duplicates);
    }
    Ok(())
}
