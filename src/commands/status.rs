use anyhow::{Context, Result};
use linkharvest::batch::{BatchCheckpoint, BatchFiles, CHECKPOINT_FILE};
use linkharvest::config::Config;

pub async fn show_status(config: Config) -> Result<()> {
    let dir = &config.pipeline.output_dir;
    let path = dir.join(CHECKPOINT_FILE);
    if !path.exists() {
        println!("No checkpoint found in {}", dir.display());
        println!("\nStart a run with:");
        println!("  linkharvest run --input <urls.csv> --output-dir {}", dir.display());
        return Ok(());
    }
    let checkpoint = BatchCheckpoint::load(&path)
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    let batches = BatchFiles::open(dir).completed_batches()?;

    println!("\nScraping Progress");
    println!("=================");
    println!("Output directory:    {}", dir.display());
    println!("Run:                 {}", checkpoint.run_id);
    println!("Updated:             {}", checkpoint.updated_at.to_rfc3339());
    println!(
        "Batch:               {} of {} (last completed: {})",
        checkpoint.current_batch, checkpoint.total_batches, checkpoint.last_completed_batch
    );
    println!(
        "Current batch URLs:  {}/{}",
        checkpoint.batch_completed_urls, checkpoint.batch_total_urls
    );
    println!("Completion:          {:.1}%", checkpoint.completion_percentage);
    println!("Batch files:         {}", batches.len());
    println!("Clean shutdown:      {}", checkpoint.shutdown_clean);
    if let Some(url) = &checkpoint.last_processed_url {
        println!("Last URL:            {}", url);
    }

    let stats = checkpoint.stats;
    println!("\nProcessed:           {}", stats.total_processed);
    println!("Successful:          {}", stats.successful);
    println!("Failed:              {}", stats.failed);
    println!("Duplicates:          {}", stats.duplicates);
    println!("Paywalled:           {}", stats.paywalled);
    Ok(())
}
