use anyhow::{Context, Result};
use linkharvest::config::{Config, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;

pub async fn init_config(path: PathBuf, force: bool) -> Result<()> {
    let config_path = if path.is_dir() {
        path.join(DEFAULT_CONFIG_FILE)
    } else {
        path
    };
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_content = format!(
        "# linkharvest configuration\n\
         # Every key is optional; omitted keys use the defaults shown here.\n\n{}",
        config.to_toml()?
    );
    std::fs::write(&config_path, toml_content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Created configuration file: {}", config_path.display());
    Ok(())
}
