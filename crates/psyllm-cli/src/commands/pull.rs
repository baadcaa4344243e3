use indicatif::MultiProgress;
use tracing::info;

use psyllm_hub::{ModelCache, ModelDownloader};

use crate::config::AppConfig;

/// Download a model from Hugging Face Hub into the local cache.
pub async fn run(repo_id: &str, revision: &str, config: &AppConfig) -> anyhow::Result<()> {
    let cache_dir = config.cache_dir();
    info!(repo_id, revision, cache_dir = %cache_dir.display(), "Pulling model");

    let cache = ModelCache::new(&cache_dir)?;
    let downloader = ModelDownloader::new(cache)?;
    let mp = MultiProgress::new();
    let paths = downloader.pull(repo_id, revision, Some(&mp)).await?;

    println!("\nModel '{}' @ {} cached to {}", repo_id, revision, cache_dir.display());
    println!("{} file(s):", paths.len());
    for p in &paths {
        println!("  {}", p.display());
    }

    Ok(())
}
