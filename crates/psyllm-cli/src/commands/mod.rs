pub mod chat;
pub mod delete;
pub mod list;
pub mod pull;
pub mod run;
pub mod split;
pub mod synth;

use std::time::Instant;

use anyhow::Context;
use indicatif::MultiProgress;
use tracing::info;

use psyllm_core::device::device_name;
use psyllm_core::{select_device, ModelConfig, Qwen3Model};
use psyllm_hub::{ModelCache, ModelDownloader};

use crate::config::AppConfig;

/// Load `repo_id` at the configured revision, pulling it first if the cache
/// does not hold a loadable copy. `prefer_gpu` already folds in the CLI flags.
pub async fn load_model(config: &AppConfig, repo_id: &str, prefer_gpu: bool) -> anyhow::Result<Qwen3Model> {
    let revision = config.model.revision.as_str();
    let cache = ModelCache::new(config.cache_dir())?;
    let model_dir = cache.model_dir(repo_id, revision);

    if !cache.is_loadable(repo_id, revision) {
        info!(repo_id, revision, "Model not in cache, pulling");
        let downloader = ModelDownloader::new(cache)?;
        downloader
            .pull(repo_id, revision, Some(&MultiProgress::new()))
            .await
            .with_context(|| format!("Failed to pull {repo_id}@{revision}"))?;
    }

    let device = select_device(prefer_gpu, config.device.cuda_device_id)?;
    let model_config = ModelConfig {
        repo_id: repo_id.to_string(),
        revision: revision.to_string(),
        model_dir: model_dir.clone(),
        max_sequence_length: config.model.max_sequence_length,
    };

    let start = Instant::now();
    info!(model_dir = %model_dir.display(), device = device_name(&device), "Loading model");
    let model = Qwen3Model::load(&model_config, &device)
        .with_context(|| format!("Failed to load model from {}", model_dir.display()))?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "Model loaded");
    Ok(model)
}
