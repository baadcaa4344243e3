use tracing::warn;

use psyllm_hub::ModelCache;

use crate::config::AppConfig;

/// List all models stored in the local cache, optionally re-checking digests.
pub fn run(verify: bool, config: &AppConfig) -> anyhow::Result<()> {
    let cache_dir = config.cache_dir();
    let cache = ModelCache::new(&cache_dir)?;

    let models = cache.list_models()?;

    if models.is_empty() {
        println!("No models cached in {}.", cache_dir.display());
        println!("Use `psyllm pull <model-id>` to download a model.");
        return Ok(());
    }

    println!("{:<40} {:<12} {:>6} {:>10}  {}", "MODEL ID", "REVISION", "FILES", "SIZE", if verify { "INTEGRITY" } else { "" });
    println!("{}", "-".repeat(if verify { 84 } else { 72 }));
    for m in &models {
        let status = if verify {
            match cache.verify_model(&m.repo_id, &m.revision) {
                Ok(n) => format!("ok ({n} checked)"),
                Err(e) => {
                    warn!(repo_id = %m.repo_id, revision = %m.revision, error = %e, "Integrity check failed");
                    "FAILED".to_string()
                }
            }
        } else {
            String::new()
        };
        println!(
            "{:<40} {:<12} {:>6} {:>10}  {}",
            m.repo_id,
            m.revision,
            m.file_count,
            format_size(m.size_bytes),
            status
        );
    }
    println!("\n{} model(s) cached in {}", models.len(), cache_dir.display());

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
