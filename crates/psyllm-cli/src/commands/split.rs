use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::info;

use psyllm_core::{DelimiterSpec, ResponseSplitter, Tokenizer};
use psyllm_hub::cache::TOKENIZER_FILE;
use psyllm_hub::ModelCache;

use crate::config::AppConfig;

/// Split and decode an id sequence produced elsewhere.
pub fn run(
    tokenizer_path: Option<&Path>,
    ids: Option<&str>,
    delimiter: &DelimiterSpec,
    json: bool,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let tokenizer_path: PathBuf = match tokenizer_path {
        Some(p) => p.to_path_buf(),
        None => {
            let cache = ModelCache::new(config.cache_dir())?;
            cache.file_path(&config.model.repo_id, &config.model.revision, TOKENIZER_FILE)
        }
    };
    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .with_context(|| format!("Failed to load tokenizer from {}", tokenizer_path.display()))?;
    let delimiter = delimiter.resolve(&tokenizer).context("Invalid split delimiter")?;

    let raw = match ids {
        Some(ids) => ids.to_string(),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("Failed to read ids from stdin")?;
            buf
        }
    };
    let tokens = parse_ids(&raw)?;
    info!(tokens = tokens.len(), delimiter = delimiter.id(), "Splitting output");

    let response = ResponseSplitter::new(delimiter, &tokenizer).split_decode(&tokens)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("thinking content: {}", response.thinking);
        println!("content: {}", response.content);
    }
    Ok(())
}

/// Parse ids separated by commas and/or whitespace. Surrounding `[ ]` are
/// accepted so a JSON array can be piped in directly.
fn parse_ids(raw: &str) -> anyhow::Result<Vec<u32>> {
    let body = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let mut ids = Vec::new();
    for part in body.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty()) {
        match part.parse::<u32>() {
            Ok(id) => ids.push(id),
            Err(_) => bail!("Invalid token id: {part:?}"),
        }
    }
    Ok(ids)
}
