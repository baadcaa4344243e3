use std::time::Instant;

use anyhow::Context;
use tracing::info;

use psyllm_core::chat_template::{build_chat_prompt, stop_token_ids};
use psyllm_core::{DelimiterSpec, GenerateInput, Generator, ResponseSplitter};

use crate::config::AppConfig;
use crate::SamplingArgs;

pub struct RunOptions {
    pub model: Option<String>,
    pub system: Option<String>,
    pub enable_thinking: bool,
    pub json: bool,
    pub prefer_gpu: bool,
    pub stats: bool,
    pub sampling: SamplingArgs,
    pub delimiter: DelimiterSpec,
}

/// Generate one reply, split it at the think delimiter and print both parts.
pub async fn run(prompt: &str, opts: RunOptions, config: &AppConfig) -> anyhow::Result<()> {
    let repo_id = opts.model.as_deref().unwrap_or(&config.model.repo_id);
    let mut model = super::load_model(config, repo_id, opts.prefer_gpu).await?;
    let tokenizer = model.tokenizer_arc();

    // Resolve before generating so a bad delimiter fails fast.
    let delimiter = opts.delimiter.resolve(tokenizer.as_ref()).context("Invalid split delimiter")?;
    let splitter = ResponseSplitter::new(delimiter, tokenizer.clone());

    let system = opts.system.as_deref().unwrap_or(&config.inference.system_prompt);
    let formatted = build_chat_prompt(system, &[], prompt, opts.enable_thinking);
    // The template already contains the special tokens as text.
    let token_ids = tokenizer.encode(&formatted, false)?;
    let params = opts.sampling.to_params(&config.inference, stop_token_ids(&tokenizer));

    info!(prompt_tokens = token_ids.len(), thinking = opts.enable_thinking, "Generating response");
    let gen_start = Instant::now();
    let output = tokio::task::spawn_blocking(move || model.generate(GenerateInput { token_ids }, &params))
        .await
        .context("Generation task panicked")??;
    let gen_elapsed = gen_start.elapsed();

    let response = splitter.split_decode(output.completion())?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("thinking content: {}", response.thinking);
        println!("content: {}", response.content);
    }

    if opts.stats {
        let generated = output.generated_len();
        let tok_per_sec = if gen_elapsed.as_secs_f64() > 0.0 {
            generated as f64 / gen_elapsed.as_secs_f64()
        } else {
            0.0
        };
        let segments = splitter.segments(output.completion());
        eprintln!(
            "\n[stats] {} tokens generated ({} thinking, {} content) | {:.1} tok/s",
            generated,
            segments.thinking.len(),
            segments.content.len(),
            tok_per_sec,
        );
    }

    Ok(())
}
