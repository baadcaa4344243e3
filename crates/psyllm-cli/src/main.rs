use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use commands::synth::Stage;
use config::{load_config, InferenceConfig};
use psyllm_core::{DelimiterSpec, SamplingParams};

/// PsyLLM: reasoning-aware counselling model runner and dataset builder
#[derive(Debug, Parser)]
#[command(name = "psyllm", version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Path to a custom configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log format: "pretty" (default) or "json".
    #[arg(long, global = true, default_value = "pretty", value_name = "FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

/// Sampling overrides; anything omitted comes from `[inference]`.
#[derive(Debug, Clone, Default, Args)]
pub struct SamplingArgs {
    /// Maximum number of new tokens to generate.
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Top-p nucleus sampling threshold (0.0 to 1.0).
    #[arg(long)]
    pub top_p: Option<f64>,

    /// Top-k sampling; 0 disables it.
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Repetition penalty (1.0 = no penalty).
    #[arg(long)]
    pub repetition_penalty: Option<f32>,

    /// Random seed for reproducible generation.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Always pick the most likely token.
    #[arg(long)]
    pub greedy: bool,
}

impl SamplingArgs {
    pub fn to_params(&self, defaults: &InferenceConfig, stop_token_ids: Vec<u32>) -> SamplingParams {
        let mut params = defaults.sampling_params();
        if let Some(n) = self.max_tokens {
            params.max_new_tokens = n;
        }
        if let Some(t) = self.temperature {
            params.temperature = t;
        }
        if let Some(p) = self.top_p {
            params.top_p = p;
        }
        if let Some(k) = self.top_k {
            params.top_k = (k > 0).then_some(k);
        }
        if let Some(r) = self.repetition_penalty {
            params.repetition_penalty = r;
        }
        params.seed = self.seed;
        params.greedy = self.greedy;
        params.stop_token_ids = stop_token_ids;
        params
    }
}

/// Delimiter overrides. When either flag is given the `[split]` section is
/// ignored entirely.
#[derive(Debug, Clone, Default, Args)]
pub struct DelimiterArgs {
    /// Token id that closes the thinking span (e.g. 151668).
    #[arg(long, value_name = "ID")]
    pub delimiter_id: Option<u32>,

    /// Token text that closes the thinking span (e.g. "</think>").
    #[arg(long, value_name = "TOKEN")]
    pub delimiter_token: Option<String>,
}

impl DelimiterArgs {
    pub fn or_config(&self, configured: &DelimiterSpec) -> DelimiterSpec {
        if self.delimiter_id.is_none() && self.delimiter_token.is_none() {
            configured.clone()
        } else {
            DelimiterSpec { delimiter_id: self.delimiter_id, delimiter_token: self.delimiter_token.clone() }
        }
    }
}

/// Device overrides for the `[device]` section.
#[derive(Debug, Clone, Default, Args)]
pub struct DeviceArgs {
    /// Use CUDA/Metal when available.
    #[arg(long, conflicts_with = "cpu")]
    pub gpu: bool,

    /// Run on the CPU even if the config prefers a GPU.
    #[arg(long)]
    pub cpu: bool,
}

impl DeviceArgs {
    pub fn prefer_gpu(&self, configured: bool) -> bool {
        if self.cpu {
            false
        } else {
            self.gpu || configured
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Answer a single prompt and print the thinking trace and the answer
    /// separately.
    Run {
        /// Prompt text.
        #[arg(long)]
        prompt: String,

        /// Model to use (defaults to `model.repo_id`).
        #[arg(long, short = 'm')]
        model: Option<String>,

        /// System prompt (defaults to `inference.system_prompt`).
        #[arg(long)]
        system: Option<String>,

        /// Disable thinking: the prompt ends with an empty think block.
        #[arg(long)]
        no_think: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        device: DeviceArgs,

        /// Print timing and throughput stats after generation.
        #[arg(long)]
        stats: bool,

        #[command(flatten)]
        sampling: SamplingArgs,

        #[command(flatten)]
        delimiter: DelimiterArgs,
    },

    /// Start an interactive multi-turn chat session (model stays in memory).
    Chat {
        /// Model to use (defaults to `model.repo_id`).
        #[arg(long, short = 'm')]
        model: Option<String>,

        /// System prompt (defaults to `inference.system_prompt`).
        #[arg(long)]
        system: Option<String>,

        /// Start with thinking disabled (toggle with `/think on`).
        #[arg(long)]
        no_think: bool,

        /// Print each reply's thinking trace above the answer.
        #[arg(long)]
        show_think: bool,

        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        sampling: SamplingArgs,

        #[command(flatten)]
        delimiter: DelimiterArgs,
    },

    /// Split an already generated id sequence and decode both halves.
    Split {
        /// tokenizer.json to decode with (defaults to the cached model's).
        #[arg(long, value_name = "FILE")]
        tokenizer: Option<PathBuf>,

        /// Comma or whitespace separated ids; read from stdin when omitted.
        #[arg(long)]
        ids: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        delimiter: DelimiterArgs,
    },

    /// Download a model from Hugging Face Hub.
    Pull {
        /// Hugging Face model id (defaults to `model.repo_id`).
        model_id: Option<String>,

        /// Git revision, branch, or commit hash (defaults to `model.revision`).
        #[arg(long)]
        revision: Option<String>,
    },

    /// List models stored in the local cache.
    List {
        /// Re-hash every cached file against its recorded digest.
        #[arg(long)]
        verify: bool,
    },

    /// Delete a cached model from local storage.
    Delete {
        /// Model id to delete (e.g. `GMLHUHE/PsyLLM`).
        model_id: String,

        /// Revision to delete. Omit to delete all revisions.
        #[arg(long, short = 'r')]
        revision: Option<String>,
    },

    /// Run one stage of the counselling dialogue construction pipeline.
    Synth {
        /// Stage to run.
        #[arg(value_enum)]
        stage: Stage,

        /// Stage input file.
        #[arg(long, short = 'i')]
        input: PathBuf,

        /// Stage output file. Existing output is resumed, not overwritten.
        #[arg(long, short = 'o')]
        output: PathBuf,

        /// API key; repeat to rotate across several. Replaces `synth.api_keys`.
        #[arg(long = "api-key", value_name = "KEY")]
        api_keys: Vec<String>,

        /// Concurrent requests (overrides `synth.max_workers`).
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialise tracing
    init_tracing(&cli.log_format);

    // Load configuration
    let cfg = load_config(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run { prompt, model, system, no_think, json, device, stats, sampling, delimiter } => {
            let opts = commands::run::RunOptions {
                model,
                system,
                enable_thinking: !no_think,
                json,
                prefer_gpu: device.prefer_gpu(cfg.device.prefer_gpu),
                stats,
                sampling,
                delimiter: delimiter.or_config(&cfg.split),
            };
            commands::run::run(&prompt, opts, &cfg).await?;
        }
        Commands::Chat { model, system, no_think, show_think, device, sampling, delimiter } => {
            let opts = commands::chat::ChatOptions {
                model,
                system,
                enable_thinking: !no_think,
                show_think,
                prefer_gpu: device.prefer_gpu(cfg.device.prefer_gpu),
                sampling,
                delimiter: delimiter.or_config(&cfg.split),
            };
            commands::chat::run(opts, &cfg).await?;
        }
        Commands::Split { tokenizer, ids, json, delimiter } => {
            commands::split::run(tokenizer.as_deref(), ids.as_deref(), &delimiter.or_config(&cfg.split), json, &cfg)?;
        }
        Commands::Pull { model_id, revision } => {
            let repo_id = model_id.as_deref().unwrap_or(&cfg.model.repo_id);
            let revision = revision.as_deref().unwrap_or(&cfg.model.revision);
            commands::pull::run(repo_id, revision, &cfg).await?;
        }
        Commands::List { verify } => {
            commands::list::run(verify, &cfg)?;
        }
        Commands::Delete { model_id, revision } => {
            commands::delete::run(&model_id, revision.as_deref(), &cfg)?;
        }
        Commands::Synth { stage, input, output, api_keys, workers } => {
            let mut settings = cfg.synth.clone();
            if !api_keys.is_empty() {
                settings.api_keys = api_keys;
            }
            if let Some(n) = workers {
                settings.max_workers = n;
            }
            commands::synth::run(stage, &input, &output, settings).await?;
        }
    }

    Ok(())
}

fn init_tracing(log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}
