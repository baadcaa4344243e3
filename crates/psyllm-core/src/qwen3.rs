use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::qwen3::{Config as Qwen3Config, ModelForCausalLM};
use candle_transformers::utils::apply_repeat_penalty;
use tracing::{debug, info};

use crate::{
    device::{device_name, dtype_for},
    error::{CoreError, CoreResult},
    model::{GenerateInput, GenerateOutput, Generator, ModelConfig, SamplingParams},
    tokenizer::Tokenizer,
};

/// Qwen3 causal LM (the architecture PsyLLM is fine-tuned from).
pub struct Qwen3Model {
    inner: ModelForCausalLM,
    tokenizer: Arc<Tokenizer>,
    device: Device,
    dtype: DType,
    max_sequence_length: usize,
}

impl std::fmt::Debug for Qwen3Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Qwen3Model")
            .field("device", &device_name(&self.device))
            .field("dtype", &self.dtype)
            .field("max_sequence_length", &self.max_sequence_length)
            .finish()
    }
}

impl Qwen3Model {
    /// Load config, tokenizer and weights from `config.model_dir`.
    pub fn load(config: &ModelConfig, device: &Device) -> CoreResult<Self> {
        info!(
            repo_id = %config.repo_id,
            model_dir = %config.model_dir.display(),
            device = device_name(device),
            "Loading Qwen3 model"
        );

        let cfg_path = config.model_dir.join("config.json");
        let cfg_str = std::fs::read_to_string(&cfg_path).map_err(CoreError::Io)?;
        let qwen_cfg: Qwen3Config = serde_json::from_str(&cfg_str)?;
        debug!(
            layers = qwen_cfg.num_hidden_layers,
            vocab_size = qwen_cfg.vocab_size,
            max_position_embeddings = qwen_cfg.max_position_embeddings,
            "Resolved Qwen3 config"
        );

        let tokenizer = Arc::new(Tokenizer::from_file(&config.model_dir.join("tokenizer.json"))?);

        let dtype = dtype_for(device);
        let vb = load_weights(&config.model_dir, device, dtype)?;
        let inner = ModelForCausalLM::new(&qwen_cfg, vb)?;

        let max_sequence_length = config.max_sequence_length.min(qwen_cfg.max_position_embeddings);
        info!(?dtype, max_sequence_length, "Model loaded successfully");

        Ok(Self {
            inner,
            tokenizer,
            device: device.clone(),
            dtype,
            max_sequence_length,
        })
    }

    /// Shared handle to the model's tokenizer.
    pub fn tokenizer_arc(&self) -> Arc<Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    pub fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }
}

impl Generator for Qwen3Model {
    fn generate(&mut self, input: GenerateInput, params: &SamplingParams) -> CoreResult<GenerateOutput> {
        let prompt_len = input.token_ids.len();
        if prompt_len == 0 {
            return Err(CoreError::Config {
                field: "prompt".to_string(),
                reason: "prompt encodes to zero tokens".to_string(),
            });
        }
        if prompt_len >= self.max_sequence_length {
            return Err(CoreError::PromptTooLong { got: prompt_len, max: self.max_sequence_length });
        }
        let max_new = params.max_new_tokens.min(self.max_sequence_length - prompt_len);

        // Stale K/V from a previous request would corrupt attention.
        self.inner.clear_kv_cache();

        let mut stop: HashSet<u32> = params.stop_token_ids.iter().copied().collect();
        if let Some(eos) = self.tokenizer.eos_token_id() {
            stop.insert(eos);
        }

        let mut processor = LogitsProcessor::from_sampling(resolve_seed(params.seed), sampling_for(params));
        let mut sequence = input.token_ids;
        let mut offset = 0;

        for _ in 0..max_new {
            let step = Tensor::new(&sequence[offset..], &self.device)?.unsqueeze(0)?;
            let logits = self.inner.forward(&step, offset)?;
            let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = if (params.repetition_penalty - 1.0).abs() > f32::EPSILON {
                let start = sequence.len().saturating_sub(params.repeat_last_n);
                apply_repeat_penalty(&logits, params.repetition_penalty, &sequence[start..])?
            } else {
                logits
            };
            offset = sequence.len();

            let next = processor.sample(&logits)?;
            if stop.contains(&next) {
                break;
            }
            sequence.push(next);
        }

        debug!(prompt_len, generated = sequence.len() - prompt_len, "Generation finished");
        Ok(GenerateOutput { sequence, prompt_len })
    }
}

/// Map sampling parameters onto candle's sampling strategies.
pub(crate) fn sampling_for(params: &SamplingParams) -> Sampling {
    if params.greedy || params.temperature <= 0.0 {
        return Sampling::ArgMax;
    }
    let temperature = params.temperature;
    let use_top_p = params.top_p > 0.0 && params.top_p < 1.0;
    match (params.top_k, use_top_p) {
        (Some(k), true) => Sampling::TopKThenTopP { k, p: params.top_p, temperature },
        (Some(k), false) => Sampling::TopK { k, temperature },
        (None, true) => Sampling::TopP { p: params.top_p, temperature },
        (None, false) => Sampling::All { temperature },
    }
}

fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(299_792_458)
    })
}

/// Memory-map safetensors weights: index-listed shards when present,
/// otherwise a single `model.safetensors`.
fn load_weights(model_dir: &Path, device: &Device, dtype: DType) -> CoreResult<VarBuilder<'static>> {
    let index_path = model_dir.join("model.safetensors.index.json");
    if index_path.exists() {
        let index_str = std::fs::read_to_string(&index_path).map_err(CoreError::Io)?;
        let index: serde_json::Value = serde_json::from_str(&index_str)?;
        let shards = shard_files(&index);
        if shards.is_empty() {
            return Err(CoreError::Config {
                field: "model_dir".to_string(),
                reason: format!("{} has an empty weight_map", index_path.display()),
            });
        }
        debug!(shards = shards.len(), "Loading sharded safetensors");
        let shard_paths: Vec<_> = shards.iter().map(|s| model_dir.join(s)).collect();
        return Ok(unsafe { VarBuilder::from_mmaped_safetensors(&shard_paths, dtype, device)? });
    }

    let single = model_dir.join("model.safetensors");
    if single.exists() {
        return Ok(unsafe { VarBuilder::from_mmaped_safetensors(&[single], dtype, device)? });
    }

    Err(CoreError::Config {
        field: "model_dir".to_string(),
        reason: format!("No safetensors weights found in {}", model_dir.display()),
    })
}

/// Distinct shard file names from a safetensors index, sorted.
pub fn shard_files(index: &serde_json::Value) -> Vec<String> {
    let mut shards: Vec<String> = index["weight_map"]
        .as_object()
        .map(|m| m.values().filter_map(|v| v.as_str()).map(String::from).collect())
        .unwrap_or_default();
    shards.sort();
    shards.dedup();
    shards
}
