use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Parameters controlling text generation.
///
/// Defaults follow the sampling settings recommended for Qwen3-family models
/// in thinking mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    /// Limit sampling to the top K tokens (applied before top_p).
    pub top_k: Option<usize>,
    /// Penalty for repeating tokens (1.0 = no penalty).
    pub repetition_penalty: f32,
    /// Only the last `n` generated/prompt tokens are penalised.
    pub repeat_last_n: usize,
    /// Random seed for reproducible generation.
    pub seed: Option<u64>,
    /// Greedy decoding when true (ignores temperature / top_p / top_k).
    pub greedy: bool,
    /// Token ids that end generation. The stop token itself is not emitted.
    pub stop_token_ids: Vec<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 32_768,
            temperature: 0.6,
            top_p: 0.95,
            top_k: Some(20),
            repetition_penalty: 1.0,
            repeat_last_n: 64,
            seed: None,
            greedy: false,
            stop_token_ids: vec![],
        }
    }
}

/// Input to a generator for a single request.
#[derive(Debug, Clone)]
pub struct GenerateInput {
    /// Pre-tokenized prompt ids.
    pub token_ids: Vec<u32>,
}

/// Result of a finished generation call.
///
/// `sequence` holds the prompt followed by every generated id, mirroring what
/// high-level `generate` APIs return. Use [`GenerateOutput::completion`] to
/// obtain the model output alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOutput {
    pub sequence: Vec<u32>,
    pub prompt_len: usize,
}

impl GenerateOutput {
    /// Generated ids with the prompt prefix removed.
    pub fn completion(&self) -> &[u32] {
        self.sequence.get(self.prompt_len..).unwrap_or(&[])
    }

    /// Number of generated ids.
    pub fn generated_len(&self) -> usize {
        self.completion().len()
    }
}

/// Configuration for loading a model from the local cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hugging Face repo id (e.g. `GMLHUHE/PsyLLM`).
    pub repo_id: String,
    /// Git revision / branch.
    pub revision: String,
    /// Directory where model files are stored.
    pub model_dir: PathBuf,
    /// Maximum supported sequence length (prompt + generation).
    pub max_sequence_length: usize,
}

/// Maps token ids back to text.
///
/// Implemented by [`crate::Tokenizer`]; tests supply small in-memory
/// vocabularies. Failures must be reported, never papered over with
/// replacement text.
pub trait Decoder {
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String>;
}

impl<D: Decoder + ?Sized> Decoder for &D {
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String> {
        (**self).decode(ids, skip_special_tokens)
    }
}

impl<D: Decoder + ?Sized> Decoder for std::sync::Arc<D> {
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String> {
        (**self).decode(ids, skip_special_tokens)
    }
}

/// Produces an output id sequence for a tokenized prompt.
///
/// Implementations must be `Send` so a loaded model can be moved into
/// `tokio::task::spawn_blocking`.
pub trait Generator: Send {
    fn generate(&mut self, input: GenerateInput, params: &SamplingParams) -> CoreResult<GenerateOutput>;
}
