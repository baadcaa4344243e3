use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection and scheduling settings shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSettings {
    /// OpenAI-compatible API root, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Keys are used round-robin, one per request.
    pub api_keys: Vec<String>,
    /// Model for planning, dialogue and review.
    pub chat_model: String,
    /// Reasoning model for counsellor replies; must return `reasoning_content`.
    pub reasoner_model: String,
    pub temperature: f64,
    pub max_workers: usize,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub batch_size: usize,
    /// Counsel stage: write the output file after this many completed turns.
    pub save_every: usize,
    pub request_timeout_secs: u64,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_keys: Vec::new(),
            chat_model: "deepseek-chat".to_string(),
            reasoner_model: "deepseek-reasoner".to_string(),
            temperature: 1.0,
            max_workers: 4,
            max_retries: 3,
            retry_delay_ms: 1000,
            batch_size: 25,
            save_every: 10,
            request_timeout_secs: 300,
        }
    }
}

impl SynthSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
