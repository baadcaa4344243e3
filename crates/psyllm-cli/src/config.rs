use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use psyllm_core::{DelimiterSpec, SamplingParams};
use psyllm_hub::cache::expand_tilde;
use psyllm_synth::SynthSettings;

/// Full runtime configuration loaded from TOML + env vars.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub model: ModelSection,
    pub inference: InferenceConfig,
    pub device: DeviceConfig,
    /// Output delimiter. Deliberately has no built-in value.
    #[serde(default)]
    pub split: DelimiterSpec,
    #[serde(default)]
    pub synth: SynthSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelSection {
    pub repo_id: String,
    pub revision: String,
    pub cache_dir: String,
    pub max_sequence_length: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InferenceConfig {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    /// 0 disables top-k filtering.
    pub top_k: usize,
    pub repetition_penalty: f32,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub prefer_gpu: bool,
    pub cuda_device_id: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let sampling = SamplingParams::default();
        Self {
            model: ModelSection {
                repo_id: "GMLHUHE/PsyLLM".to_string(),
                revision: "main".to_string(),
                cache_dir: "~/.cache/psyllm".to_string(),
                max_sequence_length: 40_960,
            },
            inference: InferenceConfig {
                max_new_tokens: sampling.max_new_tokens,
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                top_k: sampling.top_k.unwrap_or(0),
                repetition_penalty: sampling.repetition_penalty,
                system_prompt: String::new(),
            },
            device: DeviceConfig {
                prefer_gpu: true,
                cuda_device_id: 0,
            },
            split: DelimiterSpec::default(),
            synth: SynthSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn cache_dir(&self) -> PathBuf {
        expand_tilde(Path::new(&self.model.cache_dir))
    }
}

impl InferenceConfig {
    /// Sampling parameters from configuration alone.
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: (self.top_k > 0).then_some(self.top_k),
            repetition_penalty: self.repetition_penalty,
            ..SamplingParams::default()
        }
    }
}

/// Load configuration from:
/// 1. Built-in defaults
/// 2. `config/default.toml` (if present)
/// 3. A custom config file path (if provided)
/// 4. Environment variables prefixed with `PSYLLM__`
pub fn load_config(config_file: Option<&PathBuf>) -> Result<AppConfig, ConfigError> {
    let d = AppConfig::default();
    let mut builder = Config::builder()
        // Layer 1: defaults baked in
        .set_default("model.repo_id", d.model.repo_id)?
        .set_default("model.revision", d.model.revision)?
        .set_default("model.cache_dir", d.model.cache_dir)?
        .set_default("model.max_sequence_length", d.model.max_sequence_length as i64)?
        .set_default("inference.max_new_tokens", d.inference.max_new_tokens as i64)?
        .set_default("inference.temperature", d.inference.temperature)?
        .set_default("inference.top_p", d.inference.top_p)?
        .set_default("inference.top_k", d.inference.top_k as i64)?
        .set_default("inference.repetition_penalty", d.inference.repetition_penalty as f64)?
        .set_default("inference.system_prompt", d.inference.system_prompt)?
        .set_default("device.prefer_gpu", d.device.prefer_gpu)?
        .set_default("device.cuda_device_id", d.device.cuda_device_id as i64)?
        // Layer 2: project default.toml
        .add_source(File::with_name("config/default").required(false));

    // Layer 3: optional user-supplied config file
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    // Layer 4: environment variables (PSYLLM__SPLIT__DELIMITER_ID, etc.).
    // Keys contain underscores, so sections are separated by `__`.
    builder = builder.add_source(
        Environment::with_prefix("PSYLLM")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("synth.api_keys")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_psyllm() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.model.repo_id, "GMLHUHE/PsyLLM");
        assert_eq!(cfg.model.revision, "main");
        assert!(cfg.model.cache_dir.contains("psyllm"));
    }

    #[test]
    fn default_sampling_matches_core_defaults() {
        let cfg = load_config(None).unwrap();
        let params = cfg.inference.sampling_params();
        let core = SamplingParams::default();
        assert_eq!(params.max_new_tokens, core.max_new_tokens);
        assert_eq!(params.top_k, core.top_k);
        assert!((params.temperature - core.temperature).abs() < f64::EPSILON);
        assert!((params.top_p - core.top_p).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_top_k_disables_it() {
        let mut inference = AppConfig::default().inference;
        inference.top_k = 0;
        assert_eq!(inference.sampling_params().top_k, None);
    }

    #[test]
    fn synth_section_falls_back_to_defaults() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.synth.chat_model, "deepseek-chat");
        assert_eq!(cfg.synth.max_workers, SynthSettings::default().max_workers);
    }

    #[test]
    fn custom_file_sets_delimiter_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(
            &file,
            "[model]\ncache_dir = \"/tmp/psyllm-models\"\n\n\
             [split]\ndelimiter_id = 151668\n\n\
             [synth]\napi_keys = [\"sk-a\", \"sk-b\"]\nmax_workers = 8\n",
        )
        .unwrap();

        let cfg = load_config(Some(&file)).unwrap();
        assert_eq!(cfg.cache_dir(), PathBuf::from("/tmp/psyllm-models"));
        assert_eq!(cfg.split, DelimiterSpec::from_id(151668));
        assert_eq!(cfg.synth.api_keys, vec!["sk-a", "sk-b"]);
        assert_eq!(cfg.synth.max_workers, 8);
        assert_eq!(cfg.synth.reasoner_model, "deepseek-reasoner");
    }

    #[test]
    fn missing_custom_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn tilde_cache_dir_is_expanded() {
        let cfg = AppConfig::default();
        assert!(!cfg.cache_dir().to_string_lossy().starts_with('~'));
    }
}
