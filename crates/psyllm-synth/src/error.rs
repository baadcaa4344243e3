use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chat API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Chat API response had no choices")]
    EmptyResponse,

    #[error("No API keys configured (set synth.api_keys)")]
    NoApiKeys,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not extract a JSON object from model output: {0}")]
    Extract(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type SynthResult<T> = Result<T, SynthError>;
