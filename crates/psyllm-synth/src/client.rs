//! OpenAI-compatible chat completion client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{SynthError, SynthResult};
use crate::settings::SynthSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
}

/// Assistant reply. `reasoning_content` is only filled by reasoning models.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    pub reasoning_content: Option<String>,
}

/// Anything that can answer a chat request.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> SynthResult<ChatReply>;
}

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// `POST {base_url}/chat/completions` with bearer auth, rotating through a
/// pool of API keys one request at a time.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    keys: Vec<String>,
    next_key: AtomicUsize,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(base_url: &str, keys: Vec<String>, timeout: Duration) -> SynthResult<Self> {
        let keys: Vec<String> = keys.into_iter().filter(|k| !k.is_empty()).collect();
        if keys.is_empty() {
            return Err(SynthError::NoApiKeys);
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("psyllm/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            keys,
            next_key: AtomicUsize::new(0),
        })
    }

    pub fn from_settings(settings: &SynthSettings) -> SynthResult<Self> {
        Self::new(&settings.base_url, settings.api_keys.clone(), settings.request_timeout())
    }

    fn next_key(&self) -> &str {
        let i = self.next_key.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        &self.keys[i]
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> SynthResult<ChatReply> {
        debug!(model = %request.model, messages = request.messages.len(), "Chat completion request");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.next_key())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthError::Api { status: status.as_u16(), body });
        }

        let parsed: CompletionResponse = response.json().await?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(SynthError::EmptyResponse)?;
        trace!(content_len = message.content.as_deref().map_or(0, str::len), "Chat completion reply");

        Ok(ChatReply {
            content: message.content.unwrap_or_default(),
            reasoning_content: message.reasoning_content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer, keys: &[&str]) -> OpenAiClient {
        OpenAiClient::new(
            &server.base_url(),
            keys.iter().map(|k| k.to_string()).collect(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "deepseek-reasoner".into(),
            messages: vec![ChatMessage::system("be kind"), ChatMessage::user("I feel stuck")],
            temperature: 1.0,
        }
    }

    #[tokio::test]
    async fn returns_content_and_reasoning() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_contains("deepseek-reasoner")
                    .body_contains("\"role\":\"user\"");
                then.status(200).json_body(json!({
                    "choices": [{"message": {
                        "role": "assistant",
                        "content": "That sounds heavy.",
                        "reasoning_content": "The client feels stuck."
                    }}]
                }));
            })
            .await;

        let reply = client(&server, &["sk-a"]).complete(&request()).await.unwrap();
        assert_eq!(reply.content, "That sounds heavy.");
        assert_eq!(reply.reasoning_content.as_deref(), Some("The client feels stuck."));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rotates_api_keys() {
        let server = MockServer::start_async().await;
        let body = json!({"choices": [{"message": {"content": "ok"}}]});
        let a = server
            .mock_async(|when, then| {
                when.method(POST).header("authorization", "Bearer sk-a");
                then.status(200).json_body(body.clone());
            })
            .await;
        let b = server
            .mock_async(|when, then| {
                when.method(POST).header("authorization", "Bearer sk-b");
                then.status(200).json_body(body.clone());
            })
            .await;

        let c = client(&server, &["sk-a", "sk-b"]);
        for _ in 0..4 {
            c.complete(&request()).await.unwrap();
        }
        assert_eq!(a.hits_async().await, 2);
        assert_eq!(b.hits_async().await, 2);
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(429).body("rate limited");
            })
            .await;

        let err = client(&server, &["sk-a"]).complete(&request()).await.unwrap_err();
        match err {
            SynthError::Api { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let err = client(&server, &["sk-a"]).complete(&request()).await.unwrap_err();
        assert!(matches!(err, SynthError::EmptyResponse));
    }

    #[test]
    fn requires_at_least_one_key() {
        let err = OpenAiClient::new("http://localhost", vec![String::new()], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SynthError::NoApiKeys));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let c = OpenAiClient::new("https://api.deepseek.com/", vec!["k".into()], Duration::from_secs(1)).unwrap();
        assert_eq!(c.endpoint, "https://api.deepseek.com/chat/completions");
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, json!({"role": "assistant", "content": "hi"}));
    }
}
