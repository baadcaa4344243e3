//! Pipeline stages, in the order they run.

pub mod counsel;
pub mod dialogue;
pub mod plan;
pub mod review;

use std::sync::Arc;

use crate::client::ChatClient;
use crate::runner::Runner;
use crate::settings::SynthSettings;

/// Everything a stage needs besides its input and output paths.
#[derive(Clone)]
pub struct StageContext {
    pub client: Arc<dyn ChatClient>,
    pub settings: SynthSettings,
    pub runner: Runner,
}

impl StageContext {
    pub fn new(client: Arc<dyn ChatClient>, settings: SynthSettings) -> Self {
        let runner = Runner::from_settings(&settings);
        Self { client, settings, runner }
    }

    /// Same context without the terminal progress bar.
    pub fn quiet(mut self) -> Self {
        self.runner = self.runner.quiet();
        self
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::client::{ChatReply, ChatRequest};
    use crate::error::{SynthError, SynthResult};

    /// Replays canned replies in order and records every request.
    #[derive(Default)]
    pub struct ScriptedClient {
        replies: Mutex<VecDeque<SynthResult<ChatReply>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        pub fn new(replies: Vec<SynthResult<ChatReply>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), requests: Mutex::default() })
        }

        pub fn text(content: &str) -> SynthResult<ChatReply> {
            Ok(ChatReply { content: content.to_string(), reasoning_content: None })
        }

        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn complete(&self, request: &ChatRequest) -> SynthResult<ChatReply> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SynthError::EmptyResponse))
        }
    }

    pub fn context(client: Arc<ScriptedClient>) -> StageContext {
        let settings = SynthSettings {
            api_keys: vec!["sk-test".into()],
            max_workers: 1,
            max_retries: 0,
            retry_delay_ms: 0,
            ..Default::default()
        };
        StageContext::new(client, settings).quiet()
    }
}
