//! Response generation adapter

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use voicebridge_config::HttpAdapterConfig;
use voicebridge_core::Turn;

use crate::PipelineError;

/// Chat completion capability. Messages arrive in prompt order:
/// optional system turn, prior history, then the current user turn.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, messages: &[Turn]) -> Result<String, PipelineError>;
}

/// OpenAI-compatible chat completion endpoint (`/chat/completions`).
pub struct HttpGenerator {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(config: &HttpAdapterConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Generation(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl ResponseGenerator for HttpGenerator {
    async fn generate(&self, messages: &[Turn]) -> Result<String, PipelineError> {
        let body = json!({
            "model": self.model,
            "messages": messages
                .iter()
                .map(|turn| json!({"role": turn.role, "content": turn.content}))
                .collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Generation(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Generation("response missing content".to_string()))
    }
}

/// Scripted generator for tests and offline runs: pops queued replies in
/// order and fails once the script is exhausted.
pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }

    /// A generator whose script is already exhausted; every call fails.
    pub fn failing() -> Self {
        Self::new(Vec::<String>::new())
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, _messages: &[Turn]) -> Result<String, PipelineError> {
        self.queue
            .lock()
            .pop_front()
            .ok_or_else(|| PipelineError::Generation("script exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_generator() {
        let llm = ScriptedGenerator::new(["Sure. I can help you today."]);
        let reply = llm.generate(&[Turn::user("can you help")]).await.unwrap();
        assert_eq!(reply, "Sure. I can help you today.");
        assert!(llm.generate(&[]).await.is_err());
    }
}
