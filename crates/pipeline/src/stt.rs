//! Transcription adapter
//!
//! One completed user turn of audio in, text out. Turn segmentation is
//! the transport's job; by the time audio reaches this seam it is a
//! single utterance-complete payload.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use voicebridge_config::HttpAdapterConfig;

use crate::PipelineError;

/// Speech-to-text capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one user turn. Empty text means nothing was detected.
    async fn transcribe(&self, audio: &[u8]) -> Result<String, PipelineError>;
}

/// OpenAI-compatible transcription endpoint (`/audio/transcriptions`).
pub struct HttpTranscriber {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(config: &HttpAdapterConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Transcription(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, PipelineError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("turn.wav")
            .mime_str("audio/wav")
            .map_err(|e| PipelineError::Transcription(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Transcription(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Transcription(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Transcription(e.to_string()))?;

        body.get("text")
            .and_then(Value::as_str)
            .map(|t| t.trim().to_string())
            .ok_or_else(|| PipelineError::Transcription("response missing text field".to_string()))
    }
}

/// Scripted transcriber for tests and offline runs: pops queued replies
/// in order and fails once the script is exhausted.
pub struct ScriptedTranscriber {
    queue: Mutex<VecDeque<String>>,
}

impl ScriptedTranscriber {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }

    /// A transcriber whose script is already exhausted; every call fails.
    pub fn failing() -> Self {
        Self::new(Vec::<String>::new())
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, PipelineError> {
        self.queue
            .lock()
            .pop_front()
            .ok_or_else(|| PipelineError::Transcription("script exhausted".to_string()))
    }
}
