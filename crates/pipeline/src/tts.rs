//! Streaming synthesis adapter
//!
//! Synthesis yields a finite, non-restartable stream of audio chunks.
//! Consumers poll it lazily; dropping the stream abandons the rest of
//! the utterance, which is how barge-in cancellation reaches the vendor.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use voicebridge_config::SynthesisConfig;
use voicebridge_core::{AudioChunk, AudioFormat, MULAW_SILENCE};

use crate::PipelineError;

/// Lazy sequence of synthesized audio chunks.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioChunk, PipelineError>> + Send>>;

/// Text-to-speech capability.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Start synthesizing `text`. Chunks arrive as the backend produces
    /// them; the stream ends when the utterance is complete.
    async fn synthesize(&self, text: &str) -> Result<AudioStream, PipelineError>;
}

/// WebSocket streaming synthesis client.
///
/// Speaks the vendor protocol of one JSON request per utterance followed
/// by a sequence of messages carrying base64 `data` chunks, terminated by
/// a `done` flag or an `error`.
pub struct WsSynthesizer {
    ws_url: String,
    model: String,
    voice_id: String,
    format: AudioFormat,
}

impl WsSynthesizer {
    pub fn new(config: &SynthesisConfig, format: AudioFormat) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            model: config.model.clone(),
            voice_id: config.voice_id.clone(),
            format,
        }
    }

    fn request_for(&self, text: &str) -> String {
        json!({
            "model_id": self.model,
            "transcript": text,
            "voice": {"mode": "id", "id": self.voice_id},
            "context_id": format!("ctx-{}", uuid::Uuid::new_v4().simple()),
            "output_format": {
                "container": "raw",
                "encoding": self.format.encoding.wire_name(),
                "sample_rate": self.format.sample_rate,
            },
        })
        .to_string()
    }
}

#[async_trait]
impl Synthesizer for WsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioStream, PipelineError> {
        let (mut ws, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;

        ws.send(Message::Text(self.request_for(text)))
            .await
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<Result<AudioChunk, PipelineError>>(32);

        tokio::spawn(async move {
            while let Some(message) = ws.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        let _ = tx.send(Err(PipelineError::Synthesis(e.to_string()))).await;
                        break;
                    }
                };

                let text = match message {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let value: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("unparseable synthesis message: {}", e);
                        continue;
                    }
                };

                if let Some(error) = value.get("error").and_then(Value::as_str) {
                    let _ = tx
                        .send(Err(PipelineError::Synthesis(error.to_string())))
                        .await;
                    break;
                }

                if value.get("done").and_then(Value::as_bool).unwrap_or(false) {
                    break;
                }

                if let Some(data) = value.get("data").and_then(Value::as_str) {
                    let chunk = match BASE64.decode(data) {
                        Ok(c) => c,
                        Err(e) => {
                            tracing::warn!("undecodable synthesis chunk: {}", e);
                            continue;
                        }
                    };

                    // Receiver dropped means the utterance was cancelled;
                    // stop pulling from the vendor.
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Scripted synthesizer for tests and offline runs: emits a fixed number
/// of silence chunks per utterance and records what it was asked to say.
pub struct ScriptedSynthesizer {
    chunk_count: usize,
    chunk_bytes: usize,
    chunk_delay: Duration,
    fail: bool,
    spoken: Mutex<Vec<String>>,
}

impl ScriptedSynthesizer {
    pub fn new(chunk_count: usize, chunk_bytes: usize) -> Self {
        Self {
            chunk_count,
            chunk_bytes,
            chunk_delay: Duration::ZERO,
            fail: false,
            spoken: Mutex::new(Vec::new()),
        }
    }

    /// Pause between chunks, to let tests race cancellation against an
    /// utterance that is still streaming.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// A synthesizer that refuses every request.
    pub fn failing() -> Self {
        let mut synth = Self::new(0, 0);
        synth.fail = true;
        synth
    }

    /// Texts synthesized so far, in request order.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioStream, PipelineError> {
        if self.fail {
            return Err(PipelineError::Synthesis("scripted failure".to_string()));
        }

        self.spoken.lock().push(text.to_string());

        let (tx, rx) = mpsc::channel::<Result<AudioChunk, PipelineError>>(4);
        let chunk_count = self.chunk_count;
        let chunk = vec![MULAW_SILENCE; self.chunk_bytes];
        let delay = self.chunk_delay;

        tokio::spawn(async move {
            for _ in 0..chunk_count {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(chunk.clone())).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
