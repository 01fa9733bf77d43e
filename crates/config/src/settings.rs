//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP/WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Outbound audio pacing
    #[serde(default)]
    pub relay: RelayConfig,

    /// Per-call session behavior
    #[serde(default)]
    pub session: SessionConfig,

    /// Turn engine behavior
    #[serde(default)]
    pub engine: EngineConfig,

    /// Speech pipeline adapter endpoints
    #[serde(default)]
    pub adapters: AdapterConfig,

    /// Document retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Outbound call placement
    #[serde(default)]
    pub placement: PlacementConfig,
}

impl Settings {
    /// Load settings from an optional TOML file plus environment overrides.
    ///
    /// Environment variables use the `VOICEBRIDGE__` prefix with `__` as
    /// the section separator, e.g. `VOICEBRIDGE__SERVER__PORT=8080`.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("VOICEBRIDGE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.chunk_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "relay.chunk_bytes".to_string(),
                message: "outbound chunk size must be non-zero".to_string(),
            });
        }

        if self.session.transcription_timeout_ms < 100
            || self.engine.generation_timeout_ms < 100
            || self.session.synthesis_timeout_ms < 100
        {
            return Err(ConfigError::InvalidValue {
                field: "timeouts".to_string(),
                message: "adapter deadlines below 100ms cannot complete a request".to_string(),
            });
        }

        if self.session.end_phrases.is_empty() {
            tracing::warn!("no end phrases configured; calls can only end via stop or hangup");
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket media-stream path
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Public hostname the telephony vendor can reach, without scheme.
    /// Used to build the stream URL in the answer webhook.
    #[serde(default)]
    pub public_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            public_host: String::new(),
        }
    }
}

/// Outbound audio pacing.
///
/// Synthesized audio is re-chunked and paced so the transport's playback
/// buffer is fed at roughly real-time rate instead of in a burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Maximum bytes per outbound media frame
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Delay between consecutive outbound media frames, in milliseconds
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: default_chunk_bytes(),
            chunk_interval_ms: default_chunk_interval_ms(),
        }
    }
}

/// Per-call session behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Greeting spoken when the call goes active
    #[serde(default = "default_intro_text")]
    pub intro_text: String,

    /// Closing remark spoken before an assistant-initiated hangup
    #[serde(default = "default_farewell_text")]
    pub farewell_text: String,

    /// Spoken when an adapter fails; the call stays active
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,

    /// Phrases that end the call, matched case-insensitively anywhere
    /// in the transcribed user text
    #[serde(default = "default_end_phrases")]
    pub end_phrases: Vec<String>,

    /// Transcription deadline in milliseconds
    #[serde(default = "default_transcription_timeout_ms")]
    pub transcription_timeout_ms: u64,

    /// Deadline for opening a synthesis stream, in milliseconds
    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,

    /// Maximum gap between consecutive synthesis chunks before the
    /// stream is treated as stalled, in milliseconds
    #[serde(default = "default_chunk_gap_timeout_ms")]
    pub chunk_gap_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            intro_text: default_intro_text(),
            farewell_text: default_farewell_text(),
            fallback_text: default_fallback_text(),
            end_phrases: default_end_phrases(),
            transcription_timeout_ms: default_transcription_timeout_ms(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            chunk_gap_timeout_ms: default_chunk_gap_timeout_ms(),
        }
    }
}

/// Turn engine behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Optional system prompt used when no retriever is bound
    #[serde(default)]
    pub system_prompt: String,

    /// Reply used when a retriever is bound but returns no passages
    #[serde(default = "default_grounding_miss_text")]
    pub grounding_miss_text: String,

    /// Reply substituted when generation fails
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,

    /// Truncate replies to this many sentences; 0 disables truncation
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,

    /// Generation deadline in milliseconds
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,

    /// Retrieval deadline in milliseconds
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            grounding_miss_text: default_grounding_miss_text(),
            fallback_text: default_fallback_text(),
            max_sentences: default_max_sentences(),
            generation_timeout_ms: default_generation_timeout_ms(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
        }
    }
}

/// Speech pipeline adapter endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Transcription endpoint (OpenAI-compatible)
    #[serde(default)]
    pub transcription: HttpAdapterConfig,

    /// Chat completion endpoint (OpenAI-compatible)
    #[serde(default)]
    pub generation: HttpAdapterConfig,

    /// Streaming synthesis endpoint
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

/// One HTTP adapter endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpAdapterConfig {
    /// Base URL without trailing slash, e.g. `https://api.groq.com/openai/v1`
    #[serde(default = "default_api_base")]
    pub base_url: String,

    /// Bearer API key
    #[serde(default)]
    pub api_key: String,

    /// Model name
    #[serde(default)]
    pub model: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpAdapterConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            api_key: String::new(),
            model: String::new(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

/// Streaming synthesis endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// WebSocket URL including any auth query parameters
    #[serde(default)]
    pub ws_url: String,

    /// Model name
    #[serde(default = "default_tts_model")]
    pub model: String,

    /// Voice identifier
    #[serde(default)]
    pub voice_id: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            model: default_tts_model(),
            voice_id: String::new(),
        }
    }
}

/// Document retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Plain-text document to ground answers in; empty disables grounding
    #[serde(default)]
    pub document_path: String,

    /// Passages returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Characters per passage when chunking the document
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Overlap between consecutive passages, in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            document_path: String::new(),
            top_k: default_top_k(),
            chunk_chars: default_chunk_chars(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Outbound call placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Vendor REST base URL
    #[serde(default = "default_placement_base")]
    pub base_url: String,

    /// Account identifier
    #[serde(default)]
    pub account_sid: String,

    /// Auth token
    #[serde(default)]
    pub auth_token: String,

    /// Caller number in E.164 form
    #[serde(default)]
    pub from_number: String,

    /// Webhook the vendor fetches when the callee answers
    #[serde(default)]
    pub answer_url: String,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            base_url: default_placement_base(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            answer_url: String::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5050
}

fn default_ws_path() -> String {
    "/ws/media".to_string()
}

fn default_chunk_bytes() -> usize {
    4000
}

fn default_chunk_interval_ms() -> u64 {
    100
}

fn default_intro_text() -> String {
    "Hello! You are connected to your assistant. How can I help you today?".to_string()
}

fn default_farewell_text() -> String {
    "Thanks for calling. Goodbye!".to_string()
}

fn default_fallback_text() -> String {
    "Sorry, I ran into a problem. Could you say that again?".to_string()
}

fn default_grounding_miss_text() -> String {
    "I could not find the answer in the document.".to_string()
}

fn default_end_phrases() -> Vec<String> {
    vec!["goodbye".to_string(), "end call".to_string()]
}

fn default_max_sentences() -> usize {
    2
}

fn default_transcription_timeout_ms() -> u64 {
    10_000
}

fn default_generation_timeout_ms() -> u64 {
    15_000
}

fn default_retrieval_timeout_ms() -> u64 {
    2_000
}

fn default_synthesis_timeout_ms() -> u64 {
    10_000
}

fn default_chunk_gap_timeout_ms() -> u64 {
    5_000
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_tts_model() -> String {
    "sonic-english".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_chunk_chars() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_placement_base() -> String {
    "https://api.twilio.com/2010-04-01".to_string()
}
