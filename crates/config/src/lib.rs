//! Configuration for the voicebridge call relay
//!
//! Settings load from an optional TOML file plus `VOICEBRIDGE__`-prefixed
//! environment variables; every field has a serde default so an empty
//! config is runnable with the scripted adapters.

pub mod settings;

pub use settings::{
    AdapterConfig, EngineConfig, HttpAdapterConfig, PlacementConfig, RelayConfig,
    RetrievalConfig, ServerConfig, SessionConfig, Settings, SynthesisConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
