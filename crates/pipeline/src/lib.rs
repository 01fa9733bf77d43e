//! Speech pipeline adapters
//!
//! The three capabilities the call session depends on, each behind an
//! async trait so production backends and scripted test doubles are
//! interchangeable:
//! - `Transcriber`: one completed user turn of audio to text
//! - `ResponseGenerator`: chat messages to reply text
//! - `Synthesizer`: reply text to a lazy stream of audio chunks
//!
//! Synthesis is a stream rather than a blob so the relay can start
//! forwarding audio before the vendor finishes, and so barge-in can
//! abandon the remainder mid-utterance.

pub mod llm;
pub mod stt;
pub mod tts;

pub use llm::{HttpGenerator, ResponseGenerator, ScriptedGenerator};
pub use stt::{HttpTranscriber, ScriptedTranscriber, Transcriber};
pub use tts::{AudioStream, ScriptedSynthesizer, Synthesizer, WsSynthesizer};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),
}
