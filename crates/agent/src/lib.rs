//! Call session state machine and turn engine
//!
//! One `CallSession` owns the full lifecycle of one live call: it holds
//! the conversation history, tracks the in-flight assistant utterance,
//! and turns inbound transport events into transcription, generation,
//! and synthesis work. The `TurnEngine` produces one bounded assistant
//! utterance per user turn, optionally grounded in a retrieved document.

pub mod engine;
pub mod phrases;
pub mod session;
pub mod utterance;

pub use engine::TurnEngine;
pub use phrases::matches_end_phrase;
pub use session::{CallLifecycle, CallSession, SessionEvent};
pub use utterance::UtteranceHandle;

use thiserror::Error;

use voicebridge_pipeline::PipelineError;
use voicebridge_retrieval::RetrievalError;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("{0} deadline exceeded")]
    Deadline(&'static str),

    #[error("session is not in a state that accepts this event")]
    InvalidState,
}
