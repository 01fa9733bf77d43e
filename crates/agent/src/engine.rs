//! Turn engine
//!
//! Produces the assistant's next utterance from the transcribed user
//! text, the conversation history, and (when bound) retrieved document
//! context. Replies are truncated to a configurable sentence count so
//! one turn never monopolizes the channel.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::timeout;

use voicebridge_config::EngineConfig;
use voicebridge_core::Turn;
use voicebridge_pipeline::ResponseGenerator;
use voicebridge_retrieval::Retriever;

use crate::AgentError;

/// Instruction prepended to retrieved passages when grounding is bound.
const GROUNDING_INSTRUCTION: &str =
    "Answer using only the following document context. If the context does not \
     contain the answer, say you could not find it in the document.";

static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s").expect("sentence boundary pattern"));

/// Keep the first `max` sentences of `text`.
///
/// A boundary is `.`, `!`, or `?` followed by whitespace; a reply with
/// no such boundary (including one ending exactly at its final full
/// stop) passes through verbatim. `max == 0` disables truncation.
pub fn truncate_sentences(text: &str, max: usize) -> String {
    if max == 0 {
        return text.to_string();
    }

    for (seen, boundary) in SENTENCE_BOUNDARY.find_iter(text).enumerate() {
        if seen + 1 == max {
            return text[..boundary.start() + 1].to_string();
        }
    }

    text.to_string()
}

/// Produces one bounded assistant utterance per user turn.
pub struct TurnEngine {
    generator: Arc<dyn ResponseGenerator>,
    retriever: Option<Arc<dyn Retriever>>,
    config: EngineConfig,
}

impl TurnEngine {
    pub fn new(
        generator: Arc<dyn ResponseGenerator>,
        retriever: Option<Arc<dyn Retriever>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            generator,
            retriever,
            config,
        }
    }

    pub fn has_retriever(&self) -> bool {
        self.retriever.is_some()
    }

    /// Produce the assistant's next utterance and record the completed
    /// turn in `history`.
    ///
    /// Generation and retrieval failures never propagate: the configured
    /// fallback line is substituted and still appended as the assistant
    /// entry, so each completed turn adds exactly two history entries.
    pub async fn next_utterance(&self, history: &mut Vec<Turn>, user_text: &str) -> String {
        let reply = match self.reply_for(history, user_text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "reply generation failed, substituting fallback");
                self.config.fallback_text.clone()
            }
        };

        history.push(Turn::user(user_text));
        history.push(Turn::assistant(reply.clone()));
        reply
    }

    async fn reply_for(&self, history: &[Turn], user_text: &str) -> Result<String, AgentError> {
        let mut messages = Vec::with_capacity(history.len() + 2);

        if let Some(retriever) = &self.retriever {
            let passages = timeout(
                Duration::from_millis(self.config.retrieval_timeout_ms),
                retriever.retrieve(user_text),
            )
            .await
            .map_err(|_| AgentError::Deadline("retrieval"))??;

            // Grounded mode with nothing retrieved: answer with the fixed
            // reply instead of letting the model improvise.
            if passages.is_empty() {
                return Ok(self.config.grounding_miss_text.clone());
            }

            let context = passages
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(Turn::system(format!("{GROUNDING_INSTRUCTION}\n{context}")));
        } else if !self.config.system_prompt.is_empty() {
            messages.push(Turn::system(self.config.system_prompt.clone()));
        }

        messages.extend_from_slice(history);
        messages.push(Turn::user(user_text));

        let raw = timeout(
            Duration::from_millis(self.config.generation_timeout_ms),
            self.generator.generate(&messages),
        )
        .await
        .map_err(|_| AgentError::Deadline("generation"))??;

        Ok(truncate_sentences(&raw, self.config.max_sentences))
    }
}
