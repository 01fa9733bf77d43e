//! Application state
//!
//! Shared across all handlers. Adapters are constructed once and shared;
//! each call gets its own session and turn engine wired from them.

use std::sync::Arc;

use tokio::sync::mpsc;

use voicebridge_agent::{CallSession, SessionEvent, TurnEngine};
use voicebridge_config::Settings;
use voicebridge_core::CallId;
use voicebridge_pipeline::{ResponseGenerator, Synthesizer, Transcriber};
use voicebridge_retrieval::Retriever;

use crate::placement::PlacementClient;
use crate::registry::SessionRegistry;
use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub settings: Arc<Settings>,
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
    /// Speech-to-text adapter
    pub transcriber: Arc<dyn Transcriber>,
    /// Chat completion adapter
    pub generator: Arc<dyn ResponseGenerator>,
    /// Text-to-speech adapter
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Grounding document, if one is loaded
    pub retriever: Option<Arc<dyn Retriever>>,
    /// Outbound call placement
    pub placement: Arc<PlacementClient>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ResponseGenerator>,
        synthesizer: Arc<dyn Synthesizer>,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> Result<Self, ServerError> {
        let placement = Arc::new(PlacementClient::new(settings.placement.clone())?);

        Ok(Self {
            settings: Arc::new(settings),
            registry: Arc::new(SessionRegistry::new()),
            transcriber,
            generator,
            synthesizer,
            retriever,
            placement,
        })
    }

    /// Wire a session for one call from the shared adapters.
    pub fn build_session(&self, call_id: CallId, outbound: mpsc::Sender<SessionEvent>) -> CallSession {
        let engine = TurnEngine::new(
            self.generator.clone(),
            self.retriever.clone(),
            self.settings.engine.clone(),
        );

        CallSession::new(
            call_id,
            self.settings.session.clone(),
            engine,
            self.transcriber.clone(),
            self.synthesizer.clone(),
            outbound,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use voicebridge_agent::CallLifecycle;
    use voicebridge_pipeline::{ScriptedGenerator, ScriptedSynthesizer, ScriptedTranscriber};

    fn scripted_state() -> AppState {
        AppState::new(
            Settings::default(),
            Arc::new(ScriptedTranscriber::failing()),
            Arc::new(ScriptedGenerator::failing()),
            Arc::new(ScriptedSynthesizer::new(1, 8)),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_session_starts_in_starting() {
        let state = scripted_state();
        let (tx, _rx) = mpsc::channel(8);
        let session = state.build_session(CallId::new("A"), tx);
        assert_eq!(session.lifecycle(), CallLifecycle::Starting);
    }
}
