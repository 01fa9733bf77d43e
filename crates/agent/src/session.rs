//! Call session
//!
//! Per-call state machine. Events from the transport arrive strictly in
//! order on the owning connection task; the only concurrent piece is the
//! chunk pump that forwards synthesized audio, and it coordinates with
//! the event path purely through the utterance cancel flag.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use voicebridge_config::SessionConfig;
use voicebridge_core::{AudioChunk, CallId, Turn};
use voicebridge_pipeline::{Synthesizer, Transcriber};

use crate::engine::TurnEngine;
use crate::phrases::matches_end_phrase;
use crate::utterance::UtteranceHandle;
use crate::AgentError;

/// Lifecycle of one call.
///
/// Audio is only accepted in `Active`; in `Ending` and `Ended` inbound
/// frames are dropped, not queued, and no new user-turn utterance may
/// start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLifecycle {
    Starting,
    Active,
    Ending,
    Ended,
}

/// What the session emits toward the transport writer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One synthesized audio chunk to forward
    Audio(AudioChunk),
    /// Cancellation notice: truncate any buffered playback
    Clear,
    /// Assistant-initiated termination; close after sending
    Hangup,
}

/// State machine for one live call.
pub struct CallSession {
    call_id: CallId,
    config: SessionConfig,
    engine: TurnEngine,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
    outbound: mpsc::Sender<SessionEvent>,
    history: Mutex<Vec<Turn>>,
    lifecycle: Mutex<CallLifecycle>,
    /// Shared with the chunk pump, which clears it on natural completion.
    active: Arc<Mutex<Option<UtteranceHandle>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CallSession {
    pub fn new(
        call_id: CallId,
        config: SessionConfig,
        engine: TurnEngine,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        outbound: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            call_id,
            config,
            engine,
            transcriber,
            synthesizer,
            outbound,
            history: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(CallLifecycle::Starting),
            active: Arc::new(Mutex::new(None)),
            pump: Mutex::new(None),
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn lifecycle(&self) -> CallLifecycle {
        *self.lifecycle.lock()
    }

    /// Snapshot of the conversation so far.
    pub fn history(&self) -> Vec<Turn> {
        self.history.lock().clone()
    }

    /// Transition `Starting -> Active` and stream the intro utterance.
    pub async fn begin(&self) -> Result<(), AgentError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != CallLifecycle::Starting {
                return Err(AgentError::InvalidState);
            }
            *lifecycle = CallLifecycle::Active;
        }

        tracing::info!(call_id = %self.call_id, "call active");
        self.speak_or_fallback(self.config.intro_text.clone()).await;
        Ok(())
    }

    /// One utterance-complete user audio payload.
    pub async fn handle_media(&self, audio: Vec<u8>) {
        if self.lifecycle() != CallLifecycle::Active {
            tracing::debug!(call_id = %self.call_id, "dropping audio frame outside Active");
            return;
        }

        let deadline = Duration::from_millis(self.config.transcription_timeout_ms);
        let transcript = match timeout(deadline, self.transcriber.transcribe(&audio)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(call_id = %self.call_id, error = %e, "transcription failed");
                self.speak_or_fallback(self.config.fallback_text.clone()).await;
                return;
            }
            Err(_) => {
                tracing::warn!(call_id = %self.call_id, "transcription deadline exceeded");
                self.speak_or_fallback(self.config.fallback_text.clone()).await;
                return;
            }
        };

        if transcript.trim().is_empty() {
            tracing::debug!(call_id = %self.call_id, "empty transcript, ignoring turn");
            return;
        }

        tracing::debug!(call_id = %self.call_id, %transcript, "user turn");

        if matches_end_phrase(&self.config.end_phrases, &transcript) {
            tracing::info!(call_id = %self.call_id, "end phrase detected");
            self.finish_call().await;
            return;
        }

        // A new user turn supersedes whatever is still streaming.
        self.cancel_active();

        let mut working = self.history.lock().clone();
        let reply = self.engine.next_utterance(&mut working, &transcript).await;
        *self.history.lock() = working;

        self.speak_or_fallback(reply).await;
    }

    /// Barge-in: the caller started speaking over the assistant.
    ///
    /// Cancels the active utterance at most once; repeated signals while
    /// the same utterance is already cancelled do nothing.
    pub async fn handle_speech_started(&self) {
        if self.lifecycle() != CallLifecycle::Active {
            return;
        }

        let newly_cancelled = {
            let active = self.active.lock();
            match &*active {
                Some(handle) => handle.cancel(),
                None => false,
            }
        };

        if newly_cancelled {
            tracing::debug!(call_id = %self.call_id, "barge-in, cancelling active utterance");
            let _ = self.outbound.send(SessionEvent::Clear).await;
        }
    }

    /// Graceful teardown from the transport's `stop` event.
    ///
    /// Idempotent: a second `stop` finds the session already in
    /// `Ending`/`Ended` and returns without side effects.
    pub async fn handle_stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                CallLifecycle::Ending | CallLifecycle::Ended => return,
                _ => *lifecycle = CallLifecycle::Ending,
            }
        }

        tracing::info!(call_id = %self.call_id, "stop received, ending call");
        self.await_utterance().await;
    }

    /// Terminal transition, after the transport is closed and the
    /// session is evicted from the registry. Also the forced path on a
    /// transport failure, skipping `Ending`.
    pub fn mark_ended(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == CallLifecycle::Ended {
            return;
        }
        *lifecycle = CallLifecycle::Ended;

        if let Some(handle) = self.active.lock().take() {
            handle.cancel();
        }
        tracing::info!(call_id = %self.call_id, "session ended");
    }

    /// Wait until the current utterance's chunk pump stops, whether by
    /// completion or cancellation.
    pub async fn await_utterance(&self) {
        let task = self.pump.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Voice-command ending: the caller must hear the closing remark
    /// before the channel is torn down.
    async fn finish_call(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != CallLifecycle::Active {
                return;
            }
            *lifecycle = CallLifecycle::Ending;
        }

        let _ = self.speak(self.config.farewell_text.clone()).await;
        self.await_utterance().await;
        let _ = self.outbound.send(SessionEvent::Hangup).await;
    }

    fn cancel_active(&self) {
        if let Some(handle) = &*self.active.lock() {
            if handle.cancel() {
                tracing::debug!(
                    call_id = %self.call_id,
                    utterance = %handle.id(),
                    "superseded by new turn"
                );
            }
        }
    }

    async fn speak_or_fallback(&self, text: String) {
        let is_fallback = text == self.config.fallback_text;
        if self.speak(text).await.is_err() && !is_fallback {
            let _ = self.speak(self.config.fallback_text.clone()).await;
        }
    }

    /// Start streaming one utterance, superseding any previous one.
    async fn speak(&self, text: String) -> Result<(), AgentError> {
        if self.lifecycle() == CallLifecycle::Ended {
            return Ok(());
        }

        let deadline = Duration::from_millis(self.config.synthesis_timeout_ms);
        let stream = match timeout(deadline, self.synthesizer.synthesize(&text)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(call_id = %self.call_id, error = %e, "synthesis failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(call_id = %self.call_id, "synthesis deadline exceeded");
                return Err(AgentError::Deadline("synthesis"));
            }
        };

        let handle = UtteranceHandle::new();
        {
            let mut active = self.active.lock();
            if let Some(previous) = active.take() {
                previous.cancel();
            }
            *active = Some(handle.clone());
        }

        tracing::debug!(call_id = %self.call_id, utterance = %handle.id(), "streaming utterance");

        let outbound = self.outbound.clone();
        let call_id = self.call_id.clone();
        let gap = Duration::from_millis(self.config.chunk_gap_timeout_ms);
        let pump_handle = handle.clone();
        let active_slot = Arc::clone(&self.active);

        let task = tokio::spawn(async move {
            let mut stream = stream;
            loop {
                if pump_handle.is_cancelled() {
                    break;
                }

                let chunk = match timeout(gap, stream.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(e))) => {
                        tracing::warn!(%call_id, error = %e, "synthesis stream error");
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(%call_id, "synthesis stream stalled");
                        break;
                    }
                };

                // Re-check after the await: barge-in may have landed
                // while this chunk was in flight.
                if pump_handle.is_cancelled() {
                    break;
                }

                if outbound.send(SessionEvent::Audio(chunk)).await.is_err() {
                    break;
                }
            }

            // Release the slot unless a successor already took it.
            let mut active = active_slot.lock();
            if active.as_ref().map(UtteranceHandle::id) == Some(pump_handle.id()) {
                *active = None;
            }
        });

        // A superseded pump exits on its own cancelled flag.
        let _ = self.pump.lock().replace(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicebridge_config::EngineConfig;
    use voicebridge_pipeline::{ScriptedGenerator, ScriptedSynthesizer, ScriptedTranscriber};

    fn session_with(
        transcriber: ScriptedTranscriber,
        generator: ScriptedGenerator,
    ) -> (Arc<CallSession>, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let engine = TurnEngine::new(Arc::new(generator), None, EngineConfig::default());
        let session = CallSession::new(
            CallId::new("CA-test"),
            SessionConfig::default(),
            engine,
            Arc::new(transcriber),
            Arc::new(ScriptedSynthesizer::new(2, 16)),
            tx,
        );
        (Arc::new(session), rx)
    }

    #[tokio::test]
    async fn test_begin_only_from_starting() {
        let (session, _rx) = session_with(
            ScriptedTranscriber::failing(),
            ScriptedGenerator::failing(),
        );

        assert_eq!(session.lifecycle(), CallLifecycle::Starting);
        session.begin().await.unwrap();
        assert_eq!(session.lifecycle(), CallLifecycle::Active);
        assert!(session.begin().await.is_err());
    }

    #[tokio::test]
    async fn test_media_dropped_before_active() {
        let (session, _rx) = session_with(
            ScriptedTranscriber::new(["should never be consumed"]),
            ScriptedGenerator::failing(),
        );

        session.handle_media(vec![0u8; 4]).await;
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (session, _rx) = session_with(
            ScriptedTranscriber::failing(),
            ScriptedGenerator::failing(),
        );

        session.begin().await.unwrap();
        session.handle_stop().await;
        assert_eq!(session.lifecycle(), CallLifecycle::Ending);
        session.handle_stop().await;
        assert_eq!(session.lifecycle(), CallLifecycle::Ending);

        session.mark_ended();
        session.mark_ended();
        assert_eq!(session.lifecycle(), CallLifecycle::Ended);
    }

    #[tokio::test]
    async fn test_transport_failure_forces_ended() {
        let (session, _rx) = session_with(
            ScriptedTranscriber::failing(),
            ScriptedGenerator::failing(),
        );

        session.begin().await.unwrap();
        session.mark_ended();
        assert_eq!(session.lifecycle(), CallLifecycle::Ended);

        // Frames after the forced end are dropped.
        session.handle_media(vec![0u8; 4]).await;
        assert!(session.history().is_empty());
    }
}
