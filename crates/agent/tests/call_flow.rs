//! Integration tests for the call session (transcribe -> engine -> synthesize)
//!
//! These drive a session the way the relay does: sequential events in,
//! audio/clear/hangup commands out on the session channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use voicebridge_agent::{CallLifecycle, CallSession, SessionEvent, TurnEngine};
use voicebridge_config::{EngineConfig, SessionConfig};
use voicebridge_core::{CallId, Turn, TurnRole};
use voicebridge_pipeline::{
    PipelineError, ResponseGenerator, ScriptedGenerator, ScriptedSynthesizer, ScriptedTranscriber,
};
use voicebridge_retrieval::{InMemoryRetriever, Passage, Retriever, RetrievalError};

/// Generator that records every message list it receives.
struct RecordingGenerator {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl RecordingGenerator {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResponseGenerator for RecordingGenerator {
    async fn generate(&self, messages: &[Turn]) -> Result<String, PipelineError> {
        self.calls.lock().push(messages.to_vec());
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| PipelineError::Generation("script exhausted".to_string()))
    }
}

struct SessionUnderTest {
    session: Arc<CallSession>,
    synthesizer: Arc<ScriptedSynthesizer>,
    rx: mpsc::Receiver<SessionEvent>,
}

fn build_session(
    transcriber: ScriptedTranscriber,
    generator: Arc<dyn ResponseGenerator>,
    retriever: Option<Arc<dyn Retriever>>,
    config: SessionConfig,
    synthesizer: ScriptedSynthesizer,
) -> SessionUnderTest {
    let (tx, rx) = mpsc::channel(256);
    let synthesizer = Arc::new(synthesizer);
    let engine = TurnEngine::new(generator, retriever, EngineConfig::default());
    let session = CallSession::new(
        CallId::new("A"),
        config,
        engine,
        Arc::new(transcriber),
        synthesizer.clone(),
        tx,
    );
    SessionUnderTest {
        session: Arc::new(session),
        synthesizer,
        rx,
    }
}

fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn audio_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Audio(_)))
        .count()
}

/// start -> intro audio -> media -> transcription -> generation ->
/// truncation keeps both sentences -> synthesis streams chunks.
#[tokio::test]
async fn test_end_to_end_turn() {
    let mut t = build_session(
        ScriptedTranscriber::new(["can you help"]),
        Arc::new(ScriptedGenerator::new(["Sure. I can help you today."])),
        None,
        SessionConfig::default(),
        ScriptedSynthesizer::new(3, 160),
    );

    t.session.begin().await.unwrap();
    t.session.await_utterance().await;
    let intro_events = drain(&mut t.rx);
    assert!(audio_count(&intro_events) >= 1, "intro must stream audio");

    t.session.handle_media(vec![0u8; 320]).await;
    t.session.await_utterance().await;
    let turn_events = drain(&mut t.rx);
    assert!(audio_count(&turn_events) >= 1, "reply must stream audio");

    // Both sentences survive truncation: the second ends at end-of-string.
    let spoken = t.synthesizer.spoken();
    assert_eq!(spoken.len(), 2);
    assert_eq!(spoken[1], "Sure. I can help you today.");

    let history = t.session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, TurnRole::User);
    assert_eq!(history[0].content, "can you help");
    assert_eq!(history[1].role, TurnRole::Assistant);
}

/// History holds exactly 2N entries after N completed turns.
#[tokio::test]
async fn test_history_grows_two_per_turn() {
    let mut t = build_session(
        ScriptedTranscriber::new(["first question", "second question"]),
        Arc::new(ScriptedGenerator::new(["First reply.", "Second reply."])),
        None,
        SessionConfig::default(),
        ScriptedSynthesizer::new(1, 160),
    );

    t.session.begin().await.unwrap();
    for _ in 0..2 {
        t.session.handle_media(vec![0u8; 320]).await;
        t.session.await_utterance().await;
    }
    drain(&mut t.rx);

    assert_eq!(t.session.history().len(), 4);
}

/// A generation failure substitutes the fallback line and still appends
/// exactly one assistant entry; the call stays active.
#[tokio::test]
async fn test_generation_failure_degrades_to_fallback() {
    let mut t = build_session(
        ScriptedTranscriber::new(["tell me something"]),
        Arc::new(ScriptedGenerator::failing()),
        None,
        SessionConfig::default(),
        ScriptedSynthesizer::new(1, 160),
    );

    t.session.begin().await.unwrap();
    t.session.handle_media(vec![0u8; 320]).await;
    t.session.await_utterance().await;
    drain(&mut t.rx);

    let history = t.session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, EngineConfig::default().fallback_text);
    assert_eq!(t.session.lifecycle(), CallLifecycle::Active);
}

/// A transcription failure speaks the fallback line but records nothing:
/// the turn never completed.
#[tokio::test]
async fn test_transcription_failure_keeps_history_clean() {
    let mut t = build_session(
        ScriptedTranscriber::failing(),
        Arc::new(ScriptedGenerator::new(["never used"])),
        None,
        SessionConfig::default(),
        ScriptedSynthesizer::new(1, 160),
    );

    t.session.begin().await.unwrap();
    t.session.handle_media(vec![0u8; 320]).await;
    t.session.await_utterance().await;
    drain(&mut t.rx);

    assert!(t.session.history().is_empty());
    let spoken = t.synthesizer.spoken();
    assert_eq!(spoken.last().unwrap(), &SessionConfig::default().fallback_text);
    assert_eq!(t.session.lifecycle(), CallLifecycle::Active);
}

/// Two speechStarted signals cancel at most the one active utterance and
/// emit exactly one clear notice; the next turn gets a fresh handle.
#[tokio::test]
async fn test_barge_in_is_idempotent() {
    let mut t = build_session(
        ScriptedTranscriber::new(["keep talking"]),
        Arc::new(ScriptedGenerator::new(["A fresh reply."])),
        None,
        SessionConfig::default(),
        ScriptedSynthesizer::new(20, 160).with_chunk_delay(Duration::from_millis(10)),
    );

    t.session.begin().await.unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;

    t.session.handle_speech_started().await;
    t.session.handle_speech_started().await;
    t.session.await_utterance().await;

    t.session.handle_media(vec![0u8; 320]).await;
    t.session.await_utterance().await;

    let events = drain(&mut t.rx);
    let clears = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Clear))
        .count();
    assert_eq!(clears, 1, "repeated barge-in must not emit repeated clears");

    let clear_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::Clear))
        .unwrap();
    assert!(
        events[clear_at + 1..]
            .iter()
            .any(|e| matches!(e, SessionEvent::Audio(_))),
        "a fresh utterance must stream after the stale cancellation"
    );
}

/// A barge-in with no active utterance is a no-op.
#[tokio::test]
async fn test_barge_in_without_utterance() {
    let mut t = build_session(
        ScriptedTranscriber::failing(),
        Arc::new(ScriptedGenerator::failing()),
        None,
        SessionConfig::default(),
        ScriptedSynthesizer::new(1, 160),
    );

    t.session.begin().await.unwrap();
    t.session.await_utterance().await;
    drain(&mut t.rx);

    t.session.handle_speech_started().await;
    let events = drain(&mut t.rx);
    assert!(events.iter().all(|e| !matches!(e, SessionEvent::Clear)));
}

/// "okay goodbye then" ends the call: farewell streams fully, then a
/// hangup command, and the session sits in Ending.
#[tokio::test]
async fn test_end_phrase_triggers_farewell_then_hangup() {
    let mut t = build_session(
        ScriptedTranscriber::new(["okay goodbye then"]),
        Arc::new(ScriptedGenerator::new(["should not be consumed"])),
        None,
        SessionConfig::default(),
        ScriptedSynthesizer::new(2, 160),
    );

    t.session.begin().await.unwrap();
    t.session.await_utterance().await;
    drain(&mut t.rx);

    t.session.handle_media(vec![0u8; 320]).await;
    let events = drain(&mut t.rx);

    assert!(matches!(events.last(), Some(SessionEvent::Hangup)));
    assert!(audio_count(&events) >= 1, "caller must hear the farewell");
    assert_eq!(t.session.lifecycle(), CallLifecycle::Ending);

    let spoken = t.synthesizer.spoken();
    assert_eq!(spoken.last().unwrap(), &SessionConfig::default().farewell_text);

    // The ending turn is not a completed conversation turn.
    assert!(t.session.history().is_empty());
}

/// Containment semantics: "the good bye song" matches a "good bye"
/// phrase. Deliberate, per the phrase-matching contract.
#[tokio::test]
async fn test_end_phrase_containment_over_matches() {
    let mut config = SessionConfig::default();
    config.end_phrases = vec!["good bye".to_string()];

    let mut t = build_session(
        ScriptedTranscriber::new(["play the good bye song"]),
        Arc::new(ScriptedGenerator::new(["should not be consumed"])),
        None,
        config,
        ScriptedSynthesizer::new(1, 160),
    );

    t.session.begin().await.unwrap();
    t.session.await_utterance().await;
    t.session.handle_media(vec![0u8; 320]).await;
    let events = drain(&mut t.rx);

    assert!(matches!(events.last(), Some(SessionEvent::Hangup)));
    assert_eq!(t.session.lifecycle(), CallLifecycle::Ending);
}

/// With a retriever bound, generation receives the retrieved passage as
/// grounding context.
#[tokio::test]
async fn test_grounded_reply_carries_context() {
    let generator = Arc::new(RecordingGenerator::new(vec![
        "Refunds are accepted within 30 days.",
    ]));
    let retriever = Arc::new(InMemoryRetriever::new(
        vec!["Refunds within 30 days.".to_string()],
        5,
    ));

    let mut t = build_session(
        ScriptedTranscriber::new(["refund policy"]),
        generator.clone(),
        Some(retriever),
        SessionConfig::default(),
        ScriptedSynthesizer::new(1, 160),
    );

    t.session.begin().await.unwrap();
    t.session.handle_media(vec![0u8; 320]).await;
    t.session.await_utterance().await;
    drain(&mut t.rx);

    let calls = generator.calls();
    assert_eq!(calls.len(), 1);
    let system = &calls[0][0];
    assert_eq!(system.role, TurnRole::System);
    assert!(system.content.contains("Refunds within 30 days."));

    assert_eq!(t.session.history().len(), 2);
}

/// With a retriever bound and nothing retrieved, the reply is the fixed
/// grounding-miss text and the generator is never consulted.
#[tokio::test]
async fn test_empty_retrieval_uses_fixed_reply() {
    let generator = Arc::new(RecordingGenerator::new(vec!["should not be consumed"]));
    let retriever = Arc::new(InMemoryRetriever::new(
        vec!["Shipping takes five business days.".to_string()],
        5,
    ));

    let mut t = build_session(
        ScriptedTranscriber::new(["zebra migration patterns"]),
        generator.clone(),
        Some(retriever),
        SessionConfig::default(),
        ScriptedSynthesizer::new(1, 160),
    );

    t.session.begin().await.unwrap();
    t.session.handle_media(vec![0u8; 320]).await;
    t.session.await_utterance().await;
    drain(&mut t.rx);

    assert!(generator.calls().is_empty());

    let history = t.session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[1].content,
        EngineConfig::default().grounding_miss_text
    );
}

/// Retrieval errors degrade to the fallback line like any other adapter
/// failure; the call stays active.
#[tokio::test]
async fn test_retriever_failure_degrades_to_fallback() {
    struct BrokenRetriever;

    #[async_trait]
    impl Retriever for BrokenRetriever {
        async fn retrieve(&self, _query: &str) -> Result<Vec<Passage>, RetrievalError> {
            Err(RetrievalError::Query("index offline".to_string()))
        }
    }

    let mut t = build_session(
        ScriptedTranscriber::new(["refund policy"]),
        Arc::new(ScriptedGenerator::new(["should not be consumed"])),
        Some(Arc::new(BrokenRetriever)),
        SessionConfig::default(),
        ScriptedSynthesizer::new(1, 160),
    );

    t.session.begin().await.unwrap();
    t.session.handle_media(vec![0u8; 320]).await;
    t.session.await_utterance().await;

    let history = t.session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, EngineConfig::default().fallback_text);
    assert_eq!(t.session.lifecycle(), CallLifecycle::Active);
}
