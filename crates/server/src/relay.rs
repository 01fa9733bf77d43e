//! Media relay
//!
//! One duplex WebSocket connection per call. The read loop dispatches
//! inbound frames to the owning session strictly in arrival order; a
//! writer task forwards the session's audio back out in bounded, paced
//! chunks so the transport's playback buffer is fed at real-time rate.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voicebridge_agent::{CallSession, SessionEvent};
use voicebridge_config::RelayConfig;
use voicebridge_core::CallId;

use crate::state::AppState;
use crate::ServerError;

/// Inbound frames, tagged by `event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum InboundFrame {
    /// Call started; creates the session
    #[serde(rename_all = "camelCase")]
    Start { call_id: CallId },
    /// One complete user turn of base64 audio
    Media { payload: String },
    /// The caller started speaking over the assistant
    SpeechStarted,
    /// Graceful call end
    Stop,
}

const KNOWN_EVENTS: [&str; 4] = ["start", "media", "speechStarted", "stop"];

/// Parse one inbound frame.
///
/// `Ok(None)` is an unknown event kind, ignored for forward
/// compatibility. A known event with a malformed body is a protocol
/// error: the frame is dropped and the session lives on.
pub fn parse_frame(text: &str) -> Result<Option<InboundFrame>, ServerError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ServerError::Protocol(format!("unparseable frame: {e}")))?;

    let event = value
        .get("event")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ServerError::Protocol("frame missing event field".to_string()))?;

    if !KNOWN_EVENTS.contains(&event.as_str()) {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ServerError::Protocol(format!("malformed {event} frame: {e}")))
}

/// Outbound frames, tagged by `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OutboundFrame {
    #[serde(rename_all = "camelCase")]
    Media { call_id: CallId, media: MediaPayload },
    #[serde(rename_all = "camelCase")]
    Clear { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    Hangup { call_id: CallId },
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaPayload {
    pub payload: String,
}

impl OutboundFrame {
    pub fn media(call_id: &CallId, chunk: &[u8]) -> Self {
        Self::Media {
            call_id: call_id.clone(),
            media: MediaPayload {
                payload: BASE64.encode(chunk),
            },
        }
    }

    pub fn clear(call_id: &CallId) -> Self {
        Self::Clear {
            call_id: call_id.clone(),
        }
    }

    pub fn hangup(call_id: &CallId) -> Self {
        Self::Hangup {
            call_id: call_id.clone(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap()
    }
}

/// Handle a media-stream WebSocket upgrade.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let mut connection = Connection::new(state, sink);

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if connection.handle_text(&text).await.is_break() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "media stream transport error");
                connection.fail();
                break;
            }
        }
    }

    connection.teardown().await;
}

/// Per-connection relay state. Everything here is owned by the one
/// connection task; the writer is the only spawned piece.
struct Connection {
    state: AppState,
    sink: Option<SplitSink<WebSocket, Message>>,
    session: Option<Arc<CallSession>>,
    call_id: Option<CallId>,
    out_tx: Option<mpsc::Sender<SessionEvent>>,
    writer: Option<JoinHandle<()>>,
    failed: bool,
}

impl Connection {
    fn new(state: AppState, sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            state,
            sink: Some(sink),
            session: None,
            call_id: None,
            out_tx: None,
            writer: None,
            failed: false,
        }
    }

    fn fail(&mut self) {
        self.failed = true;
    }

    async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        let frame = match parse_frame(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("ignoring unknown event kind");
                return ControlFlow::Continue(());
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return ControlFlow::Continue(());
            }
        };

        match frame {
            InboundFrame::Start { call_id } => self.handle_start(call_id).await,
            InboundFrame::Media { payload } => {
                let Some(session) = &self.session else {
                    tracing::warn!("media frame before start");
                    return ControlFlow::Continue(());
                };
                match BASE64.decode(payload.as_bytes()) {
                    Ok(audio) => session.handle_media(audio).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping frame with undecodable payload")
                    }
                }
                ControlFlow::Continue(())
            }
            InboundFrame::SpeechStarted => {
                if let Some(session) = &self.session {
                    session.handle_speech_started().await;
                }
                ControlFlow::Continue(())
            }
            InboundFrame::Stop => {
                if let Some(session) = &self.session {
                    session.handle_stop().await;
                }
                ControlFlow::Break(())
            }
        }
    }

    async fn handle_start(&mut self, call_id: CallId) -> ControlFlow<()> {
        if self.session.is_some() {
            tracing::warn!(%call_id, "start frame on a connection that already has a session");
            return ControlFlow::Continue(());
        }

        let Some(sink) = self.sink.take() else {
            return ControlFlow::Break(());
        };

        let (out_tx, out_rx) = mpsc::channel::<SessionEvent>(64);
        let session = Arc::new(self.state.build_session(call_id.clone(), out_tx.clone()));

        if let Err(e) = self.state.registry.insert(call_id.clone(), session.clone()) {
            tracing::warn!(error = %e, "rejecting start");
            self.sink = Some(sink);
            return ControlFlow::Continue(());
        }

        self.writer = Some(tokio::spawn(run_writer(
            sink,
            out_rx,
            call_id.clone(),
            self.state.settings.relay.clone(),
        )));
        self.out_tx = Some(out_tx);
        self.call_id = Some(call_id);

        if let Err(e) = session.begin().await {
            tracing::error!(call_id = %session.call_id(), error = %e, "failed to begin session");
        }
        self.session = Some(session);

        ControlFlow::Continue(())
    }

    /// Close out the connection: drain the writer, evict the session,
    /// and only then mark it ended.
    async fn teardown(mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if self.failed {
            // Transport failure forces the terminal state immediately,
            // skipping Ending.
            session.mark_ended();
        }

        // Dropping our sender lets the writer drain queued audio and
        // close the socket exactly once.
        self.out_tx.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }

        if let Some(call_id) = self.call_id.take() {
            self.state.registry.remove(&call_id);
        }
        session.mark_ended();

        tracing::info!(call_id = %session.call_id(), "media stream closed");
    }
}

/// Forward session output to the socket. Audio is re-chunked to the
/// configured frame size with an inter-chunk delay calibrated to
/// real-time playback rate; a burst here would overrun the vendor's
/// jitter buffer.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<SessionEvent>,
    call_id: CallId,
    relay: RelayConfig,
) {
    let pace = Duration::from_millis(relay.chunk_interval_ms);
    let frame_bytes = relay.chunk_bytes.max(1);

    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Audio(chunk) => {
                for part in chunk.chunks(frame_bytes) {
                    let frame = OutboundFrame::media(&call_id, part);
                    if sink.send(Message::Text(frame.to_json())).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(pace).await;
                }
            }
            SessionEvent::Clear => {
                let frame = OutboundFrame::clear(&call_id);
                if sink.send(Message::Text(frame.to_json())).await.is_err() {
                    return;
                }
            }
            SessionEvent::Hangup => {
                let frame = OutboundFrame::hangup(&call_id);
                let _ = sink.send(Message::Text(frame.to_json())).await;
                let _ = sink.close().await;
                return;
            }
        }
    }

    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_frame() {
        let frame = parse_frame(r#"{"event":"start","callId":"CA1"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(frame, InboundFrame::Start { call_id } if call_id.as_str() == "CA1"));
    }

    #[test]
    fn test_parse_media_frame() {
        let frame = parse_frame(r#"{"event":"media","payload":"AAAA"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(frame, InboundFrame::Media { payload } if payload == "AAAA"));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        assert!(parse_frame(r#"{"event":"mark","name":"x"}"#).unwrap().is_none());
        assert!(parse_frame(r#"{"event":"dtmf","digit":"1"}"#).unwrap().is_none());
    }

    #[test]
    fn test_known_event_with_bad_body_is_protocol_error() {
        let err = parse_frame(r#"{"event":"media"}"#).unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));

        let err = parse_frame(r#"{"event":"start"}"#).unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
    }

    #[test]
    fn test_unparseable_frame_is_protocol_error() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"no_event":true}"#).is_err());
    }

    #[test]
    fn test_outbound_media_frame_shape() {
        let frame = OutboundFrame::media(&CallId::new("CA1"), &[0xFF, 0xFF]);
        let json: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();

        assert_eq!(json["event"], "media");
        assert_eq!(json["callId"], "CA1");
        assert_eq!(json["media"]["payload"], "//8=");
    }

    #[test]
    fn test_outbound_hangup_frame_shape() {
        let frame = OutboundFrame::hangup(&CallId::new("CA1"));
        let json: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();

        assert_eq!(json["event"], "hangup");
        assert_eq!(json["callId"], "CA1");
    }

    #[test]
    fn test_speech_started_parses_without_body() {
        let frame = parse_frame(r#"{"event":"speechStarted"}"#).unwrap().unwrap();
        assert!(matches!(frame, InboundFrame::SpeechStarted));
    }
}
