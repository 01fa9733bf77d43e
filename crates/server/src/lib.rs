//! Voicebridge server
//!
//! The network-facing half of the bridge: an axum router exposing the
//! media-stream WebSocket, call placement, and health endpoints, plus
//! the session registry that is the only state shared across calls.

pub mod http;
pub mod placement;
pub mod registry;
pub mod relay;
pub mod state;

pub use http::create_router;
pub use placement::PlacementClient;
pub use registry::SessionRegistry;
pub use relay::{InboundFrame, OutboundFrame};
pub use state::AppState;

use thiserror::Error;

use voicebridge_core::CallId;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("a session already exists for call {0}")]
    DuplicateSession(CallId),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("call placement failed: {0}")]
    Placement(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::DuplicateSession(_) => axum::http::StatusCode::CONFLICT,
            ServerError::Protocol(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Transport(_) => axum::http::StatusCode::BAD_GATEWAY,
            ServerError::Placement(_) => axum::http::StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
