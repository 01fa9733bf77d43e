//! HTTP endpoints
//!
//! REST surface around the relay: health, live-call listing, outbound
//! call placement, and the answer webhook the telephony vendor fetches
//! when the callee picks up.

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use voicebridge_config::ServerConfig;
use voicebridge_core::CallId;

use crate::relay;
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.settings.server.ws_path.clone();

    Router::new()
        // Call endpoints
        .route("/api/calls", post(place_call).get(list_calls))
        .route("/api/calls/answer", get(answer_webhook).post(answer_webhook))

        // Health check
        .route("/health", get(health_check))

        // Media stream
        .route(&ws_path, get(relay::ws_handler))

        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Health check
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// List live calls
async fn list_calls(State(state): State<AppState>) -> Json<serde_json::Value> {
    let calls = state.registry.list();
    Json(serde_json::json!({
        "calls": calls,
        "count": calls.len(),
    }))
}

/// Place call request
#[derive(Debug, Deserialize)]
struct PlaceCallRequest {
    to: String,
}

/// Place call response
#[derive(Debug, Serialize)]
struct PlaceCallResponse {
    call_id: CallId,
}

/// Place an outbound call
async fn place_call(
    State(state): State<AppState>,
    Json(request): Json<PlaceCallRequest>,
) -> Result<Json<PlaceCallResponse>, StatusCode> {
    match state.placement.place(&request.to).await {
        Ok(call_id) => {
            tracing::info!(%call_id, to = %request.to, "placed outbound call");
            Ok(Json(PlaceCallResponse { call_id }))
        }
        Err(e) => {
            tracing::error!(error = %e, to = %request.to, "call placement failed");
            Err(StatusCode::from(e))
        }
    }
}

/// Answer webhook: tells the vendor to connect the call's media stream
/// to our relay socket.
async fn answer_webhook(State(state): State<AppState>) -> impl IntoResponse {
    let xml = answer_document(&state.settings.server);
    ([(header::CONTENT_TYPE, "application/xml")], xml)
}

fn answer_document(server: &ServerConfig) -> String {
    let host = if server.public_host.is_empty() {
        format!("{}:{}", server.host, server.port)
    } else {
        server.public_host.clone()
    };

    format!(
        "<Response><Connect><Stream url=\"wss://{}{}\"/></Connect></Response>",
        host, server.ws_path
    )
}
