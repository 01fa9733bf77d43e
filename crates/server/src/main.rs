//! Voicebridge server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use voicebridge_config::Settings;
use voicebridge_core::AudioFormat;
use voicebridge_pipeline::{HttpGenerator, HttpTranscriber, WsSynthesizer};
use voicebridge_retrieval::{InMemoryRetriever, Retriever};
use voicebridge_server::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting voicebridge v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("VOICEBRIDGE_CONFIG").ok();
    let settings = Settings::load(config_path.as_deref())?;
    tracing::info!("loaded configuration");

    // Production speech pipeline adapters
    let transcriber = Arc::new(HttpTranscriber::new(&settings.adapters.transcription)?);
    let generator = Arc::new(HttpGenerator::new(&settings.adapters.generation)?);
    let synthesizer = Arc::new(WsSynthesizer::new(
        &settings.adapters.synthesis,
        AudioFormat::default(),
    ));

    // Optional grounding document
    let retriever: Option<Arc<dyn Retriever>> = if settings.retrieval.document_path.is_empty() {
        None
    } else {
        let text = std::fs::read_to_string(&settings.retrieval.document_path)?;
        let retriever = InMemoryRetriever::from_text(
            &text,
            settings.retrieval.chunk_chars,
            settings.retrieval.chunk_overlap,
        )
        .with_top_k(settings.retrieval.top_k);
        tracing::info!(passages = retriever.len(), "grounding document loaded");
        Some(Arc::new(retriever))
    };

    let addr = SocketAddr::new(settings.server.host.parse()?, settings.server.port);

    let state = AppState::new(settings, transcriber, generator, synthesizer, retriever)?;
    let app = create_router(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
