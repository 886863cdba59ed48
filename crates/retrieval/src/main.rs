//! PaperGraph Retrieval Service
//!
//! Serves graph-expanded context for natural-language queries:
//! - `POST /v1/context`: ranked papers plus the relations between them
//! - `POST /v1/answer`: the same context passed through the generator
//! - `GET /health`, `GET /ready`

use anyhow::Context;
use papergraph_common::{
    config::AppConfig, embeddings::create_embedder, metrics, store, telemetry, VERSION,
};
use papergraph_retrieval::{
    create_router, engine::RetrievalEngine, generation::create_generator, AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate()?;
    let config = Arc::new(config);

    telemetry::init_tracing(&config.observability);
    info!("Starting PaperGraph Retrieval Service v{}", VERSION);

    metrics::install_prometheus(config.observability.metrics_port)?;

    info!(backend = %config.store.backend, "Connecting to graph store...");
    let store = store::connect(&config.store, config.embedding.dimension).await?;
    let embedder = create_embedder(&config.embedding)?;
    let engine = RetrievalEngine::from_config(store.clone(), embedder, &config.retrieval)?;
    let generator = create_generator(&config.generation)?;
    info!(generator = %generator.name(), "Retrieval engine initialized");

    let state = AppState {
        config: config.clone(),
        store,
        engine: Arc::new(engine),
        generator,
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
