//! PaperGraph retrieval service
//!
//! Answers natural-language queries with an evidence subgraph:
//! - [`engine`]: anchor search and relation-graph expansion
//! - [`context`]: the assembled context and its prompt rendering
//! - [`generation`]: answer generation from a context
//! - [`handlers`]: the HTTP surface

pub mod context;
pub mod engine;
pub mod generation;
pub mod handlers;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use papergraph_common::{config::AppConfig, metrics::RequestMetrics, store::GraphStore};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::engine::RetrievalEngine;
use crate::generation::Generator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn GraphStore>,
    pub engine: Arc<RetrievalEngine>,
    pub generator: Arc<dyn Generator>,
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let metrics = RequestMetrics::start(request.method().as_str(), request.uri().path());
    let response = next.run(request).await;
    metrics.finish(response.status().as_u16());
    response
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();
    let timeout = TimeoutLayer::new(state.config.request_timeout());

    let api_routes = Router::new()
        .route("/context", post(handlers::context::get_context))
        .route("/answer", post(handlers::context::answer));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(timeout)
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
