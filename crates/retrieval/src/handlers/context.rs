//! Context and answer handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::context::QueryContext;
use crate::engine::ContextParams;
use crate::AppState;
use papergraph_common::errors::{AppError, Result};

/// Context request; omitted bounds fall back to the configured defaults
#[derive(Debug, Deserialize, Validate)]
pub struct ContextRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    #[validate(range(min = 1, max = 100))]
    pub k_anchors: Option<usize>,

    #[validate(range(max = 5))]
    pub hop_limit: Option<usize>,

    #[validate(range(min = 1, max = 200))]
    pub max_nodes: Option<usize>,
}

impl ContextRequest {
    fn params(&self, defaults: ContextParams) -> ContextParams {
        ContextParams {
            k_anchors: self.k_anchors.unwrap_or(defaults.k_anchors),
            hop_limit: self.hop_limit.unwrap_or(defaults.hop_limit),
            max_nodes: self.max_nodes.unwrap_or(defaults.max_nodes),
        }
    }
}

#[derive(Serialize)]
pub struct ContextResponse {
    #[serde(flatten)]
    pub context: QueryContext,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub generator: String,
    pub context: QueryContext,
    pub processing_time_ms: u64,
}

async fn build_context(state: &AppState, request: &ContextRequest) -> Result<QueryContext> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let params = request.params(ContextParams::from_config(&state.config.retrieval));
    state.engine.answer_context(&request.query, params).await
}

/// Retrieve the evidence subgraph for a query
pub async fn get_context(
    State(state): State<AppState>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<ContextResponse>> {
    let start = Instant::now();
    let context = build_context(&state, &request).await?;

    Ok(Json(ContextResponse {
        context,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}

/// Retrieve context and generate an answer from it
pub async fn answer(
    State(state): State<AppState>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<AnswerResponse>> {
    let start = Instant::now();
    let context = build_context(&state, &request).await?;
    let answer = state.generator.generate(&context).await?;

    Ok(Json(AnswerResponse {
        answer,
        generator: state.generator.name().to_string(),
        context,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
