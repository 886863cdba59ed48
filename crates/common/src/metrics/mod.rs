//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with latency histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

use crate::errors::{AppError, Result};

/// Metrics prefix for all PaperGraph metrics
pub const METRICS_PREFIX: &str = "papergraph";

/// Histogram buckets for request and retrieval latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
];

/// Buckets for remote view calls (oracle, link scorer, embeddings)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Fusion metrics
    describe_counter!(
        format!("{}_fusion_pairs_total", METRICS_PREFIX),
        Unit::Count,
        "Candidate pairs processed, by outcome"
    );

    describe_counter!(
        format!("{}_view_abstentions_total", METRICS_PREFIX),
        Unit::Count,
        "View abstentions, by view and reason"
    );

    describe_histogram!(
        format!("{}_view_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Oracle and link scorer call latency in seconds"
    );

    // Retrieval metrics
    describe_counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of context queries"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Context assembly latency in seconds"
    );

    describe_histogram!(
        format!("{}_retrieval_nodes", METRICS_PREFIX),
        Unit::Count,
        "Nodes per query context, by stage"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    // Store metrics
    describe_counter!(
        format!("{}_store_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Graph store calls retried after a transient failure"
    );

    tracing::info!("Metrics registered");
}

/// Install the Prometheus exporter on `port`; 0 leaves metrics unexported
pub fn install_prometheus(port: u16) -> Result<()> {
    if port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("view_call_duration_seconds".to_string()),
            UPSTREAM_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Suffix("embedding_duration_seconds".to_string()),
                UPSTREAM_BUCKETS,
            )
        })
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Suffix("request_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
        })
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Suffix("retrieval_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
        })
        .and_then(|b| b.install())
        .map_err(|e| AppError::Configuration {
            message: format!("failed to install Prometheus exporter: {e}"),
        })?;

    register_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Count one candidate pair by outcome: fused, abstained or errored
pub fn record_fusion_outcome(outcome: &'static str) {
    counter!(
        format!("{}_fusion_pairs_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_view_abstention(view: &'static str, reason: &'static str) {
    counter!(
        format!("{}_view_abstentions_total", METRICS_PREFIX),
        "view" => view,
        "reason" => reason
    )
    .increment(1);
}

pub fn record_view_latency(view: &'static str, duration_secs: f64) {
    histogram!(
        format!("{}_view_call_duration_seconds", METRICS_PREFIX),
        "view" => view
    )
    .record(duration_secs);
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, anchors: usize, expanded: usize, returned: usize) {
    counter!(format!("{}_retrieval_queries_total", METRICS_PREFIX)).increment(1);

    histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    for (stage, count) in [("anchors", anchors), ("expanded", expanded), ("returned", returned)] {
        histogram!(
            format!("{}_retrieval_nodes", METRICS_PREFIX),
            "stage" => stage
        )
        .record(count as f64);
    }

    gauge!(format!("{}_retrieval_last_returned", METRICS_PREFIX)).set(returned as f64);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);

        counter!(
            format!("{}_embedding_texts_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(batch_size as u64);
    }
}

pub fn record_store_retry(operation: &'static str) {
    counter!(
        format!("{}_store_retries_total", METRICS_PREFIX),
        "operation" => operation
    )
    .increment(1);
}
