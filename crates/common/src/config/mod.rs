//! Configuration management for PaperGraph services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values
//!
//! Every field carries a serde default, so an empty environment yields a
//! development setup: in-memory store, mock embedder, no oracle and no link
//! scorer.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AppError, Result};
use crate::store::EmbeddingField;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Graph store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Reasoning oracle (View-L) configuration
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Link scorer (View-G) configuration
    #[serde(default)]
    pub link_scorer: LinkScorerConfig,

    /// Fusion batch configuration
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Retrieval defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Answer generation configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Backend: memory, postgres
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Database URL (postgres backend only)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Total time budget for retrying a failed store call (0 disables retry)
    #[serde(default = "default_retry_max_elapsed")]
    pub retry_max_elapsed_ms: u64,

    /// First backoff interval
    #[serde(default = "default_retry_initial_interval")]
    pub retry_initial_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    #[serde(default)]
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension, shared by the store schema and retrieval
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OracleConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub api_base: Option<String>,

    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Per-call timeout; an expired call is an abstention
    #[serde(default = "default_oracle_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_oracle_rps")]
    pub requests_per_second: u32,

    #[serde(default = "default_oracle_burst")]
    pub burst: u32,

    /// Each paper field sent to the oracle is cut to this many characters
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkScorerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Scoring endpoint
    #[serde(default)]
    pub url: Option<String>,

    /// JSON Lines table of precomputed probabilities, used instead of `url`
    #[serde(default)]
    pub table_path: Option<String>,

    #[serde(default = "default_link_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FusionConfig {
    #[serde(default = "default_similarity_threshold")]
    pub problem_threshold: f32,

    #[serde(default = "default_similarity_threshold")]
    pub method_threshold: f32,

    #[serde(default = "default_link_threshold")]
    pub link_threshold: f32,

    /// Pairs fused concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// JSON Lines paper records
    #[serde(default)]
    pub input_path: Option<String>,

    /// JSON Lines candidate pairs; nearest-neighbour pairing when absent
    #[serde(default)]
    pub pairs_path: Option<String>,

    #[serde(default = "default_neighbors_per_paper")]
    pub neighbors_per_paper: usize,

    /// Where to write the batch report; stdout when absent
    #[serde(default)]
    pub report_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_k_anchors")]
    pub k_anchors: usize,

    #[serde(default = "default_hop_limit")]
    pub hop_limit: usize,

    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    /// Per-hop score multiplier, in (0, 1)
    #[serde(default = "default_decay")]
    pub decay: f32,

    /// Embedding field anchors are searched on
    #[serde(default)]
    pub anchor_field: EmbeddingField,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub api_base: Option<String>,

    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_store_backend() -> String { "memory".to_string() }
fn default_store_url() -> String { "postgres://localhost/papergraph".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_retry_max_elapsed() -> u64 { 5_000 }
fn default_retry_initial_interval() -> u64 { 100 }
fn default_embedding_provider() -> String { "mock".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 16 }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_oracle_timeout() -> u64 { 20_000 }
fn default_oracle_rps() -> u32 { 5 }
fn default_oracle_burst() -> u32 { 5 }
fn default_max_summary_chars() -> usize { 1_500 }
fn default_link_timeout() -> u64 { 2_000 }
fn default_similarity_threshold() -> f32 { 0.75 }
fn default_link_threshold() -> f32 { 0.8 }
fn default_concurrency() -> usize { 8 }
fn default_neighbors_per_paper() -> usize { 5 }
fn default_k_anchors() -> usize { 3 }
fn default_hop_limit() -> usize { 1 }
fn default_max_nodes() -> usize { 10 }
fn default_decay() -> f32 { 0.5 }
fn default_generation_timeout() -> u64 { 60 }
fn default_max_tokens() -> u32 { 1_024 }
fn default_temperature() -> f32 { 0.2 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "papergraph".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__RETRIEVAL__HOP_LIMIT=2
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific config file, still honouring APP__ overrides
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(config_error("embedding.dimension must be positive"));
        }
        for (name, value) in [
            ("fusion.problem_threshold", self.fusion.problem_threshold),
            ("fusion.method_threshold", self.fusion.method_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(config_error(format!("{name} must lie in [-1, 1]")));
            }
        }
        if !(0.0..=1.0).contains(&self.fusion.link_threshold) {
            return Err(config_error("fusion.link_threshold must lie in [0, 1]"));
        }
        if self.fusion.concurrency == 0 {
            return Err(config_error("fusion.concurrency must be positive"));
        }
        if !(self.retrieval.decay > 0.0 && self.retrieval.decay < 1.0) {
            return Err(config_error("retrieval.decay must lie in (0, 1)"));
        }
        if self.retrieval.k_anchors == 0 || self.retrieval.max_nodes == 0 {
            return Err(config_error(
                "retrieval.k_anchors and retrieval.max_nodes must be positive",
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(config_error("embedding.batch_size must be positive"));
        }
        if self.link_scorer.enabled
            && self.link_scorer.url.is_none()
            && self.link_scorer.table_path.is_none()
        {
            return Err(config_error(
                "link_scorer.url or link_scorer.table_path is required when enabled",
            ));
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::Configuration {
        message: message.into(),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_store_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            retry_max_elapsed_ms: default_retry_max_elapsed(),
            retry_initial_interval_ms: default_retry_initial_interval(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            api_base: None,
            model: default_chat_model(),
            timeout_ms: default_oracle_timeout(),
            requests_per_second: default_oracle_rps(),
            burst: default_oracle_burst(),
            max_summary_chars: default_max_summary_chars(),
        }
    }
}

impl Default for LinkScorerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            table_path: None,
            timeout_ms: default_link_timeout(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            problem_threshold: default_similarity_threshold(),
            method_threshold: default_similarity_threshold(),
            link_threshold: default_link_threshold(),
            concurrency: default_concurrency(),
            input_path: None,
            pairs_path: None,
            neighbors_per_paper: default_neighbors_per_paper(),
            report_path: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_anchors: default_k_anchors(),
            hop_limit: default_hop_limit(),
            max_nodes: default_max_nodes(),
            decay: default_decay(),
            anchor_field: EmbeddingField::default(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            api_base: None,
            model: default_chat_model(),
            timeout_secs: default_generation_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.fusion.problem_threshold, 0.75);
        assert_eq!(config.fusion.link_threshold, 0.8);
        assert_eq!(config.retrieval.k_anchors, 3);
        assert_eq!(config.retrieval.anchor_field, EmbeddingField::Problem);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_source_deserializes_to_defaults() {
        let config: AppConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.retrieval.max_nodes, 10);
        assert!(!config.oracle.enabled);
    }

    #[test]
    fn test_validate_rejects_bad_decay() {
        let mut config = AppConfig::default();
        config.retrieval.decay = 1.0;
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("decay"));
    }

    #[test]
    fn test_validate_rejects_zero_dimension_and_concurrency() {
        let mut config = AppConfig::default();
        config.embedding.dimension = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.fusion.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_link_scorer_requires_url() {
        let mut config = AppConfig::default();
        config.link_scorer.enabled = true;
        assert!(config.validate().is_err());
        config.link_scorer.url = Some("http://localhost:9000/score".into());
        assert!(config.validate().is_ok());
    }
}
