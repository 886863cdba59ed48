//! PaperGraph Common Library
//!
//! Shared code for the fusion pipeline and the retrieval service:
//! - Paper and relation data model
//! - Graph store contract with in-memory and Postgres/pgvector backends
//! - Embedding and chat-completion clients
//! - Error types and handling
//! - Configuration management
//! - Metrics and tracing setup

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod store;
pub mod telemetry;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use models::{CandidatePair, Confidence, PaperId, PaperNode, RelationEdge, RelationType};
pub use store::GraphStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
