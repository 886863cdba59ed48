//! Graph store access contract
//!
//! Two backends implement [`GraphStore`]:
//! - [`MemoryGraphStore`]: in-process, brute-force cosine scan
//! - [`PgGraphStore`]: PostgreSQL with pgvector HNSW indexes
//!
//! Every call is atomic on its own. Vector search returns cosine distances
//! in [0, 2], never includes nodes whose vector for the searched field is
//! null, and yields at most `k` results by non-decreasing distance.

mod memory;
mod postgres;
mod retry;

pub use memory::MemoryGraphStore;
pub use postgres::PgGraphStore;
pub use retry::{RetryPolicy, RetryingStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::errors::{AppError, Result};
use crate::models::{PaperId, PaperNode, RelationEdge};

/// Which of a paper's two embeddings to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingField {
    #[default]
    Problem,
    Method,
}

impl EmbeddingField {
    pub fn column_name(&self) -> &'static str {
        match self {
            EmbeddingField::Problem => "embedding_problem",
            EmbeddingField::Method => "embedding_method",
        }
    }
}

impl fmt::Display for EmbeddingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingField::Problem => f.write_str("problem"),
            EmbeddingField::Method => f.write_str("method"),
        }
    }
}

/// Edge direction relative to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Embedding dimension every stored vector must have
    fn dimension(&self) -> usize;

    /// Insert or replace a node by id
    async fn upsert_node(&self, node: PaperNode) -> Result<()>;

    /// Insert or replace the edge for `(source_id, target_id)`.
    /// Both endpoints must already exist.
    async fn upsert_edge(&self, edge: RelationEdge) -> Result<()>;

    async fn get_node(&self, id: &PaperId) -> Result<Option<PaperNode>>;

    /// Fetch several nodes; unknown ids are skipped
    async fn get_nodes(&self, ids: &[PaperId]) -> Result<Vec<PaperNode>> {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.get_node(id).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn get_edge(&self, source: &PaperId, target: &PaperId) -> Result<Option<RelationEdge>>;

    /// Nearest nodes by cosine distance on `field`
    async fn vector_search(
        &self,
        field: EmbeddingField,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(PaperNode, f32)>>;

    /// Edges touching `id`, sorted by (source_id, target_id)
    async fn neighbors(&self, id: &PaperId, direction: Direction) -> Result<Vec<RelationEdge>>;

    /// Cheap liveness check
    async fn ping(&self) -> Result<()>;
}

/// Cosine similarity in [-1, 1]; `None` for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Cosine distance in [0, 2], matching pgvector's `<=>`
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    cosine_similarity(a, b).map(|s| 1.0 - s)
}

pub(crate) fn check_vector(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(AppError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

pub(crate) fn validate_node(node: &PaperNode, dimension: usize) -> Result<()> {
    if node.id.as_str().trim().is_empty() {
        return Err(AppError::Validation {
            message: "paper id must not be empty".to_string(),
            field: Some("id".to_string()),
        });
    }
    for vector in [&node.embedding_problem, &node.embedding_method]
        .into_iter()
        .flatten()
    {
        check_vector(vector, dimension)?;
    }
    Ok(())
}

pub(crate) fn validate_edge(edge: &RelationEdge) -> Result<()> {
    if edge.source_id == edge.target_id {
        return Err(AppError::SelfLoop {
            id: edge.source_id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(AppError::invalid_parameter("k", "must be positive"));
    }
    Ok(())
}

/// Build the configured backend, wrapped in retry when enabled
pub async fn connect(config: &StoreConfig, dimension: usize) -> Result<Arc<dyn GraphStore>> {
    let store: Arc<dyn GraphStore> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryGraphStore::new(dimension)),
        "postgres" => {
            let pool = crate::db::DbPool::new(config).await?;
            let store = PgGraphStore::new(pool, dimension);
            store.ensure_schema().await?;
            Arc::new(store)
        }
        other => {
            return Err(AppError::Configuration {
                message: format!("unknown store backend '{other}'"),
            })
        }
    };

    Ok(match RetryPolicy::from_config(config) {
        Some(policy) => Arc::new(RetryingStore::new(store, policy)),
        None => store,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_bounds() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), Some(-1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn test_cosine_distance_range() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]), Some(2.0));
        assert_eq!(cosine_distance(&[3.0, 0.0], &[1.0, 0.0]), Some(0.0));
    }

    #[test]
    fn test_validate_node_dimension() {
        let mut node = PaperNode::new("p1", "t");
        node.embedding_method = Some(vec![0.0; 3]);
        let err = validate_node(&node, 4).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_embedding_field_serde() {
        let field: EmbeddingField = serde_json::from_str("\"method\"").unwrap();
        assert_eq!(field, EmbeddingField::Method);
        assert_eq!(field.column_name(), "embedding_method");
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_backend() {
        let config = StoreConfig {
            backend: "neo4j".into(),
            ..StoreConfig::default()
        };
        assert!(connect(&config, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let store = connect(&StoreConfig::default(), 8).await.unwrap();
        assert_eq!(store.dimension(), 8);
        store.ping().await.unwrap();
    }
}
