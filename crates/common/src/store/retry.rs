//! Exponential-backoff retry around any [`GraphStore`]
//!
//! Only errors with `is_retryable()` are retried; configuration errors
//! (bad dimension, missing paper, self-loop) fail on the first attempt.

use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{Direction, EmbeddingField, GraphStore};
use crate::config::StoreConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::models::{PaperId, PaperNode, RelationEdge};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    initial_interval: Duration,
    max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(initial_interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            max_elapsed,
        }
    }

    /// `None` when `retry_max_elapsed_ms` is 0
    pub fn from_config(config: &StoreConfig) -> Option<Self> {
        (config.retry_max_elapsed_ms > 0).then(|| {
            Self::new(
                Duration::from_millis(config.retry_initial_interval_ms.max(1)),
                Duration::from_millis(config.retry_max_elapsed_ms),
            )
        })
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }

    /// Run `op` until it succeeds, fails permanently, or the time budget runs out
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_notify(
            self.backoff(),
            || {
                let attempt = op();
                async move {
                    attempt.await.map_err(|e| {
                        if e.is_retryable() {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |err: AppError, wait: Duration| {
                tracing::warn!(
                    operation,
                    error = %err,
                    wait_ms = wait.as_millis() as u64,
                    "Graph store call failed, retrying"
                );
                metrics::record_store_retry(operation);
            },
        )
        .await
    }
}

/// Store decorator applying a [`RetryPolicy`] to every call
pub struct RetryingStore {
    inner: Arc<dyn GraphStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn GraphStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl GraphStore for RetryingStore {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn upsert_node(&self, node: PaperNode) -> Result<()> {
        self.policy
            .run("upsert_node", || self.inner.upsert_node(node.clone()))
            .await
    }

    async fn upsert_edge(&self, edge: RelationEdge) -> Result<()> {
        self.policy
            .run("upsert_edge", || self.inner.upsert_edge(edge.clone()))
            .await
    }

    async fn get_node(&self, id: &PaperId) -> Result<Option<PaperNode>> {
        self.policy.run("get_node", || self.inner.get_node(id)).await
    }

    async fn get_nodes(&self, ids: &[PaperId]) -> Result<Vec<PaperNode>> {
        self.policy.run("get_nodes", || self.inner.get_nodes(ids)).await
    }

    async fn get_edge(&self, source: &PaperId, target: &PaperId) -> Result<Option<RelationEdge>> {
        self.policy
            .run("get_edge", || self.inner.get_edge(source, target))
            .await
    }

    async fn vector_search(
        &self,
        field: EmbeddingField,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(PaperNode, f32)>> {
        self.policy
            .run("vector_search", || self.inner.vector_search(field, vector, k))
            .await
    }

    async fn neighbors(&self, id: &PaperId, direction: Direction) -> Result<Vec<RelationEdge>> {
        self.policy
            .run("neighbors", || self.inner.neighbors(id, direction))
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.policy.run("ping", || self.inner.ping()).await
    }
}
