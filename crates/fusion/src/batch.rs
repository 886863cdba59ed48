//! Batch fusion runner
//!
//! Evaluates candidate pairs with bounded concurrency and writes each fused
//! edge to the graph store. A failing pair is reported and the batch moves on.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use papergraph_common::{
    errors::ErrorCode,
    metrics,
    models::{CandidatePair, Confidence, FusionRule, PaperId, RelationType},
    store::GraphStore,
    AppError, Result,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::engine::{AbstainCause, FusionDecision, RelationFusion};
use crate::views::ViewPanel;

/// What happened to one pair
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    Fused {
        relation_type: RelationType,
        confidence: Confidence,
        decided_by: FusionRule,
    },
    Abstained {
        cause: AbstainCause,
    },
    Errored {
        code: ErrorCode,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    pub source_id: PaperId,
    pub target_id: PaperId,
    #[serde(flatten)]
    pub outcome: PairOutcome,
}

/// Summary of one batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub fused: usize,
    pub abstained: usize,
    pub errored: usize,
    /// Sorted by (source_id, target_id)
    pub pairs: Vec<PairReport>,
}

pub struct FusionBatch {
    store: Arc<dyn GraphStore>,
    panel: Arc<ViewPanel>,
    engine: RelationFusion,
    concurrency: usize,
}

impl FusionBatch {
    pub fn new(
        store: Arc<dyn GraphStore>,
        panel: Arc<ViewPanel>,
        engine: RelationFusion,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            panel,
            engine,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, pairs: Vec<CandidatePair>) -> BatchReport {
        let batch_id = Uuid::now_v7();
        let started_at = Utc::now();
        info!(%batch_id, pairs = pairs.len(), concurrency = self.concurrency, "Starting fusion batch");

        let mut reports: Vec<PairReport> = stream::iter(pairs)
            .map(|pair| async move {
                let outcome = match self.fuse_pair(&pair).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(
                            source = %pair.source_id,
                            target = %pair.target_id,
                            error = %e,
                            "Pair failed"
                        );
                        PairOutcome::Errored {
                            code: e.code(),
                            message: e.to_string(),
                        }
                    }
                };
                metrics::record_fusion_outcome(match outcome {
                    PairOutcome::Fused { .. } => "fused",
                    PairOutcome::Abstained { .. } => "abstained",
                    PairOutcome::Errored { .. } => "errored",
                });
                PairReport {
                    source_id: pair.source_id,
                    target_id: pair.target_id,
                    outcome,
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        reports.sort_by(|a, b| {
            (&a.source_id, &a.target_id).cmp(&(&b.source_id, &b.target_id))
        });

        let count = |f: fn(&PairOutcome) -> bool| reports.iter().filter(|r| f(&r.outcome)).count();
        let fused = count(|o| matches!(o, PairOutcome::Fused { .. }));
        let abstained = count(|o| matches!(o, PairOutcome::Abstained { .. }));
        let errored = count(|o| matches!(o, PairOutcome::Errored { .. }));

        let report = BatchReport {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            total: reports.len(),
            fused,
            abstained,
            errored,
            pairs: reports,
        };
        info!(
            %batch_id,
            total = report.total,
            fused,
            abstained,
            errored,
            "Fusion batch complete"
        );
        report
    }

    /// Evaluate, fuse and persist a single pair
    #[instrument(skip(self), fields(source = %pair.source_id, target = %pair.target_id))]
    pub async fn fuse_pair(&self, pair: &CandidatePair) -> Result<PairOutcome> {
        if pair.is_self_loop() {
            return Err(AppError::SelfLoop {
                id: pair.source_id.to_string(),
            });
        }

        let source = self.load(&pair.source_id).await?;
        let target = self.load(&pair.target_id).await?;

        let views = self.panel.evaluate(&source, &target).await;
        match self.engine.fuse(&source, &target, &views)? {
            FusionDecision::Fused(edge) => {
                let outcome = PairOutcome::Fused {
                    relation_type: edge.relation_type,
                    confidence: edge.confidence,
                    decided_by: edge.decided_by,
                };
                self.store.upsert_edge(edge).await?;
                Ok(outcome)
            }
            FusionDecision::Abstained(cause) => {
                info!(?cause, "No relation fused");
                Ok(PairOutcome::Abstained { cause })
            }
        }
    }

    async fn load(&self, id: &PaperId) -> Result<papergraph_common::models::PaperNode> {
        self.store
            .get_node(id)
            .await?
            .ok_or_else(|| AppError::PaperNotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use papergraph_common::models::PaperNode;
    use papergraph_common::store::{Direction, MemoryGraphStore};

    fn paper(id: &str, year: i32, problem: Vec<f32>, method: Vec<f32>) -> PaperNode {
        let mut node = PaperNode::new(id, format!("Paper {id}"));
        node.year = Some(year);
        node.embedding_problem = Some(problem);
        node.embedding_method = Some(method);
        node
    }

    async fn seeded_store() -> Arc<MemoryGraphStore> {
        let store = Arc::new(MemoryGraphStore::new(2));
        store
            .upsert_node(paper("a", 2021, vec![1.0, 0.0], vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert_node(paper("b", 2023, vec![1.0, 0.1], vec![0.0, 1.0]))
            .await
            .unwrap();
        let mut bare = PaperNode::new("c", "No vectors");
        bare.year = Some(2024);
        store.upsert_node(bare).await.unwrap();
        store
    }

    fn batch(store: Arc<MemoryGraphStore>) -> FusionBatch {
        FusionBatch::new(
            store,
            Arc::new(ViewPanel::new(None, None)),
            RelationFusion::default(),
            4,
        )
    }

    #[tokio::test]
    async fn test_batch_reports_every_outcome() {
        let store = seeded_store().await;
        let report = batch(store.clone())
            .run(vec![
                CandidatePair::new("a", "c"),
                CandidatePair::new("a", "b"),
                CandidatePair::new("a", "missing"),
            ])
            .await;

        assert_eq!(report.total, 3);
        assert_eq!((report.fused, report.abstained, report.errored), (1, 1, 1));

        let ids: Vec<_> = report.pairs.iter().map(|p| p.target_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "missing"]);

        assert_eq!(
            report.pairs[0].outcome,
            PairOutcome::Fused {
                relation_type: RelationType::AlternativeApproach,
                confidence: Confidence::Low,
                decided_by: FusionRule::TextualHeuristic,
            }
        );
        assert_eq!(
            report.pairs[1].outcome,
            PairOutcome::Abstained {
                cause: AbstainCause::NoViewSignal
            }
        );
        assert!(matches!(
            report.pairs[2].outcome,
            PairOutcome::Errored {
                code: ErrorCode::PaperNotFound,
                ..
            }
        ));

        // Only the fused pair reached the store
        assert_eq!(store.edge_count().await, 1);
    }

    #[tokio::test]
    async fn test_refusing_a_pair_is_idempotent() {
        let store = seeded_store().await;
        let runner = batch(store.clone());
        let pair = CandidatePair::new("a", "b");

        tokio_test::assert_ok!(runner.fuse_pair(&pair).await);
        let first = store.get_edge(&"a".into(), &"b".into()).await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        runner.fuse_pair(&pair).await.unwrap();
        let second = store.get_edge(&"a".into(), &"b".into()).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.edge_count().await, 1);
        assert_eq!(store.neighbors(&"b".into(), Direction::Incoming).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_self_loop_pair_errors() {
        let store = seeded_store().await;
        let err = batch(store).fuse_pair(&CandidatePair::new("a", "a")).await.unwrap_err();
        assert!(matches!(err, AppError::SelfLoop { .. }));
    }

    #[test]
    fn test_pair_report_serializes_flat() {
        let report = PairReport {
            source_id: "a".into(),
            target_id: "b".into(),
            outcome: PairOutcome::Abstained {
                cause: AbstainCause::UncorroboratedOracle,
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "abstained");
        assert_eq!(json["cause"], "uncorroborated_oracle");
        assert_eq!(json["source_id"], "a");
    }
}
