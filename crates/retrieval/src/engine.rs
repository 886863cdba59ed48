//! Retrieval & expansion engine
//!
//! Pipeline for one query:
//! 1. Embed the query and take the `k_anchors` nearest papers as anchors
//! 2. Expand level by level over relation edges in both directions, scoring
//!    a node `relevance(anchor) * decay^hop` and keeping the best path
//! 3. Rank (anchors first), truncate to `max_nodes`
//! 4. Attach every relation whose endpoints both survived

use papergraph_common::{
    config::RetrievalConfig,
    embeddings::{check_dimension, Embedder},
    metrics,
    models::{PaperId, PaperNode, RelationEdge},
    store::{Direction, EmbeddingField, GraphStore},
    AppError, Result,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::context::{ContextEdge, ContextNode, NodeOrigin, QueryContext};

/// Per-query bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    pub k_anchors: usize,
    pub hop_limit: usize,
    pub max_nodes: usize,
}

impl ContextParams {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            k_anchors: config.k_anchors,
            hop_limit: config.hop_limit,
            max_nodes: config.max_nodes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.k_anchors == 0 {
            return Err(AppError::invalid_parameter("k_anchors", "must be positive"));
        }
        if self.max_nodes == 0 {
            return Err(AppError::invalid_parameter("max_nodes", "must be positive"));
        }
        Ok(())
    }
}

/// Best known way to reach a node
#[derive(Debug, Clone, Copy)]
struct Reach {
    score: f32,
    hop: usize,
    anchor: bool,
}

impl Reach {
    fn origin(&self) -> NodeOrigin {
        if self.anchor {
            NodeOrigin::Anchor
        } else {
            NodeOrigin::Expansion { hop: self.hop }
        }
    }
}

/// Anchors first, then score descending, hop ascending, id ascending
fn rank(a: (&PaperId, &Reach), b: (&PaperId, &Reach)) -> Ordering {
    b.1.anchor
        .cmp(&a.1.anchor)
        .then_with(|| b.1.score.total_cmp(&a.1.score))
        .then_with(|| a.1.hop.cmp(&b.1.hop))
        .then_with(|| a.0.cmp(b.0))
}

/// Cosine distance in [0, 2] mapped to a relevance in [0, 1]
pub fn relevance(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

pub struct RetrievalEngine {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    anchor_field: EmbeddingField,
    decay: f32,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        anchor_field: EmbeddingField,
        decay: f32,
    ) -> Result<Self> {
        if !(decay > 0.0 && decay < 1.0) {
            return Err(AppError::invalid_parameter("decay", "must lie in (0, 1)"));
        }
        if embedder.dimension() != store.dimension() {
            return Err(AppError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            store,
            embedder,
            anchor_field,
            decay,
        })
    }

    pub fn from_config(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        config: &RetrievalConfig,
    ) -> Result<Self> {
        Self::new(store, embedder, config.anchor_field, config.decay)
    }

    /// Build the evidence subgraph for `query`
    #[instrument(skip(self, query), fields(query_len = query.len(), k = params.k_anchors, hops = params.hop_limit))]
    pub async fn answer_context(&self, query: &str, params: ContextParams) -> Result<QueryContext> {
        params.validate()?;
        let start = Instant::now();

        let vector = check_dimension(self.embedder.embed(query).await?, self.store.dimension())?;
        let hits = self
            .store
            .vector_search(self.anchor_field, &vector, params.k_anchors)
            .await?;

        if hits.is_empty() {
            info!("No anchors found");
            metrics::record_retrieval(start.elapsed().as_secs_f64(), 0, 0, 0);
            return Ok(QueryContext::empty(query));
        }

        let mut papers: HashMap<PaperId, PaperNode> = HashMap::new();
        let mut reached: HashMap<PaperId, Reach> = HashMap::new();
        for (node, distance) in hits {
            reached.insert(
                node.id.clone(),
                Reach {
                    score: relevance(distance),
                    hop: 0,
                    anchor: true,
                },
            );
            papers.insert(node.id.clone(), node);
        }
        let anchor_count = reached.len();

        // Neighbourhoods fetched so far, keyed by node id
        let mut visited: HashMap<PaperId, Vec<RelationEdge>> = HashMap::new();
        let mut frontier: BTreeSet<PaperId> = reached.keys().cloned().collect();

        for hop in 1..=params.hop_limit {
            if frontier.is_empty() {
                break;
            }
            // Scores as they stood when this level started
            let level: Vec<(PaperId, f32)> = frontier
                .iter()
                .filter_map(|id| reached.get(id).map(|r| (id.clone(), r.score)))
                .collect();
            let mut improved = BTreeSet::new();

            for (id, score) in level {
                let edges = self.neighborhood(&mut visited, &id).await?;
                let candidate = score * self.decay;

                for edge in edges {
                    let Some(other) = edge.other_endpoint(&id) else {
                        continue;
                    };
                    match reached.get_mut(other) {
                        Some(reach) if reach.score >= candidate => {}
                        Some(reach) => {
                            reach.score = candidate;
                            if !reach.anchor {
                                reach.hop = hop;
                            }
                            improved.insert(other.clone());
                        }
                        None => {
                            reached.insert(
                                other.clone(),
                                Reach {
                                    score: candidate,
                                    hop,
                                    anchor: false,
                                },
                            );
                            improved.insert(other.clone());
                        }
                    }
                }
            }

            debug!(hop, improved = improved.len(), "Expanded level");
            frontier = improved;
        }
        let expanded_count = reached.len() - anchor_count;

        let mut ranked: Vec<(&PaperId, &Reach)> = reached.iter().collect();
        ranked.sort_by(|a, b| rank(*a, *b));
        ranked.truncate(params.max_nodes);
        let ranked: Vec<(PaperId, Reach)> = ranked.into_iter().map(|(id, r)| (id.clone(), *r)).collect();

        let missing: Vec<PaperId> = ranked
            .iter()
            .filter(|(id, _)| !papers.contains_key(id))
            .map(|(id, _)| id.clone())
            .collect();
        if !missing.is_empty() {
            for node in self.store.get_nodes(&missing).await? {
                papers.insert(node.id.clone(), node);
            }
        }

        // A node deleted since its edge was read is dropped
        let nodes: Vec<ContextNode> = ranked
            .iter()
            .filter_map(|(id, reach)| {
                papers.get(id).map(|paper| ContextNode {
                    paper: paper.without_embeddings(),
                    relevance_score: reach.score,
                    origin: reach.origin(),
                })
            })
            .collect();

        let edges = if params.hop_limit == 0 {
            Vec::new()
        } else {
            self.connecting_edges(&mut visited, &nodes).await?
        };

        info!(
            anchors = anchor_count,
            expanded = expanded_count,
            returned = nodes.len(),
            edges = edges.len(),
            "Context assembled"
        );
        metrics::record_retrieval(
            start.elapsed().as_secs_f64(),
            anchor_count,
            expanded_count,
            nodes.len(),
        );

        Ok(QueryContext {
            query: query.to_string(),
            nodes,
            edges,
        })
    }

    async fn neighborhood(
        &self,
        visited: &mut HashMap<PaperId, Vec<RelationEdge>>,
        id: &PaperId,
    ) -> Result<Vec<RelationEdge>> {
        if let Some(edges) = visited.get(id) {
            return Ok(edges.clone());
        }
        let edges = self.store.neighbors(id, Direction::Both).await?;
        visited.insert(id.clone(), edges.clone());
        Ok(edges)
    }

    /// Every edge whose endpoints are both retained, sorted by pair
    async fn connecting_edges(
        &self,
        visited: &mut HashMap<PaperId, Vec<RelationEdge>>,
        nodes: &[ContextNode],
    ) -> Result<Vec<ContextEdge>> {
        let retained: HashSet<&PaperId> = nodes.iter().map(|n| &n.paper.id).collect();
        let mut edges = BTreeMap::new();

        for node in nodes {
            for edge in self.neighborhood(visited, &node.paper.id).await? {
                if retained.contains(&edge.source_id) && retained.contains(&edge.target_id) {
                    edges.entry(edge.key()).or_insert_with(|| ContextEdge::from(&edge));
                }
            }
        }

        Ok(edges.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use papergraph_common::models::{Confidence, FusionRule, RelationType};
    use papergraph_common::store::MemoryGraphStore;
    use tokio_test::{assert_err, assert_ok};

    /// Maps known query strings to fixed vectors
    struct FixedEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        dimension: usize,
    }

    impl FixedEmbedder {
        fn new(dimension: usize, entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: entries
                    .iter()
                    .map(|(q, v)| (q.to_string(), v.clone()))
                    .collect(),
                dimension,
            }
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.vectors.get(text).cloned().ok_or_else(|| AppError::EmbeddingError {
                message: format!("no vector for {text}"),
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    fn paper(id: &str, problem: Option<Vec<f32>>) -> PaperNode {
        let mut node = PaperNode::new(id, format!("Paper {id}"));
        node.problem_statement = Some(format!("problem {id}"));
        node.embedding_problem = problem;
        node
    }

    fn edge(source: &str, target: &str, relation_type: RelationType) -> RelationEdge {
        RelationEdge {
            source_id: source.into(),
            target_id: target.into(),
            relation_type,
            confidence: Confidence::High,
            reasoning: format!("{target} {relation_type}s {source}"),
            scores: Default::default(),
            decided_by: FusionRule::OracleVerdict,
            fused_at: Utc::now(),
        }
    }

    fn params(k_anchors: usize, hop_limit: usize, max_nodes: usize) -> ContextParams {
        ContextParams {
            k_anchors,
            hop_limit,
            max_nodes,
        }
    }

    async fn engine(store: Arc<MemoryGraphStore>) -> RetrievalEngine {
        let embedder = FixedEmbedder::new(
            3,
            &[
                ("adapters", vec![1.0, 0.0, 0.0]),
                ("wrong size", vec![1.0, 0.0]),
            ],
        );
        RetrievalEngine::new(store, Arc::new(embedder), EmbeddingField::Problem, 0.5).unwrap()
    }

    /// P1 matches the query; P2 and P3 extend P1 but have no vectors;
    /// P4 extends P2, two hops out
    async fn extend_graph() -> Arc<MemoryGraphStore> {
        let store = Arc::new(MemoryGraphStore::new(3));
        store.upsert_node(paper("P1", Some(vec![1.0, 0.0, 0.0]))).await.unwrap();
        store.upsert_node(paper("P2", None)).await.unwrap();
        store.upsert_node(paper("P3", None)).await.unwrap();
        store.upsert_node(paper("P4", None)).await.unwrap();
        store.upsert_edge(edge("P1", "P2", RelationType::Extend)).await.unwrap();
        store.upsert_edge(edge("P1", "P3", RelationType::Extend)).await.unwrap();
        store.upsert_edge(edge("P2", "P4", RelationType::Extend)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_anchor_with_two_extend_edges() {
        let engine = engine(extend_graph().await).await;
        let context = assert_ok!(engine.answer_context("adapters", params(3, 1, 10)).await);

        let ids: Vec<&str> = context.nodes.iter().map(|n| n.paper.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2", "P3"]);
        assert_eq!(context.nodes[0].origin, NodeOrigin::Anchor);
        assert!((context.nodes[0].relevance_score - 1.0).abs() < 1e-6);
        assert_eq!(context.nodes[1].origin, NodeOrigin::Expansion { hop: 1 });
        assert!((context.nodes[1].relevance_score - 0.5).abs() < 1e-6);

        assert_eq!(context.edges.len(), 2);
        for e in &context.edges {
            assert_eq!(e.relation_type, RelationType::Extend);
            assert!(!e.reasoning.is_empty());
        }
        assert!(context.nodes.iter().all(|n| n.paper.embedding_problem.is_none()));
    }

    #[tokio::test]
    async fn test_two_hops_decay_and_truncation() {
        let engine = engine(extend_graph().await).await;

        let context = engine.answer_context("adapters", params(3, 2, 10)).await.unwrap();
        let p4 = context.nodes.iter().find(|n| n.paper.id.as_str() == "P4").unwrap();
        assert_eq!(p4.origin, NodeOrigin::Expansion { hop: 2 });
        assert!((p4.relevance_score - 0.25).abs() < 1e-6);
        assert_eq!(context.edges.len(), 3);

        let context = engine.answer_context("adapters", params(3, 2, 2)).await.unwrap();
        let ids: Vec<&str> = context.nodes.iter().map(|n| n.paper.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2"]);
        assert_eq!(context.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_anchors_precede_better_scored_expansions() {
        let store = Arc::new(MemoryGraphStore::new(3));
        store.upsert_node(paper("A", Some(vec![1.0, 0.0, 0.0]))).await.unwrap();
        // Opposite direction: an anchor with relevance 0
        store.upsert_node(paper("B", Some(vec![-1.0, 0.0, 0.0]))).await.unwrap();
        store.upsert_node(paper("C", None)).await.unwrap();
        store.upsert_edge(edge("A", "C", RelationType::Support)).await.unwrap();

        let context = engine(store)
            .await
            .answer_context("adapters", params(2, 1, 10))
            .await
            .unwrap();
        let ids: Vec<&str> = context.nodes.iter().map(|n| n.paper.id.as_str()).collect();
        // C outscores anchor B but stays in the expansion tier
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert!(context.nodes[2].relevance_score > context.nodes[1].relevance_score);
        assert!(context.nodes[..2].iter().all(|n| n.origin.is_anchor()));
    }

    #[tokio::test]
    async fn test_hop_limit_zero_has_no_edges() {
        let engine = engine(extend_graph().await).await;
        let context = engine.answer_context("adapters", params(3, 0, 10)).await.unwrap();
        assert_eq!(context.nodes.len(), 1);
        assert!(context.edges.is_empty());
    }

    #[tokio::test]
    async fn test_cycles_terminate() {
        let store = extend_graph().await;
        store.upsert_edge(edge("P2", "P1", RelationType::Support)).await.unwrap();
        store.upsert_edge(edge("P4", "P1", RelationType::Contrast)).await.unwrap();

        let context = engine(store)
            .await
            .answer_context("adapters", params(3, 5, 10))
            .await
            .unwrap();
        assert_eq!(context.nodes.len(), 4);
        let p4 = context.nodes.iter().find(|n| n.paper.id.as_str() == "P4").unwrap();
        // Direct edge from the anchor beats the two-hop path
        assert_eq!(p4.origin, NodeOrigin::Expansion { hop: 1 });
    }

    #[tokio::test]
    async fn test_empty_graph_is_empty_context() {
        let store = Arc::new(MemoryGraphStore::new(3));
        let context = engine(store)
            .await
            .answer_context("adapters", params(3, 1, 10))
            .await
            .unwrap();
        assert!(context.is_empty());
        assert_eq!(context.query, "adapters");
    }

    #[tokio::test]
    async fn test_invalid_parameters_and_dimension() {
        let engine = engine(extend_graph().await).await;

        let err = assert_err!(engine.answer_context("adapters", params(0, 1, 10)).await);
        assert!(matches!(err, AppError::InvalidParameter { .. }));
        let err = assert_err!(engine.answer_context("adapters", params(3, 1, 0)).await);
        assert!(matches!(err, AppError::InvalidParameter { .. }));

        let err = assert_err!(engine.answer_context("wrong size", params(3, 1, 10)).await);
        assert!(matches!(err, AppError::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn test_decay_and_embedder_dimension_are_checked() {
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new(3));
        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder::new(3, &[]));
        assert!(RetrievalEngine::new(store.clone(), embedder.clone(), EmbeddingField::Problem, 1.0).is_err());
        assert!(RetrievalEngine::new(store.clone(), embedder, EmbeddingField::Problem, 0.0).is_err());

        let narrow: Arc<dyn Embedder> = Arc::new(FixedEmbedder::new(2, &[]));
        assert!(matches!(
            RetrievalEngine::new(store, narrow, EmbeddingField::Problem, 0.5),
            Err(AppError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_relevance_is_monotone_and_bounded() {
        assert_eq!(relevance(0.0), 1.0);
        assert_eq!(relevance(2.0), 0.0);
        assert!(relevance(0.4) > relevance(0.6));
        assert_eq!(relevance(2.5), 0.0);
    }
}
