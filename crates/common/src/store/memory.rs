use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::{
    check_k, check_vector, cosine_distance, validate_edge, validate_node, Direction,
    EmbeddingField, GraphStore,
};
use crate::errors::{AppError, Result};
use crate::models::{PaperId, PaperNode, RelationEdge};

#[derive(Default)]
struct Graph {
    nodes: HashMap<PaperId, PaperNode>,
    edges: HashMap<(PaperId, PaperId), RelationEdge>,
    outgoing: HashMap<PaperId, BTreeSet<PaperId>>,
    incoming: HashMap<PaperId, BTreeSet<PaperId>>,
}

/// In-process graph store guarded by a single `RwLock`
pub struct MemoryGraphStore {
    dimension: usize,
    graph: RwLock<Graph>,
}

impl MemoryGraphStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            graph: RwLock::new(Graph::default()),
        }
    }

    pub async fn node_count(&self) -> usize {
        self.graph.read().await.nodes.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.graph.read().await.edges.len()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert_node(&self, node: PaperNode) -> Result<()> {
        validate_node(&node, self.dimension)?;
        self.graph.write().await.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn upsert_edge(&self, mut edge: RelationEdge) -> Result<()> {
        validate_edge(&edge)?;

        let mut graph = self.graph.write().await;
        for id in [&edge.source_id, &edge.target_id] {
            if !graph.nodes.contains_key(id) {
                return Err(AppError::PaperNotFound { id: id.to_string() });
            }
        }

        let (source, target) = edge.key();
        if let Some(existing) = graph.edges.get(&(source.clone(), target.clone())) {
            if existing.same_judgment(&edge) {
                edge.fused_at = existing.fused_at;
            }
        }
        graph
            .outgoing
            .entry(source.clone())
            .or_default()
            .insert(target.clone());
        graph
            .incoming
            .entry(target.clone())
            .or_default()
            .insert(source.clone());
        graph.edges.insert((source, target), edge);
        Ok(())
    }

    async fn get_node(&self, id: &PaperId) -> Result<Option<PaperNode>> {
        Ok(self.graph.read().await.nodes.get(id).cloned())
    }

    async fn get_nodes(&self, ids: &[PaperId]) -> Result<Vec<PaperNode>> {
        let graph = self.graph.read().await;
        Ok(ids.iter().filter_map(|id| graph.nodes.get(id).cloned()).collect())
    }

    async fn get_edge(&self, source: &PaperId, target: &PaperId) -> Result<Option<RelationEdge>> {
        let graph = self.graph.read().await;
        Ok(graph.edges.get(&(source.clone(), target.clone())).cloned())
    }

    async fn vector_search(
        &self,
        field: EmbeddingField,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(PaperNode, f32)>> {
        check_k(k)?;
        check_vector(vector, self.dimension)?;

        let graph = self.graph.read().await;
        let mut scored: Vec<(&PaperNode, f32)> = graph
            .nodes
            .values()
            .filter_map(|node| {
                let stored = node.embedding(field)?;
                cosine_distance(vector, stored).map(|d| (node, d))
            })
            .collect();

        scored.sort_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(node, d)| (node.clone(), d))
            .collect())
    }

    async fn neighbors(&self, id: &PaperId, direction: Direction) -> Result<Vec<RelationEdge>> {
        let graph = self.graph.read().await;
        let mut edges = Vec::new();

        if matches!(direction, Direction::Outgoing | Direction::Both) {
            for target in graph.outgoing.get(id).into_iter().flatten() {
                if let Some(edge) = graph.edges.get(&(id.clone(), target.clone())) {
                    edges.push(edge.clone());
                }
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            for source in graph.incoming.get(id).into_iter().flatten() {
                if let Some(edge) = graph.edges.get(&(source.clone(), id.clone())) {
                    edges.push(edge.clone());
                }
            }
        }

        edges.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(edges)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, FusionRule, RelationType, ViewScores};
    use chrono::Utc;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    fn node(id: &str, problem: Option<Vec<f32>>) -> PaperNode {
        let mut node = PaperNode::new(id, format!("Paper {id}"));
        node.embedding_problem = problem;
        node
    }

    fn edge(source: &str, target: &str, relation_type: RelationType) -> RelationEdge {
        RelationEdge {
            source_id: source.into(),
            target_id: target.into(),
            relation_type,
            confidence: Confidence::Medium,
            reasoning: format!("{source} relates to {target}"),
            scores: ViewScores::default(),
            decided_by: FusionRule::TextualHeuristic,
            fused_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_vector_search_orders_and_bounds() {
        let store = MemoryGraphStore::new(2);
        store.upsert_node(node("a", Some(vec![1.0, 0.0]))).await.unwrap();
        store.upsert_node(node("b", Some(vec![0.7, 0.7]))).await.unwrap();
        store.upsert_node(node("c", Some(vec![0.0, 1.0]))).await.unwrap();
        store.upsert_node(node("d", None)).await.unwrap();

        let results = store
            .vector_search(EmbeddingField::Problem, &[1.0, 0.0], 2)
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|(n, _)| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(results[0].1 <= results[1].1);

        let all = store
            .vector_search(EmbeddingField::Problem, &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|(n, _)| n.id.as_str() != "d"));
        assert!(all.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[tokio::test]
    async fn test_vector_search_rejects_bad_input() {
        let store = MemoryGraphStore::new(2);
        let err = store
            .vector_search(EmbeddingField::Problem, &[1.0, 0.0, 0.0], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { .. }));

        let err = store
            .vector_search(EmbeddingField::Problem, &[1.0, 0.0], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidParameter { .. }));

        let empty = store
            .vector_search(EmbeddingField::Method, &[1.0, 0.0], 3)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_edge_replaces_by_pair() {
        let store = MemoryGraphStore::new(2);
        store.upsert_node(node("a", None)).await.unwrap();
        store.upsert_node(node("b", None)).await.unwrap();

        store.upsert_edge(edge("a", "b", RelationType::Extend)).await.unwrap();
        store.upsert_edge(edge("a", "b", RelationType::Support)).await.unwrap();

        assert_eq!(store.edge_count().await, 1);
        let stored = store.get_edge(&"a".into(), &"b".into()).await.unwrap().unwrap();
        assert_eq!(stored.relation_type, RelationType::Support);
        assert!(store.get_edge(&"b".into(), &"a".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reupsert_of_same_judgment_keeps_timestamp() {
        let store = MemoryGraphStore::new(2);
        store.upsert_node(node("a", None)).await.unwrap();
        store.upsert_node(node("b", None)).await.unwrap();

        let first = edge("a", "b", RelationType::Extend);
        store.upsert_edge(first.clone()).await.unwrap();

        let mut again = first.clone();
        again.fused_at = first.fused_at + chrono::Duration::seconds(30);
        store.upsert_edge(again.clone()).await.unwrap();
        let stored = store.get_edge(&"a".into(), &"b".into()).await.unwrap().unwrap();
        assert_eq!(stored, first);

        again.confidence = Confidence::High;
        store.upsert_edge(again.clone()).await.unwrap();
        let stored = store.get_edge(&"a".into(), &"b".into()).await.unwrap().unwrap();
        assert_eq!(stored, again);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_of_distinct_pairs() {
        let store = Arc::new(MemoryGraphStore::new(2));
        let ids: Vec<String> = (0..16).map(|i| format!("p{i:02}")).collect();
        for id in &ids {
            store.upsert_node(node(id, None)).await.unwrap();
        }

        let mut tasks = JoinSet::new();
        for pair in ids.windows(2) {
            let store = store.clone();
            let (source, target) = (pair[0].clone(), pair[1].clone());
            tasks.spawn(async move {
                store
                    .upsert_edge(edge(&source, &target, RelationType::Extend))
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(store.edge_count().await, ids.len() - 1);
        for pair in ids.windows(2) {
            let stored = store
                .get_edge(&pair[0].as_str().into(), &pair[1].as_str().into())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.reasoning, format!("{} relates to {}", pair[0], pair[1]));
        }
        let middle = store.neighbors(&"p05".into(), Direction::Both).await.unwrap();
        assert_eq!(middle.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_of_same_pair_leave_one_edge() {
        let store = Arc::new(MemoryGraphStore::new(2));
        store.upsert_node(node("a", None)).await.unwrap();
        store.upsert_node(node("b", None)).await.unwrap();

        let mut tasks = JoinSet::new();
        for relation_type in RelationType::ALL {
            let store = store.clone();
            tasks.spawn(async move { store.upsert_edge(edge("a", "b", relation_type)).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        // Whichever write landed last is the whole edge
        assert_eq!(store.edge_count().await, 1);
        let stored = store.get_edge(&"a".into(), &"b".into()).await.unwrap().unwrap();
        assert!(RelationType::ALL.contains(&stored.relation_type));
        assert_eq!(stored.reasoning, "a relates to b");
        assert_eq!(store.neighbors(&"b".into(), Direction::Incoming).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_edge_validation() {
        let store = MemoryGraphStore::new(2);
        store.upsert_node(node("a", None)).await.unwrap();

        let err = store.upsert_edge(edge("a", "a", RelationType::Extend)).await.unwrap_err();
        assert!(matches!(err, AppError::SelfLoop { .. }));

        let err = store.upsert_edge(edge("a", "zz", RelationType::Extend)).await.unwrap_err();
        assert!(matches!(err, AppError::PaperNotFound { .. }));
        assert_eq!(store.edge_count().await, 0);
    }

    #[tokio::test]
    async fn test_neighbors_by_direction() {
        let store = MemoryGraphStore::new(2);
        for id in ["a", "b", "c"] {
            store.upsert_node(node(id, None)).await.unwrap();
        }
        store.upsert_edge(edge("a", "b", RelationType::Extend)).await.unwrap();
        store.upsert_edge(edge("c", "a", RelationType::Background)).await.unwrap();

        let out = store.neighbors(&"a".into(), Direction::Outgoing).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target_id.as_str(), "b");

        let incoming = store.neighbors(&"a".into(), Direction::Incoming).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source_id.as_str(), "c");

        let both = store.neighbors(&"a".into(), Direction::Both).await.unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].source_id.as_str(), "a");
        assert_eq!(both[1].source_id.as_str(), "c");
    }

    #[tokio::test]
    async fn test_upsert_node_rejects_wrong_dimension() {
        let store = MemoryGraphStore::new(3);
        let err = store
            .upsert_node(node("a", Some(vec![1.0, 0.0])))
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(store.node_count().await, 0);
    }
}
