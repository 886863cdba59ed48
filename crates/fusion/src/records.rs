//! Batch input: paper records and candidate pairs as JSON Lines
//!
//! Records come from the upstream extraction step. Missing embeddings are
//! filled in here, in batches, before the nodes reach the graph store.

use papergraph_common::{
    embeddings::{check_dimension, Embedder},
    models::{CandidatePair, PaperId, PaperNode},
    AppError, Result,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Raw section text, used to embed when the structured field is missing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionTexts {
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

/// One extracted paper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: PaperId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub problem_statement: Option<String>,
    #[serde(default)]
    pub core_approach: Option<String>,
    #[serde(default)]
    pub research_gap: Option<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub sections: SectionTexts,
    #[serde(default)]
    pub embedding_problem: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_method: Option<Vec<f32>>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
}

impl PaperRecord {
    fn problem_text(&self) -> Option<&str> {
        non_empty(self.sections.problem.as_deref()).or(non_empty(self.problem_statement.as_deref()))
    }

    fn method_text(&self) -> Option<&str> {
        non_empty(self.sections.method.as_deref()).or(non_empty(self.core_approach.as_deref()))
    }

    fn into_node(self) -> PaperNode {
        PaperNode {
            id: self.id,
            title: self.title,
            problem_statement: self.problem_statement,
            core_approach: self.core_approach,
            research_gap: self.research_gap,
            key_findings: self.key_findings,
            embedding_problem: self.embedding_problem,
            embedding_method: self.embedding_method,
            year: self.year,
            venue: self.venue,
        }
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

fn parse_lines<T: DeserializeOwned>(text: &str, what: &str) -> Result<Vec<T>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| AppError::Validation {
                message: format!("{} line {}: {}", what, index + 1, e),
                field: None,
            })
        })
        .collect()
}

/// Parse paper records; ids must be unique
pub fn parse_records(text: &str) -> Result<Vec<PaperRecord>> {
    let records: Vec<PaperRecord> = parse_lines(text, "record")?;

    let mut seen = HashSet::new();
    for record in &records {
        if !seen.insert(&record.id) {
            return Err(AppError::Validation {
                message: format!("duplicate paper id {}", record.id),
                field: Some("id".to_string()),
            });
        }
    }
    Ok(records)
}

/// Parse `{source_id, target_id}` candidate pairs
pub fn parse_pairs(text: &str) -> Result<Vec<CandidatePair>> {
    parse_lines(text, "pair")
}

/// Fills in missing problem/method embeddings
pub struct RecordEmbedder {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl RecordEmbedder {
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Convert records to nodes, embedding every missing vector that has text.
    /// Vectors already present are checked against the embedder's dimension.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn embed_missing(&self, records: Vec<PaperRecord>) -> Result<Vec<PaperNode>> {
        let dimension = self.embedder.dimension();

        // (record index, is method field, text)
        let mut pending: Vec<(usize, bool, String)> = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if record.embedding_problem.is_none() {
                if let Some(text) = record.problem_text() {
                    pending.push((index, false, text.to_string()));
                }
            }
            if record.embedding_method.is_none() {
                if let Some(text) = record.method_text() {
                    pending.push((index, true, text.to_string()));
                }
            }
        }

        let mut nodes: Vec<PaperNode> = records.into_iter().map(PaperRecord::into_node).collect();
        for node in &mut nodes {
            if let Some(v) = node.embedding_problem.take() {
                node.embedding_problem = Some(check_dimension(v, dimension)?);
            }
            if let Some(v) = node.embedding_method.take() {
                node.embedding_method = Some(check_dimension(v, dimension)?);
            }
        }

        info!(
            texts = pending.len(),
            model = %self.embedder.model_name(),
            "Embedding missing paper fields"
        );

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, _, text)| text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(AppError::EmbeddingError {
                    message: format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
                });
            }

            for ((index, is_method, _), vector) in batch.iter().zip(vectors) {
                let vector = check_dimension(vector, dimension)?;
                let node = &mut nodes[*index];
                if *is_method {
                    node.embedding_method = Some(vector);
                } else {
                    node.embedding_problem = Some(vector);
                }
            }
            debug!(batch_size = batch.len(), "Embedded batch");
        }

        Ok(nodes)
    }
}
