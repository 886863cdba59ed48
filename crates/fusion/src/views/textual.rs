//! View-T: embedding similarity
//!
//! Cosine similarity of the two papers' problem embeddings and of their
//! method embeddings. Abstains unless both fields are embedded on both sides.

use papergraph_common::{
    models::PaperNode,
    store::{cosine_similarity, EmbeddingField},
};

use super::{AbstainReason, TextualSimilarity, ViewOutcome};

/// Computed locally, no I/O
#[derive(Debug, Clone, Copy, Default)]
pub struct TextualView;

impl TextualView {
    pub fn score(&self, source: &PaperNode, target: &PaperNode) -> ViewOutcome<TextualSimilarity> {
        let problem = similarity(source, target, EmbeddingField::Problem);
        let method = similarity(source, target, EmbeddingField::Method);

        match (problem, method) {
            (Some(problem), Some(method)) => ViewOutcome::Scored(TextualSimilarity { problem, method }),
            _ => ViewOutcome::Abstained(AbstainReason::MissingInput),
        }
    }
}

fn similarity(source: &PaperNode, target: &PaperNode, field: EmbeddingField) -> Option<f32> {
    cosine_similarity(source.embedding(field)?, target.embedding(field)?)
}
