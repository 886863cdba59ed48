//! Paper and relation data model shared by fusion and retrieval

mod paper;
mod relation;

pub use paper::{PaperId, PaperNode};
pub use relation::{
    CandidatePair, Confidence, FusionRule, RelationEdge, RelationType, ViewScores,
};
