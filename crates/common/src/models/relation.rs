//! Relation types, confidence levels and fused relation edges
//!
//! Labels and confidences arrive from loosely formatted sources (LLM output,
//! JSONL files), so both parse leniently: case, spaces, hyphens and
//! underscores are ignored.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PaperId;

/// Closed set of semantic relation labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    Extend,
    Support,
    Contrast,
    #[serde(rename = "Alternative-Approach")]
    AlternativeApproach,
    #[serde(rename = "Method-Reuse")]
    MethodReuse,
    Background,
    Unrelated,
}

impl RelationType {
    pub const ALL: [RelationType; 7] = [
        RelationType::Extend,
        RelationType::Support,
        RelationType::Contrast,
        RelationType::AlternativeApproach,
        RelationType::MethodReuse,
        RelationType::Background,
        RelationType::Unrelated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Extend => "Extend",
            RelationType::Support => "Support",
            RelationType::Contrast => "Contrast",
            RelationType::AlternativeApproach => "Alternative-Approach",
            RelationType::MethodReuse => "Method-Reuse",
            RelationType::Background => "Background",
            RelationType::Unrelated => "Unrelated",
        }
    }

    /// Every label except `Unrelated` asserts some connection
    pub fn is_related(&self) -> bool {
        !matches!(self, RelationType::Unrelated)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize_label(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_label(s);
        RelationType::ALL
            .into_iter()
            .find(|t| normalize_label(t.as_str()) == normalized)
            .ok_or_else(|| format!("unknown relation type '{s}'"))
    }
}

/// Ordinal confidence: Low < Medium < High
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// One level up, saturating at High
    pub fn promote(self) -> Self {
        match self {
            Confidence::Low => Confidence::Medium,
            Confidence::Medium | Confidence::High => Confidence::High,
        }
    }

    /// Bucket a numeric confidence in [0, 1]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Confidence::High
        } else if score >= 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "Low",
            Confidence::Medium => "Medium",
            Confidence::High => "High",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "low" => Ok(Confidence::Low),
            "medium" | "med" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            _ => Err(format!("unknown confidence '{s}'")),
        }
    }
}

/// Raw view signals recorded on an edge for audit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewScores {
    pub similarity_problem: Option<f32>,
    pub similarity_method: Option<f32>,
    pub llm_label: Option<RelationType>,
    pub llm_confidence: Option<Confidence>,
    pub gnn_probability: Option<f32>,
}

/// Which fusion rule produced an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionRule {
    /// High-confidence oracle verdict adopted as-is
    OracleVerdict,
    /// Oracle label confirmed by a numeric view
    OracleCorroborated,
    /// Label derived from the similarity table
    TextualHeuristic,
    /// Only the link scorer had a signal
    LinkScore,
}

/// A fused, directed relation between two papers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub source_id: PaperId,
    pub target_id: PaperId,
    pub relation_type: RelationType,
    pub confidence: Confidence,
    pub reasoning: String,
    #[serde(default)]
    pub scores: ViewScores,
    pub decided_by: FusionRule,
    pub fused_at: DateTime<Utc>,
}

impl RelationEdge {
    pub fn key(&self) -> (PaperId, PaperId) {
        (self.source_id.clone(), self.target_id.clone())
    }

    /// The endpoint opposite to `id`, if `id` is an endpoint at all
    pub fn other_endpoint(&self, id: &PaperId) -> Option<&PaperId> {
        if &self.source_id == id {
            Some(&self.target_id)
        } else if &self.target_id == id {
            Some(&self.source_id)
        } else {
            None
        }
    }

    /// Equal in everything except the fusion timestamp
    pub fn same_judgment(&self, other: &RelationEdge) -> bool {
        self.source_id == other.source_id
            && self.target_id == other.target_id
            && self.relation_type == other.relation_type
            && self.confidence == other.confidence
            && self.reasoning == other.reasoning
            && self.scores == other.scores
            && self.decided_by == other.decided_by
    }
}

/// An ordered (source, target) pair submitted for fusion
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidatePair {
    pub source_id: PaperId,
    pub target_id: PaperId,
}

impl CandidatePair {
    pub fn new(source_id: impl Into<PaperId>, target_id: impl Into<PaperId>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }
}
