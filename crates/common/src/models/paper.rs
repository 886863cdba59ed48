use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::EmbeddingField;

/// Stable paper identifier (arXiv id, DOI, or any opaque string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperId(pub String);

impl PaperId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PaperId {
    fn from(value: &str) -> Self {
        PaperId(value.to_string())
    }
}

impl From<String> for PaperId {
    fn from(value: String) -> Self {
        PaperId(value)
    }
}

/// A paper node in the relation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperNode {
    pub id: PaperId,
    pub title: String,
    #[serde(default)]
    pub problem_statement: Option<String>,
    #[serde(default)]
    pub core_approach: Option<String>,
    #[serde(default)]
    pub research_gap: Option<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_problem: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_method: Option<Vec<f32>>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
}

impl PaperNode {
    /// Create a node with only an id and title
    pub fn new(id: impl Into<PaperId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            problem_statement: None,
            core_approach: None,
            research_gap: None,
            key_findings: Vec::new(),
            embedding_problem: None,
            embedding_method: None,
            year: None,
            venue: None,
        }
    }

    pub fn embedding(&self, field: EmbeddingField) -> Option<&[f32]> {
        match field {
            EmbeddingField::Problem => self.embedding_problem.as_deref(),
            EmbeddingField::Method => self.embedding_method.as_deref(),
        }
    }

    /// Copy of the node without vectors, for responses and prompts
    pub fn without_embeddings(&self) -> Self {
        Self {
            embedding_problem: None,
            embedding_method: None,
            ..self.clone()
        }
    }

    /// Problem statement, or a placeholder when extraction left it empty
    pub fn problem_or_unknown(&self) -> &str {
        self.problem_statement.as_deref().unwrap_or("N/A")
    }

    /// Core approach, or a placeholder when extraction left it empty
    pub fn approach_or_unknown(&self) -> &str {
        self.core_approach.as_deref().unwrap_or("N/A")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_id_serializes_as_plain_string() {
        let id = PaperId::from("2106.09685");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"2106.09685\"");
    }

    #[test]
    fn test_embedding_by_field() {
        let mut node = PaperNode::new("p1", "LoRA");
        node.embedding_problem = Some(vec![1.0, 0.0]);
        assert_eq!(node.embedding(EmbeddingField::Problem), Some(&[1.0, 0.0][..]));
        assert_eq!(node.embedding(EmbeddingField::Method), None);
    }

    #[test]
    fn test_without_embeddings_keeps_text() {
        let mut node = PaperNode::new("p1", "LoRA");
        node.problem_statement = Some("fine-tuning is expensive".into());
        node.embedding_method = Some(vec![0.5; 4]);

        let stripped = node.without_embeddings();
        assert!(stripped.embedding_method.is_none());
        assert_eq!(stripped.problem_or_unknown(), "fine-tuning is expensive");
        assert_eq!(stripped.approach_or_unknown(), "N/A");
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let node: PaperNode = serde_json::from_str(r#"{"id":"p9","title":"T"}"#).unwrap();
        assert!(node.key_findings.is_empty());
        assert!(node.year.is_none());
    }
}
