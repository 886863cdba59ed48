//! Query context: the evidence subgraph handed to generation

use papergraph_common::models::{Confidence, PaperId, PaperNode, RelationEdge, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

const PROMPT_PREAMBLE: &str = "You are an expert scientific assistant. Answer the user's question using the provided context from the Citation Graph.\n\
Use the semantic relations (e.g., Extend, Contrast, Support) to explain *how* the papers are related, not just *that* they are related.";

/// How a node entered the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeOrigin {
    /// Direct vector-search hit
    Anchor,
    /// Reached over relation edges, `hop` edges away from an anchor
    Expansion { hop: usize },
}

impl NodeOrigin {
    pub fn is_anchor(&self) -> bool {
        matches!(self, NodeOrigin::Anchor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    /// Structured fields, without embeddings
    pub paper: PaperNode,
    pub relevance_score: f32,
    pub origin: NodeOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEdge {
    pub source_id: PaperId,
    pub target_id: PaperId,
    pub relation_type: RelationType,
    pub confidence: Confidence,
    pub reasoning: String,
}

impl From<&RelationEdge> for ContextEdge {
    fn from(edge: &RelationEdge) -> Self {
        Self {
            source_id: edge.source_id.clone(),
            target_id: edge.target_id.clone(),
            relation_type: edge.relation_type,
            confidence: edge.confidence,
            reasoning: edge.reasoning.clone(),
        }
    }
}

/// Ranked nodes plus every relation among them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub query: String,
    /// Anchors first, then expansions; each tier by descending relevance
    pub nodes: Vec<ContextNode>,
    /// Sorted by (source_id, target_id)
    pub edges: Vec<ContextEdge>,
}

impl QueryContext {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn anchors(&self) -> impl Iterator<Item = &ContextNode> {
        self.nodes.iter().filter(|n| n.origin.is_anchor())
    }

    pub fn expansions(&self) -> impl Iterator<Item = &ContextNode> {
        self.nodes.iter().filter(|n| !n.origin.is_anchor())
    }

    /// Render the generation prompt: anchors, related papers and typed
    /// connections with their reasoning
    pub fn render_prompt(&self) -> String {
        let papers: HashMap<&PaperId, &PaperNode> =
            self.nodes.iter().map(|n| (&n.paper.id, &n.paper)).collect();
        let anchors: HashSet<&PaperId> = self.anchors().map(|n| &n.paper.id).collect();
        let title = |id: &PaperId| {
            papers
                .get(id)
                .map(|p| p.title.as_str())
                .unwrap_or_else(|| id.as_str())
                .to_string()
        };

        let mut prompt = String::new();
        let _ = writeln!(prompt, "{PROMPT_PREAMBLE}\n");
        let _ = writeln!(prompt, "User Query: \"{}\"\n", self.query);

        let _ = writeln!(prompt, "### Retrieved Papers (Anchors):");
        if self.is_empty() {
            let _ = writeln!(prompt, "No relevant papers found.\n");
        }
        for node in self.anchors() {
            let _ = writeln!(
                prompt,
                "- **{}** (Score: {:.2})",
                node.paper.title, node.relevance_score
            );
            write_paper_fields(&mut prompt, &node.paper);
        }

        if self.expansions().next().is_some() {
            let _ = writeln!(prompt, "### Related Papers (Graph Expansion):");
            for node in self.expansions() {
                let hop = match node.origin {
                    NodeOrigin::Expansion { hop } => hop,
                    NodeOrigin::Anchor => 0,
                };
                let _ = writeln!(
                    prompt,
                    "- **{}** (Score: {:.2}, {} hop{})",
                    node.paper.title,
                    node.relevance_score,
                    hop,
                    if hop == 1 { "" } else { "s" }
                );
                write_paper_fields(&mut prompt, &node.paper);
            }
        }

        if !self.edges.is_empty() {
            let _ = writeln!(prompt, "### Related Work (Graph Connections):");
            for edge in &self.edges {
                let _ = writeln!(
                    prompt,
                    "- **{}** --[{}]--> **{}** (Confidence: {})",
                    title(&edge.source_id),
                    edge.relation_type,
                    title(&edge.target_id),
                    edge.confidence
                );
                if !edge.reasoning.is_empty() {
                    let _ = writeln!(prompt, "  Reasoning: {}", edge.reasoning);
                }
                // The neighbour is whichever side is not an anchor
                let neighbor = if anchors.contains(&edge.target_id) && !anchors.contains(&edge.source_id) {
                    &edge.source_id
                } else {
                    &edge.target_id
                };
                let method = papers
                    .get(neighbor)
                    .map(|p| p.approach_or_unknown())
                    .unwrap_or("N/A");
                let _ = writeln!(prompt, "  Neighbor Method: {method}\n");
            }
        }

        prompt.push_str("Answer:");
        prompt
    }
}

fn write_paper_fields(prompt: &mut String, paper: &PaperNode) {
    let _ = writeln!(prompt, "  Problem: {}", paper.problem_or_unknown());
    let _ = writeln!(prompt, "  Method: {}", paper.approach_or_unknown());
    let _ = writeln!(
        prompt,
        "  Research Gap: {}",
        paper.research_gap.as_deref().unwrap_or("N/A")
    );
    if paper.key_findings.is_empty() {
        let _ = writeln!(prompt, "  Key Findings: N/A\n");
    } else {
        let _ = writeln!(prompt, "  Key Findings: {}\n", paper.key_findings.join("; "));
    }
}
