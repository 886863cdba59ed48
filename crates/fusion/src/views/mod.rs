//! View scorer adapters
//!
//! Each view judges a candidate pair independently:
//! - View-T ([`TextualView`]): cosine similarity of problem and method embeddings
//! - View-L ([`OracleView`]): an LLM reasoning oracle's label and confidence
//! - View-G ([`LinkView`]): a link predictor's probability that the pair is related
//!
//! Adapters never fail. Every timeout, upstream error or unusable response
//! becomes [`ViewOutcome::Abstained`] with a reason.

mod link;
mod oracle;
mod textual;

pub use link::{HttpLinkScorer, LinkScorer, LinkView, StaticLinkScorer};
pub use oracle::{
    parse_judgment, ChatOracle, OracleRequest, OracleView, PaperSummary, ReasoningOracle,
    StaticOracle, ORACLE_SYSTEM_PROMPT,
};
pub use textual::TextualView;

use papergraph_common::{
    config::AppConfig,
    metrics,
    models::{Confidence, PaperNode, RelationType, ViewScores},
    Result,
};
use serde::Serialize;

/// Why a view produced no signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstainReason {
    MissingInput,
    Timeout,
    Malformed,
    Upstream,
    Disabled,
    OutOfRange,
}

impl AbstainReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbstainReason::MissingInput => "missing_input",
            AbstainReason::Timeout => "timeout",
            AbstainReason::Malformed => "malformed",
            AbstainReason::Upstream => "upstream",
            AbstainReason::Disabled => "disabled",
            AbstainReason::OutOfRange => "out_of_range",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome<T> {
    Scored(T),
    Abstained(AbstainReason),
}

impl<T> ViewOutcome<T> {
    pub fn scored(&self) -> Option<&T> {
        match self {
            ViewOutcome::Scored(value) => Some(value),
            ViewOutcome::Abstained(_) => None,
        }
    }

    pub fn abstain_reason(&self) -> Option<AbstainReason> {
        match self {
            ViewOutcome::Scored(_) => None,
            ViewOutcome::Abstained(reason) => Some(*reason),
        }
    }
}

/// View-T output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextualSimilarity {
    pub problem: f32,
    pub method: f32,
}

/// View-L output
#[derive(Debug, Clone, PartialEq)]
pub struct OracleJudgment {
    pub relation_type: RelationType,
    pub confidence: Confidence,
    pub reasoning: String,
}

/// All three view results for one pair
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSet {
    pub textual: ViewOutcome<TextualSimilarity>,
    pub oracle: ViewOutcome<OracleJudgment>,
    pub link: ViewOutcome<f32>,
}

impl ViewSet {
    /// Every view abstained for the given reason
    pub fn abstained(reason: AbstainReason) -> Self {
        Self {
            textual: ViewOutcome::Abstained(reason),
            oracle: ViewOutcome::Abstained(reason),
            link: ViewOutcome::Abstained(reason),
        }
    }

    /// Audit breakdown recorded on the fused edge
    pub fn scores(&self) -> ViewScores {
        let textual = self.textual.scored();
        let oracle = self.oracle.scored();
        ViewScores {
            similarity_problem: textual.map(|t| t.problem),
            similarity_method: textual.map(|t| t.method),
            llm_label: oracle.map(|o| o.relation_type),
            llm_confidence: oracle.map(|o| o.confidence),
            gnn_probability: self.link.scored().copied(),
        }
    }
}

/// The configured set of view adapters
pub struct ViewPanel {
    textual: TextualView,
    oracle: Option<OracleView>,
    link: Option<LinkView>,
}

impl ViewPanel {
    pub fn new(oracle: Option<OracleView>, link: Option<LinkView>) -> Self {
        Self {
            textual: TextualView,
            oracle,
            link,
        }
    }

    /// Build adapters from configuration; disabled views always abstain
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let oracle = OracleView::from_config(&config.oracle)?;
        let link = LinkView::from_config(&config.link_scorer).await?;
        tracing::info!(
            oracle = oracle.is_some(),
            link_scorer = link.is_some(),
            "View panel ready"
        );
        Ok(Self::new(oracle, link))
    }

    /// Run all views for `(source, target)` concurrently
    pub async fn evaluate(&self, source: &PaperNode, target: &PaperNode) -> ViewSet {
        let textual = self.textual.score(source, target);

        let oracle = async {
            match &self.oracle {
                Some(view) => view.judge(source, target).await,
                None => ViewOutcome::Abstained(AbstainReason::Disabled),
            }
        };
        let link = async {
            match &self.link {
                Some(view) => view.score(&source.id, &target.id).await,
                None => ViewOutcome::Abstained(AbstainReason::Disabled),
            }
        };
        let (oracle, link) = tokio::join!(oracle, link);

        let views = ViewSet {
            textual,
            oracle,
            link,
        };
        record_abstentions(&views);
        views
    }
}

fn record_abstentions(views: &ViewSet) {
    let reasons = [
        ("textual", views.textual.abstain_reason()),
        ("oracle", views.oracle.abstain_reason()),
        ("link", views.link.abstain_reason()),
    ];
    for (view, reason) in reasons {
        match reason {
            None | Some(AbstainReason::Disabled) => {}
            Some(reason) => metrics::record_view_abstention(view, reason.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use papergraph_common::models::PaperId;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn paper(id: &str, problem: Vec<f32>, method: Vec<f32>) -> PaperNode {
        let mut node = PaperNode::new(id, format!("Paper {id}"));
        node.embedding_problem = Some(problem);
        node.embedding_method = Some(method);
        node
    }

    #[tokio::test]
    async fn test_disabled_views_abstain() {
        let panel = ViewPanel::new(None, None);
        let a = paper("a", vec![1.0, 0.0], vec![0.0, 1.0]);
        let b = paper("b", vec![1.0, 0.0], vec![1.0, 0.0]);

        let views = panel.evaluate(&a, &b).await;
        let t = views.textual.scored().unwrap();
        assert!((t.problem - 1.0).abs() < 1e-6);
        assert!(t.method.abs() < 1e-6);
        assert_eq!(views.oracle, ViewOutcome::Abstained(AbstainReason::Disabled));
        assert_eq!(views.link, ViewOutcome::Abstained(AbstainReason::Disabled));
    }

    #[tokio::test]
    async fn test_all_views_scored() {
        let oracle = StaticOracle::new().with_response(
            "a",
            "b",
            r#"{"relation_type": "Extend", "confidence": "High", "reasoning": "B adds adapters to A"}"#,
        );
        let link = StaticLinkScorer::new(HashMap::from([(
            (PaperId::from("a"), PaperId::from("b")),
            0.91,
        )]));
        let panel = ViewPanel::new(
            Some(OracleView::new(Arc::new(oracle), Duration::from_secs(1), 10, 10, 500)),
            Some(LinkView::new(Arc::new(link), Duration::from_secs(1))),
        );

        let a = paper("a", vec![1.0, 0.0], vec![1.0, 0.0]);
        let b = paper("b", vec![1.0, 0.0], vec![1.0, 0.0]);
        let views = panel.evaluate(&a, &b).await;

        let scores = views.scores();
        assert_eq!(scores.llm_label, Some(RelationType::Extend));
        assert_eq!(scores.llm_confidence, Some(Confidence::High));
        assert_eq!(scores.gnn_probability, Some(0.91));
        assert!(scores.similarity_problem.is_some());
    }

    #[test]
    fn test_abstained_set_has_empty_scores() {
        let views = ViewSet::abstained(AbstainReason::Disabled);
        assert_eq!(views.scores(), ViewScores::default());
    }
}
