//! Relation fusion engine
//!
//! Combines the three views of a candidate pair into at most one relation
//! edge. Rules, most authoritative first:
//!
//! 1. A High-confidence oracle label is adopted as-is.
//! 2. A Medium/Low oracle label needs at least one numeric view that is
//!    directionally consistent with it.
//! 3. Otherwise the similarity table decides (View-T), or the link
//!    probability alone when View-T abstained (View-G).
//! 4. With nothing usable the engine abstains. Abstention is not an error.
//!
//! When two or more views agree on the resulting label the confidence is
//! promoted one level. Without an oracle judgment it never exceeds Medium.

use chrono::Utc;
use papergraph_common::{
    config::FusionConfig,
    models::{Confidence, FusionRule, PaperNode, RelationEdge, RelationType},
    AppError, Result,
};
use serde::Serialize;

use crate::views::{OracleJudgment, TextualSimilarity, ViewSet};

/// Cut-offs separating "high" from "low" signals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionThresholds {
    pub problem: f32,
    pub method: f32,
    pub link: f32,
}

impl Default for FusionThresholds {
    fn default() -> Self {
        Self {
            problem: 0.75,
            method: 0.75,
            link: 0.8,
        }
    }
}

impl From<&FusionConfig> for FusionThresholds {
    fn from(config: &FusionConfig) -> Self {
        Self {
            problem: config.problem_threshold,
            method: config.method_threshold,
            link: config.link_threshold,
        }
    }
}

/// Why no edge was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstainCause {
    /// No view produced a signal
    NoViewSignal,
    /// Only a Medium/Low oracle label, with nothing to back it up
    UncorroboratedOracle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FusionDecision {
    Fused(RelationEdge),
    Abstained(AbstainCause),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RelationFusion {
    thresholds: FusionThresholds,
}

impl RelationFusion {
    pub fn new(thresholds: FusionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> FusionThresholds {
        self.thresholds
    }

    /// Decide the relation from `source` (earlier/reference) to `target`
    pub fn fuse(
        &self,
        source: &PaperNode,
        target: &PaperNode,
        views: &ViewSet,
    ) -> Result<FusionDecision> {
        if source.id == target.id {
            return Err(AppError::SelfLoop {
                id: source.id.to_string(),
            });
        }

        let textual = views.textual.scored().copied();
        let oracle = views.oracle.scored();
        let link = views.link.scored().copied();

        let edge = |relation_type, confidence, reasoning, decided_by| RelationEdge {
            source_id: source.id.clone(),
            target_id: target.id.clone(),
            relation_type,
            confidence,
            reasoning,
            scores: views.scores(),
            decided_by,
            fused_at: Utc::now(),
        };

        if let Some(judgment) = oracle {
            // Rule 1
            if judgment.confidence == Confidence::High {
                return Ok(FusionDecision::Fused(edge(
                    judgment.relation_type,
                    Confidence::High,
                    judgment.reasoning.clone(),
                    FusionRule::OracleVerdict,
                )));
            }

            // Rule 2
            let label = judgment.relation_type;
            let textual_ok = textual.is_some_and(|t| self.textual_consistent(&t, label));
            let link_ok = link.is_some_and(|p| self.link_consistent(p, label));
            if textual_ok || link_ok {
                let textual_agrees =
                    textual.is_some_and(|t| self.heuristic_type(&t, link, source, target) == label);
                let agreeing = 1 + usize::from(textual_agrees) + usize::from(link_ok);
                return Ok(FusionDecision::Fused(edge(
                    label,
                    promote_if_agreed(judgment.confidence, agreeing),
                    judgment.reasoning.clone(),
                    FusionRule::OracleCorroborated,
                )));
            }
        }

        // Rule 3. An oracle still present here disagrees with the table,
        // otherwise rule 2 would have taken it.
        if let Some(t) = textual {
            let relation_type = self.heuristic_type(&t, link, source, target);
            let link_agrees = link.is_some_and(|p| self.link_consistent(p, relation_type));
            let agreeing = 1 + usize::from(link_agrees);
            return Ok(FusionDecision::Fused(edge(
                relation_type,
                promote_if_agreed(Confidence::Low, agreeing),
                signal_summary(Some(&t), link, oracle),
                FusionRule::TextualHeuristic,
            )));
        }

        if let Some(p) = link {
            let relation_type = if p >= self.thresholds.link {
                RelationType::Background
            } else {
                RelationType::Unrelated
            };
            return Ok(FusionDecision::Fused(edge(
                relation_type,
                Confidence::Low,
                signal_summary(None, Some(p), oracle),
                FusionRule::LinkScore,
            )));
        }

        // Rule 4
        Ok(FusionDecision::Abstained(if oracle.is_some() {
            AbstainCause::UncorroboratedOracle
        } else {
            AbstainCause::NoViewSignal
        }))
    }

    /// The similarity table
    fn heuristic_type(
        &self,
        t: &TextualSimilarity,
        link: Option<f32>,
        source: &PaperNode,
        target: &PaperNode,
    ) -> RelationType {
        let problem_high = t.problem >= self.thresholds.problem;
        let method_high = t.method >= self.thresholds.method;

        match (problem_high, method_high) {
            (true, false) => RelationType::AlternativeApproach,
            (true, true) => match (source.year, target.year) {
                (Some(s), Some(t)) if s < t => RelationType::Extend,
                _ => RelationType::Support,
            },
            (false, true) => RelationType::MethodReuse,
            (false, false) => match link {
                Some(p) if p >= self.thresholds.link => RelationType::Background,
                _ => RelationType::Unrelated,
            },
        }
    }

    fn textual_consistent(&self, t: &TextualSimilarity, label: RelationType) -> bool {
        let problem_high = t.problem >= self.thresholds.problem;
        let method_high = t.method >= self.thresholds.method;

        match label {
            RelationType::AlternativeApproach => problem_high,
            RelationType::MethodReuse => method_high,
            RelationType::Extend | RelationType::Support | RelationType::Contrast => {
                problem_high || method_high
            }
            RelationType::Unrelated => !problem_high && !method_high,
            RelationType::Background => false,
        }
    }

    fn link_consistent(&self, p: f32, label: RelationType) -> bool {
        if label.is_related() {
            p >= self.thresholds.link
        } else {
            p < self.thresholds.link
        }
    }
}

fn promote_if_agreed(base: Confidence, agreeing_views: usize) -> Confidence {
    if agreeing_views >= 2 {
        base.promote()
    } else {
        base
    }
}

fn signal_summary(
    textual: Option<&TextualSimilarity>,
    link: Option<f32>,
    oracle: Option<&OracleJudgment>,
) -> String {
    let mut parts = Vec::new();
    match textual {
        Some(t) => parts.push(format!(
            "View-T heuristic: problem similarity {:.2}, method similarity {:.2}",
            t.problem, t.method
        )),
        None => parts.push("View-G only".to_string()),
    }
    if let Some(p) = link {
        parts.push(format!("link probability {p:.2}"));
    }
    if let Some(j) = oracle {
        parts.push(format!(
            "oracle suggested {} ({}) without numeric support",
            j.relation_type, j.confidence
        ));
    }
    parts.join("; ")
}
