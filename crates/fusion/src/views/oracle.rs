//! View-L: reasoning oracle adapter
//!
//! The oracle sees structured summaries of both papers and answers with a
//! JSON object `{relation_type, confidence, reasoning}`. Models like to wrap
//! that object in prose or a fenced block, so parsing extracts the outermost
//! braces before deserializing.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use papergraph_common::{
    config::OracleConfig,
    llm::{ChatClient, CompletionOptions},
    metrics,
    models::{Confidence, PaperId, PaperNode, RelationType},
    AppError, Result,
};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use super::{AbstainReason, OracleJudgment, ViewOutcome};

pub const ORACLE_SYSTEM_PROMPT: &str = r#"You are a senior scientific editor tasked with determining the relationship between two research papers.
You will be provided with the structured summaries of two papers: Paper A (the earlier or reference paper) and Paper B (the later or candidate paper).

Analyze their relationship based on the following criteria:
1. **Problem Overlap:** Do they solve the same problem?
2. **Method Similarity:** Do they use similar techniques?
3. **Result Consistency:** Do their results agree or disagree?

Classify the relationship into ONE of the following categories:
- **Extend:** Paper B builds directly upon Paper A.
- **Support:** Paper B provides evidence that confirms Paper A's findings.
- **Contrast:** Paper B refutes, critiques, or provides counter-evidence to Paper A.
- **Alternative Approach:** Paper B solves the same problem as Paper A but uses a significantly different method.
- **Method Reuse:** Paper B applies the method from Paper A to a new problem or domain.
- **Background:** Paper A is merely cited as context or prior work by Paper B.
- **Unrelated:** The papers have no significant semantic connection.

Rate your confidence as High, Medium or Low.

Output a JSON object with the following structure:
{
  "relation_type": "string",
  "confidence": "string",
  "reasoning": "string"
}"#;

/// What the oracle is told about one paper
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperSummary {
    pub id: PaperId,
    pub title: String,
    pub problem_statement: String,
    pub core_approach: String,
    pub key_findings: Vec<String>,
}

impl PaperSummary {
    /// Summarize `node`, cutting each text field to `max_chars` characters
    pub fn from_node(node: &PaperNode, max_chars: usize) -> Self {
        Self {
            id: node.id.clone(),
            title: node.title.clone(),
            problem_statement: truncate(node.problem_or_unknown(), max_chars),
            core_approach: truncate(node.approach_or_unknown(), max_chars),
            key_findings: node
                .key_findings
                .iter()
                .map(|f| truncate(f, max_chars))
                .collect(),
        }
    }

    fn render(&self, label: &str, role: &str) -> String {
        let mut out = format!(
            "Paper {label} ({role}): {}\n- Problem Statement: {}\n- Core Approach: {}\n",
            self.title, self.problem_statement, self.core_approach
        );
        if !self.key_findings.is_empty() {
            out.push_str("- Key Findings:\n");
            for finding in &self.key_findings {
                out.push_str(&format!("  * {finding}\n"));
            }
        }
        out
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// One oracle question: how does `target` relate to `source`?
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    pub source: PaperSummary,
    pub target: PaperSummary,
}

impl OracleRequest {
    pub fn new(source: &PaperNode, target: &PaperNode, max_chars: usize) -> Self {
        Self {
            source: PaperSummary::from_node(source, max_chars),
            target: PaperSummary::from_node(target, max_chars),
        }
    }

    pub fn user_prompt(&self) -> String {
        format!(
            "{}\n{}",
            self.source.render("A", "Reference"),
            self.target.render("B", "Candidate")
        )
    }
}

/// Source of relation judgments; returns the raw model text
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn complete(&self, request: &OracleRequest) -> Result<String>;
}

/// Oracle backed by an OpenAI-compatible chat model
pub struct ChatOracle {
    client: ChatClient,
    options: CompletionOptions,
}

impl ChatOracle {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            options: CompletionOptions {
                max_tokens: 400,
                temperature: 0.0,
                json_mode: true,
            },
        }
    }
}

#[async_trait]
impl ReasoningOracle for ChatOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<String> {
        self.client
            .complete(ORACLE_SYSTEM_PROMPT, &request.user_prompt(), &self.options)
            .await
    }
}

/// Canned responses keyed by (source, target), for tests and replays
#[derive(Default)]
pub struct StaticOracle {
    responses: HashMap<(PaperId, PaperId), String>,
    delay: Option<Duration>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(
        mut self,
        source: impl Into<PaperId>,
        target: impl Into<PaperId>,
        raw: impl Into<String>,
    ) -> Self {
        self.responses
            .insert((source.into(), target.into()), raw.into());
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ReasoningOracle for StaticOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .get(&(request.source.id.clone(), request.target.id.clone()))
            .cloned()
            .ok_or_else(|| AppError::Upstream {
                service: "oracle".to_string(),
                message: format!(
                    "no canned response for {} -> {}",
                    request.source.id, request.target.id
                ),
            })
    }
}

#[derive(Deserialize)]
struct RawJudgment {
    relation_type: String,
    confidence: serde_json::Value,
    #[serde(default)]
    reasoning: Option<String>,
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"))
}

fn parse_confidence(value: &serde_json::Value) -> Option<Confidence> {
    match value {
        serde_json::Value::String(s) => s
            .parse()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(score_to_confidence)),
        serde_json::Value::Number(n) => n.as_f64().map(score_to_confidence),
        _ => None,
    }
}

/// Numeric confidences come as 0..1 or as percentages
fn score_to_confidence(score: f64) -> Confidence {
    if score > 1.0 {
        Confidence::from_score(score / 100.0)
    } else {
        Confidence::from_score(score)
    }
}

/// Extract a judgment from raw oracle text
pub fn parse_judgment(raw: &str) -> std::result::Result<OracleJudgment, AbstainReason> {
    let object = json_object_pattern()
        .find(raw)
        .ok_or(AbstainReason::Malformed)?;
    let parsed: RawJudgment =
        serde_json::from_str(object.as_str()).map_err(|_| AbstainReason::Malformed)?;

    let relation_type: RelationType = parsed
        .relation_type
        .parse()
        .map_err(|_| AbstainReason::Malformed)?;
    let confidence = parse_confidence(&parsed.confidence).ok_or(AbstainReason::Malformed)?;

    Ok(OracleJudgment {
        relation_type,
        confidence,
        reasoning: parsed.reasoning.unwrap_or_default().trim().to_string(),
    })
}

/// Rate-limited, time-bounded View-L adapter
pub struct OracleView {
    oracle: Arc<dyn ReasoningOracle>,
    limiter: DefaultDirectRateLimiter,
    timeout: Duration,
    max_summary_chars: usize,
}

impl OracleView {
    pub fn new(
        oracle: Arc<dyn ReasoningOracle>,
        timeout: Duration,
        requests_per_second: u32,
        burst: u32,
        max_summary_chars: usize,
    ) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rps);
        Self {
            oracle,
            limiter: RateLimiter::direct(Quota::per_second(rps).allow_burst(burst)),
            timeout,
            max_summary_chars,
        }
    }

    /// `None` when the oracle is disabled
    pub fn from_config(config: &OracleConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "oracle.api_key is required when the oracle is enabled".to_string(),
        })?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let client = ChatClient::new(api_key, config.api_base.clone(), config.model.clone(), timeout)?;
        Ok(Some(Self::new(
            Arc::new(ChatOracle::new(client)),
            timeout,
            config.requests_per_second,
            config.burst,
            config.max_summary_chars,
        )))
    }

    pub async fn judge(&self, source: &PaperNode, target: &PaperNode) -> ViewOutcome<OracleJudgment> {
        let request = OracleRequest::new(source, target, self.max_summary_chars);

        // The timeout covers waiting for a rate-limit permit too
        let start = Instant::now();
        let call = async {
            self.limiter.until_ready().await;
            self.oracle.complete(&request).await
        };
        let result = tokio::time::timeout(self.timeout, call).await;
        metrics::record_view_latency("oracle", start.elapsed().as_secs_f64());

        let raw = match result {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(
                    source = %source.id,
                    target = %target.id,
                    error = %e,
                    "Oracle call failed, abstaining"
                );
                return ViewOutcome::Abstained(AbstainReason::Upstream);
            }
            Err(_) => {
                tracing::warn!(
                    source = %source.id,
                    target = %target.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Oracle call timed out, abstaining"
                );
                return ViewOutcome::Abstained(AbstainReason::Timeout);
            }
        };

        match parse_judgment(&raw) {
            Ok(judgment) => ViewOutcome::Scored(judgment),
            Err(reason) => {
                tracing::warn!(
                    source = %source.id,
                    target = %target.id,
                    response_len = raw.len(),
                    "Unusable oracle response, abstaining"
                );
                ViewOutcome::Abstained(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: &str) -> PaperNode {
        let mut node = PaperNode::new(id, format!("Paper {id}"));
        node.problem_statement = Some("parameter-efficient fine-tuning".into());
        node.key_findings = vec!["matches full fine-tuning".into()];
        node
    }

    fn view(oracle: StaticOracle, timeout: Duration) -> OracleView {
        OracleView::new(Arc::new(oracle), timeout, 100, 100, 200)
    }

    #[test]
    fn test_parse_plain_json() {
        let j = parse_judgment(
            r#"{"relation_type": "Support", "confidence": "High", "reasoning": "B's results confirm A's ablation"}"#,
        )
        .unwrap();
        assert_eq!(j.relation_type, RelationType::Support);
        assert_eq!(j.confidence, Confidence::High);
        assert_eq!(j.reasoning, "B's results confirm A's ablation");
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let raw = "Here is my assessment:\n```json\n{\n  \"relation_type\": \"Alternative Approach\",\n  \"confidence\": \"medium\",\n  \"reasoning\": \"same task, different model\"\n}\n```\nHope this helps.";
        let j = parse_judgment(raw).unwrap();
        assert_eq!(j.relation_type, RelationType::AlternativeApproach);
        assert_eq!(j.confidence, Confidence::Medium);
    }

    #[test]
    fn test_parse_numeric_confidence() {
        let j = parse_judgment(r#"{"relation_type": "Extend", "confidence": 0.85}"#).unwrap();
        assert_eq!(j.confidence, Confidence::High);
        assert!(j.reasoning.is_empty());

        let j = parse_judgment(r#"{"relation_type": "Extend", "confidence": 55}"#).unwrap();
        assert_eq!(j.confidence, Confidence::Medium);
    }

    #[test]
    fn test_parse_rejects_bad_output() {
        assert_eq!(
            parse_judgment("I cannot help with that."),
            Err(AbstainReason::Malformed)
        );
        assert_eq!(
            parse_judgment(r#"{"relation_type": "Cites", "confidence": "High"}"#),
            Err(AbstainReason::Malformed)
        );
        assert_eq!(
            parse_judgment(r#"{"relation_type": "Extend", "confidence": "certain"}"#),
            Err(AbstainReason::Malformed)
        );
    }

    #[test]
    fn test_summary_truncation() {
        let mut node = paper("a");
        node.core_approach = Some("x".repeat(50));
        let summary = PaperSummary::from_node(&node, 10);
        assert_eq!(summary.core_approach, format!("{}...", "x".repeat(10)));
        assert_eq!(summary.problem_statement, "parameter-...");

        let prompt = OracleRequest::new(&node, &paper("b"), 500).user_prompt();
        assert!(prompt.contains("Paper A (Reference)"));
        assert!(prompt.contains("Paper B (Candidate)"));
        assert!(prompt.contains("* matches full fine-tuning"));
    }

    #[tokio::test]
    async fn test_judge_scores_canned_response() {
        let oracle = StaticOracle::new().with_response(
            "a",
            "b",
            r#"{"relation_type": "Method-Reuse", "confidence": "Low", "reasoning": "same adapter, new domain"}"#,
        );
        let outcome = view(oracle, Duration::from_secs(1))
            .judge(&paper("a"), &paper("b"))
            .await;
        let judgment = outcome.scored().unwrap();
        assert_eq!(judgment.relation_type, RelationType::MethodReuse);
        assert_eq!(judgment.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_upstream_failure_abstains() {
        let outcome = view(StaticOracle::new(), Duration::from_secs(1))
            .judge(&paper("a"), &paper("b"))
            .await;
        assert_eq!(outcome, ViewOutcome::Abstained(AbstainReason::Upstream));
    }

    #[tokio::test]
    async fn test_timeout_abstains() {
        let oracle = StaticOracle::new()
            .with_response("a", "b", r#"{"relation_type": "Extend", "confidence": "High"}"#)
            .with_delay(Duration::from_millis(200));
        let outcome = view(oracle, Duration::from_millis(10))
            .judge(&paper("a"), &paper("b"))
            .await;
        assert_eq!(outcome, ViewOutcome::Abstained(AbstainReason::Timeout));
    }

    #[tokio::test]
    async fn test_rate_limit_wait_counts_against_timeout() {
        let oracle = StaticOracle::new().with_response(
            "a",
            "b",
            r#"{"relation_type": "Extend", "confidence": "High"}"#,
        );
        // One permit per second, so the second call has to wait for the limiter
        let view = OracleView::new(Arc::new(oracle), Duration::from_millis(50), 1, 1, 200);

        let first = view.judge(&paper("a"), &paper("b")).await;
        assert!(first.scored().is_some());

        let start = Instant::now();
        let second = view.judge(&paper("a"), &paper("b")).await;
        assert_eq!(second, ViewOutcome::Abstained(AbstainReason::Timeout));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_enabled_oracle_requires_key() {
        let config = OracleConfig {
            enabled: true,
            ..OracleConfig::default()
        };
        assert!(OracleView::from_config(&config).is_err());
        assert!(OracleView::from_config(&OracleConfig::default())
            .unwrap()
            .is_none());
    }
}
