//! View-G: link prediction adapter

use async_trait::async_trait;
use papergraph_common::{config::LinkScorerConfig, metrics, models::PaperId, AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{AbstainReason, ViewOutcome};

/// Probability that `target` is semantically linked to `source`
#[async_trait]
pub trait LinkScorer: Send + Sync {
    /// `Ok(None)` when the scorer has no opinion on this pair
    async fn probability(&self, source: &PaperId, target: &PaperId) -> Result<Option<f32>>;
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    source_id: &'a PaperId,
    target_id: &'a PaperId,
}

#[derive(Deserialize)]
struct ScoreResponse {
    probability: Option<f32>,
}

/// Scorer served over HTTP: `POST {source_id, target_id}` → `{probability}`
pub struct HttpLinkScorer {
    client: reqwest::Client,
    url: String,
}

impl HttpLinkScorer {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl LinkScorer for HttpLinkScorer {
    async fn probability(&self, source: &PaperId, target: &PaperId) -> Result<Option<f32>> {
        let response = self
            .client
            .post(&self.url)
            .json(&ScoreRequest {
                source_id: source,
                target_id: target,
            })
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Upstream {
                service: "link_scorer".to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let body: ScoreResponse = response.json().await?;
        Ok(body.probability)
    }
}

#[derive(Deserialize)]
struct TableRow {
    source_id: PaperId,
    target_id: PaperId,
    probability: f32,
}

/// Fixed probability table, e.g. an offline link-prediction export
#[derive(Debug, Clone, Default)]
pub struct StaticLinkScorer {
    table: HashMap<(PaperId, PaperId), f32>,
}

impl StaticLinkScorer {
    pub fn new(table: HashMap<(PaperId, PaperId), f32>) -> Self {
        Self { table }
    }

    /// Parse JSON Lines rows of `{source_id, target_id, probability}`
    pub fn from_json_lines(text: &str) -> Result<Self> {
        let mut table = HashMap::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row: TableRow = serde_json::from_str(line).map_err(|e| AppError::Validation {
                message: format!("link table line {}: {}", index + 1, e),
                field: None,
            })?;
            table.insert((row.source_id, row.target_id), row.probability);
        }
        Ok(Self { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl LinkScorer for StaticLinkScorer {
    async fn probability(&self, source: &PaperId, target: &PaperId) -> Result<Option<f32>> {
        Ok(self.table.get(&(source.clone(), target.clone())).copied())
    }
}

/// Time-bounded View-G adapter
pub struct LinkView {
    scorer: Arc<dyn LinkScorer>,
    timeout: Duration,
}

impl LinkView {
    pub fn new(scorer: Arc<dyn LinkScorer>, timeout: Duration) -> Self {
        Self { scorer, timeout }
    }

    /// `None` when the link scorer is disabled
    pub async fn from_config(config: &LinkScorerConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let timeout = Duration::from_millis(config.timeout_ms);

        let scorer: Arc<dyn LinkScorer> = match (&config.table_path, &config.url) {
            (Some(path), _) => {
                let text = tokio::fs::read_to_string(path).await?;
                let scorer = StaticLinkScorer::from_json_lines(&text)?;
                tracing::info!(path = %path, pairs = scorer.len(), "Loaded link probability table");
                Arc::new(scorer)
            }
            (None, Some(url)) => Arc::new(HttpLinkScorer::new(url.clone(), timeout)?),
            (None, None) => {
                return Err(AppError::Configuration {
                    message: "link_scorer needs a url or a table_path".to_string(),
                })
            }
        };

        Ok(Some(Self::new(scorer, timeout)))
    }

    pub async fn score(&self, source: &PaperId, target: &PaperId) -> ViewOutcome<f32> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.scorer.probability(source, target)).await;
        metrics::record_view_latency("link", start.elapsed().as_secs_f64());

        match result {
            Ok(Ok(Some(p))) if (0.0..=1.0).contains(&p) => ViewOutcome::Scored(p),
            Ok(Ok(Some(p))) => {
                tracing::warn!(%source, %target, probability = p, "Link probability out of range");
                ViewOutcome::Abstained(AbstainReason::OutOfRange)
            }
            Ok(Ok(None)) => ViewOutcome::Abstained(AbstainReason::MissingInput),
            Ok(Err(e)) => {
                tracing::warn!(%source, %target, error = %e, "Link scorer failed, abstaining");
                ViewOutcome::Abstained(AbstainReason::Upstream)
            }
            Err(_) => {
                tracing::warn!(%source, %target, "Link scorer timed out, abstaining");
                ViewOutcome::Abstained(AbstainReason::Timeout)
            }
        }
    }
}
