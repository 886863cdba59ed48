//! PostgreSQL + pgvector backend
//!
//! Vectors travel as pgvector text literals (`[0.1,0.2,...]`) with explicit
//! `::vector` casts, and come back through `::text`, so no driver-level
//! vector type is needed.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, QueryResult, Statement, Value};

use super::{
    check_k, check_vector, validate_edge, validate_node, Direction, EmbeddingField, GraphStore,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::models::{FusionRule, PaperId, PaperNode, RelationEdge, ViewScores};

const PAPER_COLUMNS: &str = "id, title, problem_statement, core_approach, research_gap, \
     key_findings::text AS key_findings, embedding_problem::text AS embedding_problem, \
     embedding_method::text AS embedding_method, year, venue";

const RELATION_COLUMNS: &str = "source_id, target_id, relation_type, confidence, reasoning, \
     scores::text AS scores, decided_by, fused_at";

/// Graph store over the `papers` and `relations` tables
#[derive(Clone)]
pub struct PgGraphStore {
    pool: DbPool,
    dimension: usize,
}

impl PgGraphStore {
    pub fn new(pool: DbPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Create the extension, tables and HNSW indexes if missing, then make
    /// sure an existing schema was built for the same dimension.
    pub async fn ensure_schema(&self) -> Result<()> {
        let dim = self.dimension;
        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS papers (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    problem_statement TEXT,
                    core_approach TEXT,
                    research_gap TEXT,
                    key_findings JSONB NOT NULL DEFAULT '[]'::jsonb,
                    embedding_problem vector({dim}),
                    embedding_method vector({dim}),
                    year INTEGER,
                    venue TEXT,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#
            ),
            r#"
            CREATE TABLE IF NOT EXISTS relations (
                source_id TEXT NOT NULL REFERENCES papers(id) ON DELETE CASCADE,
                target_id TEXT NOT NULL REFERENCES papers(id) ON DELETE CASCADE,
                relation_type TEXT NOT NULL,
                confidence TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                scores JSONB NOT NULL DEFAULT '{}'::jsonb,
                decided_by TEXT NOT NULL,
                fused_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (source_id, target_id),
                CHECK (source_id <> target_id)
            )
            "#
            .to_string(),
            "CREATE INDEX IF NOT EXISTS relations_target_idx ON relations (target_id)".to_string(),
            "CREATE INDEX IF NOT EXISTS papers_embedding_problem_hnsw \
             ON papers USING hnsw (embedding_problem vector_cosine_ops)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS papers_embedding_method_hnsw \
             ON papers USING hnsw (embedding_method vector_cosine_ops)"
                .to_string(),
        ];

        for sql in &statements {
            self.pool.conn().execute_unprepared(sql).await?;
        }

        // pgvector stores the declared dimension as the column typmod
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT atttypmod AS dim
            FROM pg_attribute
            WHERE attrelid = 'papers'::regclass AND attname = 'embedding_problem'
            "#,
            vec![],
        );
        if let Some(row) = self.pool.conn().query_one(stmt).await? {
            let existing: i32 = row.try_get("", "dim")?;
            if existing > 0 && existing as usize != dim {
                return Err(AppError::DimensionMismatch {
                    expected: dim,
                    actual: existing as usize,
                });
            }
        }

        tracing::info!(dimension = dim, "Graph schema ready");
        Ok(())
    }

    async fn existing_ids(&self, ids: [&PaperId; 2]) -> Result<Vec<String>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT id FROM papers WHERE id IN ($1, $2)",
            vec![ids[0].to_string().into(), ids[1].to_string().into()],
        );
        self.pool
            .conn()
            .query_all(stmt)
            .await?
            .into_iter()
            .map(|row| row.try_get::<String>("", "id").map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert_node(&self, node: PaperNode) -> Result<()> {
        validate_node(&node, self.dimension)?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO papers (
                id, title, problem_statement, core_approach, research_gap,
                key_findings, embedding_problem, embedding_method, year, venue, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7::vector, $8::vector, $9, $10, NOW())
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                problem_statement = EXCLUDED.problem_statement,
                core_approach = EXCLUDED.core_approach,
                research_gap = EXCLUDED.research_gap,
                key_findings = EXCLUDED.key_findings,
                embedding_problem = EXCLUDED.embedding_problem,
                embedding_method = EXCLUDED.embedding_method,
                year = EXCLUDED.year,
                venue = EXCLUDED.venue,
                updated_at = NOW()
            "#,
            vec![
                node.id.to_string().into(),
                node.title.into(),
                node.problem_statement.into(),
                node.core_approach.into(),
                node.research_gap.into(),
                serde_json::to_string(&node.key_findings)?.into(),
                node.embedding_problem.as_deref().map(vector_literal).into(),
                node.embedding_method.as_deref().map(vector_literal).into(),
                node.year.into(),
                node.venue.into(),
            ],
        );

        self.pool.conn().execute(stmt).await?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: RelationEdge) -> Result<()> {
        validate_edge(&edge)?;

        let found = self.existing_ids([&edge.source_id, &edge.target_id]).await?;
        for id in [&edge.source_id, &edge.target_id] {
            if !found.iter().any(|f| f == id.as_str()) {
                return Err(AppError::PaperNotFound { id: id.to_string() });
            }
        }

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO relations (
                source_id, target_id, relation_type, confidence, reasoning,
                scores, decided_by, fused_at
            )
            VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7, $8)
            ON CONFLICT (source_id, target_id) DO UPDATE SET
                relation_type = EXCLUDED.relation_type,
                confidence = EXCLUDED.confidence,
                reasoning = EXCLUDED.reasoning,
                scores = EXCLUDED.scores,
                decided_by = EXCLUDED.decided_by,
                fused_at = CASE
                    WHEN relations.relation_type = EXCLUDED.relation_type
                        AND relations.confidence = EXCLUDED.confidence
                        AND relations.reasoning = EXCLUDED.reasoning
                        AND relations.scores = EXCLUDED.scores
                        AND relations.decided_by = EXCLUDED.decided_by
                    THEN relations.fused_at
                    ELSE EXCLUDED.fused_at
                END
            "#,
            vec![
                edge.source_id.to_string().into(),
                edge.target_id.to_string().into(),
                edge.relation_type.as_str().into(),
                edge.confidence.as_str().into(),
                edge.reasoning.into(),
                serde_json::to_string(&edge.scores)?.into(),
                rule_name(edge.decided_by)?.into(),
                edge.fused_at.into(),
            ],
        );

        self.pool.conn().execute(stmt).await?;
        Ok(())
    }

    async fn get_node(&self, id: &PaperId) -> Result<Option<PaperNode>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!("SELECT {PAPER_COLUMNS} FROM papers WHERE id = $1"),
            vec![id.to_string().into()],
        );

        match self.pool.conn().query_one(stmt).await? {
            Some(row) => Ok(Some(paper_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_edge(&self, source: &PaperId, target: &PaperId) -> Result<Option<RelationEdge>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "SELECT {RELATION_COLUMNS} FROM relations WHERE source_id = $1 AND target_id = $2"
            ),
            vec![source.to_string().into(), target.to_string().into()],
        );

        match self.pool.conn().query_one(stmt).await? {
            Some(row) => Ok(Some(relation_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn vector_search(
        &self,
        field: EmbeddingField,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(PaperNode, f32)>> {
        check_k(k)?;
        check_vector(vector, self.dimension)?;

        let column = field.column_name();
        let sql = format!(
            r#"
            SELECT {PAPER_COLUMNS},
                ({column} <=> $1::vector)::float8 AS distance
            FROM papers
            WHERE {column} IS NOT NULL
            ORDER BY {column} <=> $1::vector
            LIMIT $2
            "#
        );
        let values: Vec<Value> = vec![vector_literal(vector).into(), (k as i64).into()];
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);

        let mut results = self
            .pool
            .conn()
            .query_all(stmt)
            .await?
            .iter()
            .map(|row| -> Result<(PaperNode, f32)> {
                let distance: f64 = row.try_get("", "distance")?;
                Ok((paper_from_row(row)?, distance as f32))
            })
            .collect::<Result<Vec<_>>>()?;

        results.sort_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    async fn neighbors(&self, id: &PaperId, direction: Direction) -> Result<Vec<RelationEdge>> {
        let predicate = match direction {
            Direction::Outgoing => "source_id = $1",
            Direction::Incoming => "target_id = $1",
            Direction::Both => "source_id = $1 OR target_id = $1",
        };
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "SELECT {RELATION_COLUMNS} FROM relations WHERE {predicate} \
                 ORDER BY source_id, target_id"
            ),
            vec![id.to_string().into()],
        );

        self.pool
            .conn()
            .query_all(stmt)
            .await?
            .iter()
            .map(relation_from_row)
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

/// pgvector text literal
pub(crate) fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

pub(crate) fn parse_vector_literal(text: &str) -> Result<Vec<f32>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| AppError::Internal {
            message: format!("malformed vector literal '{text}'"),
        })?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|part| {
            part.trim().parse::<f32>().map_err(|e| AppError::Internal {
                message: format!("malformed vector component '{part}': {e}"),
            })
        })
        .collect()
}

fn rule_name(rule: FusionRule) -> Result<String> {
    match serde_json::to_value(rule)? {
        serde_json::Value::String(name) => Ok(name),
        other => Err(AppError::Internal {
            message: format!("unexpected fusion rule encoding {other}"),
        }),
    }
}

fn corrupt(column: &str, message: impl std::fmt::Display) -> AppError {
    AppError::Internal {
        message: format!("corrupt {column} column: {message}"),
    }
}

fn paper_from_row(row: &QueryResult) -> Result<PaperNode> {
    let key_findings: String = row.try_get("", "key_findings")?;
    let embedding_problem: Option<String> = row.try_get("", "embedding_problem")?;
    let embedding_method: Option<String> = row.try_get("", "embedding_method")?;

    Ok(PaperNode {
        id: PaperId(row.try_get("", "id")?),
        title: row.try_get("", "title")?,
        problem_statement: row.try_get("", "problem_statement")?,
        core_approach: row.try_get("", "core_approach")?,
        research_gap: row.try_get("", "research_gap")?,
        key_findings: serde_json::from_str(&key_findings)
            .map_err(|e| corrupt("key_findings", e))?,
        embedding_problem: embedding_problem
            .as_deref()
            .map(parse_vector_literal)
            .transpose()?,
        embedding_method: embedding_method
            .as_deref()
            .map(parse_vector_literal)
            .transpose()?,
        year: row.try_get("", "year")?,
        venue: row.try_get("", "venue")?,
    })
}

fn relation_from_row(row: &QueryResult) -> Result<RelationEdge> {
    let relation_type: String = row.try_get("", "relation_type")?;
    let confidence: String = row.try_get("", "confidence")?;
    let scores: String = row.try_get("", "scores")?;
    let decided_by: String = row.try_get("", "decided_by")?;

    Ok(RelationEdge {
        source_id: PaperId(row.try_get("", "source_id")?),
        target_id: PaperId(row.try_get("", "target_id")?),
        relation_type: relation_type
            .parse()
            .map_err(|e| corrupt("relation_type", e))?,
        confidence: confidence.parse().map_err(|e| corrupt("confidence", e))?,
        reasoning: row.try_get("", "reasoning")?,
        scores: serde_json::from_str::<ViewScores>(&scores).map_err(|e| corrupt("scores", e))?,
        decided_by: serde_json::from_value(serde_json::Value::String(decided_by))
            .map_err(|e| corrupt("decided_by", e))?,
        fused_at: row.try_get("", "fused_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_format() {
        assert_eq!(vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_parse_vector_literal() {
        assert_eq!(
            parse_vector_literal("[1,-0.5, 0.25]").unwrap(),
            vec![1.0, -0.5, 0.25]
        );
        assert!(parse_vector_literal("[]").unwrap().is_empty());
        assert!(parse_vector_literal("1,2").is_err());
        assert!(parse_vector_literal("[1,x]").is_err());
    }

    #[test]
    fn test_vector_literal_is_reversible() {
        let v = vec![0.123_456_7, -3.5e-8, 42.0];
        assert_eq!(parse_vector_literal(&vector_literal(&v)).unwrap(), v);
    }

    #[test]
    fn test_rule_name_matches_serde() {
        assert_eq!(rule_name(FusionRule::OracleCorroborated).unwrap(), "oracle_corroborated");
        let back: FusionRule =
            serde_json::from_value(serde_json::Value::String("link_score".into())).unwrap();
        assert_eq!(back, FusionRule::LinkScore);
    }

    /// Runs against a scratch pgvector database:
    /// `PAPERGRAPH_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`
    #[tokio::test]
    #[ignore = "needs a pgvector database in PAPERGRAPH_TEST_DATABASE_URL"]
    async fn test_postgres_upsert_and_search() {
        use crate::config::StoreConfig;
        use crate::db::DbPool;
        use crate::models::{Confidence, RelationType};
        use chrono::{TimeZone, Utc};

        let Ok(url) = std::env::var("PAPERGRAPH_TEST_DATABASE_URL") else {
            return;
        };
        let config = StoreConfig {
            backend: "postgres".into(),
            url,
            ..StoreConfig::default()
        };
        let store = PgGraphStore::new(DbPool::new(&config).await.unwrap(), 3);
        store.ensure_schema().await.unwrap();

        let prefix = format!("it-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let id = |name: &str| PaperId(format!("{prefix}-{name}"));

        let mut a = PaperNode::new(id("a"), "Anchor");
        a.embedding_problem = Some(vec![1.0, 0.0, 0.0]);
        let mut b = PaperNode::new(id("b"), "Neighbour");
        b.embedding_problem = Some(vec![0.9, 0.1, 0.0]);
        let bare = PaperNode::new(id("bare"), "No vectors");
        for node in [a, b, bare] {
            store.upsert_node(node).await.unwrap();
        }

        let hits = store
            .vector_search(EmbeddingField::Problem, &[1.0, 0.0, 0.0], 50)
            .await
            .unwrap();
        assert!(hits.iter().all(|(n, _)| n.id != id("bare")));
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(hits.iter().any(|(n, _)| n.id == id("a")));

        let first = RelationEdge {
            source_id: id("a"),
            target_id: id("b"),
            relation_type: RelationType::Extend,
            confidence: Confidence::Medium,
            reasoning: "b builds on a".into(),
            scores: ViewScores::default(),
            decided_by: FusionRule::TextualHeuristic,
            fused_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        store.upsert_edge(first.clone()).await.unwrap();

        let mut again = first.clone();
        again.fused_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        store.upsert_edge(again.clone()).await.unwrap();
        assert_eq!(store.get_edge(&id("a"), &id("b")).await.unwrap(), Some(first));

        again.relation_type = RelationType::Support;
        store.upsert_edge(again.clone()).await.unwrap();
        assert_eq!(store.get_edge(&id("a"), &id("b")).await.unwrap(), Some(again));
        assert_eq!(store.neighbors(&id("b"), Direction::Incoming).await.unwrap().len(), 1);

        let cleanup = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "DELETE FROM papers WHERE id LIKE $1",
            vec![format!("{prefix}-%").into()],
        );
        store.pool.conn().execute(cleanup).await.unwrap();
    }
}
