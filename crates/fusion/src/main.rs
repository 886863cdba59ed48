//! PaperGraph Fusion
//!
//! Batch job:
//! 1. Loads extracted paper records and embeds missing fields
//! 2. Upserts the papers into the graph store
//! 3. Builds candidate pairs (from a file, or nearest neighbours)
//! 4. Fuses every pair and writes a JSON report

use anyhow::Context;
use papergraph_common::{
    config::AppConfig, embeddings::create_embedder, metrics, store, telemetry, VERSION,
};
use papergraph_fusion::{
    pairing::nearest_neighbor_pairs,
    records::{parse_pairs, parse_records, RecordEmbedder},
    FusionBatch, FusionThresholds, RelationFusion, ViewPanel,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate()?;

    telemetry::init_tracing(&config.observability);
    info!("Starting PaperGraph Fusion v{}", VERSION);

    metrics::install_prometheus(config.observability.metrics_port)?;

    let store = store::connect(&config.store, config.embedding.dimension).await?;
    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        backend = %config.store.backend,
        "Store and embedder initialized"
    );

    let input_path = config
        .fusion
        .input_path
        .as_deref()
        .context("fusion.input_path is required")?;
    let text = tokio::fs::read_to_string(input_path)
        .await
        .with_context(|| format!("failed to read {input_path}"))?;
    let records = parse_records(&text)?;

    let papers = RecordEmbedder::new(embedder, config.embedding.batch_size)
        .embed_missing(records)
        .await?;
    for paper in &papers {
        store.upsert_node(paper.clone()).await?;
    }
    info!(papers = papers.len(), "Papers stored");

    let pairs = match config.fusion.pairs_path.as_deref() {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            parse_pairs(&text)?
        }
        None => {
            nearest_neighbor_pairs(store.as_ref(), &papers, config.fusion.neighbors_per_paper).await?
        }
    };

    let panel = Arc::new(ViewPanel::from_config(&config).await?);
    let engine = RelationFusion::new(FusionThresholds::from(&config.fusion));
    let report = FusionBatch::new(store, panel, engine, config.fusion.concurrency)
        .run(pairs)
        .await;

    let json = serde_json::to_string_pretty(&report)?;
    match config.fusion.report_path.as_deref() {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("failed to write {path}"))?;
            info!(path, "Report written");
        }
        None => println!("{json}"),
    }

    Ok(())
}
