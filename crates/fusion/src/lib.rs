//! PaperGraph relation fusion
//!
//! Turns candidate paper pairs into typed relation edges:
//! - [`views`]: the three independent scorers (text similarity, LLM oracle, link predictor)
//! - [`engine`]: the decision policy combining their outputs
//! - [`batch`]: bounded-concurrency runner that persists fused edges
//! - [`records`] and [`pairing`]: batch input and candidate generation

pub mod batch;
pub mod engine;
pub mod pairing;
pub mod records;
pub mod views;

pub use batch::{BatchReport, FusionBatch, PairOutcome, PairReport};
pub use engine::{AbstainCause, FusionDecision, FusionThresholds, RelationFusion};
pub use views::{AbstainReason, ViewOutcome, ViewPanel, ViewSet};
