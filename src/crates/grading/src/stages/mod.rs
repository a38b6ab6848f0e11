//! One module per pipeline stage (spec §2, §4).
//!
//! Every stage is a plain async function `(StageContext, BatchGradingState)
//! -> Result<BatchGradingState>`; `graph.rs` adapts these into the
//! `Value -> Value` closures `StateGraph::add_node` expects.

pub mod export;
pub mod grade_batch;
pub mod intake;
pub mod logic_review;
pub mod preprocess;
pub mod review;
pub mod rubric_parse;
pub mod rubric_review;
pub mod rubric_self_review;

use std::sync::Arc;

use crate::config::GradingConfig;
use crate::persistence::{FileStorage, GradingStore};
use crate::progress::ProgressSink;
use crate::scoring_service::ScoringService;

/// Shared, read-only collaborators every stage needs. Cloned cheaply (all
/// fields are `Arc`s); never mutated after the graph is built (spec §6
/// "all values are supplied at run start").
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<GradingConfig>,
    pub scoring_service: Arc<dyn ScoringService>,
    pub progress: Arc<dyn ProgressSink>,
    pub store: Arc<dyn GradingStore>,
    pub files: Arc<dyn FileStorage>,
}
