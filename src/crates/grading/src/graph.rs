//! Wires the grading stages (spec §2, §4) into an executable `StateGraph`.
//!
//! Every stage is a plain `(StageContext, BatchGradingState) -> Result<BatchGradingState>`
//! function; this module adapts each into the `Value -> Value` node closures
//! `StateGraph::add_node` expects, and lays out the edges from spec §4.1:
//!
//! ```text
//! intake -> preprocess -> rubric_parse -> {rubric_self_review | rubric_review}
//!        -> rubric_review -> grade_batch -> {grade_batch | logic_review} -> review -> export -> END
//! ```
//!
//! `rubric_parse` picks its own successor (`rubric_self_review` when the
//! confession confidence is low, `rubric_review` otherwise) and records the
//! choice in `current_stage`; the conditional edge below just reads that
//! decision back out rather than recomputing it.
//!
//! `grade_batch` loops back to itself when it leaves `batch_retry_needed`
//! set (spec §4.4: worker failures under the retry budget reschedule just
//! the failed units, via `compute_units`' retry filter) and otherwise
//! proceeds to `logic_review`.
//!
//! `rubric_review` and `review` pause for a human decision by returning
//! `GradingError::AwaitingReview`. That case is translated to
//! `GraphError::Interrupted`, the engine's own "paused, not failed" signal
//! (see `langgraph_core::error::GraphError::Interrupted`), so a caller
//! resumes the same way whether the interrupt came from engine-level
//! `InterruptConfig` or from a node noticing it needs input mid-stage. The
//! request payload travels inside `state.pending_interrupt`, which is part
//! of the checkpointed value, so a caller configured with a checkpointer can
//! read it back via `CompiledGraph::get_state`, collect a decision, write
//! the response into `pending_interrupt` via `update_state`, and resume with
//! the same `CheckpointConfig`.

use std::collections::HashMap;
use std::sync::Arc;

use langgraph_core::builder::StateGraph;
use langgraph_core::compiled::CompiledGraph;
use langgraph_core::error::{GraphError, Result as GraphResult};
use langgraph_core::send::ConditionalEdgeResult;
use serde_json::Value;

use crate::error::GradingError;
use crate::stages::StageContext;
use crate::state::BatchGradingState;

fn to_graph_error(node: &str, err: GradingError) -> GraphError {
    match err {
        GradingError::AwaitingReview { node, reason } => GraphError::Interrupted { node, reason },
        other => GraphError::NodeExecution {
            node: node.to_string(),
            error: other.to_string(),
        },
    }
}

/// Wraps a stage function into the closure shape `StateGraph::add_node` wants.
fn node<F, Fut>(ctx: StageContext, name: &'static str, stage: F) -> impl Fn(Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = GraphResult<Value>> + Send>>
where
    F: Fn(StageContext, BatchGradingState) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = crate::error::Result<BatchGradingState>> + Send + 'static,
{
    move |value: Value| {
        let ctx = ctx.clone();
        let stage = stage.clone();
        Box::pin(async move {
            let state = BatchGradingState::from_value(&value).map_err(|e| to_graph_error(name, e))?;
            let result = stage(ctx, state).await.map_err(|e| to_graph_error(name, e))?;
            result.to_value().map_err(|e| to_graph_error(name, e))
        })
    }
}

/// Builds the compiled grading graph. `now` is a thunk rather than a fixed
/// string because `intake` is the only stage that needs a wall-clock
/// timestamp, and it is read once per invocation, not once per graph build.
pub fn build_grading_graph(
    ctx: StageContext,
    now: Arc<dyn Fn() -> String + Send + Sync>,
) -> GraphResult<CompiledGraph> {
    let mut graph = StateGraph::new();

    {
        let ctx = ctx.clone();
        let now = now.clone();
        graph.add_node("intake", move |value: Value| {
            let ctx = ctx.clone();
            let now = now.clone();
            Box::pin(async move {
                let state = BatchGradingState::from_value(&value).map_err(|e| to_graph_error("intake", e))?;
                let timestamp = now();
                let result = crate::stages::intake::run(&ctx, state, &timestamp)
                    .await
                    .map_err(|e| to_graph_error("intake", e))?;
                result.to_value().map_err(|e| to_graph_error("intake", e))
            })
        });
    }

    graph.add_node(
        "preprocess",
        node(ctx.clone(), "preprocess", |ctx, state| async move {
            crate::stages::preprocess::run(&ctx, state).await
        }),
    );
    graph.add_node(
        "rubric_parse",
        node(ctx.clone(), "rubric_parse", |ctx, state| async move {
            crate::stages::rubric_parse::run(&ctx, state).await
        }),
    );
    graph.add_node(
        "rubric_self_review",
        node(ctx.clone(), "rubric_self_review", |ctx, state| async move {
            crate::stages::rubric_self_review::run(&ctx, state).await
        }),
    );
    graph.add_node(
        "rubric_review",
        node(ctx.clone(), "rubric_review", |ctx, state| async move {
            crate::stages::rubric_review::run(&ctx, state).await
        }),
    );
    graph.add_node(
        "grade_batch",
        node(ctx.clone(), "grade_batch", |ctx, state| async move {
            crate::stages::grade_batch::run(&ctx, state).await
        }),
    );
    graph.add_node(
        "logic_review",
        node(ctx.clone(), "logic_review", |ctx, state| async move {
            crate::stages::logic_review::run(&ctx, state).await
        }),
    );
    graph.add_node(
        "review",
        node(ctx.clone(), "review", |ctx, state| async move {
            crate::stages::review::run(&ctx, state).await
        }),
    );
    graph.add_node(
        "export",
        node(ctx.clone(), "export", |ctx, state| async move {
            crate::stages::export::run(&ctx, state).await
        }),
    );

    graph.set_entry("intake");
    graph.add_edge("intake", "preprocess");
    graph.add_edge("preprocess", "rubric_parse");

    let mut branches = HashMap::new();
    branches.insert("rubric_self_review".to_string(), "rubric_self_review".to_string());
    branches.insert("rubric_review".to_string(), "rubric_review".to_string());
    graph.add_conditional_edge(
        "rubric_parse",
        |value: &Value| {
            let next = value
                .get("current_stage")
                .and_then(Value::as_str)
                .unwrap_or("rubric_review");
            ConditionalEdgeResult::Node(next.to_string())
        },
        branches,
    );

    graph.add_edge("rubric_self_review", "rubric_review");
    graph.add_edge("rubric_review", "grade_batch");

    let mut grade_batch_branches = HashMap::new();
    grade_batch_branches.insert("retry".to_string(), "grade_batch".to_string());
    grade_batch_branches.insert("logic_review".to_string(), "logic_review".to_string());
    graph.add_conditional_edge(
        "grade_batch",
        |value: &Value| {
            let needs_retry = value.get("batch_retry_needed").map(|v| !v.is_null()).unwrap_or(false);
            ConditionalEdgeResult::Node(if needs_retry { "grade_batch" } else { "logic_review" }.to_string())
        },
        grade_batch_branches,
    );

    graph.add_edge("logic_review", "review");
    graph.add_edge("review", "export");
    graph.add_finish("export");

    graph.compile()
}
