//! Wires the rule-upgrade stages into an executable `StateGraph` (spec
//! §4.8), the same adaptation pattern as `crate::graph::build_grading_graph`.

use std::collections::HashMap;

use langgraph_core::builder::StateGraph;
use langgraph_core::compiled::CompiledGraph;
use langgraph_core::error::{GraphError, Result as GraphResult};
use langgraph_core::send::ConditionalEdgeResult;
use serde_json::Value;

use crate::error::GradingError;
use crate::rule_upgrade::stages::{self, RuleUpgradeContext};
use crate::rule_upgrade::state::RuleUpgradeState;

fn to_graph_error(node: &str, err: GradingError) -> GraphError {
    match err {
        GradingError::AwaitingReview { node, reason } => GraphError::Interrupted { node, reason },
        other => GraphError::NodeExecution {
            node: node.to_string(),
            error: other.to_string(),
        },
    }
}

fn node<F, Fut>(ctx: RuleUpgradeContext, name: &'static str, stage: F) -> impl Fn(Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = GraphResult<Value>> + Send>>
where
    F: Fn(RuleUpgradeContext, RuleUpgradeState) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = crate::error::Result<RuleUpgradeState>> + Send + 'static,
{
    move |value: Value| {
        let ctx = ctx.clone();
        let stage = stage.clone();
        Box::pin(async move {
            let state = RuleUpgradeState::from_value(&value).map_err(|e| to_graph_error(name, e))?;
            let result = stage(ctx, state).await.map_err(|e| to_graph_error(name, e))?;
            result.to_value().map_err(|e| to_graph_error(name, e))
        })
    }
}

pub fn build_rule_upgrade_graph(ctx: RuleUpgradeContext) -> GraphResult<CompiledGraph> {
    let mut graph = StateGraph::new();

    graph.add_node(
        "mine_rules",
        node(ctx.clone(), "mine_rules", |ctx, state| async move { stages::mine_rules(&ctx, state).await }),
    );
    graph.add_node(
        "generate_patches",
        node(ctx.clone(), "generate_patches", |ctx, state| async move {
            stages::generate_patches(&ctx, state).await
        }),
    );
    graph.add_node(
        "regression_test",
        node(ctx.clone(), "regression_test", |ctx, state| async move {
            stages::regression_test(&ctx, state).await
        }),
    );
    graph.add_node(
        "approval_interrupt",
        node(ctx.clone(), "approval_interrupt", |ctx, state| async move {
            stages::approval_interrupt(&ctx, state).await
        }),
    );
    graph.add_node(
        "deploy",
        node(ctx.clone(), "deploy", |ctx, state| async move { stages::deploy(&ctx, state).await }),
    );
    graph.add_node(
        "monitor",
        node(ctx.clone(), "monitor", |ctx, state| async move { stages::monitor(&ctx, state).await }),
    );

    graph.set_entry("mine_rules");

    let mut mine_branches = HashMap::new();
    mine_branches.insert("generate_patches".to_string(), "generate_patches".to_string());
    mine_branches.insert("no_patches".to_string(), "__end__".to_string());
    graph.add_conditional_edge(
        "mine_rules",
        |value: &Value| {
            let next = value.get("current_stage").and_then(Value::as_str).unwrap_or("no_patches");
            ConditionalEdgeResult::Node(if next == "generate_patches" { "generate_patches" } else { "__end__" }.to_string())
        },
        mine_branches,
    );

    graph.add_edge("generate_patches", "regression_test");

    let mut regression_branches = HashMap::new();
    regression_branches.insert("approval_interrupt".to_string(), "approval_interrupt".to_string());
    regression_branches.insert("deploy".to_string(), "deploy".to_string());
    regression_branches.insert("regression_failed".to_string(), "__end__".to_string());
    graph.add_conditional_edge(
        "regression_test",
        |value: &Value| {
            let next = value.get("current_stage").and_then(Value::as_str).unwrap_or("regression_failed");
            ConditionalEdgeResult::Node(
                match next {
                    "approval_interrupt" => "approval_interrupt",
                    "deploy" => "deploy",
                    _ => "__end__",
                }
                .to_string(),
            )
        },
        regression_branches,
    );

    let mut approval_branches = HashMap::new();
    approval_branches.insert("deploy".to_string(), "deploy".to_string());
    approval_branches.insert("rejected".to_string(), "__end__".to_string());
    graph.add_conditional_edge(
        "approval_interrupt",
        |value: &Value| {
            let next = value.get("current_stage").and_then(Value::as_str).unwrap_or("rejected");
            ConditionalEdgeResult::Node(if next == "deploy" { "deploy" } else { "__end__" }.to_string())
        },
        approval_branches,
    );

    graph.add_edge("deploy", "monitor");
    graph.add_finish("monitor");

    graph.compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_upgrade::miner::FakeRuleMinerService;
    use crate::rule_upgrade::state::{DeployResult, GeneratedPatch, MinedRule, TestResult};
    use std::sync::Arc;

    #[tokio::test]
    async fn terminates_early_with_no_candidates() {
        let miner = FakeRuleMinerService {
            mined_rules: vec![MinedRule {
                rule_id: "r1".to_string(),
                description: "low confidence".to_string(),
                confidence: 0.2,
                evidence_count: 1,
            }],
            ..Default::default()
        };
        let compiled = build_rule_upgrade_graph(RuleUpgradeContext { miner: Arc::new(miner) }).unwrap();
        let state = RuleUpgradeState::new("u1", None, false);
        let result = compiled.invoke(state.to_value().unwrap()).await.unwrap();
        let final_state = RuleUpgradeState::from_value(&result).unwrap();
        assert_eq!(final_state.current_stage, "no_patches");
        assert!(final_state.generated_patches.is_empty());
    }

    #[tokio::test]
    async fn deploys_without_approval_when_not_required() {
        let miner = FakeRuleMinerService {
            mined_rules: vec![MinedRule {
                rule_id: "r1".to_string(),
                description: "confident".to_string(),
                confidence: 0.9,
                evidence_count: 10,
            }],
            generated_patches: vec![GeneratedPatch {
                rule_id: "r1".to_string(),
                patch_id: "p1".to_string(),
                diff: "diff".to_string(),
            }],
            test_results: vec![TestResult {
                patch_id: "p1".to_string(),
                test_name: "t1".to_string(),
                passed: true,
                regression: false,
            }],
            deploy_result: DeployResult {
                deployed_version: "v2".to_string(),
                deployed_at: "2026-07-30T00:00:00Z".to_string(),
            },
        };
        let compiled = build_rule_upgrade_graph(RuleUpgradeContext { miner: Arc::new(miner) }).unwrap();
        let state = RuleUpgradeState::new("u1", None, false);
        let result = compiled.invoke(state.to_value().unwrap()).await.unwrap();
        let final_state = RuleUpgradeState::from_value(&result).unwrap();
        assert_eq!(final_state.current_stage, "done");
        assert_eq!(final_state.deployed_version, Some("v2".to_string()));
    }
}
