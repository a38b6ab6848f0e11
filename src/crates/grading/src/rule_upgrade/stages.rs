//! Rule-upgrade pipeline stages (spec §4.8): `mine_rules` -> (candidates?)
//! -> `generate_patches` -> `regression_test` -> (regression?) ->
//! `approval_interrupt` -> `deploy` -> `monitor`; `rollback` is reachable
//! only via an external rollback signal.

use std::sync::Arc;

use crate::error::{GradingError, Result};
use crate::rule_upgrade::miner::RuleMinerService;
use crate::rule_upgrade::state::{DeployResult, RuleCandidate, RuleUpgradeState};

const CANDIDATE_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Shared collaborator for every rule-upgrade stage, mirroring
/// `grading::stages::StageContext`.
#[derive(Clone)]
pub struct RuleUpgradeContext {
    pub miner: Arc<dyn RuleMinerService>,
}

pub async fn mine_rules(ctx: &RuleUpgradeContext, mut state: RuleUpgradeState) -> Result<RuleUpgradeState> {
    let mined = ctx.miner.mine_rules(state.time_window.as_deref()).await?;
    let candidates: Vec<RuleCandidate> = mined
        .iter()
        .filter(|r| r.confidence > CANDIDATE_CONFIDENCE_THRESHOLD)
        .map(|r| RuleCandidate {
            rule_id: r.rule_id.clone(),
            description: r.description.clone(),
            confidence: r.confidence,
        })
        .collect();

    state.mined_rules = mined;
    if candidates.is_empty() {
        state.current_stage = "no_patches".to_string();
    } else {
        state.rule_candidates = candidates;
        state.current_stage = "generate_patches".to_string();
    }
    Ok(state)
}

pub async fn generate_patches(ctx: &RuleUpgradeContext, mut state: RuleUpgradeState) -> Result<RuleUpgradeState> {
    let mined_by_id: std::collections::HashMap<&str, _> =
        state.mined_rules.iter().map(|r| (r.rule_id.as_str(), r)).collect();
    let candidate_rules = state
        .rule_candidates
        .iter()
        .filter_map(|c| mined_by_id.get(c.rule_id.as_str()).cloned().cloned())
        .collect::<Vec<_>>();

    state.generated_patches = ctx.miner.generate_patches(&candidate_rules).await?;
    state.current_stage = "regression_test".to_string();
    Ok(state)
}

pub async fn regression_test(ctx: &RuleUpgradeContext, mut state: RuleUpgradeState) -> Result<RuleUpgradeState> {
    let results = ctx.miner.run_regression(&state.generated_patches).await?;
    state.regression_detected = results.iter().any(|r| r.regression);
    state.test_results = results;

    state.current_stage = if state.regression_detected {
        "regression_failed".to_string()
    } else if state.require_approval {
        "approval_interrupt".to_string()
    } else {
        "deploy".to_string()
    };
    Ok(state)
}

/// Pauses for a human deploy decision, same `pending_interrupt`/
/// `AwaitingReview` shape as `grading::stages::review`.
pub async fn approval_interrupt(_ctx: &RuleUpgradeContext, mut state: RuleUpgradeState) -> Result<RuleUpgradeState> {
    let Some(response) = state.pending_interrupt.take() else {
        state.pending_interrupt = Some(serde_json::json!({
            "upgrade_id": state.upgrade_id,
            "patches": state.generated_patches,
            "test_results": state.test_results,
        }));
        return Err(GradingError::AwaitingReview {
            node: "approval_interrupt".to_string(),
            reason: "awaiting deploy approval".to_string(),
        });
    };

    let approved = response.get("approved").and_then(|v| v.as_bool()).unwrap_or(false);
    state.approved = Some(approved);
    state.current_stage = if approved { "deploy".to_string() } else { "rejected".to_string() };
    Ok(state)
}

pub async fn deploy(ctx: &RuleUpgradeContext, mut state: RuleUpgradeState) -> Result<RuleUpgradeState> {
    let DeployResult { deployed_version, .. } = ctx
        .miner
        .deploy(&state.generated_patches, state.deployed_version.as_deref())
        .await?;

    state.previous_version = state.deployed_version.clone();
    state.deployed_version = Some(deployed_version);
    state.deployment_status = "deployed".to_string();
    state.current_stage = "monitor".to_string();
    Ok(state)
}

pub async fn monitor(_ctx: &RuleUpgradeContext, mut state: RuleUpgradeState) -> Result<RuleUpgradeState> {
    state.current_stage = "done".to_string();
    Ok(state)
}

/// Reachable only via an external rollback signal (spec §4.8), never from a
/// regular edge: restores `deployed_version` to `previous_version`.
pub fn rollback(mut state: RuleUpgradeState) -> RuleUpgradeState {
    state.deployed_version = state.previous_version.clone();
    state.deployment_status = "rolled_back".to_string();
    state.current_stage = "rolled_back".to_string();
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_upgrade::miner::FakeRuleMinerService;
    use crate::rule_upgrade::state::{GeneratedPatch, MinedRule, TestResult};

    fn ctx(miner: FakeRuleMinerService) -> RuleUpgradeContext {
        RuleUpgradeContext { miner: Arc::new(miner) }
    }

    #[tokio::test]
    async fn no_candidates_short_circuits() {
        let miner = FakeRuleMinerService {
            mined_rules: vec![MinedRule {
                rule_id: "r1".to_string(),
                description: "low confidence".to_string(),
                confidence: 0.5,
                evidence_count: 3,
            }],
            ..Default::default()
        };
        let state = RuleUpgradeState::new("u1", None, true);
        let result = mine_rules(&ctx(miner), state).await.unwrap();
        assert_eq!(result.current_stage, "no_patches");
        assert!(result.rule_candidates.is_empty());
    }

    #[tokio::test]
    async fn candidates_above_threshold_proceed() {
        let miner = FakeRuleMinerService {
            mined_rules: vec![MinedRule {
                rule_id: "r1".to_string(),
                description: "confident".to_string(),
                confidence: 0.95,
                evidence_count: 40,
            }],
            ..Default::default()
        };
        let state = RuleUpgradeState::new("u1", None, true);
        let result = mine_rules(&ctx(miner), state).await.unwrap();
        assert_eq!(result.current_stage, "generate_patches");
        assert_eq!(result.rule_candidates.len(), 1);
    }

    #[tokio::test]
    async fn regression_detected_skips_deploy() {
        let miner = FakeRuleMinerService {
            test_results: vec![TestResult {
                patch_id: "p1".to_string(),
                test_name: "t1".to_string(),
                passed: false,
                regression: true,
            }],
            ..Default::default()
        };
        let mut state = RuleUpgradeState::new("u1", None, true);
        state.generated_patches = vec![GeneratedPatch {
            rule_id: "r1".to_string(),
            patch_id: "p1".to_string(),
            diff: "diff".to_string(),
        }];
        let result = regression_test(&ctx(miner), state).await.unwrap();
        assert!(result.regression_detected);
        assert_eq!(result.current_stage, "regression_failed");
    }

    #[tokio::test]
    async fn approval_interrupt_then_approve_deploys() {
        let mut state = RuleUpgradeState::new("u1", None, true);
        state.generated_patches = vec![GeneratedPatch {
            rule_id: "r1".to_string(),
            patch_id: "p1".to_string(),
            diff: "diff".to_string(),
        }];
        let ctx = ctx(FakeRuleMinerService::default());

        let result = approval_interrupt(&ctx, state).await;
        assert!(matches!(result, Err(GradingError::AwaitingReview { .. })));

        let mut state = RuleUpgradeState::new("u1", None, true);
        state.pending_interrupt = Some(serde_json::json!({"approved": true}));
        let result = approval_interrupt(&ctx, state).await.unwrap();
        assert_eq!(result.current_stage, "deploy");
        assert_eq!(result.approved, Some(true));
    }

    #[tokio::test]
    async fn rollback_restores_previous_version() {
        let mut state = RuleUpgradeState::new("u1", None, false);
        state.previous_version = Some("v1".to_string());
        state.deployed_version = Some("v2".to_string());
        let result = rollback(state);
        assert_eq!(result.deployed_version, Some("v1".to_string()));
        assert_eq!(result.deployment_status, "rolled_back");
    }
}
