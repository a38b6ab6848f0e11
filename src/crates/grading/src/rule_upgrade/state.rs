//! `RuleUpgradeState`: root state for the rule-upgrade pipeline (spec §4.8).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::state::ErrorRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedRule {
    pub rule_id: String,
    pub description: String,
    pub confidence: f64,
    pub evidence_count: u64,
}

/// A mined rule that cleared the `confidence > 0.8` bar (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCandidate {
    pub rule_id: String,
    pub description: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPatch {
    pub rule_id: String,
    pub patch_id: String,
    pub diff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub patch_id: String,
    pub test_name: String,
    pub passed: bool,
    pub regression: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResult {
    pub deployed_version: String,
    pub deployed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleUpgradeState {
    pub upgrade_id: String,
    #[serde(default)]
    pub time_window: Option<String>,
    #[serde(default)]
    pub current_stage: String,

    #[serde(default)]
    pub mined_rules: Vec<MinedRule>,
    #[serde(default)]
    pub rule_candidates: Vec<RuleCandidate>,
    #[serde(default)]
    pub generated_patches: Vec<GeneratedPatch>,
    #[serde(default)]
    pub test_results: Vec<TestResult>,
    #[serde(default)]
    pub regression_detected: bool,

    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub pending_interrupt: Option<Value>,
    #[serde(default)]
    pub approved: Option<bool>,

    #[serde(default)]
    pub previous_version: Option<String>,
    #[serde(default)]
    pub deployed_version: Option<String>,
    #[serde(default)]
    pub deployment_status: String,

    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

impl RuleUpgradeState {
    pub fn new(upgrade_id: impl Into<String>, time_window: Option<String>, require_approval: bool) -> Self {
        Self {
            upgrade_id: upgrade_id.into(),
            time_window,
            current_stage: "mine_rules".to_string(),
            mined_rules: Vec::new(),
            rule_candidates: Vec::new(),
            generated_patches: Vec::new(),
            test_results: Vec::new(),
            regression_detected: false,
            require_approval,
            pending_interrupt: None,
            approved: None,
            previous_version: None,
            deployed_version: None,
            deployment_status: "not_deployed".to_string(),
            errors: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn record_error(&mut self, stage: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            stage: stage.into(),
            kind: kind.into(),
            message: message.into(),
            timestamp: String::new(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let state = RuleUpgradeState::new("u1", Some("7d".to_string()), true);
        let value = state.to_value().unwrap();
        let back = RuleUpgradeState::from_value(&value).unwrap();
        assert_eq!(back.upgrade_id, "u1");
        assert_eq!(back.current_stage, "mine_rules");
    }
}
