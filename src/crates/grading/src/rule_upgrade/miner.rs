//! The rule-miner/patch backend interface (spec §4.8, §6), mirroring the
//! `ScoringService` trait/fake split used by the grading pipeline.

use async_trait::async_trait;

use crate::error::Result;
use crate::rule_upgrade::state::{DeployResult, GeneratedPatch, MinedRule, TestResult};

#[async_trait]
pub trait RuleMinerService: Send + Sync {
    async fn mine_rules(&self, time_window: Option<&str>) -> Result<Vec<MinedRule>>;

    async fn generate_patches(&self, candidates: &[MinedRule]) -> Result<Vec<GeneratedPatch>>;

    async fn run_regression(&self, patches: &[GeneratedPatch]) -> Result<Vec<TestResult>>;

    async fn deploy(&self, patches: &[GeneratedPatch], previous_version: Option<&str>) -> Result<DeployResult>;
}

/// Scripted in-memory fake for tests. Every stage's output is configured up
/// front; calls replay the configured value regardless of arguments.
pub struct FakeRuleMinerService {
    pub mined_rules: Vec<MinedRule>,
    pub generated_patches: Vec<GeneratedPatch>,
    pub test_results: Vec<TestResult>,
    pub deploy_result: DeployResult,
}

impl Default for FakeRuleMinerService {
    fn default() -> Self {
        Self {
            mined_rules: Vec::new(),
            generated_patches: Vec::new(),
            test_results: Vec::new(),
            deploy_result: DeployResult {
                deployed_version: "v1".to_string(),
                deployed_at: String::new(),
            },
        }
    }
}

#[async_trait]
impl RuleMinerService for FakeRuleMinerService {
    async fn mine_rules(&self, _time_window: Option<&str>) -> Result<Vec<MinedRule>> {
        Ok(self.mined_rules.clone())
    }

    async fn generate_patches(&self, _candidates: &[MinedRule]) -> Result<Vec<GeneratedPatch>> {
        Ok(self.generated_patches.clone())
    }

    async fn run_regression(&self, _patches: &[GeneratedPatch]) -> Result<Vec<TestResult>> {
        Ok(self.test_results.clone())
    }

    async fn deploy(&self, _patches: &[GeneratedPatch], _previous_version: Option<&str>) -> Result<DeployResult> {
        Ok(self.deploy_result.clone())
    }
}
