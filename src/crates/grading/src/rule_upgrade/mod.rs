//! Rule-upgrade pipeline (spec §4.8): mines grading-history patterns into
//! candidate rubric rule changes, patches and regression-tests them, pauses
//! for deploy approval, then deploys and monitors. Reuses the same
//! `StateGraph`/retry/interrupt primitives as the grading pipeline
//! (`crate::graph`, `crate::retry`).

pub mod graph;
pub mod miner;
pub mod stages;
pub mod state;

pub use graph::build_rule_upgrade_graph;
pub use miner::{FakeRuleMinerService, RuleMinerService};
pub use state::{
    DeployResult, GeneratedPatch, MinedRule, RuleCandidate, RuleUpgradeState, TestResult,
};
