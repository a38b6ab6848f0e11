//! Human-in-the-loop request/response envelopes (spec §3, §4.6, §9).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suspend payload presented to a human reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InterruptRequest {
    #[serde(rename = "results_review_required")]
    ResultsReviewRequired {
        batch_id: String,
        boundaries_need_confirmation: usize,
        low_confidence_results: Vec<LowConfidenceItem>,
        review_queue: Vec<ReviewQueueItem>,
    },
    #[serde(rename = "rule_upgrade_approval_required")]
    RuleUpgradeApprovalRequired {
        upgrade_id: String,
        patches: Value,
        test_results: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowConfidenceItem {
    pub student_key: String,
    pub question_id: String,
    pub page_index: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewQueueItemType {
    Boundary,
    Confession,
    Question,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQueueItem {
    pub item_type: ReviewQueueItemType,
    pub student_key: String,
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub page_indices: Vec<usize>,
    pub reason: String,
}

/// One targeted re-grade request, resolved to `(student_key, question_id,
/// page_indices?)` (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegradeItem {
    pub student_key: String,
    pub question_id: String,
    #[serde(default)]
    pub page_indices: Option<Vec<usize>>,
}

/// A per-student, per-question score/feedback override (spec §4.6 `update`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOverride {
    pub question_id: String,
    pub score: f64,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentOverride {
    pub student_key: String,
    pub questions: Vec<QuestionOverride>,
}

/// Closed set of review-interrupt response actions (spec §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewResponse {
    Approve,
    Update { student_results: Vec<StudentOverride> },
    Regrade { regrade_items: Vec<RegradeItem> },
    Skip,
}

/// Rule-upgrade approval-interrupt response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}
