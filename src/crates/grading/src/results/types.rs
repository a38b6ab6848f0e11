//! Per-student/per-question/per-point result types (spec §3, §4.4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringDecision {
    Awarded,
    PartiallyAwarded,
    NotAwarded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringPointResult {
    pub point_id: String,
    pub decision: ScoringDecision,
    pub awarded: f64,
    pub max_points: f64,
    pub evidence: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub rubric_reference: Option<String>,
    /// Pre-correction snapshot of this point, set only when logic-review or
    /// finalization clamping altered it (spec §4.5 `review_before`).
    #[serde(default)]
    pub review_before: Option<Box<ScoringPointResult>>,
    #[serde(default)]
    pub review_adjusted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCorrection {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditFlag {
    MissingScoringPoints,
    MissingEvidence,
    ScoreAdjusted,
    MissingRubricReference,
    MissingPointId,
    LogicReviewParseFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub score: f64,
    pub max_score: f64,
    pub confidence: f64,
    pub scoring_point_results: Vec<ScoringPointResult>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub audit_flags: Vec<AuditFlag>,
    #[serde(default)]
    pub review_corrections: Vec<ReviewCorrection>,
    #[serde(default)]
    pub page_indices: Vec<usize>,
    #[serde(default)]
    pub logic_reviewed: bool,
    #[serde(default)]
    pub score_adjusted: bool,
}

impl QuestionResult {
    /// Invariant 1/2 (spec §8): score equals the sum of awarded points and
    /// stays within `[0, max_score]`.
    pub fn check_invariants(&self) -> bool {
        let summed: f64 = self.scoring_point_results.iter().map(|p| p.awarded).sum();
        (self.score - summed).abs() < 1e-6 && self.score >= 0.0 && self.score <= self.max_score + 1e-9
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SelfAudit {
    pub summary: String,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub compliance_analysis: Vec<String>,
    #[serde(default)]
    pub uncertainties_and_conflicts: Vec<String>,
    #[serde(default)]
    pub overall_compliance_grade: String,
    #[serde(default)]
    pub honesty_note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PageResult {
    pub page_index: usize,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentResult {
    pub student_key: String,
    pub total_score: f64,
    pub max_total_score: f64,
    pub question_details: Vec<QuestionResult>,
    #[serde(default)]
    pub page_results: Vec<PageResult>,
    #[serde(default)]
    pub confession: Option<String>,
    #[serde(default)]
    pub self_audit: Option<SelfAudit>,
    #[serde(default)]
    pub logic_review: Option<serde_json::Value>,
    #[serde(default)]
    pub student_summary: Option<String>,
}

impl StudentResult {
    /// Invariant 4 (spec §8): total matches the sum over question details,
    /// or, in page mode (no question details), the sum over page results.
    pub fn recompute_total(&mut self) {
        self.total_score = if !self.question_details.is_empty() {
            self.question_details.iter().map(|q| q.score).sum()
        } else {
            self.page_results.iter().map(|p| p.score).sum()
        };
    }
}
