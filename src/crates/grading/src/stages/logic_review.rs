//! `logic_review`: per-student second pass over already-scored questions
//! (spec §4.5). Runs `LOGIC_REVIEW_MAX_WORKERS` students in parallel; a
//! missing/unavailable LLM credential falls back to a deterministic
//! rule-based summary rather than no-op'ing ([`rule_based_fallback`],
//! resolving Open Question 1).

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::{GradingError, Result};
use crate::results::types::{AuditFlag, QuestionResult, ScoringPointResult, SelfAudit, StudentResult};
use crate::retry::{with_retry, GradingRetryPolicy};
use crate::stages::StageContext;
use crate::state::BatchGradingState;

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ReviewCorrectionRaw {
    point_id: String,
    correct_awarded: f64,
    #[serde(default)]
    correct_decision: Option<String>,
    #[serde(default)]
    review_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct QuestionReviewRaw {
    question_id: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    confidence_reason: Option<String>,
    #[serde(default)]
    self_critique: Option<String>,
    #[serde(default)]
    self_critique_confidence: Option<f64>,
    #[serde(default)]
    review_summary: Option<String>,
    #[serde(default)]
    review_corrections: Vec<ReviewCorrectionRaw>,
    #[serde(default)]
    honesty_note: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct LogicReviewResponse {
    #[serde(default)]
    student_key: String,
    #[serde(default)]
    question_reviews: Vec<QuestionReviewRaw>,
    self_audit: SelfAudit,
}

fn build_prompt(student: &StudentResult) -> String {
    let mut prompt = format!("Logic review for {}. Questions:\n", student.student_key);
    for q in &student.question_details {
        prompt.push_str(&format!(
            "- {}: score={}/{} confidence={} audit_flags={:?}\n",
            q.question_id, q.score, q.max_score, q.confidence, q.audit_flags
        ));
    }
    prompt.push_str("Only correct clear rubric-grounded errors; no sympathy-grading. When uncertain, lower confidence into [0.3, 0.5] and explain in honesty_note instead of changing the score.");
    prompt
}

fn apply_correction(question: &mut QuestionResult, correction: &ReviewCorrectionRaw) {
    let Some(point) = question.scoring_point_results.iter_mut().find(|p| p.point_id == correction.point_id) else {
        tracing::warn!(question_id = %question.question_id, point_id = %correction.point_id, "logic-review correction targets unknown point, skipping");
        return;
    };
    let before = point.clone();
    let delta = correction.correct_awarded.clamp(0.0, point.max_points) - point.awarded;
    point.awarded = correction.correct_awarded.clamp(0.0, point.max_points);
    point.review_before = Some(Box::new(before));
    point.review_adjusted = true;
    if let Some(reason) = &correction.review_reason {
        point.reason = Some(reason.clone());
    }
    question.score = (question.score + delta).clamp(0.0, question.max_score);
}

fn apply_question_review(question: &mut QuestionResult, review: &QuestionReviewRaw) {
    if let Some(confidence) = review.confidence {
        question.confidence = confidence.clamp(0.0, 1.0);
    }
    for correction in &review.review_corrections {
        apply_correction(question, correction);
    }
    question.logic_reviewed = true;
}

/// Rule-based fallback when no LLM credentials are configured (spec §4.5,
/// Open Question 1): summarizes existing `audit_flags` without touching any
/// score, so `review` always has a `self_audit` to key its queue off of.
pub fn rule_based_fallback(student: &StudentResult) -> SelfAudit {
    let flagged: Vec<String> = student
        .question_details
        .iter()
        .filter(|q| !q.audit_flags.is_empty())
        .map(|q| format!("{}: {:?}", q.question_id, q.audit_flags))
        .collect();
    let low_confidence = student.question_details.iter().filter(|q| q.confidence < 0.7).count();

    SelfAudit {
        summary: format!(
            "rule-based review: {} question(s) carry audit flags, {} below confidence 0.7",
            flagged.len(),
            low_confidence
        ),
        confidence: student.question_details.iter().map(|q| q.confidence).fold(1.0, f64::min).max(0.0),
        issues: flagged,
        compliance_analysis: Vec::new(),
        uncertainties_and_conflicts: Vec::new(),
        overall_compliance_grade: if low_confidence == 0 { "pass".to_string() } else { "needs_review".to_string() },
        honesty_note: "rule-based fallback, no LLM available".to_string(),
    }
}

fn is_retryable(err: &GradingError) -> bool {
    !matches!(err, GradingError::InvalidScoringResponse { .. })
}

async fn review_one(ctx: &StageContext, mut student: StudentResult) -> StudentResult {
    if !ctx.scoring_service.is_llm_backed() {
        student.self_audit = Some(rule_based_fallback(&student));
        return student;
    }

    let prompt = build_prompt(&student);
    let policy = GradingRetryPolicy::llm_api();
    let service = ctx.scoring_service.clone();
    let stream = Arc::new(|_: &str, _: &str| {});
    let outcome = with_retry(&policy, "logic_review", is_retryable, || {
        let service = service.clone();
        let prompt = prompt.clone();
        let stream = stream.clone();
        async move { service.analyze_with_vision(&[], &prompt, stream).await }
    })
    .await;

    let response: Option<LogicReviewResponse> = match outcome {
        Ok(text) => serde_json::from_str::<Value>(&text).ok().and_then(|v| serde_json::from_value(v).ok()),
        Err(err) => {
            tracing::warn!(student_key = %student.student_key, error = %err, "logic review call failed, falling back to rule-based summary");
            None
        }
    };

    match response {
        Some(response) => {
            for review in &response.question_reviews {
                if let Some(question) = student.question_details.iter_mut().find(|q| q.question_id == review.question_id) {
                    apply_question_review(question, review);
                }
            }
            student.self_audit = Some(response.self_audit);
            student.recompute_total();
        }
        None => {
            for question in &mut student.question_details {
                question.audit_flags.push(AuditFlag::LogicReviewParseFailed);
            }
            student.self_audit = Some(rule_based_fallback(&student));
        }
    }
    student
}

pub async fn run(ctx: &StageContext, mut state: BatchGradingState) -> Result<BatchGradingState> {
    let students = std::mem::take(&mut state.student_results);
    let permits = Arc::new(Semaphore::new(ctx.config.logic_review_max_workers.max(1)));
    let ctx_arc = ctx.clone();

    let reviewed: Vec<StudentResult> = stream::iter(students.into_iter().map(|student| {
        let permits = permits.clone();
        let ctx = ctx_arc.clone();
        async move {
            let _permit = permits.acquire_owned().await.expect("semaphore not closed");
            review_one(&ctx, student).await
        }
    }))
    .buffer_unordered(ctx.config.logic_review_max_workers.max(1))
    .collect()
    .await;

    state.student_results = reviewed;
    state.advance("review", 70.0);
    Ok(state)
}
