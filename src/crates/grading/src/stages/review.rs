//! `review`: aggregates confidence signals, optionally raises a human
//! interrupt, and applies overrides/regrades (spec §4.6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GradingError, Result};
use crate::interrupt::{
    InterruptRequest, LowConfidenceItem, RegradeItem, ReviewQueueItem, ReviewQueueItemType, ReviewResponse,
};
use crate::results::types::{AuditFlag, QuestionResult};
use crate::scoring_service::PageImage;
use crate::stages::StageContext;
use crate::state::BatchGradingState;

fn collect_low_confidence(state: &BatchGradingState, threshold: f64) -> Vec<LowConfidenceItem> {
    let mut items = Vec::new();
    for student in &state.student_results {
        for question in &student.question_details {
            if question.confidence < threshold {
                for &page in &question.page_indices {
                    items.push(LowConfidenceItem {
                        student_key: student.student_key.clone(),
                        question_id: question.question_id.clone(),
                        page_index: page,
                        confidence: question.confidence,
                    });
                }
            }
        }
    }
    items
}

fn build_review_queue(state: &BatchGradingState, threshold: f64) -> Vec<ReviewQueueItem> {
    let mut queue = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for boundary in &state.student_boundaries {
        if boundary.needs_confirmation && seen.insert(("boundary", boundary.student_key.clone(), String::new())) {
            queue.push(ReviewQueueItem {
                item_type: ReviewQueueItemType::Boundary,
                student_key: boundary.student_key.clone(),
                question_id: None,
                page_indices: boundary.pages.clone(),
                reason: "boundary needs confirmation".to_string(),
            });
        }
    }

    for student in &state.student_results {
        if let Some(audit) = &student.self_audit {
            if audit.overall_compliance_grade == "needs_review" && seen.insert(("confession", student.student_key.clone(), String::new())) {
                queue.push(ReviewQueueItem {
                    item_type: ReviewQueueItemType::Confession,
                    student_key: student.student_key.clone(),
                    question_id: None,
                    page_indices: Vec::new(),
                    reason: audit.summary.clone(),
                });
            }
        }
        for question in &student.question_details {
            let flagged = question.confidence < threshold || !question.audit_flags.is_empty();
            if flagged && seen.insert(("question", student.student_key.clone(), question.question_id.clone())) {
                queue.push(ReviewQueueItem {
                    item_type: ReviewQueueItemType::Question,
                    student_key: student.student_key.clone(),
                    question_id: Some(question.question_id.clone()),
                    page_indices: question.page_indices.clone(),
                    reason: format!("confidence={:.2} audit_flags={:?}", question.confidence, question.audit_flags),
                });
            }
        }
    }

    queue
}

/// A single-question regrade candidate, scored for merge comparison
/// (spec §4.6, Open Question 3: "no floor" — a regrade may legitimately
/// lower the score).
#[derive(Debug, Clone)]
pub struct RegradeCandidate {
    pub confidence: f64,
    pub score: f64,
    pub feedback: String,
}

/// Picks the better of two regrade candidates by `(confidence, score,
/// feedback.len())`, in that priority order. Pure tuple comparison, no
/// floor on the resulting score (Open Question 3).
pub fn pick_best_regrade(current: RegradeCandidate, candidate: RegradeCandidate) -> RegradeCandidate {
    let current_key = (current.confidence, current.score, current.feedback.len());
    let candidate_key = (candidate.confidence, candidate.score, candidate.feedback.len());
    if candidate_key > current_key {
        candidate
    } else {
        current
    }
}

async fn regrade_one(ctx: &StageContext, state: &BatchGradingState, item: &RegradeItem) -> Result<RegradeCandidate> {
    let Some(rubric) = &state.parsed_rubric else {
        return Err(GradingError::Configuration("regrade requires a parsed rubric".to_string()));
    };
    let Some(question_rubric) = rubric.find_question(&item.question_id) else {
        return Err(GradingError::invalid_scoring_response("regrade", format!("unknown question_id {}", item.question_id)));
    };

    let page_indices = item.page_indices.clone().unwrap_or_else(|| question_rubric.source_pages.clone());
    let mut best: Option<RegradeCandidate> = None;

    for &page in &page_indices {
        let url = state.processed_images.get(page).or_else(|| state.inputs.answer_images.get(page));
        let Some(url) = url else { continue };
        let image = PageImage::from_url(page, url.clone());
        let raw = ctx
            .scoring_service
            .grade_single_question(&image, &item.question_id, page, None)
            .await?;

        let candidate = RegradeCandidate {
            confidence: raw.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0),
            score: raw.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0),
            feedback: raw.get("feedback").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        };
        best = Some(match best {
            Some(current) => pick_best_regrade(current, candidate),
            None => candidate,
        });
    }

    best.ok_or_else(|| GradingError::invalid_scoring_response("regrade", "no page image available to regrade"))
}

fn apply_update(state: &mut BatchGradingState, overrides: &[crate::interrupt::StudentOverride]) {
    for student_override in overrides {
        let Some(student) = state.student_results.iter_mut().find(|s| s.student_key == student_override.student_key) else {
            tracing::warn!(student_key = %student_override.student_key, "update targets unknown student, skipping");
            continue;
        };
        for question_override in &student_override.questions {
            match student.question_details.iter_mut().find(|q| q.question_id == question_override.question_id) {
                Some(question) => {
                    question.score = question_override.score;
                    if let Some(feedback) = &question_override.feedback {
                        question.feedback = feedback.clone();
                    }
                }
                None => {
                    student.question_details.push(QuestionResult {
                        question_id: question_override.question_id.clone(),
                        score: question_override.score,
                        max_score: question_override.score,
                        confidence: 1.0,
                        scoring_point_results: Vec::new(),
                        feedback: question_override.feedback.clone().unwrap_or_default(),
                        audit_flags: Vec::new(),
                        review_corrections: Vec::new(),
                        page_indices: Vec::new(),
                        logic_reviewed: false,
                        score_adjusted: false,
                    });
                }
            }
        }
        student.recompute_total();
    }
}

async fn apply_regrade(ctx: &StageContext, state: &mut BatchGradingState, items: &[RegradeItem]) -> Result<()> {
    for item in items {
        let candidate = regrade_one(ctx, state, item).await;
        let Some(student) = state.student_results.iter_mut().find(|s| s.student_key == item.student_key) else {
            tracing::warn!(student_key = %item.student_key, "regrade targets unknown student, skipping");
            continue;
        };
        match candidate {
            Ok(candidate) => {
                if let Some(question) = student.question_details.iter_mut().find(|q| q.question_id == item.question_id) {
                    let existing = RegradeCandidate {
                        confidence: question.confidence,
                        score: question.score,
                        feedback: question.feedback.clone(),
                    };
                    let picked = pick_best_regrade(existing, candidate);
                    question.score = picked.score;
                    question.confidence = picked.confidence;
                    question.feedback = picked.feedback;
                    question.audit_flags.push(AuditFlag::ScoreAdjusted);
                }
            }
            Err(err) => {
                tracing::warn!(student_key = %item.student_key, question_id = %item.question_id, error = %err, "regrade failed, keeping prior result");
            }
        }
        student.recompute_total();
    }
    Ok(())
}

pub async fn run(ctx: &StageContext, mut state: BatchGradingState) -> Result<BatchGradingState> {
    let boundaries_need_confirmation = state.student_boundaries.iter().filter(|b| b.needs_confirmation).count();
    let threshold = ctx.config.review_threshold;
    let low_confidence_results = collect_low_confidence(&state, threshold);
    let mut review_queue = build_review_queue(&state, threshold);
    review_queue.truncate(ctx.config.review_queue_max_items);
    state.review_queue = review_queue.clone();

    if !ctx.config.enable_review || ctx.config.grading_mode.is_assist() {
        state.advance("export", 90.0);
        return Ok(state);
    }

    match state.pending_interrupt.take() {
        None => {
            let request = InterruptRequest::ResultsReviewRequired {
                batch_id: state.batch_id.clone(),
                boundaries_need_confirmation,
                low_confidence_results,
                review_queue,
            };
            state.pending_interrupt = Some(serde_json::to_value(&request).unwrap_or(Value::Null));
            Err(GradingError::AwaitingReview {
                node: "review".to_string(),
                reason: "awaiting teacher review of results".to_string(),
            })
        }
        Some(response_value) => {
            let response: ReviewResponse = serde_json::from_value(response_value)
                .map_err(|e| GradingError::invalid_scoring_response("review", e.to_string()))?;

            match response {
                ReviewResponse::Approve | ReviewResponse::Skip => {}
                ReviewResponse::Update { student_results } => apply_update(&mut state, &student_results),
                ReviewResponse::Regrade { regrade_items } => apply_regrade(ctx, &mut state, &regrade_items).await?,
            }

            state.advance("export", 90.0);
            Ok(state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GradingConfig;
    use crate::persistence::{InMemoryFileStorage, InMemoryGradingStore};
    use crate::progress::NoopProgressSink;
    use crate::results::types::{PageResult, ScoringDecision, ScoringPointResult, StudentResult};
    use crate::scoring_service::FakeScoringService;
    use std::sync::Arc;

    fn ctx(config: GradingConfig, service: FakeScoringService) -> StageContext {
        StageContext {
            config: Arc::new(config),
            scoring_service: Arc::new(service),
            progress: Arc::new(NoopProgressSink),
            store: Arc::new(InMemoryGradingStore::default()),
            files: Arc::new(InMemoryFileStorage::default()),
        }
    }

    fn student(key: &str, confidence: f64) -> StudentResult {
        StudentResult {
            student_key: key.to_string(),
            total_score: 5.0,
            max_total_score: 10.0,
            question_details: vec![QuestionResult {
                question_id: "1".to_string(),
                score: 5.0,
                max_score: 10.0,
                confidence,
                scoring_point_results: vec![ScoringPointResult {
                    point_id: "1.1".to_string(),
                    decision: ScoringDecision::PartiallyAwarded,
                    awarded: 5.0,
                    max_points: 10.0,
                    evidence: "ok".to_string(),
                    reason: None,
                    rubric_reference: Some("1.1".to_string()),
                    review_before: None,
                    review_adjusted: false,
                }],
                feedback: String::new(),
                audit_flags: vec![],
                review_corrections: vec![],
                page_indices: vec![0],
                logic_reviewed: true,
                score_adjusted: false,
            }],
            page_results: vec![PageResult { page_index: 0, confidence, score: 5.0, status: "graded".to_string() }],
            confession: None,
            self_audit: None,
            logic_review: None,
            student_summary: None,
        }
    }

    #[tokio::test]
    async fn raises_interrupt_then_approve_advances() {
        let mut state = BatchGradingState::new("b1", crate::state::GradingInputs::default());
        state.student_results = vec![student("s1", 0.4)];
        let config = GradingConfig::default();

        let first = run(&ctx(config.clone(), FakeScoringService::default()), state.clone()).await;
        assert!(matches!(first, Err(GradingError::AwaitingReview { .. })));

        state.pending_interrupt = Some(serde_json::json!({"action": "approve"}));
        let result = run(&ctx(config, FakeScoringService::default()), state).await.unwrap();
        assert_eq!(result.current_stage, "export");
    }

    #[tokio::test]
    async fn skips_interrupt_when_review_disabled() {
        let config = GradingConfig { enable_review: false, ..Default::default() };
        let mut state = BatchGradingState::new("b1", crate::state::GradingInputs::default());
        state.student_results = vec![student("s1", 0.9)];
        let result = run(&ctx(config, FakeScoringService::default()), state).await.unwrap();
        assert_eq!(result.current_stage, "export");
    }

    #[tokio::test]
    async fn update_overrides_score_and_recomputes_total() {
        let config = GradingConfig::default();
        let mut state = BatchGradingState::new("b1", crate::state::GradingInputs::default());
        state.student_results = vec![student("s1", 0.9)];
        state.pending_interrupt = Some(serde_json::json!({
            "action": "update",
            "student_results": [{"student_key": "s1", "questions": [{"question_id": "1", "score": 9.0}]}]
        }));
        let result = run(&ctx(config, FakeScoringService::default()), state).await.unwrap();
        assert_eq!(result.student_results[0].total_score, 9.0);
    }

    #[tokio::test]
    async fn regrade_action_keeps_pre_existing_value_when_it_is_the_better_candidate() {
        let config = GradingConfig::default();
        let mut state = BatchGradingState::new("b1", crate::state::GradingInputs::default());
        state.parsed_rubric = Some(crate::rubric::normalize::normalize_rubric_response(&serde_json::json!({
            "total_score": 10,
            "questions": [{"question_id": "1", "max_score": 10, "scoring_points": [], "source_pages": [0]}]
        }))
        .unwrap());
        state.processed_images = vec!["page0".to_string()];
        // Existing value (confidence 0.9) beats the regrade candidate (confidence 0.2) below.
        let mut existing = student("s1", 0.9);
        existing.question_details[0].score = 8.0;
        existing.question_details[0].feedback = "originally solid reasoning".to_string();
        state.student_results = vec![existing];
        state.pending_interrupt = Some(serde_json::json!({
            "action": "regrade",
            "regrade_items": [{"student_key": "s1", "question_id": "1"}]
        }));

        let service = FakeScoringService {
            grade_single_question_response: serde_json::json!({"confidence": 0.2, "score": 1.0, "feedback": "short"}),
            ..Default::default()
        };
        let result = run(&ctx(config, service), state).await.unwrap();

        let question = &result.student_results[0].question_details[0];
        assert_eq!(question.score, 8.0, "higher-confidence pre-existing value survives the regrade merge");
        assert_eq!(question.confidence, 0.9);
        assert!(question.audit_flags.contains(&AuditFlag::ScoreAdjusted));
    }

    #[tokio::test]
    async fn regrade_action_adopts_candidate_when_it_is_the_better_one() {
        let config = GradingConfig::default();
        let mut state = BatchGradingState::new("b1", crate::state::GradingInputs::default());
        state.parsed_rubric = Some(crate::rubric::normalize::normalize_rubric_response(&serde_json::json!({
            "total_score": 10,
            "questions": [{"question_id": "1", "max_score": 10, "scoring_points": [], "source_pages": [0]}]
        }))
        .unwrap());
        state.processed_images = vec!["page0".to_string()];
        state.student_results = vec![student("s1", 0.4)];
        state.pending_interrupt = Some(serde_json::json!({
            "action": "regrade",
            "regrade_items": [{"student_key": "s1", "question_id": "1"}]
        }));

        let service = FakeScoringService {
            grade_single_question_response: serde_json::json!({"confidence": 0.95, "score": 9.0, "feedback": "much more thorough re-reading of the proof"}),
            ..Default::default()
        };
        let result = run(&ctx(config, service), state).await.unwrap();

        let question = &result.student_results[0].question_details[0];
        assert_eq!(question.score, 9.0);
        assert_eq!(question.confidence, 0.95);
    }

    #[test]
    fn pick_best_regrade_allows_score_decrease() {
        let current = RegradeCandidate { confidence: 0.5, score: 9.0, feedback: "x".to_string() };
        let candidate = RegradeCandidate { confidence: 0.9, score: 3.0, feedback: "y".to_string() };
        let best = pick_best_regrade(current, candidate);
        assert_eq!(best.score, 3.0);
    }
}
