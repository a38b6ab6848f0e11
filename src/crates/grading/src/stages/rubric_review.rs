//! `rubric_review`: conditional human interrupt over the parsed rubric
//! (spec §2 stage 5, §4.1). Skipped entirely when `enable_review` is false.
//!
//! Unlike `review` (spec §4.6, which corrects *student* results), this stage
//! corrects *rubric* fields, so it reuses `rubric::self_review`'s correction
//! vocabulary (teacher override) and `ScoringService::revise_rubric_questions`
//! (targeted re-parse) rather than `interrupt::ReviewResponse`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GradingError, Result};
use crate::rubric::normalize::normalize_rubric_response;
use crate::rubric::self_review::{apply_self_review, SelfReviewCorrection, SelfReviewResponse};
use crate::rubric::types::ParsedRubric;
use crate::stages::StageContext;
use crate::state::BatchGradingState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RubricReviewResponse {
    Approve,
    UpdateQuestions { corrections: Vec<SelfReviewCorrection> },
    Reparse { question_ids: Vec<String>, notes: String },
    Skip,
}

fn merge_revised_questions(rubric: &ParsedRubric, revised: Vec<Value>) -> Result<ParsedRubric> {
    let mut questions_raw: Vec<Value> = rubric
        .questions
        .iter()
        .map(|q| serde_json::to_value(q).unwrap_or(Value::Null))
        .collect();
    for updated in revised {
        let qid = updated.get("question_id").and_then(|v| v.as_str()).map(String::from);
        match qid.and_then(|qid| questions_raw.iter().position(|q| q.get("question_id").and_then(|v| v.as_str()) == Some(qid.as_str()))) {
            Some(pos) => questions_raw[pos] = updated,
            None => questions_raw.push(updated),
        }
    }
    normalize_rubric_response(&serde_json::json!({ "questions": questions_raw }))
}

pub async fn run(ctx: &StageContext, mut state: BatchGradingState) -> Result<BatchGradingState> {
    if !ctx.config.enable_review {
        state.advance("grade_batch", 30.0);
        return Ok(state);
    }

    let Some(rubric) = state.parsed_rubric.clone() else {
        return Err(GradingError::Configuration("rubric_review requires a parsed rubric".to_string()));
    };

    match state.pending_interrupt.take() {
        None => {
            let request = serde_json::json!({
                "type": "rubric_review_required",
                "batch_id": state.batch_id,
                "total_questions": rubric.total_questions,
                "total_score": rubric.total_score,
                "confession": rubric.confession,
            });
            tracing::debug!(batch_id = %state.batch_id, "raising rubric_review interrupt");
            state.pending_interrupt = Some(request);
            Err(GradingError::AwaitingReview {
                node: "rubric_review".to_string(),
                reason: "awaiting teacher rubric approval".to_string(),
            })
        }
        Some(response_value) => {
            let response: RubricReviewResponse = serde_json::from_value(response_value)
                .map_err(|e| GradingError::invalid_scoring_response("rubric_review", e.to_string()))?;

            let updated = match response {
                RubricReviewResponse::Approve | RubricReviewResponse::Skip => rubric,
                RubricReviewResponse::UpdateQuestions { corrections } => {
                    let mut r = rubric;
                    apply_self_review(
                        &mut r,
                        &SelfReviewResponse {
                            has_changes: !corrections.is_empty(),
                            changes: Vec::new(),
                            updated_confidence: r.confession.confidence,
                            corrections,
                        },
                    );
                    r
                }
                RubricReviewResponse::Reparse { question_ids, notes } => {
                    let selected: Vec<Value> = rubric
                        .questions
                        .iter()
                        .filter(|q| question_ids.contains(&q.question_id))
                        .map(|q| serde_json::to_value(q).unwrap_or(Value::Null))
                        .collect();
                    let revised = ctx.scoring_service.revise_rubric_questions(&selected, &notes).await?;
                    merge_revised_questions(&rubric, revised)?
                }
            };

            state.parsed_rubric = Some(updated);
            state.advance("grade_batch", 30.0);
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
    use crate::rubric::normalize::normalize_rubric_response;
    use crate::scoring_service::FakeScoringService;
    use crate::state::GradingInputs;
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

    fn rubric() -> ParsedRubric {
        normalize_rubric_response(&serde_json::json!({
            "total_score": 10,
            "questions": [{"question_id": "1", "max_score": 10, "scoring_points": []}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn skips_immediately_when_review_disabled() {
        let config = GradingConfig { enable_review: false, ..Default::default() };
        let mut state = BatchGradingState::new("b1", GradingInputs::default());
        state.parsed_rubric = Some(rubric());
        let result = run(&ctx(config, FakeScoringService::default()), state).await.unwrap();
        assert_eq!(result.current_stage, "grade_batch");
    }

    #[tokio::test]
    async fn raises_interrupt_on_first_call() {
        let config = GradingConfig::default();
        let mut state = BatchGradingState::new("b1", GradingInputs::default());
        state.parsed_rubric = Some(rubric());
        let result = run(&ctx(config, FakeScoringService::default()), state).await;
        assert!(matches!(result, Err(GradingError::AwaitingReview { .. })));
    }

    #[tokio::test]
    async fn approve_resumes_and_advances() {
        let config = GradingConfig::default();
        let mut state = BatchGradingState::new("b1", GradingInputs::default());
        state.parsed_rubric = Some(rubric());
        state.pending_interrupt = Some(serde_json::json!({"action": "approve"}));
        let result = run(&ctx(config, FakeScoringService::default()), state).await.unwrap();
        assert_eq!(result.current_stage, "grade_batch");
    }

    #[tokio::test]
    async fn reparse_wire_tag_triggers_targeted_reparse() {
        let config = GradingConfig::default();
        let mut state = BatchGradingState::new("b1", GradingInputs::default());
        state.parsed_rubric = Some(rubric());
        state.pending_interrupt = Some(serde_json::json!({
            "action": "reparse",
            "question_ids": ["1"],
            "notes": "double-check the max score"
        }));
        let service = FakeScoringService {
            revise_response: vec![serde_json::json!({"question_id": "1", "max_score": 12, "scoring_points": []})],
            ..Default::default()
        };
        let result = run(&ctx(config, service), state).await.unwrap();
        assert_eq!(result.current_stage, "grade_batch");
        assert_eq!(result.parsed_rubric.unwrap().total_score, 12.0);
    }
}
