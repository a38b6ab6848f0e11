//! `rubric_self_review`: sends the parsed rubric's confession digest back to
//! the scoring service and applies any corrections (spec §4.3). Falls back to
//! passing the rubric through unchanged when the scoring service has no LLM
//! backing it or there are no rubric images to re-examine, mirroring the
//! short-circuit in `stages::logic_review::review_one`.

use crate::error::{GradingError, Result};
use crate::progress::{emit, ProgressEvent};
use crate::retry::{with_retry, GradingRetryPolicy};
use crate::rubric::self_review::{apply_self_review, SelfReviewResponse};
use crate::stages::StageContext;
use crate::state::BatchGradingState;

fn is_retryable(err: &GradingError) -> bool {
    !matches!(err, GradingError::InvalidScoringResponse { .. })
}

pub async fn run(ctx: &StageContext, mut state: BatchGradingState) -> Result<BatchGradingState> {
    let Some(rubric) = state.parsed_rubric.clone() else {
        return Err(GradingError::Configuration(
            "rubric_self_review requires a parsed rubric".to_string(),
        ));
    };

    if !ctx.scoring_service.is_llm_backed() || state.inputs.rubric_images.is_empty() {
        state.parsed_rubric = Some(rubric);
        state.advance("rubric_review", 28.0);
        return Ok(state);
    }

    let digest = serde_json::json!({
        "rubric_context": rubric.rubric_context,
        "confession": rubric.confession,
    });

    let policy = GradingRetryPolicy::llm_api();
    let service = ctx.scoring_service.clone();
    let raw = with_retry(&policy, "rubric_self_review", is_retryable, || {
        let service = service.clone();
        let digest = digest.clone();
        async move {
            service
                .revise_rubric_questions(std::slice::from_ref(&digest), "self_review")
                .await
                .map(|v| v.into_iter().next().unwrap_or(serde_json::json!({"has_changes": false, "updated_confidence": rubric.confession.confidence})))
        }
    })
    .await?;

    let response: SelfReviewResponse = serde_json::from_value(raw)
        .map_err(|e| GradingError::invalid_scoring_response("rubric_self_review", e.to_string()))?;

    let confidence_before = rubric.confession.confidence;
    let mut updated = rubric;
    apply_self_review(&mut updated, &response);

    emit(
        ctx.progress.as_ref(),
        &state.batch_id,
        ProgressEvent::RubricSelfReviewed {
            batch_id: state.batch_id.clone(),
            changes_made: response.changes.clone(),
            confidence_before,
            confidence_after: updated.confession.confidence,
        },
    )
    .await;

    state.parsed_rubric = Some(updated);
    state.advance("rubric_review", 28.0);
    Ok(state)
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

    fn ctx_with(service: FakeScoringService) -> StageContext {
        StageContext {
            config: Arc::new(GradingConfig::default()),
            scoring_service: Arc::new(service),
            progress: Arc::new(NoopProgressSink),
            store: Arc::new(InMemoryGradingStore::default()),
            files: Arc::new(InMemoryFileStorage::default()),
        }
    }

    #[tokio::test]
    async fn applies_correction_and_advances() {
        let rubric = normalize_rubric_response(&serde_json::json!({
            "total_score": 10,
            "questions": [{"question_id": "1", "max_score": 10, "scoring_points": []}],
            "confession": {"confidence": 0.5, "needsReview": ["q1"]}
        }))
        .unwrap();

        let service = FakeScoringService {
            revise_response: vec![serde_json::json!({
                "has_changes": true,
                "changes": ["raised max score"],
                "updated_confidence": 0.95,
                "corrections": [{"question_id": "1", "field": "max_score", "new_value": 12}]
            })],
            ..Default::default()
        };

        let mut state = BatchGradingState::new("b1", GradingInputs::default());
        state.parsed_rubric = Some(rubric);
        let result = run(&ctx_with(service), state).await.unwrap();
        assert_eq!(result.current_stage, "rubric_review");
        assert_eq!(result.parsed_rubric.unwrap().total_score, 12.0);
    }

    #[tokio::test]
    async fn skips_llm_call_when_not_llm_backed() {
        let rubric = normalize_rubric_response(&serde_json::json!({
            "total_score": 10,
            "questions": [{"question_id": "1", "max_score": 10, "scoring_points": []}],
            "confession": {"confidence": 0.5, "needsReview": ["q1"]}
        }))
        .unwrap();

        let mut inputs = GradingInputs::default();
        inputs.rubric_images = vec!["https://example.com/rubric.png".to_string()];
        let mut state = BatchGradingState::new("b1", inputs);
        state.parsed_rubric = Some(rubric);

        let service = FakeScoringService { llm_backed: false, ..Default::default() };
        let result = run(&ctx_with(service), state).await.unwrap();
        assert_eq!(result.current_stage, "rubric_review");
        assert_eq!(result.parsed_rubric.unwrap().total_score, 10.0);
    }

    #[tokio::test]
    async fn skips_llm_call_when_no_rubric_images() {
        let rubric = normalize_rubric_response(&serde_json::json!({
            "total_score": 10,
            "questions": [{"question_id": "1", "max_score": 10, "scoring_points": []}],
            "confession": {"confidence": 0.5, "needsReview": ["q1"]}
        }))
        .unwrap();

        let mut state = BatchGradingState::new("b1", GradingInputs::default());
        state.parsed_rubric = Some(rubric);

        let service = FakeScoringService::default();
        let result = run(&ctx_with(service), state).await.unwrap();
        assert_eq!(result.current_stage, "rubric_review");
        assert_eq!(result.parsed_rubric.unwrap().total_score, 10.0);
    }

    #[tokio::test]
    async fn requires_parsed_rubric() {
        let service = FakeScoringService::default();
        let state = BatchGradingState::new("b1", GradingInputs::default());
        let result = run(&ctx_with(service), state).await;
        assert!(result.is_err());
    }
}
