//! `intake`: validates inputs, seeds timestamps (spec §2, §7 `input_invalid`).

use crate::error::{GradingError, Result};
use crate::progress::{emit, ProgressEvent};
use crate::stages::StageContext;
use crate::state::BatchGradingState;

pub async fn run(ctx: &StageContext, mut state: BatchGradingState, now: &str) -> Result<BatchGradingState> {
    if state.batch_id.trim().is_empty() {
        return Err(GradingError::Configuration("batch_id must not be empty".to_string()));
    }

    let has_rubric = state.inputs.rubric_text.is_some() || !state.inputs.rubric_images.is_empty();
    if !has_rubric {
        emit(
            ctx.progress.as_ref(),
            &state.batch_id,
            ProgressEvent::WorkflowError {
                error: "input_invalid: no rubric text or images supplied".to_string(),
                stage: "intake".to_string(),
            },
        )
        .await;
        return Err(GradingError::Configuration(
            "input_invalid: at least one of rubric_text or rubric_images is required".to_string(),
        ));
    }

    state.timestamps.insert("intake_started_at".to_string(), now.to_string());
    state.timestamps.insert("now".to_string(), now.to_string());
    state.expected_total_score = ctx.config.expected_total_score;
    state.advance("preprocess", 5.0);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GradingConfig;
    use crate::persistence::{InMemoryFileStorage, InMemoryGradingStore};
    use crate::progress::NoopProgressSink;
    use crate::scoring_service::FakeScoringService;
    use crate::state::GradingInputs;
    use std::sync::Arc;

    fn ctx() -> StageContext {
        StageContext {
            config: Arc::new(GradingConfig::default()),
            scoring_service: Arc::new(FakeScoringService::default()),
            progress: Arc::new(NoopProgressSink),
            store: Arc::new(InMemoryGradingStore::default()),
            files: Arc::new(InMemoryFileStorage::default()),
        }
    }

    #[tokio::test]
    async fn rejects_empty_batch_id() {
        let state = BatchGradingState::new("", GradingInputs::default());
        let result = run(&ctx(), state, "2026-07-30T00:00:00Z").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_missing_rubric() {
        let state = BatchGradingState::new("b1", GradingInputs::default());
        let result = run(&ctx(), state, "2026-07-30T00:00:00Z").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn accepts_rubric_text_and_advances_stage() {
        let inputs = GradingInputs {
            rubric_text: Some("Q1: 10 points".to_string()),
            ..Default::default()
        };
        let state = BatchGradingState::new("b1", inputs);
        let result = run(&ctx(), state, "2026-07-30T00:00:00Z").await.unwrap();
        assert_eq!(result.current_stage, "preprocess");
        assert!(result.percentage > 0.0);
    }
}
