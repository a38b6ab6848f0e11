//! `rubric_parse`: calls the scoring service once against the rubric
//! images/text, normalizes the response, and guards against a mismatched
//! declared total (spec §4.3).

use crate::error::{GradingError, Result};
use crate::progress::{emit, ProgressEvent};
use crate::retry::{with_retry, GradingRetryPolicy};
use crate::rubric::normalize::normalize_rubric_response;
use crate::scoring_service::PageImage;
use crate::stages::StageContext;
use crate::state::BatchGradingState;

fn is_retryable(err: &GradingError) -> bool {
    !matches!(err, GradingError::InvalidScoringResponse { .. })
}

pub async fn run(ctx: &StageContext, mut state: BatchGradingState) -> Result<BatchGradingState> {
    let images: Vec<PageImage> = state
        .inputs
        .rubric_images
        .iter()
        .enumerate()
        .map(|(i, url)| PageImage::from_url(i, url))
        .collect();

    let policy = GradingRetryPolicy::llm_api();
    let service = ctx.scoring_service.clone();
    let stream = std::sync::Arc::new(|_: &str, _: &str| {});
    let raw = with_retry(&policy, "parse_rubric", is_retryable, || {
        let service = service.clone();
        let images = images.clone();
        let stream = stream.clone();
        async move { service.parse_rubric(&images, stream).await }
    })
    .await?;

    let rubric = normalize_rubric_response(&raw)?;

    emit(
        ctx.progress.as_ref(),
        &state.batch_id,
        ProgressEvent::RubricParsed {
            total_questions: rubric.total_questions,
            total_score: rubric.total_score,
            questions: serde_json::to_value(&rubric.questions).unwrap_or_default(),
        },
    )
    .await;

    if let Some(expected) = ctx.config.expected_total_score.or(state.expected_total_score) {
        if rubric.total_score > 0.0 && rubric.total_score < expected {
            emit(
                ctx.progress.as_ref(),
                &state.batch_id,
                ProgressEvent::RubricScoreMismatch {
                    expected_total_score: expected,
                    parsed_total_score: rubric.total_score,
                    message: format!(
                        "parsed total {} is below expected total {}",
                        rubric.total_score, expected
                    ),
                },
            )
            .await;
            return Err(GradingError::rubric_parse(format!(
                "rubric_score_mismatch: parsed total {} below expected {}",
                rubric.total_score, expected
            )));
        }
    }

    let needs_self_review = rubric.confession.needs_self_review();
    state.parsed_rubric = Some(rubric);
    state.advance(if needs_self_review { "rubric_self_review" } else { "rubric_review" }, 25.0);
    Ok(state)
}
