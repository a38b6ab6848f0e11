//! `grade_batch`: fan-out grading over student boundaries (spec §4.4).
//!
//! The router (`compute_units`) is a pure function of state; the worker
//! (`run_unit`) grades exactly one unit. `run` ties them together with a
//! `max_concurrent_workers`-bounded pool, matching the spec's "Send one
//! task per boundary, reduce by append" contract without routing each unit
//! through the graph engine's own `Send`/channel-reducer machinery — every
//! unit still runs concurrently, owns its own rubric copy, and is isolated
//! from the others' failures, which is the behavior spec §4.4 actually
//! requires.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::boundary::StudentBoundary;
use crate::error::GradingError;
use crate::progress::{emit, ProgressEvent};
use crate::results::finalize::{finalize_assist, finalize_question};
use crate::results::types::{PageResult, QuestionResult, StudentResult};
use crate::retry::{with_retry, GradingRetryPolicy};
use crate::rubric::types::ParsedRubric;
use crate::scoring_service::PageImage;
use crate::stages::StageContext;
use crate::state::BatchGradingState;

/// One independent unit of grading work: a student's pages plus a private
/// copy of the rubric (spec §4.4: "each worker owns its local rubric").
#[derive(Debug, Clone)]
pub struct GradeBatchUnit {
    pub batch_index: usize,
    pub student_key: String,
    pub page_indices: Vec<usize>,
    pub images: Vec<String>,
    pub parsed_rubric: ParsedRubric,
}

/// Splits `images` into fixed-size slices of `batch_size`, synthesizing
/// `"学生N"` keys (spec §4.4 fallback path, used when no boundaries were
/// resolved at all — distinct from `boundary::single_student_boundary`,
/// which already covers the "exactly one student" case upstream).
fn synthetic_boundaries(total_pages: usize, batch_size: usize) -> Vec<StudentBoundary> {
    let mut boundaries = Vec::new();
    let mut start = 0usize;
    let mut n = 1usize;
    while start < total_pages {
        let end = (start + batch_size - 1).min(total_pages - 1);
        boundaries.push(StudentBoundary {
            student_key: format!("学生{n}"),
            pages: (start..=end).collect(),
            start_page: start,
            end_page: end,
            student_id: None,
            student_name: None,
            needs_confirmation: false,
        });
        start = end + 1;
        n += 1;
    }
    boundaries
}

/// Router: computes work units from state (spec §4.4). Pure given `images`;
/// image recovery itself is the caller's job since it may need I/O.
///
/// When `state.batch_retry_needed` names a set of student keys (set by a
/// prior pass that hit worker failures, spec §4.4's "returns a
/// `batch_retry_needed` marker that the orchestrator uses to reschedule the
/// unit"), only those boundaries are rescheduled; otherwise every boundary
/// is scheduled, as on the first pass.
pub fn compute_units(state: &BatchGradingState, images: &[String], config: &crate::config::GradingConfig) -> Vec<GradeBatchUnit> {
    let Some(rubric) = state.parsed_rubric.clone() else {
        return Vec::new();
    };

    let boundaries: Vec<StudentBoundary> = if !state.student_boundaries.is_empty() {
        state.student_boundaries.clone()
    } else {
        synthetic_boundaries(images.len(), config.effective_batch_size(images.len()))
    };

    let retry_only: Option<std::collections::HashSet<String>> = state
        .batch_retry_needed
        .as_ref()
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str().map(String::from)).collect());

    boundaries
        .into_iter()
        .enumerate()
        .filter(|(_, b)| !b.pages.is_empty())
        .filter(|(_, b)| match &retry_only {
            Some(keys) => keys.contains(&b.student_key),
            None => true,
        })
        .map(|(i, b)| GradeBatchUnit {
            batch_index: i,
            student_key: b.student_key,
            images: b.pages.iter().filter_map(|&p| images.get(p).cloned()).collect(),
            page_indices: b.pages,
            parsed_rubric: rubric.clone(),
        })
        .collect()
}

async fn resolve_images(ctx: &StageContext, state: &BatchGradingState) -> Vec<String> {
    if !state.processed_images.is_empty() {
        return state.processed_images.clone();
    }
    if !state.inputs.answer_images.is_empty() {
        return state.inputs.answer_images.clone();
    }
    match ctx.files.list_batch_files(&state.batch_id).await {
        Ok(mut files) => {
            files.sort_by_key(|f| f.page_index);
            files.into_iter().filter_map(|f| f.file_url).collect()
        }
        Err(err) => {
            tracing::warn!(batch_id = %state.batch_id, error = %err, "bounded image recovery failed");
            Vec::new()
        }
    }
}

fn is_retryable(err: &GradingError) -> bool {
    !matches!(err, GradingError::InvalidScoringResponse { .. })
}

/// Worker: grades one unit and finalizes every question deterministically
/// (spec §4.4 steps 1-3 plus the normalization pipeline). Returns both the
/// finalized result and the scoring service's raw response, the latter
/// appended verbatim to `grading_results` as an undeduped audit trail
/// (spec §5: "for `grading_results` the reducer is `append` with no
/// dedup").
pub async fn run_unit(ctx: &StageContext, unit: &GradeBatchUnit, grading_mode: crate::config::GradingMode) -> Result<(StudentResult, Value), GradingError> {
    let images: Vec<PageImage> = unit
        .images
        .iter()
        .zip(unit.page_indices.iter())
        .map(|(url, &idx)| PageImage::from_url(idx, url))
        .collect();
    let page_contexts: Vec<String> = unit.page_indices.iter().map(|i| i.to_string()).collect();

    let policy = GradingRetryPolicy::llm_api();
    let service = ctx.scoring_service.clone();
    let rubric_value = serde_json::to_value(&unit.parsed_rubric).unwrap_or(Value::Null);
    let student_key = unit.student_key.clone();
    let page_indices = unit.page_indices.clone();
    let stream = Arc::new(|_: &str, _: &str| {});

    let raw = with_retry(&policy, "grade_student", is_retryable, || {
        let service = service.clone();
        let images = images.clone();
        let student_key = student_key.clone();
        let rubric_value = rubric_value.clone();
        let page_indices = page_indices.clone();
        let page_contexts = page_contexts.clone();
        let stream = stream.clone();
        async move {
            service
                .grade_student(&images, &student_key, &rubric_value, &page_indices, &page_contexts, stream)
                .await
        }
    })
    .await?;

    let total_score_reported = raw.get("total_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let max_total_score: f64 = unit.parsed_rubric.questions.iter().map(|q| q.max_score).sum();

    let question_details_raw = raw.get("question_details").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let mut question_details = Vec::with_capacity(question_details_raw.len());
    for raw_q in &question_details_raw {
        let question_id = raw_q.get("question_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let Some(rubric_question) = unit.parsed_rubric.find_question(&question_id) else {
            tracing::warn!(student_key = %unit.student_key, question_id, "service returned unknown question_id, dropping");
            continue;
        };

        let parsed: QuestionResult = serde_json::from_value(raw_q.clone()).unwrap_or_else(|_| QuestionResult {
            question_id: question_id.clone(),
            score: raw_q.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0),
            max_score: rubric_question.max_score,
            confidence: 0.0,
            scoring_point_results: Vec::new(),
            feedback: raw_q.get("feedback").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            audit_flags: Vec::new(),
            review_corrections: Vec::new(),
            page_indices: unit.page_indices.clone(),
            logic_reviewed: false,
            score_adjusted: false,
        });

        let used_alternative = !rubric_question.alternative_solutions.is_empty()
            && raw_q.get("used_alternative_solution").and_then(|v| v.as_bool()).unwrap_or(false);

        let evidence_pool: Vec<String> = parsed
            .scoring_point_results
            .iter()
            .map(|p| p.evidence.clone())
            .collect();

        let finalized = if grading_mode.is_assist() {
            finalize_assist(parsed)
        } else {
            finalize_question(rubric_question, parsed, &evidence_pool, used_alternative)
        };
        question_details.push(finalized);
    }

    let mut result = StudentResult {
        student_key: unit.student_key.clone(),
        total_score: total_score_reported,
        max_total_score,
        question_details,
        page_results: unit
            .page_indices
            .iter()
            .map(|&i| PageResult { page_index: i, confidence: 1.0, score: 0.0, status: "graded".to_string() })
            .collect(),
        confession: raw.get("confession").and_then(|v| v.as_str()).map(String::from),
        self_audit: None,
        logic_review: None,
        student_summary: raw.get("overall_feedback").and_then(|v| v.as_str()).map(String::from),
    };
    result.recompute_total();
    Ok((result, raw))
}

pub async fn run(ctx: &StageContext, mut state: BatchGradingState) -> Result<BatchGradingState, GradingError> {
    let images = resolve_images(ctx, &state).await;
    let units = compute_units(&state, &images, &ctx.config);
    state.batch_retry_needed = None;

    if units.is_empty() {
        tracing::warn!(batch_id = %state.batch_id, "no grading units resolved, skipping fan-out");
        state.record_error("grade_batch", "no_images", "no images found for fan-out; skipped grading");
        state.advance("logic_review", 55.0);
        return Ok(state);
    }

    let grading_mode = ctx.config.grading_mode;
    let permits = Arc::new(Semaphore::new(ctx.config.max_concurrent_workers.max(1)));
    let ctx = ctx.clone();
    let batch_id = state.batch_id.clone();

    let outcomes: Vec<(GradeBatchUnit, Result<(StudentResult, Value), GradingError>)> = stream::iter(units.into_iter().map(|unit| {
        let permits = permits.clone();
        let ctx = ctx.clone();
        let batch_id = batch_id.clone();
        let grading_mode = grading_mode;
        async move {
            let _permit = permits.acquire_owned().await.expect("semaphore not closed");
            emit(
                ctx.progress.as_ref(),
                &batch_id,
                ProgressEvent::AgentUpdate {
                    agent_id: format!("grade_batch-{}", unit.batch_index),
                    parent_node_id: "grade_batch".to_string(),
                    status: "running".to_string(),
                    progress: None,
                    message: Some(format!("grading {}", unit.student_key)),
                },
            )
            .await;
            let result = run_unit(&ctx, &unit, grading_mode).await;
            (unit, result)
        }
    }))
    .buffer_unordered(ctx.config.max_concurrent_workers.max(1))
    .collect()
    .await;

    let mut seen_keys = std::collections::HashSet::new();
    let mut retry_keys = Vec::new();
    for (unit, outcome) in outcomes {
        match outcome {
            Ok((result, raw)) => {
                if !seen_keys.insert(result.student_key.clone()) {
                    tracing::warn!(student_key = %result.student_key, "duplicate student_key in fan-out results, keeping latest");
                }
                // A retry pass replaces this student's prior (failed) entry.
                state.student_results.retain(|r| r.student_key != result.student_key);
                state.student_results.push(result);
                state.grading_results.push(raw);
            }
            Err(err) => {
                tracing::error!(student_key = %unit.student_key, error = %err, "grade_batch worker failed");
                for &page in &unit.page_indices {
                    state.record_error("grade_batch", "worker_failed", format!("page {page}: {err}"));
                }
                let max_total_score: f64 = unit.parsed_rubric.questions.iter().map(|q| q.max_score).sum();
                state.student_results.retain(|r| r.student_key != unit.student_key);
                state.student_results.push(StudentResult {
                    student_key: unit.student_key.clone(),
                    total_score: 0.0,
                    max_total_score,
                    question_details: Vec::new(),
                    page_results: unit
                        .page_indices
                        .iter()
                        .map(|&i| PageResult { page_index: i, confidence: 0.0, score: 0.0, status: "failed".to_string() })
                        .collect(),
                    confession: None,
                    self_audit: None,
                    logic_review: None,
                    student_summary: Some(format!("grading failed: {err}")),
                });
                retry_keys.push(unit.student_key.clone());
            }
        }
    }

    if !retry_keys.is_empty() && state.retry_count < ctx.config.max_retries as u32 {
        state.retry_count += 1;
        state.batch_retry_needed = Some(serde_json::json!(retry_keys));
    }

    state.advance("logic_review", 55.0);
    Ok(state)
}
