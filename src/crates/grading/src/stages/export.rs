//! `export`: builds the final payload, persists it, and writes a JSON
//! fallback artifact when persistence fails or errors were recorded (spec
//! §4.7). Never raises: a persistence failure is recorded as a
//! `persistence_failed` error and the artifact is still attempted.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::persistence::{self, GradingHistory, GradingPageImage, StudentGradingResult};
use crate::stages::StageContext;
use crate::state::BatchGradingState;

#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub total_students: usize,
    pub average_score: Option<f64>,
    pub max_total_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportPayload {
    pub batch_id: String,
    pub generated_at: String,
    pub current_stage: String,
    pub class_report: ClassReport,
    pub students: Vec<crate::results::StudentResult>,
    pub failures: Vec<crate::state::ErrorRecord>,
}

fn build_class_report(state: &BatchGradingState) -> ClassReport {
    let total_students = state.student_results.len();
    let average_score = if total_students == 0 {
        None
    } else {
        Some(state.student_results.iter().map(|s| s.total_score).sum::<f64>() / total_students as f64)
    };
    let max_total_score = state
        .student_results
        .iter()
        .map(|s| s.max_total_score)
        .fold(0.0_f64, f64::max);

    ClassReport {
        total_students,
        average_score,
        max_total_score,
    }
}

fn build_payload(state: &BatchGradingState, now: &str) -> ExportPayload {
    ExportPayload {
        batch_id: state.batch_id.clone(),
        generated_at: now.to_string(),
        current_stage: state.current_stage.clone(),
        class_report: build_class_report(state),
        students: state.student_results.clone(),
        failures: state.errors.clone(),
    }
}

async fn persist(ctx: &StageContext, state: &BatchGradingState, payload: &ExportPayload, now: &str) -> Result<()> {
    let history_id = ctx
        .store
        .upsert_grading_history(GradingHistory {
            id: None,
            batch_id: state.batch_id.clone(),
            teacher_id: None,
            status: "completed".to_string(),
            class_ids: Vec::new(),
            created_at: now.to_string(),
            completed_at: Some(now.to_string()),
            total_students: payload.class_report.total_students as i64,
            average_score: payload.class_report.average_score,
            rubric_data: state
                .parsed_rubric
                .as_ref()
                .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
                .unwrap_or(Value::Null),
            current_stage: state.current_stage.clone(),
            result_data: serde_json::to_value(payload)?,
        })
        .await?;

    for student in &state.student_results {
        ctx.store
            .insert_student_result(StudentGradingResult {
                id: None,
                grading_history_id: history_id.clone(),
                student_key: student.student_key.clone(),
                score: student.total_score,
                max_score: student.max_total_score,
                class_id: None,
                student_id: None,
                summary: student.student_summary.clone(),
                confession: student
                    .confession
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
                result_data: serde_json::to_value(student)?,
                imported_at: now.to_string(),
            })
            .await?;
    }

    for file in ctx.files.list_batch_files(&state.batch_id).await.unwrap_or_default() {
        ctx.store
            .insert_page_image(GradingPageImage {
                id: None,
                grading_history_id: history_id.clone(),
                student_key: file.student_key,
                page_index: file.page_index,
                file_id: file.file_id,
                file_url: file.file_url,
                content_type: file.content_type,
                created_at: now.to_string(),
            })
            .await?;
    }

    Ok(())
}

pub async fn run(ctx: &StageContext, mut state: BatchGradingState) -> Result<BatchGradingState> {
    let now = state.timestamps.get("now").cloned().unwrap_or_default();
    let payload = build_payload(&state, &now);

    let persistence_ok = match persist(ctx, &state, &payload, &now).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(batch_id = %state.batch_id, error = %err, "persistence_failed during export");
            state.record_error("export", "persistence_failed", err.to_string());
            false
        }
    };

    if !persistence_ok || !state.errors.is_empty() {
        let export_dir = std::path::Path::new(&ctx.config.export_dir);
        if let Some(payload_value) = serde_json::to_value(&payload).ok() {
            persistence::write_json_artifact(export_dir, &state.batch_id, &now, &payload_value);
        }
        persistence::write_error_log(export_dir, &state.batch_id, &now, &state.errors);
    }

    state.advance("done", 100.0);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GradingConfig;
    use crate::persistence::{InMemoryFileStorage, InMemoryGradingStore};
    use crate::progress::NoopProgressSink;
    use crate::results::types::{PageResult, QuestionResult, ScoringDecision, ScoringPointResult, StudentResult};
    use crate::scoring_service::FakeScoringService;
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

    fn student() -> StudentResult {
        StudentResult {
            student_key: "s1".to_string(),
            total_score: 8.0,
            max_total_score: 10.0,
            question_details: vec![QuestionResult {
                question_id: "1".to_string(),
                score: 8.0,
                max_score: 10.0,
                confidence: 0.9,
                scoring_point_results: vec![ScoringPointResult {
                    point_id: "1.1".to_string(),
                    decision: ScoringDecision::Awarded,
                    awarded: 8.0,
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
            page_results: vec![PageResult { page_index: 0, confidence: 0.9, score: 8.0, status: "graded".to_string() }],
            confession: None,
            self_audit: None,
            logic_review: None,
            student_summary: None,
        }
    }

    #[tokio::test]
    async fn persists_and_advances_to_done() {
        let mut state = BatchGradingState::new("b1", crate::state::GradingInputs::default());
        state.student_results = vec![student()];
        let result = run(&ctx(), state).await.unwrap();
        assert_eq!(result.current_stage, "done");
        assert_eq!(result.percentage, 100.0);
    }

    #[tokio::test]
    async fn class_report_averages_student_scores() {
        let mut state = BatchGradingState::new("b1", crate::state::GradingInputs::default());
        state.student_results = vec![student(), student()];
        let payload = build_payload(&state, "2026-07-30T00:00:00Z");
        assert_eq!(payload.class_report.total_students, 2);
        assert_eq!(payload.class_report.average_score, Some(8.0));
    }

    #[tokio::test]
    async fn writes_artifact_when_errors_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = GradingConfig {
            export_dir: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let ctx = StageContext {
            config: Arc::new(config),
            scoring_service: Arc::new(FakeScoringService::default()),
            progress: Arc::new(NoopProgressSink),
            store: Arc::new(InMemoryGradingStore::default()),
            files: Arc::new(InMemoryFileStorage::default()),
        };
        let mut state = BatchGradingState::new("b1", crate::state::GradingInputs::default());
        state.record_error("grade_batch", "worker_failed", "page 0: boom");
        let result = run(&ctx, state).await.unwrap();
        assert_eq!(result.current_stage, "done");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(!entries.is_empty());
    }
}
