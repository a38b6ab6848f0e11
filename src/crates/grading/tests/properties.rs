//! Cross-module property and scenario tests (spec §8 testable properties)
//! that don't belong to any single stage's colocated `#[cfg(test)]` module.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use grading::config::GradingConfig;
use grading::persistence::{InMemoryFileStorage, InMemoryGradingStore};
use grading::progress::NoopProgressSink;
use grading::rubric::normalize::{normalize_rubric_response, renormalize};
use grading::scoring_service::FakeScoringService;
use grading::stages::{grade_batch, StageContext};
use grading::state::{BatchGradingState, GradingInputs};

fn rubric_json(scores: &[f64]) -> serde_json::Value {
    let points: Vec<_> = scores
        .iter()
        .enumerate()
        .map(|(i, s)| json!({"point_id": format!("1.{}", i + 1), "description": "p", "score": s}))
        .collect();
    json!({
        "questions": [{"question_id": "1", "scoring_points": points}]
    })
}

proptest! {
    /// Rubric normalization is idempotent: re-deriving `total_score` and
    /// `rubric_context` from an already-normalized rubric reproduces it.
    #[test]
    fn normalize_is_idempotent_over_point_scores(
        scores in prop::collection::vec(0.0f64..20.0, 1..6)
    ) {
        let raw = rubric_json(&scores);
        let mut rubric = normalize_rubric_response(&raw).unwrap();
        let before_context = rubric.rubric_context.clone();
        let before_total = rubric.total_score;

        renormalize(&mut rubric);

        prop_assert_eq!(rubric.rubric_context, before_context);
        prop_assert_eq!(rubric.total_score, before_total);
        prop_assert!((rubric.total_score - scores.iter().sum::<f64>()).abs() < 1e-9);
    }
}

proptest! {
    /// Finalization invariants 1-3 (spec §8): score equals the sum of
    /// awarded points, and both score and every awarded value stay within
    /// their declared bounds, regardless of what the scoring service
    /// reported.
    #[test]
    fn finalize_question_clamps_into_declared_bounds(
        max_points in prop::collection::vec(1.0f64..20.0, 1..5),
        reported_fudge in -15.0f64..15.0,
    ) {
        use grading::results::types::{QuestionResult, ScoringDecision, ScoringPointResult};
        use grading::results::finalize_question;
        use grading::rubric::types::{QuestionRubric, ScoringPoint};

        let scoring_points: Vec<ScoringPoint> = max_points
            .iter()
            .enumerate()
            .map(|(i, &m)| ScoringPoint {
                point_id: format!("1.{}", i + 1),
                description: "p".into(),
                score: m,
                is_required: false,
                keywords: vec![],
                expected_value: None,
            })
            .collect();
        let max_score: f64 = max_points.iter().sum();
        let rubric = QuestionRubric {
            question_id: "1".into(),
            max_score,
            question_text: String::new(),
            standard_answer: String::new(),
            source_pages: vec![],
            scoring_points: scoring_points.clone(),
            deduction_rules: vec![],
            alternative_solutions: vec![],
            confession: None,
            grading_notes: None,
            is_subjective: false,
        };

        // The scoring service may report out-of-bounds awards (over-award,
        // negative) and a total that disagrees with the sum; finalization
        // must reconcile both.
        let points: Vec<ScoringPointResult> = scoring_points
            .iter()
            .map(|p| ScoringPointResult {
                point_id: p.point_id.clone(),
                decision: ScoringDecision::Awarded,
                awarded: p.score + reported_fudge,
                max_points: p.score,
                evidence: "由三角形内角和".into(),
                reason: None,
                rubric_reference: Some(p.point_id.clone()),
                review_before: None,
                review_adjusted: false,
            })
            .collect();
        let raw_sum: f64 = points.iter().map(|p| p.awarded).sum();
        let result = QuestionResult {
            question_id: "1".into(),
            score: raw_sum,
            max_score,
            confidence: 0.5,
            scoring_point_results: points,
            feedback: String::new(),
            audit_flags: vec![],
            review_corrections: vec![],
            page_indices: vec![0],
            logic_reviewed: false,
            score_adjusted: false,
        };

        let finalized = finalize_question(&rubric, result, &[], false);

        prop_assert!(finalized.check_invariants());
        for point in &finalized.scoring_point_results {
            prop_assert!(point.awarded >= 0.0 && point.awarded <= point.max_points + 1e-9);
        }
    }
}

fn ctx(service: FakeScoringService) -> StageContext {
    StageContext {
        config: Arc::new(GradingConfig::default()),
        scoring_service: Arc::new(service),
        progress: Arc::new(NoopProgressSink),
        store: Arc::new(InMemoryGradingStore::default()),
        files: Arc::new(InMemoryFileStorage::default()),
    }
}

fn rubric_with_total(total: f64) -> grading::rubric::ParsedRubric {
    normalize_rubric_response(&json!({
        "total_score": total,
        "questions": [{"question_id": "1", "max_score": total, "scoring_points": [{"point_id": "1.1", "description": "x", "score": total}]}]
    }))
    .unwrap()
}

/// Scenario 5 (spec §8): three students fan out into three independent,
/// concurrently-graded `StudentResult`s, one per boundary.
#[tokio::test]
async fn fan_out_grades_three_students_independently() {
    let service = FakeScoringService {
        grade_student_response: json!({
            "status": "ok",
            "total_score": 10,
            "question_details": [{
                "question_id": "1", "score": 10, "max_score": 10, "confidence": 0.9,
                "scoring_point_results": [{"point_id": "1.1", "decision": "awarded", "awarded": 10, "max_points": 10, "evidence": "由三角形内角和", "rubric_reference": "1.1"}]
            }]
        }),
        ..Default::default()
    };

    let answer_images: Vec<String> = (0..6).map(|i| format!("page{i}")).collect();
    let mut state = BatchGradingState::new("b1", GradingInputs { answer_images: answer_images.clone(), ..Default::default() });
    state.processed_images = answer_images;
    state.student_boundaries = grading::boundary::resolve_boundaries(None, Some(&[0, 2, 4]), 6);
    state.parsed_rubric = Some(rubric_with_total(10.0));

    assert_eq!(state.student_boundaries.len(), 3);

    let result = grade_batch::run(&ctx(service), state).await.unwrap();

    assert_eq!(result.student_results.len(), 3);
    let mut keys: Vec<_> = result.student_results.iter().map(|s| s.student_key.clone()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3, "every student fanned out independently, no collapsed/duplicate keys");
    for student in &result.student_results {
        assert_eq!(student.total_score, 10.0);
    }
}

/// Scenario 6 (spec §8, Open Question 3): a regrade merge has no floor on
/// the resulting score — a lower-confidence-but-higher-score candidate
/// loses to a higher-confidence one even if its score is lower.
#[test]
fn regrade_merge_prefers_higher_confidence_over_higher_score() {
    use grading::stages::review::{pick_best_regrade, RegradeCandidate};

    let current = RegradeCandidate { confidence: 0.9, score: 6.0, feedback: "ok".into() };
    let candidate = RegradeCandidate { confidence: 0.4, score: 9.0, feedback: "longer feedback text".into() };

    let picked = pick_best_regrade(current, candidate);
    assert_eq!(picked.confidence, 0.9);
    assert_eq!(picked.score, 6.0);
}

#[test]
fn regrade_merge_allows_score_to_decrease() {
    use grading::stages::review::{pick_best_regrade, RegradeCandidate};

    let current = RegradeCandidate { confidence: 0.5, score: 9.0, feedback: "a".into() };
    let candidate = RegradeCandidate { confidence: 0.95, score: 3.0, feedback: "a".into() };

    let picked = pick_best_regrade(current, candidate);
    assert_eq!(picked.score, 3.0, "higher-confidence regrade wins even though its score is lower");
}
