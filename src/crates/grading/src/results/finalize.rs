//! Deterministic result finalization (spec §4.4).
//!
//! This is the reconciliation pass that runs locally in the `grade_batch`
//! worker, independent of what the scoring service reported. Spec §9:
//! "confidence accounting is a computation, not a field to trust."

use crate::results::types::{AuditFlag, QuestionResult, ReviewCorrection, ScoringDecision, ScoringPointResult};
use crate::rubric::types::QuestionRubric;

const PLACEHOLDER_EVIDENCE: &[&str] = &["未找到", "未识别", "not found", "n/a", ""];
const NO_EVIDENCE_LITERAL: &str = "【原文引用】未找到";

fn is_placeholder(evidence: &str) -> bool {
    let trimmed = evidence.trim();
    PLACEHOLDER_EVIDENCE.iter().any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Per-question finalization. `answer_snippets` is a pool of non-placeholder
/// evidence strings observed for this student/question, used to backfill
/// placeholder evidence (spec §4.4 step 3).
pub fn finalize_question(
    rubric: &QuestionRubric,
    mut result: QuestionResult,
    answer_snippets: &[String],
    used_alternative_solution: bool,
) -> QuestionResult {
    let mut audit_flags = Vec::new();
    let mut corrections = Vec::new();

    if rubric.scoring_points.is_empty() {
        // Boundary case (spec §8): zero expected points -> everything zero.
        result.scoring_point_results.clear();
        result.score = 0.0;
        result.max_score = 0.0;
        result.confidence = 0.0;
        result.audit_flags = Vec::new();
        result.review_corrections = Vec::new();
        return result;
    }

    // Cross-reference expected rubric points against what the service returned.
    let mut by_id: std::collections::HashMap<String, ScoringPointResult> = result
        .scoring_point_results
        .into_iter()
        .map(|p| (p.point_id.clone(), p))
        .collect();

    let mut reconciled = Vec::with_capacity(rubric.scoring_points.len());
    let mut missing_evidence = 0usize;
    let mut missing_rubric_reference = false;
    let mut missing_points = 0usize;
    let expected_points = rubric.scoring_points.len();

    let mut snippet_iter = answer_snippets.iter().filter(|s| !is_placeholder(s));

    for point in &rubric.scoring_points {
        let mut entry = match by_id.remove(&point.point_id) {
            Some(p) => p,
            None => {
                missing_points += 1;
                audit_flags.push(AuditFlag::MissingScoringPoints);
                corrections.push(ReviewCorrection {
                    reason: "Missing scoring point; added with 0 score.".to_string(),
                });
                ScoringPointResult {
                    point_id: point.point_id.clone(),
                    decision: ScoringDecision::NotAwarded,
                    awarded: 0.0,
                    max_points: point.score,
                    evidence: NO_EVIDENCE_LITERAL.to_string(),
                    reason: None,
                    rubric_reference: Some(point.point_id.clone()),
                    review_before: None,
                    review_adjusted: false,
                }
            }
        };

        // Clamp awarded into [0, max_points].
        let max_points = if entry.max_points > 0.0 { entry.max_points } else { point.score };
        let clamped = entry.awarded.clamp(0.0, max_points);
        if (clamped - entry.awarded).abs() > 1e-9 {
            corrections.push(ReviewCorrection {
                reason: format!("Clamped awarded points for {} into [0, {}].", point.point_id, max_points),
            });
            entry.awarded = clamped;
        }
        entry.max_points = max_points;

        if is_placeholder(&entry.evidence) {
            missing_evidence += 1;
            entry.evidence = match snippet_iter.next() {
                Some(snippet) => format!("【原文引用】{}", snippet),
                None => NO_EVIDENCE_LITERAL.to_string(),
            };
        }

        if entry.rubric_reference.is_none() {
            missing_rubric_reference = true;
        }
        if entry.point_id.is_empty() {
            audit_flags.push(AuditFlag::MissingPointId);
        }

        reconciled.push(entry);
    }

    if missing_evidence > 0 {
        audit_flags.push(AuditFlag::MissingEvidence);
    }
    if missing_rubric_reference {
        audit_flags.push(AuditFlag::MissingRubricReference);
    }

    let summed: f64 = reconciled.iter().map(|p| p.awarded).sum();
    let mut score_adjusted = false;
    let reported_score = result.score;
    let score = if (reported_score - summed).abs() > 0.25 {
        score_adjusted = true;
        audit_flags.push(AuditFlag::ScoreAdjusted);
        summed
    } else {
        reported_score
    };
    let score = score.clamp(0.0, rubric.max_score);

    let present_points = expected_points - missing_points;
    let coverage = if expected_points > 0 {
        present_points as f64 / expected_points as f64
    } else {
        1.0
    };
    let evidence_ok = if expected_points > 0 {
        (expected_points - missing_evidence) as f64 / expected_points as f64
    } else {
        1.0
    };
    let consistency = if score_adjusted { 0.6 } else { 1.0 };

    let mut confidence = 0.2 + 0.5 * coverage + 0.2 * evidence_ok + 0.1 * consistency;
    if rubric.is_subjective {
        confidence *= 0.85;
    }
    if used_alternative_solution {
        confidence *= 0.9;
    }
    if missing_rubric_reference {
        let covered = reconciled.iter().filter(|p| p.rubric_reference.is_some()).count();
        let rubric_ref_coverage = if reconciled.is_empty() {
            0.0
        } else {
            covered as f64 / reconciled.len() as f64
        };
        confidence *= 0.6 + 0.4 * rubric_ref_coverage;
    }
    let confidence = confidence.clamp(0.0, 1.0);

    QuestionResult {
        question_id: result.question_id,
        score,
        max_score: rubric.max_score,
        confidence,
        scoring_point_results: reconciled,
        feedback: result.feedback,
        audit_flags,
        review_corrections: corrections,
        page_indices: result.page_indices,
        logic_reviewed: result.logic_reviewed,
        score_adjusted,
    }
}

/// For "assist" grading modes (spec §4.4): zero every score and keep only
/// feedback, with no scoring-point expansion.
pub fn finalize_assist(mut result: QuestionResult) -> QuestionResult {
    result.score = 0.0;
    result.scoring_point_results.clear();
    result.audit_flags.clear();
    result.review_corrections.clear();
    result.confidence = 0.0;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::types::ScoringPoint;

    fn rubric_two_points() -> QuestionRubric {
        QuestionRubric {
            question_id: "1".into(),
            max_score: 10.0,
            question_text: String::new(),
            standard_answer: String::new(),
            source_pages: vec![],
            scoring_points: vec![
                ScoringPoint {
                    point_id: "1.1".into(),
                    description: "a".into(),
                    score: 6.0,
                    is_required: false,
                    keywords: vec![],
                    expected_value: None,
                },
                ScoringPoint {
                    point_id: "1.2".into(),
                    description: "b".into(),
                    score: 4.0,
                    is_required: false,
                    keywords: vec![],
                    expected_value: None,
                },
            ],
            deduction_rules: vec![],
            alternative_solutions: vec![],
            confession: None,
            grading_notes: None,
            is_subjective: false,
        }
    }

    fn raw_result(score: f64, points: Vec<ScoringPointResult>) -> QuestionResult {
        QuestionResult {
            question_id: "1".into(),
            score,
            max_score: 10.0,
            confidence: 0.99,
            scoring_point_results: points,
            feedback: "ok".into(),
            audit_flags: vec![],
            review_corrections: vec![],
            page_indices: vec![0],
            logic_reviewed: false,
            score_adjusted: false,
        }
    }

    #[test]
    fn score_clamps_to_sum_when_mismatched() {
        let rubric = rubric_two_points();
        let result = raw_result(
            11.0,
            vec![
                ScoringPointResult {
                    point_id: "1.1".into(),
                    decision: ScoringDecision::Awarded,
                    awarded: 6.0,
                    max_points: 6.0,
                    evidence: "由三角形内角和".into(),
                    reason: None,
                    rubric_reference: Some("1.1".into()),
                    review_before: None,
                    review_adjusted: false,
                },
                ScoringPointResult {
                    point_id: "1.2".into(),
                    decision: ScoringDecision::PartiallyAwarded,
                    awarded: 3.3,
                    max_points: 4.0,
                    evidence: "未找到".into(),
                    reason: None,
                    rubric_reference: Some("1.2".into()),
                    review_before: None,
                    review_adjusted: false,
                },
            ],
        );

        let finalized = finalize_question(&rubric, result, &["由三角形内角和".to_string()], false);
        assert_eq!(finalized.score, 9.3);
        assert!(finalized.audit_flags.contains(&AuditFlag::ScoreAdjusted));
        assert!(finalized.check_invariants());
    }

    #[test]
    fn placeholder_evidence_rewritten_from_snippet() {
        let rubric = rubric_two_points();
        let result = raw_result(
            10.0,
            vec![
                ScoringPointResult {
                    point_id: "1.1".into(),
                    decision: ScoringDecision::Awarded,
                    awarded: 6.0,
                    max_points: 6.0,
                    evidence: "未找到".into(),
                    reason: None,
                    rubric_reference: Some("1.1".into()),
                    review_before: None,
                    review_adjusted: false,
                },
                ScoringPointResult {
                    point_id: "1.2".into(),
                    decision: ScoringDecision::Awarded,
                    awarded: 4.0,
                    max_points: 4.0,
                    evidence: "solid".into(),
                    reason: None,
                    rubric_reference: Some("1.2".into()),
                    review_before: None,
                    review_adjusted: false,
                },
            ],
        );
        let finalized = finalize_question(&rubric, result, &["由三角形内角和".to_string()], false);
        assert_eq!(finalized.scoring_point_results[0].evidence, "【原文引用】由三角形内角和");
    }

    #[test]
    fn missing_scoring_point_is_added_with_zero() {
        let rubric = rubric_two_points();
        let result = raw_result(
            6.0,
            vec![ScoringPointResult {
                point_id: "1.1".into(),
                decision: ScoringDecision::Awarded,
                awarded: 6.0,
                max_points: 6.0,
                evidence: "ok".into(),
                reason: None,
                rubric_reference: Some("1.1".into()),
                review_before: None,
                review_adjusted: false,
            }],
        );
        let finalized = finalize_question(&rubric, result, &[], false);
        assert_eq!(finalized.scoring_point_results.len(), 2);
        assert_eq!(finalized.scoring_point_results[1].awarded, 0.0);
        assert!(finalized.audit_flags.contains(&AuditFlag::MissingScoringPoints));
    }

    #[test]
    fn zero_expected_points_yields_zero_result() {
        let mut rubric = rubric_two_points();
        rubric.scoring_points.clear();
        rubric.max_score = 0.0;
        let result = raw_result(0.0, vec![]);
        let finalized = finalize_question(&rubric, result, &[], false);
        assert_eq!(finalized.score, 0.0);
        assert_eq!(finalized.max_score, 0.0);
        assert_eq!(finalized.confidence, 0.0);
        assert!(finalized.scoring_point_results.is_empty());
    }

    #[test]
    fn finalization_is_idempotent() {
        let rubric = rubric_two_points();
        let result = raw_result(
            10.0,
            vec![
                ScoringPointResult {
                    point_id: "1.1".into(),
                    decision: ScoringDecision::Awarded,
                    awarded: 6.0,
                    max_points: 6.0,
                    evidence: "a".into(),
                    reason: None,
                    rubric_reference: Some("1.1".into()),
                    review_before: None,
                    review_adjusted: false,
                },
                ScoringPointResult {
                    point_id: "1.2".into(),
                    decision: ScoringDecision::Awarded,
                    awarded: 4.0,
                    max_points: 4.0,
                    evidence: "b".into(),
                    reason: None,
                    rubric_reference: Some("1.2".into()),
                    review_before: None,
                    review_adjusted: false,
                },
            ],
        );
        let once = finalize_question(&rubric, result, &[], false);
        let twice = finalize_question(&rubric, once.clone(), &[], false);
        assert_eq!(once.score, twice.score);
        assert_eq!(once.scoring_point_results, twice.scoring_point_results);
    }
}
