//! Applying `rubric_self_review` corrections (spec §4.3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rubric::normalize::renormalize;
use crate::rubric::types::{ParsedRubric, ScoringPoint};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfReviewCorrection {
    pub question_id: String,
    pub field: CorrectionField,
    #[serde(default)]
    pub old_value: Option<Value>,
    pub new_value: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionField {
    MaxScore,
    StandardAnswer,
    ScoringPoints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfReviewResponse {
    pub has_changes: bool,
    #[serde(default)]
    pub changes: Vec<String>,
    pub updated_confidence: f64,
    #[serde(default)]
    pub corrections: Vec<SelfReviewCorrection>,
}

fn parse_scoring_points_value(qid: &str, value: &Value) -> Vec<ScoringPoint> {
    let Some(arr) = value.as_array() else { return Vec::new() };
    arr.iter()
        .enumerate()
        .map(|(i, p)| ScoringPoint {
            point_id: p
                .get("point_id")
                .and_then(|x| x.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("{qid}.{}", i + 1)),
            description: p.get("description").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
            score: p.get("score").and_then(|x| x.as_f64()).unwrap_or(0.0),
            is_required: p.get("is_required").and_then(|x| x.as_bool()).unwrap_or(false),
            keywords: p
                .get("keywords")
                .and_then(|x| x.as_array())
                .map(|a| a.iter().filter_map(|k| k.as_str().map(String::from)).collect())
                .unwrap_or_default(),
            expected_value: p.get("expected_value").and_then(|x| x.as_str()).map(String::from),
        })
        .collect()
}

/// Applies a self-review response to `rubric` in place, per spec §4.3's
/// field-specific merge rules, then re-derives `total_score` and
/// `rubric_context`. `confession.confidence` is always set to
/// `updated_confidence`, even when `has_changes` is false.
pub fn apply_self_review(rubric: &mut ParsedRubric, response: &SelfReviewResponse) {
    for correction in &response.corrections {
        let Some(question) = rubric.find_question_mut(&correction.question_id) else {
            tracing::warn!(
                question_id = %correction.question_id,
                "self-review correction targets unknown question, skipping"
            );
            continue;
        };
        match correction.field {
            CorrectionField::MaxScore => {
                if let Some(new_max) = correction.new_value.as_f64() {
                    question.max_score = new_max;
                }
            }
            CorrectionField::StandardAnswer => {
                if let Some(s) = correction.new_value.as_str() {
                    question.standard_answer = s.to_string();
                }
            }
            CorrectionField::ScoringPoints => {
                question.scoring_points = parse_scoring_points_value(&question.question_id, &correction.new_value);
            }
        }
    }

    rubric.confession.confidence = response.updated_confidence;
    renormalize(rubric);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::types::QuestionRubric;

    fn sample_rubric() -> ParsedRubric {
        ParsedRubric {
            total_questions: 1,
            total_score: 10.0,
            questions: vec![QuestionRubric {
                question_id: "2".into(),
                max_score: 10.0,
                question_text: String::new(),
                standard_answer: String::new(),
                source_pages: vec![],
                scoring_points: vec![],
                deduction_rules: vec![],
                alternative_solutions: vec![],
                confession: None,
                grading_notes: None,
                is_subjective: false,
            }],
            rubric_context: String::new(),
            confession: Default::default(),
            overall_parse_confidence: 0.7,
        }
    }

    #[test]
    fn applies_max_score_correction_and_resums_total() {
        let mut rubric = sample_rubric();
        let response = SelfReviewResponse {
            has_changes: true,
            changes: vec!["Q2 max score uncertain".into()],
            updated_confidence: 0.95,
            corrections: vec![SelfReviewCorrection {
                question_id: "2".into(),
                field: CorrectionField::MaxScore,
                old_value: Some(serde_json::json!(10)),
                new_value: serde_json::json!(12),
                reason: None,
            }],
        };
        apply_self_review(&mut rubric, &response);
        assert_eq!(rubric.questions[0].max_score, 12.0);
        assert_eq!(rubric.total_score, 12.0);
        assert_eq!(rubric.confession.confidence, 0.95);
    }

    #[test]
    fn no_change_response_updates_confidence_only() {
        let mut rubric = sample_rubric();
        let response = SelfReviewResponse {
            has_changes: false,
            changes: vec![],
            updated_confidence: 0.92,
            corrections: vec![],
        };
        apply_self_review(&mut rubric, &response);
        assert_eq!(rubric.questions[0].max_score, 10.0);
        assert_eq!(rubric.confession.confidence, 0.92);
    }
}
