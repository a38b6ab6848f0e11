//! Rubric normalization: turning the scoring service's raw rubric-parse JSON
//! (spec §4.3) into a [`ParsedRubric`], synthesizing missing ids, and
//! deriving `rubric_context`.

use serde_json::Value;

use crate::error::{GradingError, Result};
use crate::rubric::types::{
    AlternativeSolution, Confession, DeductionRule, ParsedRubric, QuestionRubric, ScoringPoint,
};

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn strip_vec_str(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(|a| a.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn parse_confession(v: &Value) -> Confession {
    let Some(obj) = v.get("confession") else {
        return Confession::default();
    };
    Confession {
        risks: strip_vec_str(obj, "risks"),
        uncertainties: strip_vec_str(obj, "uncertainties"),
        blind_spots: strip_vec_str(obj, "blindSpots"),
        needs_review: strip_vec_str(obj, "needsReview"),
        confidence: obj.get("confidence").and_then(as_f64).unwrap_or(1.0),
    }
}

fn normalize_question_id(raw: &str) -> String {
    let mut s = raw.trim();
    for prefix in ["第", "题目", "Q", "q"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest;
        }
    }
    s.trim_matches(|c: char| c == '题' || c == '号' || c.is_whitespace())
        .to_string()
}

fn parse_scoring_points(qid: &str, v: &Value) -> Vec<ScoringPoint> {
    let Some(arr) = v.get("scoring_points").and_then(|x| x.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .enumerate()
        .map(|(i, p)| {
            let point_id = p
                .get("point_id")
                .and_then(|x| x.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("{qid}.{}", i + 1));
            ScoringPoint {
                point_id,
                description: p
                    .get("description")
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: p.get("score").and_then(as_f64).unwrap_or(0.0),
                is_required: p.get("is_required").and_then(|x| x.as_bool()).unwrap_or(false),
                keywords: strip_vec_str(p, "keywords"),
                expected_value: p
                    .get("expected_value")
                    .and_then(|x| x.as_str())
                    .map(String::from),
            }
        })
        .collect()
}

fn parse_deduction_rules(qid: &str, v: &Value) -> Vec<DeductionRule> {
    let Some(arr) = v.get("deduction_rules").and_then(|x| x.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .enumerate()
        .map(|(i, r)| {
            let rule_id = r
                .get("rule_id")
                .and_then(|x| x.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("{qid}.d{}", i + 1));
            DeductionRule {
                rule_id,
                description: r
                    .get("description")
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string(),
                deduction: r.get("deduction").and_then(as_f64).unwrap_or(0.0),
                conditions: strip_vec_str(r, "conditions"),
            }
        })
        .collect()
}

fn parse_alternative_solutions(v: &Value) -> Vec<AlternativeSolution> {
    let Some(arr) = v.get("alternative_solutions").and_then(|x| x.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .map(|a| AlternativeSolution {
            description: a
                .get("description")
                .and_then(|x| x.as_str())
                .unwrap_or_default()
                .to_string(),
            scoring_criteria: a
                .get("scoring_criteria")
                .and_then(|x| x.as_str())
                .map(String::from),
            note: a.get("note").and_then(|x| x.as_str()).map(String::from),
        })
        .collect()
}

fn parse_question(raw: &Value) -> QuestionRubric {
    let raw_id = raw
        .get("question_id")
        .or_else(|| raw.get("id"))
        .and_then(|x| x.as_str().map(String::from).or_else(|| x.as_i64().map(|n| n.to_string())))
        .unwrap_or_default();
    let question_id = normalize_question_id(&raw_id);

    let scoring_points = parse_scoring_points(&question_id, raw);
    let declared_max = raw.get("max_score").and_then(as_f64);
    let max_score = declared_max.unwrap_or_else(|| scoring_points.iter().map(|p| p.score).sum());

    QuestionRubric {
        question_id,
        max_score,
        question_text: raw
            .get("question_text")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string(),
        standard_answer: raw
            .get("standard_answer")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string(),
        source_pages: raw
            .get("source_pages")
            .and_then(|x| x.as_array())
            .map(|a| a.iter().filter_map(|p| p.as_u64().map(|n| n as usize)).collect())
            .unwrap_or_default(),
        deduction_rules: parse_deduction_rules(&raw_id_or(&question_id), raw),
        alternative_solutions: parse_alternative_solutions(raw),
        confession: raw.get("confession").map(parse_confession_inline),
        grading_notes: raw.get("grading_notes").and_then(|x| x.as_str()).map(String::from),
        is_subjective: raw
            .get("question_type")
            .and_then(|x| x.as_str())
            .map(|t| t.eq_ignore_ascii_case("subjective") || t.eq_ignore_ascii_case("essay"))
            .unwrap_or(false),
        scoring_points,
    }
}

fn raw_id_or(qid: &str) -> String {
    qid.to_string()
}

fn parse_confession_inline(v: &Value) -> Confession {
    Confession {
        risks: strip_vec_str(v, "risk").into_iter().chain(strip_vec_str(v, "risks")).collect(),
        uncertainties: strip_vec_str(v, "uncertainty")
            .into_iter()
            .chain(strip_vec_str(v, "uncertainties"))
            .collect(),
        blind_spots: strip_vec_str(v, "blindSpots"),
        needs_review: strip_vec_str(v, "needsReview"),
        confidence: v.get("confidence").and_then(as_f64).unwrap_or(1.0),
    }
}

/// Renders the deterministic `rubric_context` view: a header line plus one
/// block per question (spec §4.3, §9 "rubric context is a derived view").
pub fn render_rubric_context(rubric: &ParsedRubric) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Rubric: {} questions, total score {}\n",
        rubric.total_questions, rubric.total_score
    ));
    for q in &rubric.questions {
        out.push_str(&format!(
            "\n[{}] max_score={}\n{}\n",
            q.question_id, q.max_score, q.question_text
        ));
        for p in &q.scoring_points {
            out.push_str(&format!("  - ({}) {} [{}pt]\n", p.point_id, p.description, p.score));
        }
    }
    out
}

/// Parses the scoring service's `ParseRubric` response (spec §4.3 JSON
/// shape) into a [`ParsedRubric`], synthesizing ids and re-deriving
/// `rubric_context`. Idempotent: feeding an already-normalized rubric's
/// serialized form back through this function reproduces the same value
/// (spec §8 round-trip law).
pub fn normalize_rubric_response(raw: &Value) -> Result<ParsedRubric> {
    let questions_raw = raw
        .get("questions")
        .and_then(|x| x.as_array())
        .ok_or_else(|| GradingError::rubric_parse("response missing `questions` array"))?;

    let questions: Vec<QuestionRubric> = questions_raw.iter().map(parse_question).collect();

    let total_questions = raw
        .get("total_questions")
        .and_then(|x| x.as_u64())
        .map(|n| n as usize)
        .unwrap_or(questions.len());

    let total_score = raw
        .get("total_score")
        .and_then(as_f64)
        .filter(|v| *v > 0.0)
        .unwrap_or_else(|| questions.iter().map(|q| q.max_score).sum());

    let confession = parse_confession(raw);
    let overall_parse_confidence = raw
        .get("overall_parse_confidence")
        .and_then(as_f64)
        .unwrap_or(confession.confidence);

    let mut rubric = ParsedRubric {
        total_questions,
        total_score,
        questions,
        rubric_context: String::new(),
        confession,
        overall_parse_confidence,
    };
    rubric.rubric_context = render_rubric_context(&rubric);
    Ok(rubric)
}

/// Re-normalizes an already-built [`ParsedRubric`] (used after applying
/// self-review corrections, or to verify the idempotence law in §8).
pub fn renormalize(rubric: &mut ParsedRubric) {
    rubric.total_score = rubric.questions.iter().map(|q| q.max_score).sum();
    rubric.total_questions = rubric.questions.len();
    rubric.rubric_context = render_rubric_context(rubric);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synthesizes_missing_point_ids_and_total() {
        let raw = json!({
            "total_score": null,
            "questions": [{
                "id": "1",
                "max_score": 10,
                "scoring_points": [
                    {"description": "x", "score": 6},
                    {"description": "y", "score": 4}
                ]
            }]
        });
        let rubric = normalize_rubric_response(&raw).unwrap();
        assert_eq!(rubric.total_score, 10.0);
        assert_eq!(rubric.questions[0].scoring_points[0].point_id, "1.1");
        assert_eq!(rubric.questions[0].scoring_points[1].point_id, "1.2");
    }

    #[test]
    fn max_score_defaults_to_sum_of_points() {
        let raw = json!({
            "questions": [{
                "question_id": "Q2",
                "scoring_points": [{"description": "a", "score": 3}, {"description": "b", "score": 2}]
            }]
        });
        let rubric = normalize_rubric_response(&raw).unwrap();
        assert_eq!(rubric.questions[0].max_score, 5.0);
        assert_eq!(rubric.questions[0].question_id, "2");
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = json!({
            "total_score": 10,
            "questions": [{"question_id": "1", "max_score": 10, "scoring_points": [{"point_id": "1.1", "description": "x", "score": 10}]}]
        });
        let mut rubric = normalize_rubric_response(&raw).unwrap();
        let first_context = rubric.rubric_context.clone();
        renormalize(&mut rubric);
        assert_eq!(rubric.rubric_context, first_context);
        assert_eq!(rubric.total_score, 10.0);
    }

    #[test]
    fn strips_question_id_prefixes() {
        assert_eq!(normalize_question_id("第3题"), "3");
        assert_eq!(normalize_question_id("Q5"), "5");
        assert_eq!(normalize_question_id("题目2"), "2");
    }
}
