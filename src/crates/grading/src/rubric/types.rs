//! Structured rubric types (spec §3, §4.3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Confession {
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub uncertainties: Vec<String>,
    #[serde(default, rename = "blindSpots")]
    pub blind_spots: Vec<String>,
    #[serde(default, rename = "needsReview")]
    pub needs_review: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl Confession {
    /// Self-review trigger condition (spec §4.3): any of `needsReview`,
    /// `risks`, `uncertainties` non-empty, or confidence below 0.9.
    pub fn needs_self_review(&self) -> bool {
        !self.needs_review.is_empty()
            || !self.risks.is_empty()
            || !self.uncertainties.is_empty()
            || self.confidence < 0.9
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringPoint {
    pub point_id: String,
    pub description: String,
    pub score: f64,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub expected_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeductionRule {
    pub rule_id: String,
    pub description: String,
    pub deduction: f64,
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlternativeSolution {
    pub description: String,
    #[serde(default)]
    pub scoring_criteria: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionRubric {
    pub question_id: String,
    pub max_score: f64,
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub standard_answer: String,
    #[serde(default)]
    pub source_pages: Vec<usize>,
    pub scoring_points: Vec<ScoringPoint>,
    #[serde(default)]
    pub deduction_rules: Vec<DeductionRule>,
    #[serde(default)]
    pub alternative_solutions: Vec<AlternativeSolution>,
    #[serde(default)]
    pub confession: Option<Confession>,
    #[serde(default)]
    pub grading_notes: Option<String>,
    /// True for subjective/essay-type questions (spec §4.4 confidence
    /// scaling); derived from rubric metadata, not part of the wire schema.
    #[serde(default)]
    pub is_subjective: bool,
}

impl QuestionRubric {
    /// `max_score == Σ scoring_points.score`. Used both to validate and,
    /// when `max_score` was absent on parse, to derive it (spec §4.3).
    pub fn sum_scoring_points(&self) -> f64 {
        self.scoring_points.iter().map(|p| p.score).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedRubric {
    pub total_questions: usize,
    pub total_score: f64,
    pub questions: Vec<QuestionRubric>,
    /// Flat, human-readable rendering of `questions`, regenerated after
    /// every mutation (spec §9: "rubric context is a derived view").
    #[serde(default)]
    pub rubric_context: String,
    #[serde(default)]
    pub confession: Confession,
    #[serde(default)]
    pub overall_parse_confidence: f64,
}

impl ParsedRubric {
    /// Normalization invariant: `total_score == Σ questions.max_score`
    /// within ±1.0 (spec §3, §8 invariant 5).
    pub fn total_matches_questions(&self) -> bool {
        let summed: f64 = self.questions.iter().map(|q| q.max_score).sum();
        (self.total_score - summed).abs() <= 1.0
    }

    pub fn find_question(&self, question_id: &str) -> Option<&QuestionRubric> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }

    pub fn find_question_mut(&mut self, question_id: &str) -> Option<&mut QuestionRubric> {
        self.questions.iter_mut().find(|q| q.question_id == question_id)
    }
}
