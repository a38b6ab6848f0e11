//! `BatchGradingState`: the root state threaded through the grading graph
//! (spec §3).
//!
//! Node executors operate on `serde_json::Value` (the graph engine's
//! currency, see `langgraph-core::builder::StateGraph::add_node`); this
//! module provides a typed view for building/reading that JSON plus the
//! [`StateSchema`] declaring each field's reducer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use langgraph_core::state::{AppendReducer, OverwriteReducer, StateSchema, UniqueAppendReducer};

use crate::boundary::StudentBoundary;
use crate::config::GradingMode;
use crate::rubric::ParsedRubric;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: String,
    pub kind: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GradingInputs {
    #[serde(default)]
    pub rubric_text: Option<String>,
    #[serde(default)]
    pub rubric_images: Vec<String>,
    #[serde(default)]
    pub answer_images: Vec<String>,
    #[serde(default)]
    pub student_mapping: Option<Value>,
    #[serde(default)]
    pub manual_boundaries: Option<Vec<i64>>,
    #[serde(default)]
    pub grading_mode: Option<GradingMode>,
}

/// Root state for one grading run. `batch_id` is immutable once set;
/// `percentage` must only ever increase (spec §3 invariants, §8 invariant 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchGradingState {
    pub batch_id: String,
    #[serde(default)]
    pub inputs: GradingInputs,
    #[serde(default)]
    pub timestamps: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub current_stage: String,
    #[serde(default)]
    pub percentage: f64,

    #[serde(default)]
    pub processed_images: Vec<String>,
    #[serde(default)]
    pub student_boundaries: Vec<StudentBoundary>,

    #[serde(default)]
    pub parsed_rubric: Option<ParsedRubric>,
    #[serde(default)]
    pub expected_total_score: Option<f64>,

    #[serde(default)]
    pub student_results: Vec<crate::results::StudentResult>,
    #[serde(default)]
    pub grading_results: Vec<Value>,

    #[serde(default)]
    pub review_queue: Vec<crate::interrupt::ReviewQueueItem>,
    #[serde(default)]
    pub pending_interrupt: Option<Value>,

    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub batch_retry_needed: Option<Value>,
}

impl BatchGradingState {
    pub fn new(batch_id: impl Into<String>, inputs: GradingInputs) -> Self {
        Self {
            batch_id: batch_id.into(),
            inputs,
            timestamps: Default::default(),
            current_stage: "intake".to_string(),
            percentage: 0.0,
            processed_images: Vec::new(),
            student_boundaries: Vec::new(),
            parsed_rubric: None,
            expected_total_score: None,
            student_results: Vec::new(),
            grading_results: Vec::new(),
            review_queue: Vec::new(),
            pending_interrupt: None,
            errors: Vec::new(),
            retry_count: 0,
            batch_retry_needed: None,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Advances `current_stage`/`percentage`, enforcing the monotonicity
    /// invariant (spec §8 invariant 6) by clamping to the prior value if a
    /// caller attempts to go backwards.
    pub fn advance(&mut self, stage: impl Into<String>, percentage: f64) {
        self.current_stage = stage.into();
        self.percentage = percentage.max(self.percentage);
    }

    pub fn record_error(&mut self, stage: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            stage: stage.into(),
            kind: kind.into(),
            message: message.into(),
            timestamp: self.timestamps.get("now").cloned().unwrap_or_default(),
        });
    }
}

/// Declares the reducer for every top-level field of `BatchGradingState`.
/// `last_write_wins` is `StateSchema`'s implicit behavior for fields with no
/// explicit reducer, so only `append`/`unique_append` fields are registered
/// (spec §3).
pub fn schema() -> StateSchema {
    let mut schema = StateSchema::new().with_default_reducer(Box::new(OverwriteReducer));
    schema.add_field("errors", Box::new(AppendReducer));
    schema.add_field("grading_results", Box::new(AppendReducer));
    schema.add_field("student_results", Box::new(UniqueAppendReducer::new("student_key")));
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_never_decreases() {
        let mut state = BatchGradingState::new("b1", GradingInputs::default());
        state.advance("rubric_parse", 40.0);
        state.advance("grade_batch", 30.0);
        assert_eq!(state.percentage, 40.0);
        state.advance("review", 80.0);
        assert_eq!(state.percentage, 80.0);
    }

    #[test]
    fn roundtrips_through_json() {
        let state = BatchGradingState::new("b1", GradingInputs::default());
        let value = state.to_value().unwrap();
        let back = BatchGradingState::from_value(&value).unwrap();
        assert_eq!(back.batch_id, "b1");
    }

    #[test]
    fn student_results_dedup_by_student_key() {
        use langgraph_core::state::Reducer;
        let reducer = UniqueAppendReducer::new("student_key");
        let current = serde_json::json!([{"student_key": "s1", "total_score": 5.0}]);
        let update = serde_json::json!([{"student_key": "s1", "total_score": 8.0}]);
        let merged = reducer.reduce(&current, &update).unwrap();
        assert_eq!(merged.as_array().unwrap().len(), 1);
        assert_eq!(merged[0]["total_score"], 8.0);
    }
}
