//! Error types for the grading orchestrator.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GradingError>;

/// Errors that can occur while running a grading batch or a rule-upgrade run.
#[derive(Error, Debug)]
pub enum GradingError {
    /// The graph engine reported a failure (node execution, validation, interrupt).
    #[error("graph execution failed: {0}")]
    Graph(#[from] langgraph_core::error::GraphError),

    /// A reducer or schema application failed while merging state.
    #[error("state error: {0}")]
    State(#[from] langgraph_core::state::StateError),

    /// The rubric document could not be parsed into a `ParsedRubric`.
    #[error("rubric parse failed: {0}")]
    RubricParse(String),

    /// Student boundary resolution could not produce a consistent page mapping.
    #[error("boundary resolution failed: {0}")]
    BoundaryResolution(String),

    /// The scoring service returned a response that failed validation.
    #[error("scoring service returned an invalid response for {operation}: {reason}")]
    InvalidScoringResponse { operation: String, reason: String },

    /// The scoring service call failed after exhausting its retry policy.
    #[error("scoring service call '{operation}' failed after {attempts} attempts: {source}")]
    ScoringServiceExhausted {
        operation: String,
        attempts: usize,
        #[source]
        source: Box<GradingError>,
    },

    /// A transport-level error talking to the scoring service.
    #[error("scoring service transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The persistent store failed to read or write a record.
    #[error("store error: {0}")]
    Store(String),

    /// Serialization/deserialization of a domain value failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O failure while reading rubric/answer files or writing export artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration was missing or internally inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The batch is paused awaiting a human review decision.
    ///
    /// Not a failure: callers should persist `request` and resume later with
    /// the matching `InterruptResponse`.
    #[error("awaiting human input at '{node}': {reason}")]
    AwaitingReview { node: String, reason: String },
}

impl GradingError {
    pub fn rubric_parse(reason: impl Into<String>) -> Self {
        Self::RubricParse(reason.into())
    }

    pub fn invalid_scoring_response(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidScoringResponse {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}
