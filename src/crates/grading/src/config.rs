//! Run configuration for the grading pipelines.
//!
//! A single [`GradingConfig`] is built once (by the CLI, or by a caller
//! embedding this crate) and threaded through the graph builder. Nothing in
//! `stages::*` reads from the environment or a process-wide static.

use serde::{Deserialize, Serialize};

/// Grading mode, closed set per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingMode {
    Standard,
    Auto,
    AssistTeacher,
    AssistStudent,
}

impl GradingMode {
    /// Whether this mode skips scoring-point expansion and zeroes scores,
    /// keeping only feedback (spec §4.4, "assist" grading modes).
    pub fn is_assist(&self) -> bool {
        matches!(self, GradingMode::AssistTeacher | GradingMode::AssistStudent)
    }
}

impl Default for GradingMode {
    fn default() -> Self {
        GradingMode::Standard
    }
}

/// Character-cap knobs for output trimming (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimLimits {
    pub feedback_chars: usize,
    pub evidence_chars: usize,
    pub reason_chars: usize,
    pub summary_chars: usize,
    pub honesty_note_chars: usize,
}

impl Default for TrimLimits {
    fn default() -> Self {
        Self {
            feedback_chars: 160,
            evidence_chars: 120,
            reason_chars: 100,
            summary_chars: 200,
            honesty_note_chars: 90,
        }
    }
}

/// All tunables for a grading run. Deserializable from JSON/YAML so the CLI
/// can load it from a config file; every field defaults to the value named
/// in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Fallback page-batch size when no student boundaries are supplied.
    /// `0` is treated as "one batch of all pages" (spec §8 boundary case).
    pub batch_size: usize,

    /// Fan-out parallelism ceiling for `grade_batch` workers.
    pub max_concurrent_workers: usize,

    /// Per-worker retry budget (distinct from the scoring-service retry
    /// policies in `retry.rs`; this bounds `grade_batch` unit rescheduling).
    pub max_retries: usize,

    /// Base delay in seconds for worker retries.
    pub retry_delay_secs: f64,

    pub rubric_parse_timeout_secs: u64,
    pub grading_llm_timeout_secs: u64,
    pub logic_review_timeout_secs: u64,

    pub logic_review_max_workers: usize,
    /// `0` means "review all questions".
    pub logic_review_max_questions: usize,
    pub logic_review_confidence_threshold: f64,

    pub review_threshold: f64,
    pub review_queue_max_items: usize,

    pub trim: TrimLimits,

    pub enable_review: bool,
    pub grading_mode: GradingMode,
    pub disable_progress_broadcast: bool,
    pub export_dir: String,

    /// Optional expected total score; when set, a positive-but-low parsed
    /// total fails the pipeline with `rubric_score_mismatch` (spec §4.3).
    pub expected_total_score: Option<f64>,

    /// Interrupt timeout in seconds for rule-upgrade approval; `None`
    /// disables the guard for grading review, as spec'd (§6, §7).
    pub interrupt_timeout_secs: Option<u64>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_workers: 5,
            max_retries: 2,
            retry_delay_secs: 1.0,
            rubric_parse_timeout_secs: 600,
            grading_llm_timeout_secs: 120,
            logic_review_timeout_secs: 90,
            logic_review_max_workers: 3,
            logic_review_max_questions: 0,
            logic_review_confidence_threshold: 0.7,
            review_threshold: 0.7,
            review_queue_max_items: 200,
            trim: TrimLimits::default(),
            enable_review: true,
            grading_mode: GradingMode::default(),
            disable_progress_broadcast: false,
            export_dir: "./grading_exports".to_string(),
            expected_total_score: None,
            interrupt_timeout_secs: None,
        }
    }
}

impl GradingConfig {
    /// Effective fallback batch size, treating `0` as "all pages in one
    /// batch" (spec §8 boundary behavior).
    pub fn effective_batch_size(&self, total_pages: usize) -> usize {
        if self.batch_size == 0 {
            total_pages.max(1)
        } else {
            self.batch_size
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
