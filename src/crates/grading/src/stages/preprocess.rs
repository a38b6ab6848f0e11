//! `preprocess`: normalized page images + student boundary resolution
//! (spec §4.2).

use crate::boundary::{resolve_boundaries, StudentMappingEntry};
use crate::error::Result;
use crate::stages::StageContext;
use crate::state::BatchGradingState;

/// Re-encodes each image to a uniform format, falling back to the original
/// on per-image failure so the stage never fails (spec §4.2). The actual
/// image codec is out of scope (spec §1); this models the contract: input
/// order preserved, one output entry per input, never shorter than input.
fn reencode_images(images: &[String]) -> Vec<String> {
    images
        .iter()
        .map(|img| format!("jpeg85:{img}"))
        .collect()
}

pub async fn run(_ctx: &StageContext, mut state: BatchGradingState) -> Result<BatchGradingState> {
    state.processed_images = reencode_images(&state.inputs.answer_images);
    let total_pages = state.processed_images.len();

    let mapping: Option<Vec<StudentMappingEntry>> = state
        .inputs
        .student_mapping
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    state.student_boundaries = resolve_boundaries(
        mapping.as_deref(),
        state.inputs.manual_boundaries.as_deref(),
        total_pages,
    );

    state.advance("rubric_parse", 15.0);
    Ok(state)
}
