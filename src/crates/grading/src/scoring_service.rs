//! The scoring-service client interface (spec §6) and its implementations.
//!
//! Mirrors the `ChatModel` trait/provider split in the graph engine's `llm`
//! crate: one minimal trait, a `reqwest`-backed HTTP implementation, and an
//! in-memory fake for tests.

use std::sync::Arc;

use async_trait::async_trait;
use langgraph_core::messages::ContentPart;
use serde_json::Value;

use crate::error::{GradingError, Result};

/// `streamCb(type, chunk)` forwarded unchanged to the progress sink (spec
/// §6). `type` is `"output"`, `"thinking"`, or `"<phase>:<type>"`.
pub type StreamCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

fn no_stream() -> StreamCallback {
    Arc::new(|_, _| {})
}

/// One rubric or answer page, ready to ship to the scoring service.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_index: usize,
    pub content: ContentPart,
}

impl PageImage {
    pub fn from_url(page_index: usize, url: impl Into<String>) -> Self {
        Self {
            page_index,
            content: ContentPart::image_url(url),
        }
    }

    pub fn from_data(page_index: usize, media_type: &str, data: &str) -> Self {
        Self {
            page_index,
            content: ContentPart::image_data(media_type, data),
        }
    }
}

/// The external vision/LLM grading backend (spec §6). All five operations
/// are call-and-parse-JSON; validation of the returned shape is the
/// caller's job (done in `rubric::normalize`, `results::finalize`, and the
/// stage modules), not this trait's.
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn parse_rubric(&self, images: &[PageImage], stream: StreamCallback) -> Result<Value>;

    async fn revise_rubric_questions(&self, selected_questions: &[Value], notes: &str) -> Result<Vec<Value>>;

    async fn grade_student(
        &self,
        images: &[PageImage],
        student_key: &str,
        parsed_rubric: &Value,
        page_indices: &[usize],
        page_contexts: &[String],
        stream: StreamCallback,
    ) -> Result<Value>;

    async fn grade_single_question(
        &self,
        image: &PageImage,
        question_id: &str,
        page_index: usize,
        reviewer_notes: Option<&str>,
    ) -> Result<Value>;

    async fn analyze_with_vision(&self, images: &[PageImage], prompt: &str, stream: StreamCallback) -> Result<String>;

    /// Whether this service is backed by a real LLM/vision model, mirroring
    /// `ChatModel::is_available`. `logic_review` uses this to decide between
    /// its LLM pass and the deterministic rule-based fallback (spec §4.5).
    fn is_llm_backed(&self) -> bool {
        true
    }
}

/// Convenience wrapper so call sites don't have to build a no-op callback.
pub async fn parse_rubric(service: &dyn ScoringService, images: &[PageImage]) -> Result<Value> {
    service.parse_rubric(images, no_stream()).await
}

/// HTTP-backed implementation over a JSON scoring-service endpoint.
pub struct ReqwestScoringService {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestScoringService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(GradingError::invalid_scoring_response(path, format!("HTTP {status}")));
        }
        Ok(body)
    }
}

fn images_payload(images: &[PageImage]) -> Value {
    Value::Array(
        images
            .iter()
            .map(|img| {
                serde_json::json!({
                    "page_index": img.page_index,
                    "content": match &img.content {
                        ContentPart::Image { url, source } => serde_json::json!({ "url": url, "source": source }),
                        other => serde_json::to_value(other).unwrap_or(Value::Null),
                    }
                })
            })
            .collect(),
    )
}

#[async_trait]
impl ScoringService for ReqwestScoringService {
    async fn parse_rubric(&self, images: &[PageImage], _stream: StreamCallback) -> Result<Value> {
        self.post_json("parse_rubric", serde_json::json!({ "images": images_payload(images) }))
            .await
    }

    async fn revise_rubric_questions(&self, selected_questions: &[Value], notes: &str) -> Result<Vec<Value>> {
        let response = self
            .post_json(
                "revise_rubric_questions",
                serde_json::json!({ "questions": selected_questions, "notes": notes }),
            )
            .await?;
        response
            .as_array()
            .cloned()
            .ok_or_else(|| GradingError::invalid_scoring_response("revise_rubric_questions", "expected a JSON array"))
    }

    async fn grade_student(
        &self,
        images: &[PageImage],
        student_key: &str,
        parsed_rubric: &Value,
        page_indices: &[usize],
        page_contexts: &[String],
        _stream: StreamCallback,
    ) -> Result<Value> {
        self.post_json(
            "grade_student",
            serde_json::json!({
                "images": images_payload(images),
                "student_key": student_key,
                "parsed_rubric": parsed_rubric,
                "page_indices": page_indices,
                "page_contexts": page_contexts,
            }),
        )
        .await
    }

    async fn grade_single_question(
        &self,
        image: &PageImage,
        question_id: &str,
        page_index: usize,
        reviewer_notes: Option<&str>,
    ) -> Result<Value> {
        self.post_json(
            "grade_single_question",
            serde_json::json!({
                "image": images_payload(std::slice::from_ref(image)),
                "question_id": question_id,
                "page_index": page_index,
                "reviewer_notes": reviewer_notes,
            }),
        )
        .await
    }

    async fn analyze_with_vision(&self, images: &[PageImage], prompt: &str, _stream: StreamCallback) -> Result<String> {
        let response = self
            .post_json(
                "analyze_with_vision",
                serde_json::json!({ "images": images_payload(images), "prompt": prompt }),
            )
            .await?;
        response
            .get("response")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| GradingError::invalid_scoring_response("analyze_with_vision", "missing `response` field"))
    }
}

/// Scripted in-memory fake for tests and the demo CLI binary. Responses are
/// configured up front; calls beyond the configured count replay the last
/// response.
pub struct FakeScoringService {
    pub rubric_response: Value,
    pub grade_student_response: Value,
    pub grade_single_question_response: Value,
    pub analyze_response: String,
    pub revise_response: Vec<Value>,
    /// Defaults to `false`: the fake has no model behind it, so
    /// `logic_review` exercises its rule-based fallback by default.
    pub llm_backed: bool,
}

impl Default for FakeScoringService {
    fn default() -> Self {
        Self {
            rubric_response: serde_json::json!({ "questions": [] }),
            grade_student_response: serde_json::json!({ "status": "ok", "question_details": [] }),
            grade_single_question_response: serde_json::json!({ "status": "ok" }),
            analyze_response: String::new(),
            revise_response: Vec::new(),
            llm_backed: false,
        }
    }
}

#[async_trait]
impl ScoringService for FakeScoringService {
    async fn parse_rubric(&self, _images: &[PageImage], _stream: StreamCallback) -> Result<Value> {
        Ok(self.rubric_response.clone())
    }

    async fn revise_rubric_questions(&self, _selected_questions: &[Value], _notes: &str) -> Result<Vec<Value>> {
        Ok(self.revise_response.clone())
    }

    async fn grade_student(
        &self,
        _images: &[PageImage],
        _student_key: &str,
        _parsed_rubric: &Value,
        _page_indices: &[usize],
        _page_contexts: &[String],
        _stream: StreamCallback,
    ) -> Result<Value> {
        Ok(self.grade_student_response.clone())
    }

    async fn grade_single_question(
        &self,
        _image: &PageImage,
        _question_id: &str,
        _page_index: usize,
        _reviewer_notes: Option<&str>,
    ) -> Result<Value> {
        Ok(self.grade_single_question_response.clone())
    }

    async fn analyze_with_vision(&self, _images: &[PageImage], _prompt: &str, _stream: StreamCallback) -> Result<String> {
        Ok(self.analyze_response.clone())
    }

    fn is_llm_backed(&self) -> bool {
        self.llm_backed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_service_replays_configured_response() {
        let fake = FakeScoringService {
            rubric_response: serde_json::json!({ "total_score": 10 }),
            ..Default::default()
        };
        let result = parse_rubric(&fake, &[]).await.unwrap();
        assert_eq!(result["total_score"], 10);
    }
}
