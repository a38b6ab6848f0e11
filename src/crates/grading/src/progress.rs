//! Progress/event broadcast (spec §3 `ProgressEvent`, §6, §9).
//!
//! The sink is best-effort: every call site swallows and logs failures
//! rather than propagating them into the workflow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Tagged union of the event shapes named in spec §6. Represented as an
/// externally-tagged enum so JSON serialization matches the wire shapes
/// consumed by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    #[serde(rename = "agent_update")]
    AgentUpdate {
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "parentNodeId")]
        parent_node_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "llm_stream_chunk")]
    LlmStreamChunk {
        #[serde(rename = "nodeId")]
        node_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "streamType")]
        stream_type: String,
        chunk: String,
    },
    #[serde(rename = "rubric_parsed")]
    RubricParsed {
        #[serde(rename = "totalQuestions")]
        total_questions: usize,
        #[serde(rename = "totalScore")]
        total_score: f64,
        questions: serde_json::Value,
    },
    #[serde(rename = "rubric_self_reviewed")]
    RubricSelfReviewed {
        batch_id: String,
        changes_made: Vec<String>,
        confidence_before: f64,
        confidence_after: f64,
    },
    #[serde(rename = "rubric_score_mismatch")]
    RubricScoreMismatch {
        expected_total_score: f64,
        parsed_total_score: f64,
        message: String,
    },
    #[serde(rename = "workflow_error")]
    WorkflowError { error: String, stage: String },
}

/// Best-effort sink consumed by every stage. Implementations MUST NOT
/// return an error that the caller would propagate into the workflow;
/// `send` returning `Err` is only ever logged by the caller, never
/// surfaced further (spec §4.1, §5, §9).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn send(&self, batch_id: &str, event: ProgressEvent) -> Result<(), String>;
}

/// Discards every event. Used when `disable_progress_broadcast` is set.
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn send(&self, _batch_id: &str, _event: ProgressEvent) -> Result<(), String> {
        Ok(())
    }
}

/// Bounded-channel sink: events are pushed onto a `tokio::sync::mpsc`
/// channel for a separate consumer (e.g. an HTTP/WS layer, out of scope
/// here) to drain. A full channel is treated as backpressure, not an error:
/// the event is dropped and a warning logged by the caller.
pub struct ChannelProgressSink {
    sender: tokio::sync::mpsc::Sender<(String, ProgressEvent)>,
}

impl ChannelProgressSink {
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<(String, ProgressEvent)>) {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn send(&self, batch_id: &str, event: ProgressEvent) -> Result<(), String> {
        self.sender
            .try_send((batch_id.to_string(), event))
            .map_err(|e| e.to_string())
    }
}

/// Calls `sink.send`, logging and swallowing any failure. Every stage
/// should call this rather than the trait method directly.
pub async fn emit(sink: &dyn ProgressSink, batch_id: &str, event: ProgressEvent) {
    if let Err(err) = sink.send(batch_id, event).await {
        tracing::warn!(batch_id, error = %err, "progress broadcast failed, dropping event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_sink_never_fails() {
        let sink = NoopProgressSink;
        emit(
            &sink,
            "batch-1",
            ProgressEvent::WorkflowError {
                error: "x".into(),
                stage: "intake".into(),
            },
        )
        .await;
    }

    #[tokio::test]
    async fn channel_sink_delivers_and_backpressures() {
        let (sink, mut rx) = ChannelProgressSink::new(1);
        emit(
            &sink,
            "batch-1",
            ProgressEvent::AgentUpdate {
                agent_id: "a1".into(),
                parent_node_id: "grade_batch".into(),
                status: "running".into(),
                progress: Some(0.5),
                message: None,
            },
        )
        .await;
        // Second send overflows the bounded channel; emit() must not panic.
        emit(
            &sink,
            "batch-1",
            ProgressEvent::AgentUpdate {
                agent_id: "a2".into(),
                parent_node_id: "grade_batch".into(),
                status: "running".into(),
                progress: Some(0.6),
                message: None,
            },
        )
        .await;

        let (_, first) = rx.try_recv().unwrap();
        assert!(matches!(first, ProgressEvent::AgentUpdate { .. }));
        assert!(rx.try_recv().is_err());
    }
}
