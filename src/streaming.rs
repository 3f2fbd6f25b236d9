//! Server-sent event transport (C12): one JSON object per `data:` line, every
//! variant discriminated by a `type` field. Consumers must ignore unknown types.

use std::convert::Infallible;

use axum::response::sse::Event;
use serde::Serialize;
use serde_json::Value;

use crate::retrieval::{QueryStreamEvent, RetrievedSource};

/// Every SSE event type this service emits, across ingestion progress and
/// query streaming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    /// Ingestion phase changed (e.g. `"fetching"`, `"chunking"`, `"embedding"`).
    Status { phase: String },
    /// Total chunk count became known.
    TotalChunks { total: usize },
    /// Chunks completed so far (for a long-running ingest).
    Progress { completed: usize, total: usize },
    /// The operation completed successfully.
    Complete(Value),
    /// The operation failed.
    Error { message: String },
    /// One token/content delta of a streamed LLM answer.
    Delta { content: String },
    /// One reasoning/thought-stream delta (orchestrator "thinking").
    Reasoning { content: String },
    /// The orchestrator is about to invoke a tool.
    ToolCall { name: String, arguments: Value },
    /// A tool call's result.
    ToolResult { name: String, result: Value },
    /// Final retrieved sources for a query.
    Sources { sources: Vec<SourcePayload> },
    /// Intermediate search-tool results surfaced during orchestration.
    SearchResults { results: Value },
    /// The synthesis LLM call is starting.
    LlmStart,
    /// The orchestrator's fully-assembled final answer (non-delta form).
    FinalAnswer { answer: String },
}

/// JSON shape of one retrieved source in a `sources` event, matching the
/// non-stream query response's per-source fields.
#[derive(Debug, Clone, Serialize)]
pub struct SourcePayload {
    pub id: String,
    pub chunk_id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub score: f32,
}

impl From<RetrievedSource> for SourcePayload {
    fn from(source: RetrievedSource) -> Self {
        Self {
            id: source.source_id.to_string(),
            chunk_id: source.chunk_id,
            url: source.url,
            title: source.title,
            content: source.content,
            score: source.score,
        }
    }
}

impl From<QueryStreamEvent> for SseEvent {
    fn from(event: QueryStreamEvent) -> Self {
        match event {
            QueryStreamEvent::Delta(content) => Self::Delta { content },
            QueryStreamEvent::Sources(sources) => {
                Self::Sources { sources: sources.into_iter().map(SourcePayload::from).collect() }
            }
            QueryStreamEvent::Complete => Self::Complete(Value::Null),
            QueryStreamEvent::Error(message) => Self::Error { message },
        }
    }
}

impl SseEvent {
    /// Frame this event as an axum SSE `Event` carrying its JSON encoding as
    /// the `data:` payload.
    pub fn into_axum_event(self) -> Result<Event, Infallible> {
        let body = serde_json::to_string(&self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"failed to serialize event"}"#.to_string()
        });
        Ok(Event::default().data(body))
    }
}
