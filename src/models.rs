//! Shared data-model types used across ingestion, retrieval, and the metadata store.
//!
//! Mirrors the shape of `Source`/`Chunk`/`WorkflowExecution` from the original
//! SQLAlchemy models, adapted to a `sqlx`-backed row type.

use serde::{Deserialize, Serialize};

/// The fixed session identifier used for all non-caller-initiated (recursive
/// webhook) ingestion. Kept deliberately distinct from caller-supplied
/// session ids; see `DESIGN.md` for the rationale.
pub const FIXED_INGEST_SESSION_ID: &str = "fixed_session_id_for_agenttic_ingest";

/// A logical document; may own chunks from many recursively-discovered URLs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub session_id: String,
    pub created_at: String,
}

/// A retrievable, content-addressed text fragment belonging to a `Source`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chunk {
    pub id: i64,
    pub chunk_id: String,
    pub source_id: i64,
    pub session_id: String,
    pub content: String,
    pub ordinal: i64,
}

/// Outstanding or resolved sub-document discovery request, keyed by `request_id`.
///
/// `source_id`, `collection_name`, and `recursive_depth` are carried on the
/// row itself (rather than re-derived from `document_name` at callback time)
/// so a webhook callback can recover everything it needs to enqueue
/// sub-document ingestion from `request_id` alone.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowExecution {
    pub request_id: String,
    pub url: String,
    pub document_name: String,
    pub collection_name: String,
    pub source_id: i64,
    pub recursive_depth: i64,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
}

/// State of an outstanding workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Running,
    Success,
    Error,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// State of one sub-document within an in-flight ingestion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubDocState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Terminal or in-flight status of a recursive ingestion task, tracked
/// in-memory by `ingest::task_tracker` (C14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}
