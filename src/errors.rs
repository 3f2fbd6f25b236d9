//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate eventually converts into an
//! [`AppError`], which carries a [`Category`], a [`Severity`], and a
//! `recoverable` flag alongside the underlying message. This mirrors how the
//! system this crate replaces classified tool/ingest/query failures, and lets
//! the HTTP surface (`api/`) and the SSE transport (`streaming.rs`) render a
//! single consistent failure shape regardless of which subsystem raised it.

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde::Serialize;
use thiserror::Error;

/// Broad classification of a failure, independent of which module raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Failure to reach, or unexpected response from, an external service.
    Network,
    /// Caller-supplied input failed validation.
    Validation,
    /// Caller lacked permission to perform the operation.
    Permission,
    /// An operation exceeded its allotted time.
    Timeout,
    /// An external service signaled rate limiting.
    RateLimit,
    /// A registered tool failed during execution.
    ToolExecution,
    /// Input (often LLM output) could not be parsed.
    Parsing,
    /// A resource (collection, source, task) could not be found or allocated.
    Resource,
    /// The service is misconfigured.
    Configuration,
    /// Uncategorized failure.
    Unknown,
}

/// Severity of a failure, used to decide whether to log at `warn` or `error`
/// and whether the orchestrator should keep going without the failed part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A categorized, user-presentable error.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    message: String,
    category: Category,
    severity: Severity,
    recoverable: bool,
}

impl AppError {
    /// Construct a new categorized error.
    pub fn new(
        message: impl Into<String>,
        category: Category,
        severity: Severity,
        recoverable: bool,
    ) -> Self {
        Self {
            message: message.into(),
            category,
            severity,
            recoverable,
        }
    }

    /// Shorthand for a validation failure — never retried, fixed user message.
    pub fn validation(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::warn!(detail, "validation error");
        Self::new(USER_MESSAGE_VALIDATION, Category::Validation, Severity::Low, false)
    }

    /// Shorthand for a network failure, recoverable by retry policy.
    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(detail, Category::Network, Severity::Medium, true)
    }

    /// Shorthand for a timeout.
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(detail, Category::Timeout, Severity::Medium, true)
    }

    /// Shorthand for a parsing failure (typically lenient LLM-output parsing exhausted).
    pub fn parsing(detail: impl Into<String>) -> Self {
        Self::new(detail, Category::Parsing, Severity::Low, true)
    }

    /// Shorthand for a missing resource.
    pub fn resource(detail: impl Into<String>) -> Self {
        Self::new(detail, Category::Resource, Severity::Medium, false)
    }

    /// Shorthand for a configuration failure — always unrecoverable at runtime.
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::new(detail, Category::Configuration, Severity::Critical, false)
    }

    /// The failure category.
    pub fn category(&self) -> Category {
        self.category
    }

    /// The failure severity.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Whether the caller's retry policy should be applied.
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }
}

/// User-visible message for validation failures, matching the original
/// system's localized copy so operators migrating dashboards see the same text.
pub const USER_MESSAGE_VALIDATION: &str = "输入参数有误";

/// User-visible message surfaced when a tool's circuit breaker is open.
pub const USER_MESSAGE_TOOL_UNAVAILABLE: &str = "该工具暂时不可用，请稍后再试";

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    category: Category,
    severity: Severity,
    recoverable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.category {
            Category::Validation => StatusCode::BAD_REQUEST,
            Category::Permission => StatusCode::FORBIDDEN,
            Category::Resource => StatusCode::NOT_FOUND,
            Category::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Category::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            success: false,
            message: self.message.clone(),
            category: self.category,
            severity: self.severity,
            recoverable: self.recoverable,
        };
        tracing::error!(
            category = ?self.category,
            severity = ?self.severity,
            recoverable = self.recoverable,
            "request failed: {}",
            self.message
        );
        (status, Json(body)).into_response()
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::new(err.to_string(), Category::Resource, Severity::High, false)
    }
}

impl From<crate::vectorstore::VectorStoreError> for AppError {
    fn from(err: crate::vectorstore::VectorStoreError) -> Self {
        Self::network(err.to_string())
    }
}

impl From<crate::chunking::ChunkingError> for AppError {
    fn from(err: crate::chunking::ChunkingError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<crate::ingest::IngestError> for AppError {
    fn from(err: crate::ingest::IngestError) -> Self {
        match err {
            crate::ingest::IngestError::EmptyExtraction => Self::validation(err.to_string()),
            other => Self::new(other.to_string(), Category::Unknown, Severity::High, true),
        }
    }
}

impl From<crate::retrieval::RetrievalError> for AppError {
    fn from(err: crate::retrieval::RetrievalError) -> Self {
        Self::new(err.to_string(), Category::Unknown, Severity::Medium, true)
    }
}
