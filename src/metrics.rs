//! Lightweight service counters used for diagnostics.
//!
//! `ServiceMetrics` exposes lock-free counters tracking ingestion and query
//! activity: documents ingested, chunks embedded, queries served, tool calls
//! dispatched, and circuit breakers tripped. The snapshot is surfaced via
//! the `/healthz` endpoint and is cheap enough to read on every request.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing service activity.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_ingested: AtomicU64,
    chunks_embedded: AtomicU64,
    queries_served: AtomicU64,
    tool_calls_dispatched: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    last_chunk_count: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed document ingestion and its chunk count.
    pub fn record_ingest(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_embedded.fetch_add(chunk_count, Ordering::Relaxed);
        self.last_chunk_count.store(chunk_count, Ordering::Relaxed);
    }

    /// Record a served query (streaming or not).
    pub fn record_query(&self) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatched tool call.
    pub fn record_tool_call(&self) {
        self.tool_calls_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a circuit breaker transitioning to the open state.
    pub fn record_circuit_trip(&self) {
        self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
            tool_calls_dispatched: self.tool_calls_dispatched.load(Ordering::Relaxed),
            circuit_breaker_trips: self.circuit_breaker_trips.load(Ordering::Relaxed),
            last_chunk_count: {
                let last = self.last_chunk_count.load(Ordering::Relaxed);
                if last == 0 { None } else { Some(last) }
            },
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents ingested since startup.
    pub documents_ingested: u64,
    /// Total chunks embedded across all ingestions.
    pub chunks_embedded: u64,
    /// Queries served since startup.
    pub queries_served: u64,
    /// Tool calls dispatched through the registry.
    pub tool_calls_dispatched: u64,
    /// Number of times any circuit breaker has opened.
    pub circuit_breaker_trips: u64,
    /// Chunk count of the most recently ingested document, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_chunk_count: Option<u64>,
}
