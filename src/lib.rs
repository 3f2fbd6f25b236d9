#![deny(missing_docs)]

//! Core library for the hybrid-retrieval RAG service.

/// HTTP surface (ambient): axum routes exposing ingestion, retrieval, and
/// collection management over C1-C14.
pub mod api;
/// Chunker (C2): token-bounded, overlap-aware text splitting.
pub mod chunking;
/// Collection identity (C13): stable collection naming for ingested URLs.
pub mod collection;
/// Environment-driven configuration management.
pub mod config;
/// SQLite-backed metadata store (C6).
pub mod db;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Crate-wide error taxonomy.
pub mod errors;
/// Fetcher/extractor (C1): HTML retrieval and plain-text extraction.
pub mod fetch;
/// Ingestion pipeline (C8) and recursive sub-document discovery (C7).
pub mod ingest;
/// LLM client: OpenAI-compatible chat-completions, streaming and not.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Row types mirrored from the metadata store's tables.
pub mod models;
/// Intelligent orchestrator (C11): decomposition, reasoning, and tool use.
pub mod orchestrator;
/// Reranker client (C5): token-budgeted batch reranking.
pub mod rerank;
/// Retrieval pipeline (C9): hybrid search, rerank, and answer synthesis.
pub mod retrieval;
/// Server-sent event transport (C12).
pub mod streaming;
/// Tool system (C10): registry, strategies, and the `web_search` tool.
pub mod tools;
/// Hybrid dense+sparse vector store gateway (C4).
pub mod vectorstore;
