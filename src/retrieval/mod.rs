//! Retrieval pipeline (C9): embed the query, hybrid (or dense-only) search,
//! token-budgeted rerank, and answer synthesis — non-streaming or SSE.

use futures_core::stream::Stream;
use futures_util::StreamExt;
use thiserror::Error;

use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::llm::{ChatDelta, ChatMessage, LlmClient, LlmError};
use crate::rerank::{RerankClient, RerankError};
use crate::vectorstore::{ScoredPoint, SearchFilterArgs, VectorStoreClient, VectorStoreError};

/// Errors raised by the retrieval pipeline.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// Reranking failed; the caller falls back to pre-rerank order rather
    /// than propagating this, so surfacing it here is only for logging.
    #[error(transparent)]
    Rerank(#[from] RerankError),
    #[error("query cannot be empty")]
    EmptyQuery,
}

/// One request to the retrieval pipeline.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub top_k: usize,
    pub embedding_model: String,
    pub embedding_dimensions: Option<usize>,
    pub document_ids: Option<Vec<i64>>,
    pub use_hybrid: bool,
    pub session_id: String,
}

impl QueryRequest {
    /// A request with the service's documented defaults: `top_k = 200`,
    /// hybrid search on, no document-id restriction.
    pub fn new(query: impl Into<String>, embedding_model: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: 200,
            embedding_model: embedding_model.into(),
            embedding_dimensions: None,
            document_ids: None,
            use_hybrid: true,
            session_id: session_id.into(),
        }
    }
}

/// One retrieved-and-possibly-reranked source, in the shape returned to callers.
#[derive(Debug, Clone)]
pub struct RetrievedSource {
    pub chunk_id: String,
    pub source_id: i64,
    pub url: String,
    pub title: String,
    pub content: String,
    pub score: f32,
}

/// Non-streaming query result.
#[derive(Debug, Clone)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<RetrievedSource>,
}

/// One event of a streamed query response, mirrored onto `streaming::SseEvent`
/// by the HTTP layer.
#[derive(Debug, Clone)]
pub enum QueryStreamEvent {
    Delta(String),
    Sources(Vec<RetrievedSource>),
    Complete,
    Error(String),
}

/// Resolves a chunk's owning `Source` (url, title) for building [`RetrievedSource`].
#[async_trait::async_trait]
pub trait SourceLookup: Send + Sync {
    async fn url_and_title(&self, source_id: i64) -> Option<(String, String)>;
}

#[async_trait::async_trait]
impl SourceLookup for crate::db::MetadataStore {
    async fn url_and_title(&self, source_id: i64) -> Option<(String, String)> {
        let source = self.get_source(source_id).await.ok()?;
        Some((source.url, source.title))
    }
}

/// Default retrieval budgets (`original_source/app/api/query.py`).
pub const DEFAULT_HNSW_EF: usize = 256;

/// Coordinates embed → search → rerank → synthesize for one query.
#[derive(Clone)]
pub struct RetrievalPipeline<S: SourceLookup + Clone> {
    embedding_client: std::sync::Arc<dyn EmbeddingClient>,
    vector_store: std::sync::Arc<VectorStoreClient>,
    rerank_client: Option<std::sync::Arc<dyn RerankClient>>,
    llm: LlmClient,
    source_lookup: S,
    collection: String,
    rag_rerank_top_k: usize,
    reranker_max_tokens: usize,
    rerank_max_concurrency: usize,
    generation_model: String,
}

impl<S: SourceLookup + Clone> RetrievalPipeline<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedding_client: std::sync::Arc<dyn EmbeddingClient>,
        vector_store: std::sync::Arc<VectorStoreClient>,
        rerank_client: Option<std::sync::Arc<dyn RerankClient>>,
        llm: LlmClient,
        source_lookup: S,
        collection: String,
        rag_rerank_top_k: usize,
        reranker_max_tokens: usize,
        rerank_max_concurrency: usize,
        generation_model: String,
    ) -> Self {
        Self {
            embedding_client,
            vector_store,
            rerank_client,
            llm,
            source_lookup,
            collection,
            rag_rerank_top_k,
            reranker_max_tokens,
            rerank_max_concurrency,
            generation_model,
        }
    }

    /// Run the retrieval steps shared by both non-stream and stream modes:
    /// embed, search (hybrid or dense-only), rerank-or-fallback, resolve
    /// sources. Returns the ranked hits with their `(url, title)` resolved.
    ///
    /// `pub(crate)` so the HTTP surface can retrieve sources itself and hand
    /// their content to the orchestrator for synthesis, instead of this
    /// pipeline's own single-shot `generate_answer`.
    pub(crate) async fn retrieve(&self, request: &QueryRequest) -> Result<Vec<RetrievedSource>, RetrievalError> {
        if request.query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let query_embedding = self
            .embedding_client
            .embed_texts(&[request.query.clone()], &request.embedding_model, 1, request.embedding_dimensions, 1)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let filter_args = SearchFilterArgs {
            session_id: Some(request.session_id.clone()),
            source_ids: request.document_ids.clone(),
        };

        let hits = if request.use_hybrid {
            let k_dense = request.top_k.min(150);
            let k_sparse = request.top_k.min(50);
            self.vector_store
                .query_hybrid(
                    &self.collection,
                    &request.query,
                    query_embedding,
                    request.top_k,
                    &filter_args,
                    k_dense,
                    k_sparse,
                )
                .await?
        } else {
            self.vector_store
                .query_embeddings(&self.collection, query_embedding, request.top_k, &filter_args)
                .await?
        };

        let final_hits = self.rerank_or_fallback(&request.query, hits).await;
        self.resolve_sources(final_hits).await
    }

    /// Rerank if a reranker is configured; on rerank failure or absence,
    /// fall back to the first `rag_rerank_top_k` hits in their incoming order.
    async fn rerank_or_fallback(&self, query: &str, hits: Vec<ScoredPoint>) -> Vec<ScoredPoint> {
        let Some(reranker) = &self.rerank_client else {
            return hits.into_iter().take(self.rag_rerank_top_k).collect();
        };

        match reranker.rerank(query, hits.clone(), self.reranker_max_tokens, self.rerank_max_concurrency).await {
            Ok(reranked) => reranked.into_iter().take(self.rag_rerank_top_k).collect(),
            Err(error) => {
                tracing::warn!(%error, "Reranking failed; falling back to vector-search order");
                hits.into_iter().take(self.rag_rerank_top_k).collect()
            }
        }
    }

    async fn resolve_sources(&self, hits: Vec<ScoredPoint>) -> Result<Vec<RetrievedSource>, RetrievalError> {
        let mut sources = Vec::with_capacity(hits.len());
        for hit in hits {
            let (url, title) = self
                .source_lookup
                .url_and_title(hit.source_id)
                .await
                .unwrap_or_else(|| (String::new(), String::new()));
            sources.push(RetrievedSource {
                chunk_id: hit.chunk_id,
                source_id: hit.source_id,
                url,
                title,
                content: hit.content,
                score: hit.score,
            });
        }
        Ok(sources)
    }

    /// Non-streaming query: retrieve, then call the LLM once.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryAnswer, RetrievalError> {
        let sources = self.retrieve(request).await?;
        let contexts: Vec<&str> = sources.iter().map(|s| s.content.as_str()).collect();
        let answer = self.generate_answer(&request.query, &contexts).await?;
        Ok(QueryAnswer { answer, sources })
    }

    /// Streaming query: retrieve, then stream `delta` events from the LLM,
    /// followed by `sources` and `complete` (or `error` on failure).
    pub async fn query_stream(
        &self,
        request: QueryRequest,
    ) -> impl Stream<Item = QueryStreamEvent> + Send + 'static {
        let pipeline = self.clone();
        async_stream::stream! {
            let sources = match pipeline.retrieve(&request).await {
                Ok(sources) => sources,
                Err(error) => {
                    yield QueryStreamEvent::Error(error.to_string());
                    return;
                }
            };
            let contexts: Vec<String> = sources.iter().map(|s| s.content.clone()).collect();
            let messages = synthesis_messages(&request.query, &contexts.iter().map(String::as_str).collect::<Vec<_>>());

            let mut deltas = pipeline.llm.stream_answer(pipeline.generation_model.clone(), messages);
            while let Some(delta) = deltas.next().await {
                match delta {
                    Ok(ChatDelta::Content(text)) => yield QueryStreamEvent::Delta(text),
                    Ok(ChatDelta::Reasoning(_)) => {}
                    Err(error) => {
                        yield QueryStreamEvent::Error(error.to_string());
                        return;
                    }
                }
            }

            yield QueryStreamEvent::Sources(sources);
            yield QueryStreamEvent::Complete;
        }
    }

    async fn generate_answer(&self, query: &str, contexts: &[&str]) -> Result<String, RetrievalError> {
        let messages = synthesis_messages(query, contexts);
        Ok(self.llm.generate_answer(&self.generation_model, &messages).await?)
    }
}

/// Build the synthesis prompt: a system instruction plus the question and
/// retrieved contexts as one user turn.
fn synthesis_messages(query: &str, contexts: &[&str]) -> Vec<ChatMessage> {
    let joined = if contexts.is_empty() {
        "(no relevant context was retrieved)".to_string()
    } else {
        contexts
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}", i + 1, c))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    vec![
        ChatMessage::system(
            "Answer the user's question using only the provided context. If the context is \
             insufficient, say so directly; do not fabricate.",
        ),
        ChatMessage::user(format!("Context:\n{joined}\n\nQuestion: {query}")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeSourceLookup(std::sync::Arc<Mutex<HashMap<i64, (String, String)>>>);

    #[async_trait]
    impl SourceLookup for FakeSourceLookup {
        async fn url_and_title(&self, source_id: i64) -> Option<(String, String)> {
            self.0.lock().unwrap().get(&source_id).cloned()
        }
    }

    struct StubEmbeddingClient;

    #[async_trait]
    impl EmbeddingClient for StubEmbeddingClient {
        async fn embed_texts(
            &self,
            texts: &[String],
            _model: &str,
            _batch_size: usize,
            _dimensions: Option<usize>,
            _max_concurrency: usize,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2]).collect())
        }
    }

    fn lookup_with(entries: &[(i64, &str, &str)]) -> FakeSourceLookup {
        let lookup = FakeSourceLookup::default();
        for (id, url, title) in entries {
            lookup.0.lock().unwrap().insert(*id, (url.to_string(), title.to_string()));
        }
        lookup
    }

    #[tokio::test]
    async fn query_without_reranker_takes_first_rerank_top_k_in_search_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/demo/points/query");
                then.status(200).json_body(json!({
                    "result": [
                        { "id": "1", "score": 0.9, "payload": { "source_id": 1, "session_id": "s", "chunk_id": "c1", "content": "alpha" } },
                        { "id": "2", "score": 0.8, "payload": { "source_id": 1, "session_id": "s", "chunk_id": "c2", "content": "beta" } },
                    ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/demo/points/scroll");
                then.status(200).json_body(json!({ "result": { "points": [] } }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "content": "an answer" } }]
                }));
            })
            .await;

        let vector_store = std::sync::Arc::new(
            VectorStoreClient::new(reqwest::Client::new(), &server.base_url(), None).unwrap(),
        );
        let llm = LlmClient::new(reqwest::Client::new(), server.base_url());
        let lookup = lookup_with(&[(1, "https://example.com", "Example")]);

        let pipeline = RetrievalPipeline::new(
            std::sync::Arc::new(StubEmbeddingClient),
            vector_store,
            None,
            llm,
            lookup,
            "demo".to_string(),
            1,
            3072,
            4,
            "gen-model".to_string(),
        );

        let request = QueryRequest::new("what is alpha?", "embed-model", "session-1");
        let result = pipeline.query(&request).await.expect("query");

        assert_eq!(result.answer, "an answer");
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].chunk_id, "c1");
        assert_eq!(result.sources[0].url, "https://example.com");
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_any_network_call() {
        let server = MockServer::start_async().await;
        let vector_store = std::sync::Arc::new(
            VectorStoreClient::new(reqwest::Client::new(), &server.base_url(), None).unwrap(),
        );
        let llm = LlmClient::new(reqwest::Client::new(), server.base_url());
        let pipeline = RetrievalPipeline::new(
            std::sync::Arc::new(StubEmbeddingClient),
            vector_store,
            None,
            llm,
            FakeSourceLookup::default(),
            "demo".to_string(),
            5,
            3072,
            4,
            "gen-model".to_string(),
        );

        let request = QueryRequest::new("   ", "embed-model", "session-1");
        let err = pipeline.query(&request).await.unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyQuery));
    }
}
