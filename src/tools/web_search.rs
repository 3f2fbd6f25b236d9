//! The `web_search` tool: query an external search engine, fetch and index
//! the results under a freshly-minted ephemeral session, then hybrid-recall
//! the chunks most relevant to the original query.
//!
//! Deliberately does *not* go through [`crate::ingest::IngestPipeline`] —
//! that pipeline is keyed to the durable, deduplicated
//! `FIXED_INGEST_SESSION_ID` corpus. A search-triggered fetch is scoped to
//! one call, so it gets its own small fetch → chunk → embed → upsert →
//! recall flow instead (see `DESIGN.md`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::chunking::{self, ChunkProfile};
use crate::embedding::EmbeddingClient;
use crate::fetch::Fetcher;
use crate::vectorstore::{PointInsert, SearchFilterArgs, VectorStoreClient};

use super::ToolHandler;

/// Default extraction selector for fetched search-result pages.
const EXTRACT_SELECTOR: &str = "body";

/// One hit returned by the external search engine, before fetching.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
}

/// Queries an external web-search engine. The engine itself — e.g. a
/// SearxNG instance — is an external service addressable by URL; only the
/// client-side call is this crate's concern.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, language: &str, categories: &str) -> Result<Vec<SearchHit>, String>;
}

#[derive(Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Deserialize)]
struct SearxngResult {
    url: String,
    #[serde(default)]
    title: String,
}

/// HTTP-backed provider for a SearxNG-compatible JSON search API.
pub struct SearxngProvider {
    client: reqwest::Client,
    query_url: String,
    max_results: usize,
}

impl SearxngProvider {
    pub fn new(client: reqwest::Client, query_url: String, max_results: usize) -> Self {
        Self { client, query_url, max_results }
    }
}

#[async_trait]
impl SearchProvider for SearxngProvider {
    async fn search(&self, query: &str, language: &str, categories: &str) -> Result<Vec<SearchHit>, String> {
        let mut request = self.client.get(&self.query_url).query(&[("q", query), ("format", "json")]);
        if !language.is_empty() {
            request = request.query(&[("language", language)]);
        }
        if !categories.is_empty() {
            request = request.query(&[("categories", categories)]);
        }

        let response = request.send().await.map_err(|error| error.to_string())?;
        let body: SearxngResponse = response.json().await.map_err(|error| error.to_string())?;

        Ok(body
            .results
            .into_iter()
            .take(self.max_results)
            .map(|result| SearchHit { url: result.url, title: result.title })
            .collect())
    }
}

/// The registered `web_search` tool: implements [`ToolHandler`] so it can
/// be installed into a [`super::ToolRegistry`] under the schema from
/// [`web_search_schema`].
pub struct WebSearchTool {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn Fetcher>,
    embedding_client: Arc<dyn EmbeddingClient>,
    vector_store: Arc<VectorStoreClient>,
    collection: String,
    vector_dimension: u64,
    default_embedding_model: String,
    fetch_concurrency: usize,
    recall_top_k: usize,
}

impl WebSearchTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn Fetcher>,
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<VectorStoreClient>,
        collection: String,
        vector_dimension: u64,
        default_embedding_model: String,
        fetch_concurrency: usize,
        recall_top_k: usize,
    ) -> Self {
        Self {
            search,
            fetcher,
            embedding_client,
            vector_store,
            collection,
            vector_dimension,
            default_embedding_model,
            fetch_concurrency,
            recall_top_k,
        }
    }

    async fn run(&self, arguments: &Value) -> Result<Value, String> {
        let query = arguments.get("query").and_then(Value::as_str).ok_or("missing required argument `query`")?;
        let language = arguments.get("language").and_then(Value::as_str).unwrap_or("en-US");
        let categories = arguments.get("categories").and_then(Value::as_str).unwrap_or("");
        let model = arguments
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_embedding_model);

        let hits = self.search.search(query, language, categories).await?;
        if hits.is_empty() {
            return Ok(json!({ "query": query, "results": [] }));
        }

        let session_id = format!("web_search_{}", uuid::Uuid::new_v4());
        let source_ids = self.fetch_and_index(&hits, &session_id, model).await?;

        if source_ids.is_empty() {
            return Ok(json!({ "query": query, "results": [] }));
        }

        let filter = SearchFilterArgs { session_id: Some(session_id), source_ids: Some(source_ids) };
        let query_vector = self
            .embedding_client
            .embed_texts(&[query.to_string()], model, 1, None, 1)
            .await
            .map_err(|error| error.to_string())?
            .into_iter()
            .next()
            .ok_or("embedding the search query returned no vector")?;

        let hits = self
            .vector_store
            .query_hybrid(&self.collection, query, query_vector, self.recall_top_k, &filter, 50, 50)
            .await
            .map_err(|error| error.to_string())?;

        let results: Vec<Value> = hits
            .into_iter()
            .map(|point| json!({ "content": point.content, "score": point.score }))
            .collect();
        Ok(json!({ "query": query, "results": results }))
    }

    /// Run multiple planned queries against the search provider under one
    /// shared `session_id`, fetching and indexing every hit exactly once
    /// (queries are deduplicated by URL across the whole batch). Used by the
    /// intelligent orchestrator's unified search step, which plans several
    /// queries but wants only one round of fetch/index work. Returns the
    /// distinct `source_id`s created.
    pub async fn search_and_index(&self, queries: &[String], session_id: &str, model: &str) -> Result<Vec<i64>, String> {
        let mut seen_urls = std::collections::HashSet::new();
        let mut hits = Vec::new();
        for query in queries {
            for hit in self.search.search(query, "en-US", "").await? {
                if seen_urls.insert(hit.url.clone()) {
                    hits.push(hit);
                }
            }
        }
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_and_index(&hits, session_id, model).await
    }

    /// Hybrid-recall the chunks most relevant to `query`, restricted to
    /// `source_ids` under `session_id`. Used per-gap by the orchestrator
    /// after [`Self::search_and_index`] has populated those sources.
    pub async fn recall(
        &self,
        query: &str,
        session_id: &str,
        source_ids: &[i64],
        top_k: usize,
        model: &str,
    ) -> Result<Vec<(String, f32)>, String> {
        let filter = SearchFilterArgs { session_id: Some(session_id.to_string()), source_ids: Some(source_ids.to_vec()) };
        let query_vector = self
            .embedding_client
            .embed_texts(&[query.to_string()], model, 1, None, 1)
            .await
            .map_err(|error| error.to_string())?
            .into_iter()
            .next()
            .ok_or("embedding the gap query returned no vector")?;

        let hits = self.vector_store.query_hybrid(&self.collection, query, query_vector, top_k, &filter, 50, 50).await.map_err(|error| error.to_string())?;
        Ok(hits.into_iter().map(|point| (point.content, point.score)).collect())
    }

    /// Fetch each hit, chunk its extracted text, embed and upsert it under
    /// `session_id`, returning the distinct `source_id`s created. Individual
    /// fetch/embed failures are logged and skipped rather than aborting the
    /// whole search.
    async fn fetch_and_index(&self, hits: &[SearchHit], session_id: &str, model: &str) -> Result<Vec<i64>, String> {
        self.vector_store
            .create_collection_if_not_exists(&self.collection, self.vector_dimension)
            .await
            .map_err(|error| error.to_string())?;

        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency.max(1)));
        let mut handles = Vec::new();

        for (index, hit) in hits.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = Arc::clone(&self.fetcher);
            let embedding_client = Arc::clone(&self.embedding_client);
            let vector_store = Arc::clone(&self.vector_store);
            let collection = self.collection.clone();
            let session_id = session_id.to_string();
            let model = model.to_string();
            let hit = hit.clone();
            let source_id = index as i64;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("web-search fetch semaphore never closed");

                let text = match fetcher.fetch_then_extract(&hit.url, EXTRACT_SELECTOR).await {
                    Ok(text) if !text.trim().is_empty() => text,
                    Ok(_) => return None,
                    Err(error) => {
                        tracing::debug!(url = %hit.url, %error, "web_search: fetch failed; skipping result");
                        return None;
                    }
                };

                let chunks = chunking::chunk_text(&text, ChunkProfile::TEXT, "cl100k_base").ok()?;
                if chunks.is_empty() {
                    return None;
                }

                let vectors = embedding_client
                    .embed_texts(&chunks, &model, chunks.len(), None, 1)
                    .await
                    .ok()
                    .filter(|vectors| vectors.len() == chunks.len())?;

                let points: Vec<PointInsert> = chunks
                    .into_iter()
                    .zip(vectors)
                    .enumerate()
                    .map(|(ordinal, (content, vector))| PointInsert {
                        source_id,
                        session_id: session_id.clone(),
                        chunk_id: format!("{session_id}|{source_id}|{ordinal}"),
                        content,
                        vector,
                    })
                    .collect();

                if let Err(error) = vector_store.add_embeddings(&collection, points).await {
                    tracing::warn!(%error, url = %hit.url, "web_search: upsert failed; skipping result");
                    return None;
                }

                Some(source_id)
            }));
        }

        let mut source_ids = Vec::new();
        for handle in handles {
            if let Some(source_id) = handle.await.map_err(|error| error.to_string())? {
                source_ids.push(source_id);
            }
        }
        Ok(source_ids)
    }
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    async fn call(&self, arguments: Value) -> Result<Value, String> {
        self.run(&arguments).await
    }
}

/// The `web_search` tool's JSON-Schema definition, matching the arguments
/// [`WebSearchTool::run`] reads.
pub fn web_search_schema() -> super::ToolSchema {
    super::ToolSchema {
        name: "web_search".to_string(),
        description: "Search the web and recall the most relevant passages: generates no \
                      keywords of its own, but fetches, chunks, embeds, and indexes each \
                      result before returning the passages most relevant to the query."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query, question, or topic." },
                "language": { "type": "string", "description": "Result-language filter.", "default": "en-US" },
                "categories": { "type": "string", "description": "Search-engine category filter.", "default": "" },
                "filter_list": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Domains to exclude from results."
                },
                "model": { "type": "string", "description": "Embedding model override.", "default": "" }
            },
            "required": ["query"]
        }),
    }
}

/// Default operational metadata for `web_search`: a long timeout (page
/// fetches can be slow), one retry, bounded concurrency, and a 30-minute
/// result cache.
pub fn web_search_metadata() -> super::ToolMetadata {
    super::ToolMetadata {
        timeout_s: 600.0,
        max_retries: 1,
        max_concurrency: 4,
        cache_enabled: true,
        cache_ttl_seconds: 1800.0,
        cache_max_size: 500,
    }
}
