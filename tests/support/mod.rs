//! Shared fakes and state-builders for the integration suite.
//!
//! The fetcher and embedding client are swapped for deterministic in-memory
//! fakes (neither has a real teacher HTTP backend worth standing up for
//! these tests); the vector store, reranker, and LLM stay the real
//! `reqwest`-backed clients pointed at an `httpmock` server, so the HTTP
//! boundary those three clients actually own is exercised for real.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agenttic_rag::api::AppState;
use agenttic_rag::db::MetadataStore;
use agenttic_rag::embedding::{EmbeddingClient, EmbeddingClientError};
use agenttic_rag::fetch::{FetchError, Fetcher};
use agenttic_rag::ingest::discovery::DiscoveryClient;
use agenttic_rag::ingest::task_tracker::TaskTracker;
use agenttic_rag::ingest::IngestPipeline;
use agenttic_rag::llm::LlmClient;
use agenttic_rag::orchestrator::{IntelligentOrchestrator, OrchestratorConfig};
use agenttic_rag::rerank::RerankClient;
use agenttic_rag::tools::strategies::JsonFcStrategy;
use agenttic_rag::tools::web_search::{SearchHit, SearchProvider, WebSearchTool};
use agenttic_rag::tools::{ToolMode, ToolRegistry};
use agenttic_rag::vectorstore::VectorStoreClient;
use async_trait::async_trait;
use httpmock::MockServer;

/// URL-keyed in-memory pages, no network involved.
pub struct StaticFetcher {
    pages: Mutex<HashMap<String, (String, String)>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self { pages: Mutex::new(HashMap::new()) }
    }

    /// Register `url`'s extracted text and raw HTML.
    pub fn set(&self, url: &str, text: &str, html: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), (text.to_string(), html.to_string()));
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.pages.lock().unwrap().get(url).map(|(_, html)| html.clone()).unwrap_or_else(|| "<html><body>stub</body></html>".to_string()))
    }

    async fn fetch_then_extract(&self, url: &str, _selector: &str) -> Result<String, FetchError> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(url)
            .map(|(text, _)| text.clone())
            .unwrap_or_else(|| "stub body text".to_string()))
    }
}

/// One fixed vector per input text; no network, no real dimensionality.
pub struct StaticEmbeddingClient;

#[async_trait]
impl EmbeddingClient for StaticEmbeddingClient {
    async fn embed_texts(
        &self,
        texts: &[String],
        _model: &str,
        _batch_size: usize,
        _dimensions: Option<usize>,
        _max_concurrency: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
    }
}

/// A search provider that never returns results; the orchestrator scenarios
/// exercised here never reach the decompose/gap-search path that would call it.
pub struct EmptySearchProvider;

#[async_trait]
impl SearchProvider for EmptySearchProvider {
    async fn search(&self, _query: &str, _language: &str, _categories: &str) -> Result<Vec<SearchHit>, String> {
        Ok(Vec::new())
    }
}

/// Build a path for a scratch SQLite file inside `dir`.
pub fn temp_db_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

/// Build an `AppState` wired against one `httpmock` server standing in for
/// the vector store, reranker, and LLM (their endpoint paths never
/// collide, so a single server answers all three). The fetcher and
/// embedding client are the deterministic fakes above.
pub async fn build_state(db: MetadataStore, mock: &MockServer, fetcher: Arc<dyn Fetcher>) -> AppState {
    let http_client = reqwest::Client::new();
    let vector_store =
        Arc::new(VectorStoreClient::new(http_client.clone(), &mock.base_url(), None).expect("valid mock base url"));
    let embedding_client: Arc<dyn EmbeddingClient> = Arc::new(StaticEmbeddingClient);
    let llm = LlmClient::new(http_client.clone(), mock.base_url());
    let rerank_client: Option<Arc<dyn RerankClient>> = None;
    let discovery = DiscoveryClient::new(http_client.clone(), Duration::from_secs(5));
    let task_tracker = Arc::new(TaskTracker::new());

    let ingest = IngestPipeline::new(
        db.clone(),
        Arc::clone(&fetcher),
        Arc::clone(&embedding_client),
        Arc::clone(&vector_store),
        llm.clone(),
        "test-naming-model".to_string(),
        discovery,
        task_tracker,
        10,
        4,
        3,
        "test-embed-model".to_string(),
        None,
    );

    let web_search = Arc::new(WebSearchTool::new(
        Arc::new(EmptySearchProvider),
        Arc::clone(&fetcher),
        Arc::clone(&embedding_client),
        Arc::clone(&vector_store),
        "test_web_search".to_string(),
        3,
        "test-embed-model".to_string(),
        2,
        3,
    ));
    let tool_registry = Arc::new(ToolRegistry::new());
    let strategy = Arc::new(JsonFcStrategy::new(llm.clone()));
    let orchestrator = Arc::new(IntelligentOrchestrator::new(
        llm.clone(),
        web_search,
        tool_registry,
        strategy,
        OrchestratorConfig {
            gap_recall_top_k: 3,
            web_search_max_queries: 2,
            max_words_per_query: 8,
            simple_query_max_queries: 1,
            simple_query_max_words_per_query: 8,
            max_keywords_per_gap: 3,
        },
    ));

    AppState {
        db,
        embedding_client,
        vector_store,
        rerank_client,
        llm,
        ingest,
        orchestrator,
        default_collection: "test_collection".to_string(),
        rag_rerank_top_k: 5,
        reranker_max_tokens: 2000,
        rerank_max_concurrency: 2,
        generation_model: "test-model".to_string(),
        tool_max_steps: 6,
        default_tool_mode: ToolMode::Off,
    }
}

/// A non-streaming chat-completions JSON body with `content` as the message text.
pub fn chat_completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{ "message": { "content": content } }]
    })
}
