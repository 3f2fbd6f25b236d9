use std::sync::Arc;
use std::time::Duration;

use agenttic_rag::api::{self, AppState};
use agenttic_rag::config::{self, ToolMode as ConfigToolMode};
use agenttic_rag::db::MetadataStore;
use agenttic_rag::embedding::HttpEmbeddingClient;
use agenttic_rag::fetch::{Engine, HttpFetcher};
use agenttic_rag::ingest::discovery::DiscoveryClient;
use agenttic_rag::ingest::task_tracker::TaskTracker;
use agenttic_rag::ingest::IngestPipeline;
use agenttic_rag::llm::LlmClient;
use agenttic_rag::logging;
use agenttic_rag::orchestrator::{IntelligentOrchestrator, OrchestratorConfig};
use agenttic_rag::rerank::HttpRerankClient;
use agenttic_rag::tools::strategies::{HarmonyStrategy, JsonFcStrategy, ReActStrategy};
use agenttic_rag::tools::web_search::{SearxngProvider, WebSearchTool};
use agenttic_rag::tools::{self, ToolRegistry};
use agenttic_rag::vectorstore::VectorStoreClient;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();

    let app = build_app().await.expect("Failed to build application");

    let (listener, port) = bind_listener().await.expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();
}

/// Convert configuration's tool mode into the tool system's `RunConfig`-facing
/// mode. The two enums are nominally distinct (`config` loads the default
/// from the environment; `tools` checks it on every orchestration run), so
/// the boundary is an explicit match rather than a shared type.
fn tool_mode_from_config(mode: ConfigToolMode) -> tools::ToolMode {
    match mode {
        ConfigToolMode::Off => tools::ToolMode::Off,
        ConfigToolMode::Auto => tools::ToolMode::Auto,
        ConfigToolMode::Json => tools::ToolMode::Json,
        ConfigToolMode::React => tools::ToolMode::React,
        ConfigToolMode::Harmony => tools::ToolMode::Harmony,
    }
}

async fn build_app() -> Result<axum::Router, Box<dyn std::error::Error>> {
    let config = config::get_config();
    let http_client = reqwest::Client::new();

    let db = MetadataStore::connect(&config.database_path).await?;

    let fetcher: Arc<dyn agenttic_rag::fetch::Fetcher> =
        Arc::new(HttpFetcher::new(http_client.clone(), Engine::Lightweight));
    let embedding_client: Arc<dyn agenttic_rag::embedding::EmbeddingClient> =
        Arc::new(HttpEmbeddingClient::new(http_client.clone(), config.embedding_base_url.clone()));
    let vector_store = Arc::new(VectorStoreClient::new(
        http_client.clone(),
        &config.vector_store_url,
        config.vector_store_api_key.clone(),
    )?);
    let rerank_client: Option<Arc<dyn agenttic_rag::rerank::RerankClient>> =
        Some(Arc::new(HttpRerankClient::new(http_client.clone(), config.reranker_base_url.clone())));
    let llm = LlmClient::new(http_client.clone(), config.llm_base_url.clone());
    let discovery =
        DiscoveryClient::new(http_client.clone(), Duration::from_secs(config.discovery_webhook_timeout_s));
    let task_tracker = Arc::new(TaskTracker::new());

    let ingest = IngestPipeline::new(
        db.clone(),
        Arc::clone(&fetcher),
        Arc::clone(&embedding_client),
        Arc::clone(&vector_store),
        llm.clone(),
        config.llm_model.clone(),
        discovery,
        Arc::clone(&task_tracker),
        config.embedding_batch_size,
        config.embedding_max_concurrency,
        config.embedding_dimension as u64,
        config.embedding_model.clone(),
        None,
    );

    let search_provider = Arc::new(SearxngProvider::new(
        http_client.clone(),
        config.searxng_query_url.clone(),
        config.web_search_result_count,
    ));
    let web_search = Arc::new(WebSearchTool::new(
        search_provider,
        Arc::clone(&fetcher),
        Arc::clone(&embedding_client),
        Arc::clone(&vector_store),
        config.vector_store_collection.clone(),
        config.embedding_dimension as u64,
        config.embedding_model.clone(),
        config.web_search_concurrent_requests,
        config.gap_recall_top_k,
    ));

    let tool_registry = Arc::new(ToolRegistry::new());
    tool_registry
        .register(
            agenttic_rag::tools::web_search::web_search_schema(),
            Arc::clone(&web_search) as Arc<dyn agenttic_rag::tools::ToolHandler>,
            agenttic_rag::tools::web_search::web_search_metadata(),
        )
        .await;

    let default_tool_mode = tool_mode_from_config(config.tool_mode);
    let strategy: Arc<dyn tools::strategies::Strategy> = match default_tool_mode {
        tools::ToolMode::React => Arc::new(ReActStrategy::new(llm.clone())),
        tools::ToolMode::Harmony => Arc::new(HarmonyStrategy::new(llm.clone())),
        tools::ToolMode::Off | tools::ToolMode::Auto | tools::ToolMode::Json => {
            Arc::new(JsonFcStrategy::new(llm.clone()))
        }
    };

    let orchestrator = Arc::new(IntelligentOrchestrator::new(
        llm.clone(),
        web_search,
        tool_registry,
        strategy,
        OrchestratorConfig {
            gap_recall_top_k: config.gap_recall_top_k,
            web_search_max_queries: config.web_search_max_queries,
            max_words_per_query: config.max_words_per_query,
            simple_query_max_queries: config.simple_query_max_queries,
            simple_query_max_words_per_query: config.simple_query_max_words_per_query,
            max_keywords_per_gap: config.max_keywords_per_gap,
        },
    ));

    let state = AppState {
        db,
        embedding_client,
        vector_store,
        rerank_client,
        llm,
        ingest,
        orchestrator,
        default_collection: config.vector_store_collection.clone(),
        rag_rerank_top_k: config.rag_rerank_top_k,
        reranker_max_tokens: config.reranker_max_tokens,
        rerank_max_concurrency: config.rerank_max_concurrency,
        generation_model: config.llm_model.clone(),
        tool_max_steps: config.tool_max_steps as u32,
        default_tool_mode,
    };

    Ok(api::create_router(state))
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
