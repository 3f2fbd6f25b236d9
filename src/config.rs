//! Environment-driven configuration for the RAG service.
//!
//! This module loads and validates settings once at startup (via `init_config`) and exposes
//! a global, read-only view through `get_config`. The configuration powers ingestion, retrieval,
//! the tool registry, and the orchestrator, and includes:
//!
//! - Vector store connectivity (`VECTOR_STORE_URL`, `VECTOR_STORE_COLLECTION`, `VECTOR_STORE_API_KEY?`).
//! - Embedding provider/model (`EMBEDDING_MODEL`, `EMBEDDING_DIMENSION`, `EMBEDDING_BATCH_SIZE`,
//!   `EMBEDDING_MAX_CONCURRENCY`).
//! - Chunking defaults (`CHUNK_SIZE`, `CHUNK_OVERLAP`, `HTML_CHUNK_SIZE`, `HTML_CHUNK_OVERLAP`).
//! - Retrieval ergonomics (`RAG_TOP_K`, `RAG_RERANK_TOP_K`, `RERANKER_MAX_TOKENS`,
//!   `RERANK_MAX_CONCURRENCY`).
//! - Webhook-driven sub-document discovery (`DISCOVERY_WEBHOOK_URL`, `DISCOVERY_WEBHOOK_TIMEOUT_S`,
//!   `DEFAULT_RECURSIVE_DEPTH`).
//! - LLM access (`LLM_BASE_URL`, `LLM_MODEL`, `LLM_TIMEOUT_S`).
//! - Tool orchestration (`TOOL_MODE`, `TOOL_MAX_STEPS`).
//! - Database path (`DATABASE_PATH`) and HTTP server port (`SERVER_PORT?`).
//!
//! Most fields are optional with sensible defaults; invalid combinations are flagged early with
//! descriptive errors so misconfiguration is easy to diagnose.
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the RAG service.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the vector store instance.
    pub vector_store_url: String,
    /// Name of the single collection used for document storage.
    pub vector_store_collection: String,
    /// Optional API key required to access the vector store.
    pub vector_store_api_key: Option<String>,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the OpenAI-compatible embedding endpoint.
    pub embedding_base_url: String,
    /// Number of texts submitted per embedding HTTP request.
    pub embedding_batch_size: usize,
    /// Maximum number of embedding batches in flight at once.
    pub embedding_max_concurrency: usize,
    /// Default chunk size (tokens) for the retrieval text variant.
    pub chunk_size: usize,
    /// Default chunk overlap (tokens) for the retrieval text variant.
    pub chunk_overlap: usize,
    /// Chunk size (tokens) for the raw-HTML discovery variant.
    pub html_chunk_size: usize,
    /// Chunk overlap (tokens) for the raw-HTML discovery variant.
    pub html_chunk_overlap: usize,
    /// Candidate count retrieved before rerank.
    pub rag_top_k: usize,
    /// Candidate count kept after rerank.
    pub rag_rerank_top_k: usize,
    /// Token budget per reranker batch.
    pub reranker_max_tokens: usize,
    /// Maximum concurrent reranker batches.
    pub rerank_max_concurrency: usize,
    /// Base URL of the OpenAI-compatible reranker endpoint.
    pub reranker_base_url: String,
    /// Default sub-document discovery webhook URL.
    pub discovery_webhook_url: Option<String>,
    /// Timeout (seconds) for the outbound discovery webhook POST.
    pub discovery_webhook_timeout_s: u64,
    /// Default recursion depth applied when a caller omits one.
    pub default_recursive_depth: u32,
    /// Base URL of the OpenAI-compatible chat/completions endpoint.
    pub llm_base_url: String,
    /// Default chat model identifier.
    pub llm_model: String,
    /// Default per-call LLM timeout (seconds).
    pub llm_timeout_s: u64,
    /// Default tool-calling mode.
    pub tool_mode: ToolMode,
    /// Maximum reasoning/tool-call steps per orchestrator run.
    pub tool_max_steps: usize,
    /// TTL (seconds) applied to the fetcher's content cache.
    pub web_cache_ttl_s: u64,
    /// Query endpoint of the SearxNG instance backing `web_search`.
    pub searxng_query_url: String,
    /// Result count requested per search query from the search backend.
    pub web_search_result_count: usize,
    /// Maximum concurrent page fetches within one `web_search` call.
    pub web_search_concurrent_requests: usize,
    /// Per-page fetch timeout (seconds) within `web_search`.
    pub web_search_timeout_s: u64,
    /// Candidates kept per knowledge gap during gap recall (orchestrator step 8).
    pub gap_recall_top_k: usize,
    /// Maximum search queries planned for a non-simple query.
    pub web_search_max_queries: usize,
    /// Word cap per planned query for a non-simple query.
    pub max_words_per_query: usize,
    /// Maximum search queries planned for a simple (fast-route) query.
    pub simple_query_max_queries: usize,
    /// Word cap per planned query for a simple (fast-route) query.
    pub simple_query_max_words_per_query: usize,
    /// Maximum keywords drawn from a single knowledge gap during search planning.
    pub max_keywords_per_gap: usize,
    /// Filesystem path to the SQLite metadata database.
    pub database_path: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported tool-calling modes for a run configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    /// Tools are never invoked.
    Off,
    /// The orchestrator decides per-query whether tools are needed.
    Auto,
    /// Force the JSON function-calling strategy.
    Json,
    /// Force the ReAct strategy.
    React,
    /// Force the Harmony DSL strategy.
    Harmony,
}

impl std::str::FromStr for ToolMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            "json" => Ok(Self::Json),
            "react" => Ok(Self::React),
            "harmony" => Ok(Self::Harmony),
            _ => Err(()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rag_top_k = load_usize_with_default("RAG_TOP_K", 200)?;
        let rag_rerank_top_k = load_usize_with_default("RAG_RERANK_TOP_K", 20)?;

        if rag_top_k == 0 {
            return Err(ConfigError::InvalidValue(
                "RAG_TOP_K must be at least 1".into(),
            ));
        }
        if rag_rerank_top_k == 0 || rag_rerank_top_k > rag_top_k {
            return Err(ConfigError::InvalidValue(
                "RAG_RERANK_TOP_K must be between 1 and RAG_TOP_K".into(),
            ));
        }

        Ok(Self {
            vector_store_url: load_env_with_default("VECTOR_STORE_URL", "http://127.0.0.1:6333"),
            vector_store_collection: load_env_with_default(
                "VECTOR_STORE_COLLECTION",
                "agenttic_rag",
            ),
            vector_store_api_key: load_env_optional("VECTOR_STORE_API_KEY"),
            embedding_model: load_env_with_default("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimension: load_usize_with_default("EMBEDDING_DIMENSION", 1024)?,
            embedding_base_url: load_env_with_default(
                "EMBEDDING_BASE_URL",
                "http://127.0.0.1:11434/v1",
            ),
            embedding_batch_size: load_usize_with_default("EMBEDDING_BATCH_SIZE", 2)?,
            embedding_max_concurrency: load_usize_with_default("EMBEDDING_MAX_CONCURRENCY", 4)?,
            chunk_size: load_usize_with_default("CHUNK_SIZE", 800)?,
            chunk_overlap: load_usize_with_default("CHUNK_OVERLAP", 80)?,
            html_chunk_size: load_usize_with_default("HTML_CHUNK_SIZE", 4000)?,
            html_chunk_overlap: load_usize_with_default("HTML_CHUNK_OVERLAP", 200)?,
            rag_top_k,
            rag_rerank_top_k,
            reranker_max_tokens: load_usize_with_default("RERANKER_MAX_TOKENS", 3072)?,
            rerank_max_concurrency: load_usize_with_default("RERANK_MAX_CONCURRENCY", 4)?,
            reranker_base_url: load_env_with_default(
                "RERANKER_BASE_URL",
                "http://127.0.0.1:11434/v1",
            ),
            discovery_webhook_url: load_env_optional("DISCOVERY_WEBHOOK_URL"),
            discovery_webhook_timeout_s: load_u64_with_default(
                "DISCOVERY_WEBHOOK_TIMEOUT_S",
                30,
            )?,
            default_recursive_depth: load_u32_with_default("DEFAULT_RECURSIVE_DEPTH", 2)?,
            llm_base_url: load_env_with_default("LLM_BASE_URL", "http://127.0.0.1:11434/v1"),
            llm_model: load_env_with_default("LLM_MODEL", "gpt-4o-mini"),
            llm_timeout_s: load_u64_with_default("LLM_TIMEOUT_S", 300)?,
            tool_mode: load_env_optional("TOOL_MODE")
                .and_then(|value| value.parse().ok())
                .unwrap_or(ToolMode::Auto),
            tool_max_steps: load_usize_with_default("TOOL_MAX_STEPS", 6)?,
            web_cache_ttl_s: load_u64_with_default("WEB_CACHE_TTL_S", 3600)?,
            searxng_query_url: load_env_with_default(
                "SEARXNG_QUERY_URL",
                "http://127.0.0.1:8080/search",
            ),
            web_search_result_count: load_usize_with_default("WEB_SEARCH_RESULT_COUNT", 5)?,
            web_search_concurrent_requests: load_usize_with_default(
                "WEB_SEARCH_CONCURRENT_REQUESTS",
                4,
            )?,
            web_search_timeout_s: load_u64_with_default("WEB_SEARCH_TIMEOUT_S", 30)?,
            gap_recall_top_k: load_usize_with_default("GAP_RECALL_TOP_K", 5)?,
            web_search_max_queries: load_usize_with_default("WEB_SEARCH_MAX_QUERIES", 3)?,
            max_words_per_query: load_usize_with_default("MAX_WORDS_PER_QUERY", 8)?,
            simple_query_max_queries: load_usize_with_default("SIMPLE_QUERY_MAX_QUERIES", 1)?,
            simple_query_max_words_per_query: load_usize_with_default(
                "SIMPLE_QUERY_MAX_WORDS_PER_QUERY",
                6,
            )?,
            max_keywords_per_gap: load_usize_with_default("MAX_KEYWORDS_PER_GAP", 3)?,
            database_path: load_env_with_default("DATABASE_PATH", "agenttic_rag.db"),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn load_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_env_with_default(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        vector_store_url = %config.vector_store_url,
        collection = %config.vector_store_collection,
        server_port = ?config.server_port,
        embedding_model = %config.embedding_model,
        embedding_dimension = config.embedding_dimension,
        rag_top_k = config.rag_top_k,
        rag_rerank_top_k = config.rag_rerank_top_k,
        tool_mode = ?config.tool_mode,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_rerank_top_k_larger_than_top_k() {
        // SAFETY: env var mutation is confined to this single-threaded test.
        unsafe {
            env::set_var("RAG_TOP_K", "10");
            env::set_var("RAG_RERANK_TOP_K", "20");
        }
        let result = Config::from_env();
        unsafe {
            env::remove_var("RAG_TOP_K");
            env::remove_var("RAG_RERANK_TOP_K");
        }
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn tool_mode_parses_case_insensitively() {
        assert_eq!("AUTO".parse::<ToolMode>(), Ok(ToolMode::Auto));
        assert_eq!("harmony".parse::<ToolMode>(), Ok(ToolMode::Harmony));
    }
}
