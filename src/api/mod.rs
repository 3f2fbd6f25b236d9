//! HTTP surface (ambient): the axum router exposing ingestion (C1/C7/C8),
//! retrieval (C9), and collection management (C4/C13) over `POST`/`GET`
//! endpoints, plus a liveness probe.
//!
//! One `AppState` bundles the shared clients and pipelines built once at
//! startup in `main`; handlers borrow it through axum's `State` extractor
//! and return `crate::errors::AppError` directly, which already knows how
//! to render every subsystem's failure as the shared JSON error shape.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::MetadataStore;
use crate::embedding::EmbeddingClient;
use crate::errors::AppError;
use crate::ingest::{IngestPipeline, IngestRequest, CallbackOutcome};
use crate::llm::LlmClient;
use crate::models::FIXED_INGEST_SESSION_ID;
use crate::orchestrator::IntelligentOrchestrator;
use crate::rerank::RerankClient;
use crate::retrieval::{QueryRequest, RetrievalPipeline};
use crate::streaming::SseEvent;
use crate::tools::RunConfig;
use crate::vectorstore::VectorStoreClient;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: MetadataStore,
    pub embedding_client: Arc<dyn EmbeddingClient>,
    pub vector_store: Arc<VectorStoreClient>,
    pub rerank_client: Option<Arc<dyn RerankClient>>,
    pub llm: LlmClient,
    pub ingest: IngestPipeline,
    pub orchestrator: Arc<IntelligentOrchestrator>,
    pub default_collection: String,
    pub rag_rerank_top_k: usize,
    pub reranker_max_tokens: usize,
    pub rerank_max_concurrency: usize,
    pub generation_model: String,
    pub tool_max_steps: u32,
    pub default_tool_mode: crate::tools::ToolMode,
}

impl AppState {
    /// Build an ephemeral retrieval pipeline scoped to one collection. Cheap:
    /// every field is an `Arc`/`String` clone, not a fresh connection.
    fn retrieval_for(&self, collection: impl Into<String>) -> RetrievalPipeline<MetadataStore> {
        RetrievalPipeline::new(
            Arc::clone(&self.embedding_client),
            Arc::clone(&self.vector_store),
            self.rerank_client.clone(),
            self.llm.clone(),
            self.db.clone(),
            collection.into(),
            self.rag_rerank_top_k,
            self.reranker_max_tokens,
            self.rerank_max_concurrency,
            self.generation_model.clone(),
        )
    }

    fn run_config(&self, model: Option<String>) -> RunConfig {
        let mut run_config = RunConfig::new(model.unwrap_or_else(|| self.generation_model.clone()));
        run_config.max_steps = self.tool_max_steps;
        run_config.tool_mode = self.default_tool_mode;
        run_config
    }
}

/// Build the router. `state` is constructed once in `main` from a loaded
/// [`Config`](crate::config::Config) and the real HTTP/DB clients.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/agenttic-ingest", post(agenttic_ingest))
        .route("/ingest", post(ingest_stream))
        .route("/query", post(query))
        .route("/collections", get(list_collections))
        .route("/collections/:id", get(get_collection).delete(delete_collection))
        .route("/collections/query", post(collections_query))
        .route("/collections/query-stream", post(collections_query_stream))
        .route("/api/documents/:id", delete(delete_document))
        .route("/api/session/cleanup", post(session_cleanup))
        .with_state(Arc::new(state))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Request body for a client-initiated ingest call. Distinguished from a
/// webhook callback by the absence of `task_name` (§6).
#[derive(Debug, Deserialize)]
struct IngestApiRequest {
    url: String,
    embedding_model: Option<String>,
    embedding_dimensions: Option<usize>,
    webhook_url: Option<String>,
    recursive_depth: Option<u32>,
    #[serde(default)]
    is_recursive: bool,
    document_name: Option<String>,
    collection_name: Option<String>,
    parent_source_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct IngestApiResponse {
    success: bool,
    message: String,
    document_name: String,
    collection_name: String,
    total_chunks: usize,
    source_id: i64,
}

#[derive(Debug, Serialize)]
struct CallbackApiResponse {
    success: bool,
    message: String,
    task_name: String,
    document_name: String,
    total_sub_docs: usize,
    sub_docs_processing: bool,
}

/// `POST /agenttic-ingest` — a client request or a discovery-webhook
/// callback, discriminated by the presence of `task_name` in the body.
async fn agenttic_ingest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    if body.get("task_name").is_some() {
        let outcome = state.ingest.handle_discovery_callback(&body).await?;
        let response = match outcome {
            CallbackOutcome::NotACallback => CallbackApiResponse {
                success: false,
                message: "not a discovery callback".to_string(),
                task_name: String::new(),
                document_name: String::new(),
                total_sub_docs: 0,
                sub_docs_processing: false,
            },
            CallbackOutcome::Rejected { task_name } => CallbackApiResponse {
                success: false,
                message: format!("unsupported task_name: {task_name}"),
                task_name,
                document_name: String::new(),
                total_sub_docs: 0,
                sub_docs_processing: false,
            },
            CallbackOutcome::UnknownRequest { request_id } => CallbackApiResponse {
                success: false,
                message: format!("unknown request_id: {request_id}"),
                task_name: "agenttic_ingest".to_string(),
                document_name: String::new(),
                total_sub_docs: 0,
                sub_docs_processing: false,
            },
            CallbackOutcome::Accepted { sub_docs_enqueued } => CallbackApiResponse {
                success: true,
                message: "callback accepted".to_string(),
                task_name: "agenttic_ingest".to_string(),
                document_name: String::new(),
                total_sub_docs: sub_docs_enqueued,
                sub_docs_processing: sub_docs_enqueued > 0,
            },
        };
        return Ok(Json(serde_json::to_value(response).expect("CallbackApiResponse is always serializable")));
    }

    let request: IngestApiRequest = serde_json::from_value(body)
        .map_err(|error| AppError::validation(format!("invalid ingest request body: {error}")))?;

    let mut ingest_request = IngestRequest::new(
        request.url,
        request.embedding_model.unwrap_or_else(|| state.generation_model.clone()),
    );
    ingest_request.embedding_dimensions = request.embedding_dimensions;
    ingest_request.webhook_url = request.webhook_url;
    ingest_request.recursive_depth = request.recursive_depth.unwrap_or(0);
    ingest_request.is_recursive = request.is_recursive;
    ingest_request.inherited_document_name = request.document_name;
    ingest_request.inherited_collection_name = request.collection_name;
    ingest_request.parent_source_id = request.parent_source_id;

    let outcome = state.ingest.ingest(ingest_request).await?;
    Ok(Json(serde_json::to_value(IngestApiResponse {
        success: true,
        message: if outcome.short_circuited { "already ingested".to_string() } else { "ingested".to_string() },
        document_name: outcome.document_name,
        collection_name: outcome.collection_name,
        total_chunks: outcome.total_chunks,
        source_id: outcome.source_id,
    })
    .expect("IngestApiResponse is always serializable")))
}

/// `POST /ingest` — session-scoped streaming ingest. Requires `X-Session-ID`;
/// progress is reported as `status`/`complete`/`error` SSE events around the
/// same fetch/chunk/embed pipeline `/agenttic-ingest` uses (ingestion itself
/// is keyed to the fixed ingest session per the collection-identity design,
/// so the header is validated for the caller's benefit rather than changing
/// where chunks are persisted).
async fn ingest_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IngestApiRequest>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>>, AppError> {
    if headers.get("X-Session-ID").is_none() {
        return Err(AppError::validation("missing required X-Session-ID header"));
    }

    let mut ingest_request = IngestRequest::new(
        body.url,
        body.embedding_model.unwrap_or_else(|| state.generation_model.clone()),
    );
    ingest_request.embedding_dimensions = body.embedding_dimensions;
    ingest_request.webhook_url = body.webhook_url;
    ingest_request.recursive_depth = body.recursive_depth.unwrap_or(0);
    ingest_request.is_recursive = body.is_recursive;
    ingest_request.inherited_document_name = body.document_name;
    ingest_request.inherited_collection_name = body.collection_name;
    ingest_request.parent_source_id = body.parent_source_id;

    let pipeline = state.ingest.clone();
    let stream = async_stream::stream! {
        yield SseEvent::Status { phase: "fetching".to_string() }.into_axum_event();
        match pipeline.ingest(ingest_request).await {
            Ok(outcome) => {
                yield SseEvent::Complete(
                    serde_json::to_value(IngestApiResponse {
                        success: true,
                        message: if outcome.short_circuited { "already ingested".to_string() } else { "ingested".to_string() },
                        document_name: outcome.document_name,
                        collection_name: outcome.collection_name,
                        total_chunks: outcome.total_chunks,
                        source_id: outcome.source_id,
                    })
                    .unwrap_or(Value::Null),
                )
                .into_axum_event();
            }
            Err(error) => {
                yield SseEvent::Error { message: error.to_string() }.into_axum_event();
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Body shared by `/query`, `/collections/query`, and `/collections/query-stream`.
#[derive(Debug, Deserialize)]
struct QueryApiRequest {
    query: String,
    top_k: Option<usize>,
    embedding_model: Option<String>,
    embedding_dimensions: Option<usize>,
    document_ids: Option<Vec<i64>>,
    use_hybrid: Option<bool>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct QueryApiResponse {
    answer: String,
    sources: Vec<SourceApiPayload>,
    success: bool,
}

#[derive(Debug, Serialize)]
struct SourceApiPayload {
    chunk_id: String,
    source_id: i64,
    url: String,
    title: String,
    content: String,
    score: f32,
}

impl From<crate::retrieval::RetrievedSource> for SourceApiPayload {
    fn from(source: crate::retrieval::RetrievedSource) -> Self {
        Self {
            chunk_id: source.chunk_id,
            source_id: source.source_id,
            url: source.url,
            title: source.title,
            content: source.content,
            score: source.score,
        }
    }
}

fn build_query_request(body: &QueryApiRequest, embedding_model_default: &str) -> QueryRequest {
    let mut request = QueryRequest::new(
        body.query.clone(),
        body.embedding_model.clone().unwrap_or_else(|| embedding_model_default.to_string()),
        FIXED_INGEST_SESSION_ID,
    );
    if let Some(top_k) = body.top_k {
        request.top_k = top_k;
    }
    request.embedding_dimensions = body.embedding_dimensions;
    request.document_ids = body.document_ids.clone();
    if let Some(use_hybrid) = body.use_hybrid {
        request.use_hybrid = use_hybrid;
    }
    request
}

/// `POST /query` — non-stream or SSE, selected by `stream`. Retrieval (C9)
/// finds and reranks sources; synthesis runs through the intelligent
/// orchestrator (C11), which decides fast-route vs. decompose-reason-search
/// and picks the tool-calling strategy, matching the query data flow.
async fn query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryApiRequest>,
) -> Result<axum::response::Response, AppError> {
    run_query(&state, state.default_collection.clone(), body).await
}

async fn run_query(
    state: &Arc<AppState>,
    collection: String,
    body: QueryApiRequest,
) -> Result<axum::response::Response, AppError> {
    let pipeline = state.retrieval_for(collection);
    let request = build_query_request(&body, &state.generation_model);
    let sources = pipeline.retrieve(&request).await?;
    let contexts: Vec<String> = sources.iter().map(|s| s.content.clone()).collect();
    let run_config = state.run_config(None);

    if body.stream {
        let orchestrator = Arc::clone(&state.orchestrator);
        let stream = async_stream::stream! {
            yield SseEvent::Status { phase: "retrieving".to_string() }.into_axum_event();
            let mut inner = std::pin::pin!(orchestrator.process_query_stream(request.query.clone(), contexts, run_config));
            while let Some(event) = inner.next().await {
                yield event.into_axum_event();
            }
            yield SseEvent::Sources {
                sources: sources.into_iter().map(crate::streaming::SourcePayload::from).collect(),
            }
            .into_axum_event();
            yield SseEvent::Complete(Value::Null).into_axum_event();
        };
        Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
    } else {
        let outcome = state.orchestrator.process_query(&request.query, contexts, run_config).await;
        Ok(Json(QueryApiResponse {
            answer: outcome.answer,
            sources: sources.into_iter().map(SourceApiPayload::from).collect(),
            success: true,
        })
        .into_response())
    }
}

#[derive(Debug, Serialize)]
struct CollectionsListResponse {
    collections: Vec<String>,
}

/// `GET /collections`.
async fn list_collections(State(state): State<Arc<AppState>>) -> Result<Json<CollectionsListResponse>, AppError> {
    let collections = state.vector_store.list_collections().await?;
    Ok(Json(CollectionsListResponse { collections }))
}

#[derive(Debug, Serialize)]
struct CollectionInfoResponse {
    collection: String,
    count: usize,
}

/// `GET /collections/{id}`.
async fn get_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CollectionInfoResponse>, AppError> {
    let count = state.vector_store.count(&id, &Default::default()).await?;
    Ok(Json(CollectionInfoResponse { collection: id, count }))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
    message: String,
}

/// `DELETE /collections/{id}`.
async fn delete_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.vector_store.delete_collection(&id).await?;
    Ok(Json(DeleteResponse { success: true, message: format!("collection {id} deleted") }))
}

#[derive(Debug, Deserialize)]
struct CollectionQueryApiRequest {
    collection: String,
    #[serde(flatten)]
    query: QueryApiRequest,
}

/// `POST /collections/query` — non-stream retrieval+synthesis scoped to one collection.
async fn collections_query(
    State(state): State<Arc<AppState>>,
    Json(mut body): Json<CollectionQueryApiRequest>,
) -> Result<axum::response::Response, AppError> {
    body.query.stream = false;
    run_query(&state, body.collection, body.query).await
}

/// `POST /collections/query-stream` — SSE retrieval+synthesis scoped to one collection.
async fn collections_query_stream(
    State(state): State<Arc<AppState>>,
    Json(mut body): Json<CollectionQueryApiRequest>,
) -> Result<axum::response::Response, AppError> {
    body.query.stream = true;
    run_query(&state, body.collection, body.query).await
}

/// `DELETE /api/documents/{id}` — removes a source's rows and vector points.
async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, AppError> {
    let source = state.db.get_source(id).await?;
    let collection_name = crate::collection::collection_name(&source.url);
    state.vector_store.delete_vector_db_data(&collection_name, &[id]).await?;
    state.db.delete_source(id).await?;
    Ok(Json(DeleteResponse { success: true, message: format!("document {id} deleted") }))
}

#[derive(Debug, Deserialize)]
struct SessionCleanupRequest {
    source_ids: Vec<i64>,
}

/// `POST /api/session/cleanup` — bulk-removes a caller-supplied set of sources.
async fn session_cleanup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionCleanupRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    for &source_id in &body.source_ids {
        let source = state.db.get_source(source_id).await?;
        let collection_name = crate::collection::collection_name(&source.url);
        state.vector_store.delete_vector_db_data(&collection_name, &[source_id]).await?;
        state.db.delete_source(source_id).await?;
    }
    Ok(Json(DeleteResponse { success: true, message: format!("{} document(s) removed", body.source_ids.len()) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_reports_ok() {
        // `healthz` needs no shared state at all, so it is exercised without
        // building a full `AppState`.
        let router = Router::new().route("/healthz", get(healthz));
        let response = router
            .oneshot(Request::builder().method(Method::GET).uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }
}
