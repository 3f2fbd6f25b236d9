//! Ingestion pipeline (C8): fetch, chunk, persist, embed, and hand off
//! recursive sub-document discovery to a webhook (C7).

pub mod discovery;
pub mod task_tracker;

use std::sync::Arc;

use md5::{Digest, Md5};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::chunking::{self, ChunkProfile, ChunkingError};
use crate::collection;
use crate::db::{DbError, MetadataStore};
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::fetch::{FetchError, Fetcher};
use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::models::{FIXED_INGEST_SESSION_ID, WorkflowState};
use crate::vectorstore::{PointInsert, VectorStoreClient, VectorStoreError};

use discovery::{DataListItem, DiscoveryClient, DiscoveryError, DiscoveryRequest};
use task_tracker::TaskTracker;

/// The extraction selector used for the plain-text fetch variant. No
/// per-site overrides are exposed; the fetcher's extraction is generic.
const DEFAULT_EXTRACT_SELECTOR: &str = "body";

/// Errors raised by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// The plain-text extraction variant yielded zero chunks. Retriable: the
    /// page may have been a JS-rendered shell the lightweight fetcher
    /// couldn't read.
    #[error("fetched page yielded no extractable text")]
    EmptyExtraction,
}

/// A client-initiated or recursively-enqueued ingestion request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub url: String,
    pub embedding_model: String,
    pub embedding_dimensions: Option<usize>,
    pub recursive_depth: u32,
    pub is_recursive: bool,
    pub parent_source_id: Option<i64>,
    pub inherited_document_name: Option<String>,
    pub inherited_collection_name: Option<String>,
    pub webhook_url: Option<String>,
}

impl IngestRequest {
    /// A fresh, non-recursive, depth-2 ingestion request for `url`.
    pub fn new(url: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            embedding_model: embedding_model.into(),
            embedding_dimensions: None,
            recursive_depth: 2,
            is_recursive: false,
            parent_source_id: None,
            inherited_document_name: None,
            inherited_collection_name: None,
            webhook_url: None,
        }
    }
}

/// Outcome of one `ingest` call.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub source_id: i64,
    pub document_name: String,
    pub collection_name: String,
    pub total_chunks: usize,
    pub short_circuited: bool,
}

/// Outcome of handling one inbound discovery callback.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The body had no `task_name` at all — not a callback.
    NotACallback,
    /// `task_name` named something other than `"agenttic_ingest"`.
    Rejected { task_name: String },
    /// `request_id` did not match any tracked workflow execution.
    UnknownRequest { request_id: String },
    /// Accepted: the workflow-execution row was marked `success` and
    /// `sub_docs_enqueued` sub-document ingestions were scheduled.
    Accepted { sub_docs_enqueued: usize },
}

/// Coordinates fetch → chunk → persist → embed → discovery for one URL, and
/// handles the webhook callbacks that drive recursive sub-document ingestion.
#[derive(Clone)]
pub struct IngestPipeline {
    db: MetadataStore,
    fetcher: Arc<dyn Fetcher>,
    embedding_client: Arc<dyn EmbeddingClient>,
    vector_store: Arc<VectorStoreClient>,
    llm: LlmClient,
    naming_model: String,
    discovery: DiscoveryClient,
    task_tracker: Arc<TaskTracker>,
    embedding_batch_size: usize,
    embedding_max_concurrency: usize,
    vector_dimension: u64,
    default_embedding_model: String,
    default_embedding_dimensions: Option<usize>,
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: MetadataStore,
        fetcher: Arc<dyn Fetcher>,
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<VectorStoreClient>,
        llm: LlmClient,
        naming_model: String,
        discovery: DiscoveryClient,
        task_tracker: Arc<TaskTracker>,
        embedding_batch_size: usize,
        embedding_max_concurrency: usize,
        vector_dimension: u64,
        default_embedding_model: String,
        default_embedding_dimensions: Option<usize>,
    ) -> Self {
        Self {
            db,
            fetcher,
            embedding_client,
            vector_store,
            llm,
            naming_model,
            discovery,
            task_tracker,
            embedding_batch_size,
            embedding_max_concurrency,
            vector_dimension,
            default_embedding_model,
            default_embedding_dimensions,
        }
    }

    /// Ingest one URL: fetch, chunk, persist, embed+upsert, and (if
    /// `recursive_depth > 0`) dispatch sub-document discovery.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        let session_id = FIXED_INGEST_SESSION_ID;

        if let Some(existing) = self.db.find_source_by_url(&request.url, session_id).await? {
            let total_chunks = self.db.count_chunks(existing.id).await? as usize;
            let collection_name = request
                .inherited_collection_name
                .clone()
                .unwrap_or_else(|| collection::collection_name(&request.url));
            tracing::info!(
                url = %request.url,
                source_id = existing.id,
                "URL already ingested in this session; short-circuiting"
            );
            return Ok(IngestOutcome {
                source_id: existing.id,
                document_name: existing.title,
                collection_name,
                total_chunks,
                short_circuited: true,
            });
        }

        let (document_name, collection_name) = self.resolve_names(&request).await;

        let text = self.fetcher.fetch_then_extract(&request.url, DEFAULT_EXTRACT_SELECTOR).await?;
        let raw_html = self.fetcher.fetch_html(&request.url).await?;

        let text_chunks = chunking::chunk_text(&text, ChunkProfile::TEXT, "cl100k_base")?;
        if text_chunks.is_empty() {
            return Err(IngestError::EmptyExtraction);
        }
        let html_chunks = chunking::chunk_text(&raw_html, ChunkProfile::RAW_HTML, "cl100k_base")?;
        let total_chunks = text_chunks.len();

        let text_rows: Vec<(String, String, i64)> = text_chunks
            .iter()
            .enumerate()
            .map(|(ordinal, content)| {
                (chunk_id_text(session_id, &request.url, ordinal), content.clone(), ordinal as i64)
            })
            .collect();

        let source_id = match self.resolve_source_target(&request).await {
            SourceTarget::Existing(id) => {
                self.db.append_chunks(id, session_id, &text_rows).await?;
                id
            }
            SourceTarget::New => {
                self.db
                    .create_source_with_chunks(&request.url, &document_name, session_id, &text_rows)
                    .await?
            }
        };

        self.embed_and_upsert(
            source_id,
            session_id,
            &collection_name,
            &text_rows,
            &request.embedding_model,
            request.embedding_dimensions,
        )
        .await?;

        self.dispatch_discovery(&request, source_id, &document_name, &collection_name, &html_chunks, total_chunks)
            .await?;

        Ok(IngestOutcome {
            source_id,
            document_name,
            collection_name,
            total_chunks,
            short_circuited: false,
        })
    }

    /// Handle one inbound discovery callback (C7).
    pub async fn handle_discovery_callback(&self, raw: &Value) -> Result<CallbackOutcome, IngestError> {
        let parsed = match discovery::parse_callback(raw) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Ok(CallbackOutcome::NotACallback),
            Err(rejected) => {
                tracing::warn!(
                    task_name = %rejected.task_name,
                    "Rejected discovery callback with an unsupported task_name"
                );
                return Ok(CallbackOutcome::Rejected { task_name: rejected.task_name });
            }
        };

        let Some(execution) = self.db.get_workflow_execution(&parsed.request_id).await? else {
            tracing::warn!(request_id = %parsed.request_id, "Discovery callback for unknown workflow execution");
            return Ok(CallbackOutcome::UnknownRequest { request_id: parsed.request_id });
        };

        self.db.update_workflow_state(&parsed.request_id, WorkflowState::Success).await?;

        if parsed.recursive_depth == 0 || parsed.sub_docs.is_empty() {
            return Ok(CallbackOutcome::Accepted { sub_docs_enqueued: 0 });
        }

        let enqueued = parsed.sub_docs.len();
        self.task_tracker
            .create_task(
                parsed.request_id.clone(),
                execution.url.clone(),
                execution.document_name.clone(),
                execution.collection_name.clone(),
                parsed.sub_docs.clone(),
            )
            .await;

        let pipeline = self.clone();
        let task_id = parsed.request_id;
        let sub_docs = parsed.sub_docs;
        let document_name = execution.document_name;
        let collection_name = execution.collection_name;
        let source_id = execution.source_id;
        let recursive_depth = parsed.recursive_depth - 1;

        tokio::spawn(async move {
            pipeline
                .ingest_sub_docs(task_id, sub_docs, source_id, document_name, collection_name, recursive_depth)
                .await;
        });

        Ok(CallbackOutcome::Accepted { sub_docs_enqueued: enqueued })
    }

    /// Background handler: ingest each discovered sub-document URL under the
    /// parent `Source`, bounded by `MAX_CONCURRENT_SUB_DOCS` (the embedding
    /// concurrency limit), reporting each outcome to the task tracker.
    async fn ingest_sub_docs(
        &self,
        task_id: String,
        sub_docs: Vec<String>,
        parent_source_id: i64,
        document_name: String,
        collection_name: String,
        recursive_depth: u32,
    ) {
        self.task_tracker.start_task(&task_id).await;
        let semaphore = Arc::new(Semaphore::new(self.embedding_max_concurrency.max(1)));
        let mut handles = Vec::new();

        for url in sub_docs {
            let semaphore = Arc::clone(&semaphore);
            let pipeline = self.clone();
            let task_id = task_id.clone();
            let document_name = document_name.clone();
            let collection_name = collection_name.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("sub-doc semaphore never closed");
                let request = IngestRequest {
                    url: url.clone(),
                    embedding_model: pipeline.default_embedding_model.clone(),
                    embedding_dimensions: pipeline.default_embedding_dimensions,
                    recursive_depth,
                    is_recursive: true,
                    parent_source_id: Some(parent_source_id),
                    inherited_document_name: Some(document_name),
                    inherited_collection_name: Some(collection_name),
                    webhook_url: None,
                };
                let outcome = pipeline.ingest(request).await;
                let (status, error) = match outcome {
                    Ok(_) => (crate::models::TaskStatus::Completed, None),
                    Err(error) => (crate::models::TaskStatus::Failed, Some(error.to_string())),
                };
                pipeline.task_tracker.update_sub_doc_status(&task_id, &url, status, error).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn resolve_names(&self, request: &IngestRequest) -> (String, String) {
        if request.is_recursive {
            let document_name = request
                .inherited_document_name
                .clone()
                .unwrap_or_else(|| fallback_document_name(&request.url));
            let collection_name = request
                .inherited_collection_name
                .clone()
                .unwrap_or_else(|| collection::collection_name(&request.url));
            return (document_name, collection_name);
        }

        let document_name = self.generate_document_name(&request.url).await;
        let collection_name = collection::collection_name(&request.url);
        (document_name, collection_name)
    }

    async fn generate_document_name(&self, url: &str) -> String {
        let prompt = format!(
            "Generate a concise, user-facing display name for the document at this URL. \
             Return JSON of the shape {{\"document_name\": \"...\"}} and nothing else.\n\nURL: {url}"
        );
        let messages = [
            ChatMessage::system("You generate display names for newly ingested documents."),
            ChatMessage::user(prompt),
        ];

        match self.llm.generate_answer(&self.naming_model, &messages).await {
            Ok(answer) => extract_document_name(&answer).unwrap_or_else(|| fallback_document_name(url)),
            Err(error) => {
                tracing::warn!(%error, url, "Document naming LLM call failed; using URL-derived fallback");
                fallback_document_name(url)
            }
        }
    }

    async fn resolve_source_target(&self, request: &IngestRequest) -> SourceTarget {
        if request.is_recursive {
            if let Some(parent_id) = request.parent_source_id {
                match self.db.get_source(parent_id).await {
                    Ok(_) => return SourceTarget::Existing(parent_id),
                    Err(_) => tracing::warn!(
                        parent_id,
                        "parent_source_id did not resolve to a Source; creating a new one"
                    ),
                }
            }
        }
        SourceTarget::New
    }

    #[allow(clippy::too_many_arguments)]
    async fn embed_and_upsert(
        &self,
        source_id: i64,
        session_id: &str,
        collection_name: &str,
        rows: &[(String, String, i64)],
        model: &str,
        dimensions: Option<usize>,
    ) -> Result<(), IngestError> {
        if rows.is_empty() {
            return Ok(());
        }

        self.vector_store
            .create_collection_if_not_exists(collection_name, self.vector_dimension)
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.embedding_max_concurrency.max(1)));
        let mut handles = Vec::new();

        for batch in rows.chunks(self.embedding_batch_size.max(1)) {
            let semaphore = Arc::clone(&semaphore);
            let embedding_client = Arc::clone(&self.embedding_client);
            let vector_store = Arc::clone(&self.vector_store);
            let model = model.to_string();
            let session_id = session_id.to_string();
            let collection_name = collection_name.to_string();
            let batch: Vec<(String, String, i64)> = batch.to_vec();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("embedding semaphore never closed");
                let contents: Vec<String> = batch.iter().map(|(_, content, _)| content.clone()).collect();
                let expected = contents.len();

                let embeddings = match embedding_client.embed_texts(&contents, &model, expected, dimensions, 1).await
                {
                    Ok(vectors) if vectors.len() == expected => vectors,
                    Ok(vectors) => {
                        tracing::warn!(
                            got = vectors.len(),
                            expected,
                            "Embedding batch returned an unexpected vector count; skipping upsert"
                        );
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(%error, "Embedding batch failed; skipping");
                        return;
                    }
                };

                let points: Vec<PointInsert> = batch
                    .into_iter()
                    .zip(embeddings)
                    .map(|((chunk_id, content, _ordinal), vector)| PointInsert {
                        source_id,
                        session_id: session_id.clone(),
                        chunk_id,
                        content,
                        vector,
                    })
                    .collect();

                if let Err(error) = vector_store.add_embeddings(&collection_name, points).await {
                    tracing::warn!(%error, "Vector-store upsert failed for a batch; skipping");
                }
            }));
        }

        for handle in handles {
            handle
                .await
                .map_err(|_| EmbeddingClientError::InvalidRequest("embedding task panicked".into()))?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_discovery(
        &self,
        request: &IngestRequest,
        source_id: i64,
        document_name: &str,
        collection_name: &str,
        html_chunks: &[String],
        total_text_chunks: usize,
    ) -> Result<(), IngestError> {
        if request.recursive_depth == 0 {
            return Ok(());
        }
        let Some(webhook_url) = request.webhook_url.as_deref() else {
            tracing::debug!(url = %request.url, "No discovery webhook configured; skipping discovery");
            return Ok(());
        };

        let data_list: Vec<DataListItem> = html_chunks
            .iter()
            .enumerate()
            .map(|(index, content)| DataListItem {
                chunk_id: chunk_id_html(FIXED_INGEST_SESSION_ID, &request.url, index),
                content: content.clone(),
                index,
            })
            .collect();

        let request_id = new_request_id(&request.url);
        self.db
            .create_workflow_execution(
                &request_id,
                &request.url,
                document_name,
                collection_name,
                source_id,
                request.recursive_depth as i64,
            )
            .await?;

        let payload = DiscoveryRequest::new(
            document_name.to_string(),
            collection_name.to_string(),
            request.url.clone(),
            total_text_chunks,
            discovery::discovery_prompt(&request.url),
            data_list,
            request_id.clone(),
            request.recursive_depth,
        );

        if let Err(error) = self.discovery.post(webhook_url, &payload).await {
            tracing::warn!(%error, request_id, "Discovery webhook POST failed; marking workflow execution as errored");
            self.db.update_workflow_state(&request_id, WorkflowState::Error).await?;
        }
        Ok(())
    }
}

enum SourceTarget {
    Existing(i64),
    New,
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// `chunk_id = md5(session_id|url|ordinal)` for the retrieval-sized text variant.
fn chunk_id_text(session_id: &str, url: &str, ordinal: usize) -> String {
    md5_hex(&format!("{session_id}|{url}|{ordinal}"))
}

/// `chunk_id = md5(session_id|url|"html"|ordinal)` for the raw-HTML discovery variant.
fn chunk_id_html(session_id: &str, url: &str, ordinal: usize) -> String {
    md5_hex(&format!("{session_id}|{url}|html|{ordinal}"))
}

/// A request identifier unique enough to key a `workflow_executions` row and
/// round-trip through an external webhook: the URL, today's date, and a
/// random UUID. Not itself transmitted as a URL, so it is not percent-encoded.
fn new_request_id(url: &str) -> String {
    let now = collection::now_rfc3339();
    let date = now.split('T').next().unwrap_or(&now).replace('-', "");
    format!("{url}_{date}_{}", uuid::Uuid::new_v4())
}

/// Extract `document_name` from the first `{...}` JSON object found in an
/// LLM response, tolerating surrounding prose.
fn extract_document_name(llm_output: &str) -> Option<String> {
    let pattern = regex::Regex::new(r"(?s)\{.*\}").ok()?;
    let captured = pattern.find(llm_output)?;
    let value: Value = serde_json::from_str(captured.as_str()).ok()?;
    value.get("document_name").and_then(Value::as_str).map(str::to_string)
}

/// Derive a display name from a URL's last non-empty path segment, falling
/// back to the whole URL if there is none.
fn fallback_document_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| url.to_string())
}
