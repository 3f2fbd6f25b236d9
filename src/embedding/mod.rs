//! Embedding client (C3): batched `embed_texts` against an OpenAI-compatible
//! embeddings endpoint.
//!
//! Batches are submitted one HTTP request at a time, bounded by a semaphore
//! of size `embedding_max_concurrency`; a failing batch is logged and
//! skipped rather than failing the whole job, so the caller must compare
//! the returned vector count against the input count to detect loss.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// The embedding request failed at the transport level.
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The caller requested a batch size or dimension of zero.
    #[error("invalid embedding request: {0}")]
    InvalidRequest(String),
}

/// Interface implemented by embedding backends. Vectors returned by
/// `embed_texts` are aligned index-for-index with the input list.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed `texts` in batches of `batch_size`, optionally requesting
    /// `dimensions`-wide vectors. Batches run concurrently under a
    /// semaphore of size `max_concurrency`; a failed batch is dropped from
    /// the result rather than aborting the others.
    async fn embed_texts(
        &self,
        texts: &[String],
        model: &str,
        batch_size: usize,
        dimensions: Option<usize>,
        max_concurrency: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// HTTP-backed embedding client targeting an OpenAI-compatible
/// `POST {base_url}/embeddings` endpoint.
#[derive(Clone)]
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEmbeddingClient {
    /// Build a client against `base_url` (no trailing slash expected).
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn embed_batch(
        &self,
        batch: &[String],
        model: &str,
        dimensions: Option<usize>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let request = EmbeddingsRequest {
            model,
            input: batch,
            encoding_format: "float",
            dimensions,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: EmbeddingsResponse = response.json().await?;
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_texts(
        &self,
        texts: &[String],
        model: &str,
        batch_size: usize,
        dimensions: Option<usize>,
        max_concurrency: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if batch_size == 0 {
            return Err(EmbeddingClientError::InvalidRequest(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut handles = Vec::new();

        for (batch_index, chunk) in texts.chunks(batch_size).enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let batch: Vec<String> = chunk.to_vec();
            let model = model.to_string();
            let embedder = self.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("embedding semaphore never closed");
                let result = embedder.embed_batch(&batch, &model, dimensions).await;
                (batch_index, result)
            }));
        }

        let mut ordered: Vec<Option<Vec<Vec<f32>>>> = vec![None; handles.len()];
        for handle in handles {
            let (batch_index, result) = handle.await.expect("embedding task panicked");
            match result {
                Ok(vectors) => ordered[batch_index] = Some(vectors),
                Err(error) => {
                    tracing::warn!(batch_index, error = %error, "Embedding batch failed; skipping");
                }
            }
        }

        Ok(ordered.into_iter().flatten().flatten().collect())
    }
}
