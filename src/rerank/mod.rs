//! Reranker client (C5): token-budgeted batch reranking over an HTTP
//! cross-encoder service.
//!
//! One `RerankClient` trait, one HTTP-backed implementation — the transport
//! is an injected `reqwest::Client`. On failure the caller is expected to
//! fall back to the pre-rerank order (see `retrieval::rerank_or_fallback`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiktoken_rs::cl100k_base;
use tokio::sync::Semaphore;

use crate::vectorstore::ScoredPoint;

/// Errors raised by the reranker client.
#[derive(Debug, Error)]
pub enum RerankError {
    #[error("rerank request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("reranker returned {got} scores for {expected} documents")]
    ScoreCountMismatch { got: usize, expected: usize },
}

/// Reranks `(chunk, score)` pairs against `query`, returning new scores.
#[async_trait]
pub trait RerankClient: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<ScoredPoint>,
        max_tokens_per_batch: usize,
        max_concurrency: usize,
    ) -> Result<Vec<ScoredPoint>, RerankError>;
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<Value>,
}

use serde_json::Value;

/// HTTP-backed reranker targeting `POST {base_url}/rerank`.
#[derive(Clone)]
pub struct HttpRerankClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRerankClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn rerank_batch(
        &self,
        query: &str,
        batch: &[ScoredPoint],
    ) -> Result<Vec<f32>, RerankError> {
        let documents: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();
        let url = format!("{}/rerank", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&RerankRequest { query, documents: &documents })
            .timeout(std::time::Duration::from_secs(180))
            .send()
            .await?
            .error_for_status()?;

        let body: RerankResponse = response.json().await?;
        if body.scores.len() != batch.len() {
            return Err(RerankError::ScoreCountMismatch {
                got: body.scores.len(),
                expected: batch.len(),
            });
        }

        Ok(body
            .scores
            .into_iter()
            .map(|value| {
                value.as_f64().map(|v| v as f32).unwrap_or_else(|| {
                    tracing::warn!(?value, "Non-numeric rerank score; coercing to 0");
                    0.0
                })
            })
            .collect())
    }
}

/// Split `hits` into batches whose estimated token total (`query_tokens +
/// sum(doc_tokens)`) stays under `max_tokens`.
fn token_budgeted_batches(query: &str, hits: &[ScoredPoint], max_tokens: usize) -> Vec<Vec<ScoredPoint>> {
    let bpe = cl100k_base().ok();
    let count = |text: &str| -> usize {
        match &bpe {
            Some(encoding) => encoding.encode_ordinary(text).len(),
            None => text.split_whitespace().count(),
        }
    };

    let query_tokens = count(query);
    let mut batches = Vec::new();
    let mut current: Vec<ScoredPoint> = Vec::new();
    let mut current_tokens = query_tokens;

    for hit in hits {
        let doc_tokens = count(&hit.content);
        if !current.is_empty() && current_tokens + doc_tokens > max_tokens {
            batches.push(std::mem::take(&mut current));
            current_tokens = query_tokens;
        }
        current_tokens += doc_tokens;
        current.push(hit.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[async_trait]
impl RerankClient for HttpRerankClient {
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<ScoredPoint>,
        max_tokens_per_batch: usize,
        max_concurrency: usize,
    ) -> Result<Vec<ScoredPoint>, RerankError> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let batches = token_budgeted_batches(query, &hits, max_tokens_per_batch.max(1));
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut handles = Vec::new();

        for batch in batches {
            let semaphore = Arc::clone(&semaphore);
            let client = self.clone();
            let query = query.to_string();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("rerank semaphore never closed");
                let scores = client.rerank_batch(&query, &batch).await?;
                Ok::<_, RerankError>(
                    batch
                        .into_iter()
                        .zip(scores)
                        .map(|(mut point, score)| {
                            point.score = score;
                            point
                        })
                        .collect::<Vec<_>>(),
                )
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            let batch_result = handle.await.expect("rerank task panicked")?;
            results.extend(batch_result);
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn point(id: &str, content: &str) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            score: 0.0,
            source_id: 1,
            session_id: "s".into(),
            chunk_id: id.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn rerank_sorts_by_new_score_descending() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rerank");
                then.status(200).json_body(json!({ "scores": [0.2, 0.9] }));
            })
            .await;

        let client = HttpRerankClient::new(reqwest::Client::new(), server.base_url());
        let hits = vec![point("a", "doc a"), point("b", "doc b")];
        let reranked = client.rerank("query", hits, 10_000, 4).await.expect("rerank");

        assert_eq!(reranked[0].id, "b");
        assert_eq!(reranked[1].id, "a");
    }

    #[tokio::test]
    async fn rerank_rejects_score_count_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rerank");
                then.status(200).json_body(json!({ "scores": [0.2] }));
            })
            .await;

        let client = HttpRerankClient::new(reqwest::Client::new(), server.base_url());
        let hits = vec![point("a", "doc a"), point("b", "doc b")];
        let err = client.rerank("query", hits, 10_000, 4).await.unwrap_err();
        assert!(matches!(err, RerankError::ScoreCountMismatch { .. }));
    }

    #[test]
    fn token_budgeted_batches_splits_when_budget_exceeded() {
        let hits = vec![point("a", &"word ".repeat(100)), point("b", &"word ".repeat(100))];
        let batches = token_budgeted_batches("q", &hits, 120);
        assert!(batches.len() >= 2);
    }
}
