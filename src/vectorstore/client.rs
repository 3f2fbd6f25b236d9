//! HTTP client wrapper for the hybrid dense+sparse vector-store gateway (C4).

use std::collections::HashMap;

use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

use super::filters::build_search_filter;
use super::payload::{build_payload, point_id_from_chunk_id};
use super::types::{
    CountResponse, ListCollectionsResponse, PointInsert, QueryPoint, QueryResponse,
    QueryResponseResult, ScoredPoint, ScrollResponse, SearchFilterArgs, VectorStoreError,
};

/// Reciprocal-rank-fusion constant; 60 is the value used in the original
/// RRF paper and is a common default.
const RRF_K: f64 = 60.0;

/// HTTP-backed hybrid vector store. A single named collection holds both
/// dense embeddings and the sparse-searchable `content` payload field.
pub struct VectorStoreClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl VectorStoreClient {
    /// Build a client against `base_url`, optionally authenticating with
    /// `api_key`.
    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Result<Self, VectorStoreError> {
        let base_url = normalize_base_url(base_url).map_err(VectorStoreError::InvalidUrl)?;
        Ok(Self { client, base_url, api_key })
    }

    /// Create the collection if it does not already exist.
    pub async fn create_collection_if_not_exists(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> Result<(), VectorStoreError> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }

        let body = json!({
            "vectors": { "size": vector_size, "distance": "Cosine" }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{collection}"))?
            .json(&body)
            .send()
            .await?;
        self.ensure_success(response).await
    }

    /// List all collection names known to the store.
    pub async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        let response = self.request(Method::GET, "collections")?.send().await?;
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        let body: ListCollectionsResponse = response.json().await?;
        Ok(body.result.collections.into_iter().map(|c| c.name).collect())
    }

    /// Drop a collection entirely. A no-op (not an error) if it does not exist.
    pub async fn delete_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        if !self.collection_exists(collection).await? {
            return Ok(());
        }
        let response = self
            .request(Method::DELETE, &format!("collections/{collection}"))?
            .send()
            .await?;
        self.ensure_success(response).await
    }

    /// Upsert points for `points`. Point ids are derived deterministically
    /// from each point's `chunk_id`, so re-running the same ingestion is
    /// idempotent.
    pub async fn add_embeddings(
        &self,
        collection: &str,
        points: Vec<PointInsert>,
    ) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let serialized: Vec<Value> = points
            .iter()
            .map(|point| {
                json!({
                    "id": point_id_from_chunk_id(&point.chunk_id),
                    "vector": point.vector,
                    "payload": build_payload(point),
                })
            })
            .collect();

        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))?
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;
        self.ensure_success(response).await
    }

    /// Dense-only ANN search, filtered by session and optional source-id set.
    pub async fn query_embeddings(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: usize,
        args: &SearchFilterArgs,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        self.search_points(collection, vector, top_k, build_search_filter(args))
            .await
    }

    /// Hybrid dense+sparse search: runs dense ANN (`k_dense`) and a sparse
    /// text match over the `content` payload (`k_sparse`), then fuses the
    /// two rankings with reciprocal-rank-fusion, returning the top `top_k`.
    pub async fn query_hybrid(
        &self,
        collection: &str,
        text: &str,
        vector: Vec<f32>,
        top_k: usize,
        args: &SearchFilterArgs,
        k_dense: usize,
        k_sparse: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let filter = build_search_filter(args);
        let dense = self
            .search_points(collection, vector, k_dense, filter.clone())
            .await?;
        let sparse = self.sparse_search(collection, text, k_sparse, filter).await?;

        Ok(reciprocal_rank_fusion(&dense, &sparse, top_k))
    }

    /// Remove every point whose `source_id` payload field is in `source_ids`.
    pub async fn delete_vector_db_data(
        &self,
        collection: &str,
        source_ids: &[i64],
    ) -> Result<(), VectorStoreError> {
        if source_ids.is_empty() {
            return Ok(());
        }
        let filter = json!({
            "must": [{ "key": "source_id", "match": { "any": source_ids } }]
        });
        let response = self
            .request(Method::POST, &format!("collections/{collection}/points/delete"))?
            .json(&json!({ "filter": filter }))
            .send()
            .await?;
        self.ensure_success(response).await
    }

    /// Count points matching an optional filter. Returns 0 when the
    /// collection does not exist.
    pub async fn count(
        &self,
        collection: &str,
        args: &SearchFilterArgs,
    ) -> Result<usize, VectorStoreError> {
        if !self.collection_exists(collection).await? {
            return Ok(0);
        }

        let filter = build_search_filter(args).unwrap_or_else(|| json!({ "must": [] }));
        let response = self
            .request(Method::POST, &format!("collections/{collection}/points/count"))?
            .json(&json!({ "filter": filter, "exact": true }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        let body: CountResponse = response.json().await?;
        Ok(body.result.count)
    }

    async fn sparse_search(
        &self,
        collection: &str,
        text: &str,
        k_sparse: usize,
        base_filter: Option<Value>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        if k_sparse == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let terms: Vec<String> = text
            .split_whitespace()
            .map(|term| term.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut must = match base_filter {
            Some(Value::Object(obj)) => obj
                .get("must")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        must.push(json!({ "key": "content", "match": { "text": terms[0] } }));

        let candidate_limit = (k_sparse * 4).max(k_sparse);
        let response = self
            .request(Method::POST, &format!("collections/{collection}/points/scroll"))?
            .json(&json!({
                "filter": { "must": must },
                "with_payload": true,
                "with_vector": false,
                "limit": candidate_limit,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let body: ScrollResponse = response.json().await?;
        let mut scored: Vec<ScoredPoint> = body
            .result
            .points
            .into_iter()
            .filter_map(|point| {
                let id = point.id?;
                let payload = point.payload?;
                let content = payload.get("content")?.as_str()?.to_lowercase();
                let overlap = terms.iter().filter(|term| content.contains(term.as_str())).count();
                point_from_payload(stringify_point_id(id), overlap as f32, payload)
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k_sparse);
        Ok(scored)
    }

    async fn search_points(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let mut body = json!({ "query": vector, "limit": limit, "with_payload": true });
        if let Some(filter_value) = filter {
            body.as_object_mut().unwrap().insert("filter".into(), filter_value);
        }

        let response = self
            .request(Method::POST, &format!("collections/{collection}/points/query"))?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        Ok(points
            .into_iter()
            .filter_map(|point: QueryPoint| {
                let payload = point.payload?;
                point_from_payload(stringify_point_id(point.id), point.score, payload)
            })
            .collect())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))?
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.status_error(response).await),
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, VectorStoreError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key {
            if !api_key.is_empty() {
                req = req.header("api-key", api_key);
            }
        }
        Ok(req)
    }

    async fn ensure_success(&self, response: reqwest::Response) -> Result<(), VectorStoreError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error(response).await)
        }
    }

    async fn status_error(&self, response: reqwest::Response) -> VectorStoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        VectorStoreError::UnexpectedStatus { status, body }
    }
}

fn point_from_payload(
    id: String,
    score: f32,
    payload: serde_json::Map<String, Value>,
) -> Option<ScoredPoint> {
    Some(ScoredPoint {
        id,
        score,
        source_id: payload.get("source_id")?.as_i64()?,
        session_id: payload.get("session_id")?.as_str()?.to_string(),
        chunk_id: payload.get("chunk_id")?.as_str()?.to_string(),
        content: payload.get("content")?.as_str()?.to_string(),
    })
}

fn reciprocal_rank_fusion(
    dense: &[ScoredPoint],
    sparse: &[ScoredPoint],
    top_k: usize,
) -> Vec<ScoredPoint> {
    let mut fused: HashMap<String, (f64, ScoredPoint)> = HashMap::new();

    for (rank, point) in dense.iter().enumerate() {
        let entry = fused
            .entry(point.id.clone())
            .or_insert_with(|| (0.0, point.clone()));
        entry.0 += 1.0 / (RRF_K + rank as f64 + 1.0);
    }
    for (rank, point) in sparse.iter().enumerate() {
        let entry = fused
            .entry(point.id.clone())
            .or_insert_with(|| (0.0, point.clone()));
        entry.0 += 1.0 / (RRF_K + rank as f64 + 1.0);
    }

    let mut results: Vec<(f64, ScoredPoint)> = fused.into_values().collect();
    results.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(top_k);
    results
        .into_iter()
        .map(|(score, mut point)| {
            point.score = score as f32;
            point
        })
        .collect()
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

impl Clone for ScoredPoint {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            score: self.score,
            source_id: self.source_id,
            session_id: self.session_id.clone(),
            chunk_id: self.chunk_id.clone(),
            content: self.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn query_embeddings_emits_expected_request_and_parses_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/demo/points/query");
                then.status(200).json_body(json!({
                    "result": [
                        {
                            "id": "11111111-1111-1111-1111-111111111111",
                            "score": 0.9,
                            "payload": {
                                "source_id": 1,
                                "session_id": "s1",
                                "chunk_id": "c1",
                                "content": "hello world"
                            }
                        }
                    ]
                }));
            })
            .await;

        let client = VectorStoreClient::new(Client::new(), &server.base_url(), None).expect("client");
        let results = client
            .query_embeddings("demo", vec![0.1, 0.2], 5, &SearchFilterArgs::default())
            .await
            .expect("query");

        mock.assert();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c1");
    }

    #[test]
    fn rrf_prefers_items_ranked_highly_in_both_lists() {
        let make = |id: &str| ScoredPoint {
            id: id.to_string(),
            score: 0.0,
            source_id: 1,
            session_id: "s".into(),
            chunk_id: id.to_string(),
            content: String::new(),
        };
        let dense = vec![make("a"), make("b"), make("c")];
        let sparse = vec![make("b"), make("a"), make("d")];

        let fused = reciprocal_rank_fusion(&dense, &sparse, 4);
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[1].id, "b");
    }
}
