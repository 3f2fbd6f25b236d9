//! End-to-end query scenarios driven through the real router.

mod support;

use std::sync::Arc;

use agenttic_rag::api::create_router;
use agenttic_rag::models::FIXED_INGEST_SESSION_ID;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use httpmock::MockServer;
use serde_json::{json, Value};
use support::{build_state, chat_completion_body, temp_db_path, StaticFetcher};
use tower::ServiceExt;

/// `POST /query` with `use_hybrid:true` fuses dense + sparse hits, resolves
/// them against a real `Source` row, and reranks (falling back to vector
/// order here since no reranker is configured) before synthesis answers.
#[tokio::test]
async fn hybrid_query_returns_answer_with_resolved_sources() {
    let dir = tempfile::tempdir().unwrap();
    let db = agenttic_rag::db::MetadataStore::connect(&temp_db_path(&dir, "query.sqlite3")).await.unwrap();

    let source_id = db
        .create_source_with_chunks(
            "https://example.com/widgets",
            "Widget Guide",
            FIXED_INGEST_SESSION_ID,
            &[("chunk-0".to_string(), "Widgets are small mechanical parts.".to_string(), 0)],
        )
        .await
        .unwrap();

    let mock = MockServer::start_async().await;
    let collection = "test_collection";

    mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST).path(format!("/collections/{collection}/points/query"));
        then.status(200).json_body(json!({
            "result": [{
                "id": "1",
                "score": 0.9,
                "payload": {
                    "source_id": source_id,
                    "session_id": FIXED_INGEST_SESSION_ID,
                    "chunk_id": "chunk-0",
                    "content": "Widgets are small mechanical parts.",
                }
            }]
        }));
    }).await;
    mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST).path(format!("/collections/{collection}/points/scroll"));
        then.status(200).json_body(json!({ "result": { "points": [], "next_page_offset": null } }));
    }).await;
    let synthesis = mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST)
            .path("/chat/completions")
            .body_contains("knowledgeable assistant");
        then.status(200).json_body(chat_completion_body("Widgets are small mechanical parts used in machines."));
    }).await;

    let fetcher: Arc<dyn agenttic_rag::fetch::Fetcher> = Arc::new(StaticFetcher::new());
    let state = build_state(db, &mock, fetcher).await;
    let router = create_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/query")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "query": "what are widgets?", "top_k": 50, "use_hybrid": true, "stream": false }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["success"], true);
    assert!(!body["answer"].as_str().unwrap().is_empty());
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);
    assert_eq!(body["sources"][0]["source_id"], source_id);
    assert_eq!(body["sources"][0]["url"], "https://example.com/widgets");

    synthesis.assert();
}

/// If the reranker backend is unreachable, the query still succeeds by
/// falling back to the original vector-search order.
#[tokio::test]
async fn query_survives_unreachable_reranker() {
    let dir = tempfile::tempdir().unwrap();
    let db = agenttic_rag::db::MetadataStore::connect(&temp_db_path(&dir, "query_rerank_down.sqlite3")).await.unwrap();

    let source_id = db
        .create_source_with_chunks(
            "https://example.com/gizmos",
            "Gizmo Guide",
            FIXED_INGEST_SESSION_ID,
            &[("chunk-0".to_string(), "Gizmos are electronic gadgets.".to_string(), 0)],
        )
        .await
        .unwrap();

    let mock = MockServer::start_async().await;
    let collection = "test_collection";

    mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST).path(format!("/collections/{collection}/points/query"));
        then.status(200).json_body(json!({
            "result": [{
                "id": "1",
                "score": 0.8,
                "payload": {
                    "source_id": source_id,
                    "session_id": FIXED_INGEST_SESSION_ID,
                    "chunk_id": "chunk-0",
                    "content": "Gizmos are electronic gadgets.",
                }
            }]
        }));
    }).await;
    mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST).path(format!("/collections/{collection}/points/scroll"));
        then.status(200).json_body(json!({ "result": { "points": [], "next_page_offset": null } }));
    }).await;
    mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST)
            .path("/chat/completions")
            .body_contains("knowledgeable assistant");
        then.status(200).json_body(chat_completion_body("Gizmos are small electronic gadgets."));
    }).await;

    let fetcher: Arc<dyn agenttic_rag::fetch::Fetcher> = Arc::new(StaticFetcher::new());
    let mut state = build_state(db, &mock, fetcher).await;
    // Point the reranker at an address nothing listens on; resolution of the
    // client itself succeeds, only the request should fail.
    state.rerank_client = Some(Arc::new(agenttic_rag::rerank::HttpRerankClient::new(
        reqwest::Client::new(),
        "http://127.0.0.1:1".to_string(),
    )));
    let router = create_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/query")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "query": "what are gizmos?", "top_k": 10, "use_hybrid": true, "stream": false }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["success"], true);
    assert!(!body["answer"].as_str().unwrap().is_empty());
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);
}
