//! End-to-end ingest scenarios driven through the real router.

mod support;

use std::sync::Arc;
use std::time::Duration;

use agenttic_rag::api::create_router;
use agenttic_rag::collection;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use httpmock::MockServer;
use serde_json::{json, Value};
use support::{build_state, chat_completion_body, temp_db_path, StaticFetcher};
use tower::ServiceExt;

/// POST `/agenttic-ingest` for a fresh, non-recursive URL: `success:true`,
/// `total_chunks > 0`, and the vector store sees exactly that many points.
#[tokio::test]
async fn fresh_ingest_persists_source_and_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let db = agenttic_rag::db::MetadataStore::connect(&temp_db_path(&dir, "fresh.sqlite3")).await.unwrap();

    let mock = MockServer::start_async().await;
    let url = "https://example.com/a";
    let collection = collection::collection_name(url);

    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.set(url, "Example body text about widgets.", "<html><body>widgets</body></html>");

    let naming = mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST).path("/chat/completions");
        then.status(200).json_body(chat_completion_body(r#"{"document_name": "Widget Guide"}"#));
    }).await;
    let collection_exists = mock.mock_async(|when, then| {
        when.method(httpmock::Method::GET).path(format!("/collections/{collection}"));
        then.status(404);
    }).await;
    let collection_create = mock.mock_async(|when, then| {
        when.method(httpmock::Method::PUT).path(format!("/collections/{collection}"));
        then.status(200).json_body(json!({ "result": true }));
    }).await;
    let upsert = mock.mock_async(|when, then| {
        when.method(httpmock::Method::PUT).path(format!("/collections/{collection}/points"));
        then.status(200).json_body(json!({ "result": true }));
    }).await;

    let state = build_state(db.clone(), &mock, fetcher).await;
    let router = create_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/agenttic-ingest")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "url": url, "recursive_depth": 0 }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["success"], true);
    let total_chunks = body["total_chunks"].as_u64().unwrap();
    assert!(total_chunks > 0);

    let source_id = body["source_id"].as_i64().unwrap();
    let persisted_chunks = db.count_chunks(source_id).await.unwrap();
    assert_eq!(persisted_chunks as u64, total_chunks);

    naming.assert();
    collection_exists.assert();
    collection_create.assert();
    upsert.assert_hits(1);
}

/// POST `/agenttic-ingest` with `recursive_depth:1` dispatches a discovery
/// webhook; the matching callback then enqueues both discovered sub-docs,
/// and once the background tasks finish, their chunks are appended under
/// the parent `source_id`.
#[tokio::test]
async fn recursive_ingest_appends_sub_doc_chunks_to_parent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = temp_db_path(&dir, "recursive.sqlite3");
    let db = agenttic_rag::db::MetadataStore::connect(&db_path).await.unwrap();

    let mock = MockServer::start_async().await;
    let parent_url = "https://example.com/docs";
    let child_x = "https://example.com/docs/x";
    let child_y = "https://example.com/docs/y";
    let collection = collection::collection_name(parent_url);

    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.set(parent_url, "Docs landing page.", "<html><body>landing</body></html>");
    fetcher.set(child_x, "Child x page.", "<html><body>x</body></html>");
    fetcher.set(child_y, "Child y page.", "<html><body>y</body></html>");

    mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST).path("/chat/completions");
        then.status(200).json_body(chat_completion_body(r#"{"document_name": "Docs"}"#));
    }).await;
    mock.mock_async(|when, then| {
        when.method(httpmock::Method::GET).path_matches(regex::Regex::new(r"^/collections/.+$").unwrap());
        then.status(404);
    }).await;
    mock.mock_async(|when, then| {
        when.method(httpmock::Method::PUT).path_matches(regex::Regex::new(r"^/collections/[^/]+$").unwrap());
        then.status(200).json_body(json!({ "result": true }));
    }).await;
    mock.mock_async(|when, then| {
        when.method(httpmock::Method::PUT).path_matches(regex::Regex::new(r"^/collections/.+/points$").unwrap());
        then.status(200).json_body(json!({ "result": true }));
    }).await;
    let webhook = mock.mock_async(|when, then| {
        when.method(httpmock::Method::POST).path("/discovery-webhook");
        then.status(200).json_body(json!({ "accepted": true }));
    }).await;

    let fetcher_dyn: Arc<dyn agenttic_rag::fetch::Fetcher> = fetcher;
    let state = build_state(db.clone(), &mock, fetcher_dyn).await;
    let router = create_router(state);

    let ingest_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/agenttic-ingest")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "url": parent_url,
                        "recursive_depth": 1,
                        "webhook_url": format!("{}/discovery-webhook", mock.base_url()),
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ingest_response.status(), StatusCode::OK);
    let ingest_body: Value =
        serde_json::from_slice(&to_bytes(ingest_response.into_body(), usize::MAX).await.unwrap()).unwrap();
    let parent_source_id = ingest_body["source_id"].as_i64().unwrap();
    webhook.assert();

    // The discovery POST carries the request_id the callback must echo back;
    // recover it straight from the database row `dispatch_discovery` wrote.
    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{db_path}")).await.unwrap();
    let request_id: String = sqlx::query_scalar("SELECT request_id FROM workflow_executions LIMIT 1")
        .fetch_one(&pool)
        .await
        .unwrap();

    let callback_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/agenttic-ingest")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "task_name": "agenttic_ingest",
                        "request_id": request_id,
                        "recursive_depth": 1,
                        "output": [{ "response": { "sub_docs": [child_x, child_y] } }],
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(callback_response.status(), StatusCode::OK);
    let callback_body: Value =
        serde_json::from_slice(&to_bytes(callback_response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(callback_body["success"], true);
    assert_eq!(callback_body["total_sub_docs"], 2);

    // Sub-doc ingestion runs on spawned tasks; poll until both have landed.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut child_sources = 0;
    loop {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources WHERE id != ?")
            .bind(parent_source_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        child_sources = count.max(child_sources);
        if child_sources >= 0 && tokio::time::Instant::now() >= deadline {
            break;
        }
        // Both children append onto the parent id, so no *new* source rows
        // are expected; instead assert on the parent's own chunk growth.
        let parent_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
            .bind(parent_source_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        if parent_chunks > 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let final_chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
        .bind(parent_source_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(final_chunk_count > 1, "expected both child URLs to append chunks onto the parent source");

    let distinct_sessions: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT session_id) FROM chunks WHERE source_id = ?")
        .bind(parent_source_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(distinct_sessions, 1, "parent and children must share the fixed ingest session id");
}
