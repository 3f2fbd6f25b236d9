//! SQLite-backed metadata store (C6).
//!
//! Tables: `sources`, `chunks`, `workflow_executions`. Write-ahead logging and
//! a busy timeout are enabled on every pooled connection, mirroring the
//! original system's async SQLAlchemy engine setup (`app/database.py`).
//! Transactions are kept short: write the source row, flush to assign the
//! id, write the chunk rows, commit — embedding and vector-store calls
//! always happen *after* commit so no connection is held across a network call.

use crate::models::{Chunk, Source, WorkflowExecution, WorkflowState};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;

/// Errors raised by the metadata store.
#[derive(Debug, Error)]
pub enum DbError {
    /// The underlying SQLite connection or query failed.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// A source the caller expected to exist was not found.
    #[error("source {0} not found")]
    SourceNotFound(i64),
}

/// Thin wrapper over a `sqlx::SqlitePool` exposing the operations the
/// ingestion and retrieval pipelines need.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if absent) the SQLite database at `path`, enabling WAL
    /// mode and a busy timeout of at least 30 seconds on every connection.
    pub async fn connect(path: &str) -> Result<Self, DbError> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode=WAL;").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA busy_timeout=30000;").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Build a store over an already-open pool (used by tests with `tempfile`).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                session_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(url, session_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id TEXT NOT NULL UNIQUE,
                source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                session_id TEXT NOT NULL,
                content TEXT NOT NULL,
                ordinal INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                request_id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                document_name TEXT NOT NULL,
                collection_name TEXT NOT NULL,
                source_id INTEGER NOT NULL,
                recursive_depth INTEGER NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Find a `Source` by its canonical URL within a session, if one exists.
    pub async fn find_source_by_url(
        &self,
        url: &str,
        session_id: &str,
    ) -> Result<Option<Source>, DbError> {
        let row = sqlx::query_as::<_, Source>(
            "SELECT id, url, title, session_id, created_at FROM sources WHERE url = ? AND session_id = ?",
        )
        .bind(url)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Fetch a `Source` by id.
    pub async fn get_source(&self, id: i64) -> Result<Source, DbError> {
        sqlx::query_as::<_, Source>(
            "SELECT id, url, title, session_id, created_at FROM sources WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::SourceNotFound(id))
    }

    /// Create a new `Source` row and its `Chunk` rows in one short transaction,
    /// returning the assigned source id. Embedding/vector-store calls must
    /// happen after this returns.
    pub async fn create_source_with_chunks(
        &self,
        url: &str,
        title: &str,
        session_id: &str,
        chunk_contents: &[(String, String, i64)],
    ) -> Result<i64, DbError> {
        let mut tx = self.pool.begin().await?;
        let now = crate::collection::now_rfc3339();

        let source_id = sqlx::query(
            "INSERT INTO sources (url, title, session_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(url)
        .bind(title)
        .bind(session_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        self.insert_chunks_tx(&mut tx, source_id, session_id, chunk_contents)
            .await?;

        tx.commit().await?;
        Ok(source_id)
    }

    /// Append chunks to an existing `Source` (the recursive sub-document case),
    /// in one short transaction.
    pub async fn append_chunks(
        &self,
        source_id: i64,
        session_id: &str,
        chunk_contents: &[(String, String, i64)],
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        self.insert_chunks_tx(&mut tx, source_id, session_id, chunk_contents)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_chunks_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        source_id: i64,
        session_id: &str,
        chunk_contents: &[(String, String, i64)],
    ) -> Result<(), DbError> {
        for (chunk_id, content, ordinal) in chunk_contents {
            sqlx::query(
                "INSERT OR IGNORE INTO chunks (chunk_id, source_id, session_id, content, ordinal) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chunk_id)
            .bind(source_id)
            .bind(session_id)
            .bind(content)
            .bind(ordinal)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// List the chunks belonging to a `Source`, ordered by ordinal.
    pub async fn list_chunks(&self, source_id: i64) -> Result<Vec<Chunk>, DbError> {
        let rows = sqlx::query_as::<_, Chunk>(
            "SELECT id, chunk_id, source_id, session_id, content, ordinal FROM chunks WHERE source_id = ? ORDER BY ordinal",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Count chunks for a source — used to cross-check against vector-store counts.
    pub async fn count_chunks(&self, source_id: i64) -> Result<i64, DbError> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    /// Delete a source and (via cascade) its chunks.
    pub async fn delete_source(&self, source_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create a `running` workflow-execution row keyed by `request_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_workflow_execution(
        &self,
        request_id: &str,
        url: &str,
        document_name: &str,
        collection_name: &str,
        source_id: i64,
        recursive_depth: i64,
    ) -> Result<(), DbError> {
        let now = crate::collection::now_rfc3339();
        sqlx::query(
            "INSERT INTO workflow_executions (request_id, url, document_name, collection_name, source_id, recursive_depth, state, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request_id)
        .bind(url)
        .bind(document_name)
        .bind(collection_name)
        .bind(source_id)
        .bind(recursive_depth)
        .bind(WorkflowState::Running.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update a workflow-execution row's state, keyed by `request_id`.
    /// Re-delivery of the same `request_id` updates the same row (idempotent).
    pub async fn update_workflow_state(
        &self,
        request_id: &str,
        state: WorkflowState,
    ) -> Result<(), DbError> {
        let now = crate::collection::now_rfc3339();
        sqlx::query("UPDATE workflow_executions SET state = ?, updated_at = ? WHERE request_id = ?")
            .bind(state.as_str())
            .bind(&now)
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a workflow-execution row by `request_id`.
    pub async fn get_workflow_execution(
        &self,
        request_id: &str,
    ) -> Result<Option<WorkflowExecution>, DbError> {
        let row = sqlx::query_as::<_, WorkflowExecution>(
            "SELECT request_id, url, document_name, collection_name, source_id, recursive_depth, state, created_at, updated_at FROM workflow_executions WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> MetadataStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = MetadataStore::from_pool(pool);
        store.run_migrations().await.expect("migrations");
        store
    }

    #[tokio::test]
    async fn create_source_then_find_by_url_is_idempotent_lookup() {
        let store = test_store().await;
        let id = store
            .create_source_with_chunks(
                "https://example.com/a",
                "Example",
                "session-1",
                &[("chunk-1".into(), "hello".into(), 0)],
            )
            .await
            .expect("create source");

        let found = store
            .find_source_by_url("https://example.com/a", "session-1")
            .await
            .expect("lookup")
            .expect("source exists");
        assert_eq!(found.id, id);

        let chunks = store.list_chunks(id).await.expect("chunks");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "chunk-1");
    }

    #[tokio::test]
    async fn append_chunks_shares_parent_source_id() {
        let store = test_store().await;
        let parent_id = store
            .create_source_with_chunks(
                "https://example.com/a",
                "Example",
                "session-1",
                &[("chunk-1".into(), "hello".into(), 0)],
            )
            .await
            .expect("create source");

        store
            .append_chunks(
                parent_id,
                "session-1",
                &[("chunk-2".into(), "child content".into(), 0)],
            )
            .await
            .expect("append chunks");

        let chunks = store.list_chunks(parent_id).await.expect("chunks");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.source_id == parent_id));
    }

    #[tokio::test]
    async fn workflow_execution_redelivery_updates_same_row() {
        let store = test_store().await;
        store
            .create_workflow_execution("req-1", "https://example.com", "doc", "collection_abc", 1, 2)
            .await
            .expect("create");
        store
            .update_workflow_state("req-1", WorkflowState::Success)
            .await
            .expect("update once");
        store
            .update_workflow_state("req-1", WorkflowState::Success)
            .await
            .expect("update twice (redelivery)");

        let row = store
            .get_workflow_execution("req-1")
            .await
            .expect("lookup")
            .expect("row exists");
        assert_eq!(row.state, "success");
    }
}
