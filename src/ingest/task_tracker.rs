//! Background task tracker (C14): in-memory progress tracking for recursive
//! ingestion tasks, with a 24h sweeper for completed/failed tasks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::models::TaskStatus;

/// Status of one sub-document URL within a tracked ingestion task.
#[derive(Debug, Clone)]
pub struct SubDocTask {
    pub url: String,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl SubDocTask {
    fn pending(url: String) -> Self {
        Self { url, status: TaskStatus::Pending, error: None }
    }
}

/// Progress record for a recursive ingestion task, keyed by `task_id`
/// (the webhook's `request_id`).
#[derive(Debug, Clone)]
pub struct IngestTaskState {
    pub task_id: String,
    pub parent_url: String,
    pub document_name: String,
    pub collection_name: String,
    pub total_sub_docs: usize,
    pub completed_sub_docs: usize,
    pub failed_sub_docs: usize,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub sub_docs: Vec<SubDocTask>,
    completed_at: Option<Instant>,
}

impl IngestTaskState {
    /// Percentage of sub-documents that have reached a terminal state.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_sub_docs == 0 {
            100.0
        } else {
            (self.completed_sub_docs as f64 / self.total_sub_docs as f64) * 100.0
        }
    }
}

/// Tracks in-flight recursive ingestion tasks in memory.
#[derive(Default)]
pub struct TaskTracker {
    tasks: RwLock<HashMap<String, IngestTaskState>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task with its known sub-document URLs (all `Pending`).
    pub async fn create_task(
        &self,
        task_id: String,
        parent_url: String,
        document_name: String,
        collection_name: String,
        sub_doc_urls: Vec<String>,
    ) {
        let task = IngestTaskState {
            task_id: task_id.clone(),
            parent_url,
            document_name,
            collection_name,
            total_sub_docs: sub_doc_urls.len(),
            completed_sub_docs: 0,
            failed_sub_docs: 0,
            status: TaskStatus::Pending,
            error: None,
            sub_docs: sub_doc_urls.into_iter().map(SubDocTask::pending).collect(),
            completed_at: None,
        };
        self.tasks.write().await.insert(task_id, task);
    }

    /// Mark a task as running.
    pub async fn start_task(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else { return false };
        task.status = TaskStatus::Running;
        true
    }

    /// Update one sub-document's status, rolling the task's aggregate
    /// counters and terminal status forward. Returns `false` if the task or
    /// sub-document URL is unknown.
    pub async fn update_sub_doc_status(
        &self,
        task_id: &str,
        sub_doc_url: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else { return false };
        let Some(sub_doc) = task.sub_docs.iter_mut().find(|sd| sd.url == sub_doc_url) else {
            return false;
        };

        let previous = sub_doc.status;
        sub_doc.status = status;
        sub_doc.error = error;

        if status == TaskStatus::Completed && previous != TaskStatus::Completed {
            task.completed_sub_docs += 1;
        } else if status == TaskStatus::Failed && previous != TaskStatus::Failed {
            task.failed_sub_docs += 1;
        }

        check_completion(task);
        true
    }

    /// Mark an entire task as failed outright (e.g. webhook post failed).
    pub async fn fail_task(&self, task_id: &str, error: String) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.status = TaskStatus::Failed;
            task.error = Some(error);
            task.completed_at = Some(Instant::now());
        }
    }

    /// Snapshot a task's current state.
    pub async fn get_task(&self, task_id: &str) -> Option<IngestTaskState> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// List every currently-tracked task.
    pub async fn list_active_tasks(&self) -> Vec<IngestTaskState> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Remove terminal (`Completed`/`Failed`/`PartiallyCompleted`) tasks
    /// older than `max_age`. Intended to run on a periodic sweep.
    pub async fn cleanup_completed_tasks(&self, max_age: Duration) {
        let mut tasks = self.tasks.write().await;
        tasks.retain(|_, task| match task.completed_at {
            Some(completed_at) => completed_at.elapsed() < max_age,
            None => true,
        });
    }
}

fn check_completion(task: &mut IngestTaskState) {
    if task.completed_sub_docs + task.failed_sub_docs < task.total_sub_docs {
        return;
    }

    task.completed_at = Some(Instant::now());
    task.status = if task.failed_sub_docs == 0 {
        TaskStatus::Completed
    } else if task.completed_sub_docs > 0 {
        task.error = Some(format!(
            "{} sub-documents succeeded, {} failed",
            task.completed_sub_docs, task.failed_sub_docs
        ));
        TaskStatus::PartiallyCompleted
    } else {
        task.error = Some(format!("all {} sub-documents failed", task.failed_sub_docs));
        TaskStatus::Failed
    };
}

/// Default sweep interval for a background cleanup loop.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Default retention window for terminal tasks.
pub const MAX_TASK_AGE: Duration = Duration::from_secs(24 * 60 * 60);
