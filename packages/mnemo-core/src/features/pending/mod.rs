//! Deferred-work queue.
//!
//! Cloud mode defers expensive work (embedding, summarization, analysis) to
//! a background worker. The queue is a table inside the record-store file so
//! queue writes share the store's transaction domain. Enqueues coalesce on
//! `(id, collection, task_type)`: the last content wins. Dequeue is
//! non-destructive; a task disappears only when `complete` is called, so a
//! provider failure is naturally retried on the next worker run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::features::record_store::RecordStore;
use crate::shared::models::{MemoryError, Result};
use crate::shared::utils::time::now_iso;

/// Kind of deferred work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Embed,
    Summarize,
    Analyze,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Embed => "embed",
            TaskType::Summarize => "summarize",
            TaskType::Analyze => "analyze",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "embed" => Ok(TaskType::Embed),
            "summarize" => Ok(TaskType::Summarize),
            "analyze" => Ok(TaskType::Analyze),
            other => Err(MemoryError::invalid_input(format!(
                "Unknown task type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Free-form task metadata (flags such as `content_changed=true`).
pub type TaskMetadata = BTreeMap<String, serde_json::Value>;

/// One unit of pending work.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTask {
    pub id: String,
    pub collection: String,
    pub task_type: TaskType,
    pub content: String,
    pub queued_at: String,
    pub metadata: TaskMetadata,
}

impl PendingTask {
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        task_type: TaskType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            task_type,
            content: content.into(),
            queued_at: now_iso(),
            metadata: TaskMetadata::new(),
        }
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: bool) -> Self {
        self.metadata.insert(key.into(), serde_json::Value::Bool(value));
        self
    }

    pub fn flag(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
}

/// Durable queue contract. At-least-once: tasks survive until completed.
pub trait PendingQueue: Send + Sync {
    /// Idempotent on `(id, collection, task_type)`; later enqueues replace
    /// earlier payloads.
    fn enqueue(&self, task: PendingTask) -> Result<()>;

    /// Non-destructive FIFO read in `queued_at` order.
    fn dequeue(&self, limit: usize) -> Result<Vec<PendingTask>>;

    /// Remove a completed task.
    fn complete(&self, id: &str, collection: &str, task_type: TaskType) -> Result<()>;

    /// Remove every task for an item (used by delete cascades).
    fn discard_for(&self, id: &str, collection: &str) -> Result<()>;

    fn count(&self) -> Result<usize>;

    /// Drop everything. Returns the number removed.
    fn clear(&self) -> Result<usize>;

    fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.count()?,
        })
    }
}

/// Queue backed by the `pending` table in the record-store file.
#[derive(Clone)]
pub struct SqlitePendingQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePendingQueue {
    /// Borrow the record store's connection; the queue has no file of its own.
    pub fn new(store: &RecordStore) -> Self {
        Self {
            conn: store.conn_handle(),
        }
    }

    fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingTask> {
        let task_type: String = row.get(2)?;
        let metadata_json: String = row.get(5)?;
        Ok(PendingTask {
            id: row.get(0)?,
            collection: row.get(1)?,
            task_type: TaskType::parse(&task_type).unwrap_or(TaskType::Summarize),
            content: row.get(3)?,
            queued_at: row.get(4)?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        })
    }
}

impl PendingQueue for SqlitePendingQueue {
    fn enqueue(&self, task: PendingTask) -> Result<()> {
        let metadata_json = serde_json::to_string(&task.metadata)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO pending
             (id, collection, task_type, content, queued_at, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.id,
                task.collection,
                task.task_type.as_str(),
                task.content,
                task.queued_at,
                metadata_json
            ],
        )?;
        Ok(())
    }

    fn dequeue(&self, limit: usize) -> Result<Vec<PendingTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, collection, task_type, content, queued_at, metadata_json
               FROM pending
              ORDER BY queued_at ASC
              LIMIT ?1",
        )?;
        let tasks = stmt
            .query_map(params![limit as i64], Self::task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn complete(&self, id: &str, collection: &str, task_type: TaskType) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM pending
             WHERE id = ?1 AND collection = ?2 AND task_type = ?3",
            params![id, collection, task_type.as_str()],
        )?;
        Ok(())
    }

    fn discard_for(&self, id: &str, collection: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM pending WHERE id = ?1 AND collection = ?2",
            params![id, collection],
        )?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM pending", [])?;
        Ok(removed)
    }
}

/// Queue that accepts and discards all work. Local mode computes everything
/// synchronously, so there is never anything pending.
#[derive(Debug, Default, Clone)]
pub struct NullPendingQueue;

impl PendingQueue for NullPendingQueue {
    fn enqueue(&self, _task: PendingTask) -> Result<()> {
        Ok(())
    }

    fn dequeue(&self, _limit: usize) -> Result<Vec<PendingTask>> {
        Ok(Vec::new())
    }

    fn complete(&self, _id: &str, _collection: &str, _task_type: TaskType) -> Result<()> {
        Ok(())
    }

    fn discard_for(&self, _id: &str, _collection: &str) -> Result<()> {
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(0)
    }

    fn clear(&self) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue() -> (TempDir, SqlitePendingQueue) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("documents.db")).unwrap();
        (dir, SqlitePendingQueue::new(&store))
    }

    #[test]
    fn test_enqueue_dequeue_complete() {
        let (_dir, queue) = queue();
        queue
            .enqueue(PendingTask::new("doc1", "default", TaskType::Embed, "content"))
            .unwrap();

        assert_eq!(queue.count().unwrap(), 1);
        let tasks = queue.dequeue(10).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "doc1");
        assert_eq!(tasks[0].task_type, TaskType::Embed);

        // Non-destructive read
        assert_eq!(queue.count().unwrap(), 1);

        queue.complete("doc1", "default", TaskType::Embed).unwrap();
        assert_eq!(queue.count().unwrap(), 0);
    }

    #[test]
    fn test_coalescing_last_content_wins() {
        let (_dir, queue) = queue();
        for n in 1..=5 {
            queue
                .enqueue(PendingTask::new(
                    "doc1",
                    "default",
                    TaskType::Embed,
                    format!("content v{}", n),
                ))
                .unwrap();
        }

        assert_eq!(queue.count().unwrap(), 1);
        let tasks = queue.dequeue(10).unwrap();
        assert_eq!(tasks[0].content, "content v5");
    }

    #[test]
    fn test_different_task_types_do_not_coalesce() {
        let (_dir, queue) = queue();
        queue
            .enqueue(PendingTask::new("doc1", "default", TaskType::Embed, "c"))
            .unwrap();
        queue
            .enqueue(PendingTask::new("doc1", "default", TaskType::Summarize, "c"))
            .unwrap();
        assert_eq!(queue.count().unwrap(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let (_dir, queue) = queue();
        let mut first = PendingTask::new("a", "default", TaskType::Embed, "one");
        first.queued_at = "2026-01-01T00:00:00Z".into();
        let mut second = PendingTask::new("b", "default", TaskType::Embed, "two");
        second.queued_at = "2026-01-02T00:00:00Z".into();

        queue.enqueue(second).unwrap();
        queue.enqueue(first).unwrap();

        let tasks = queue.dequeue(10).unwrap();
        assert_eq!(tasks[0].id, "a");
        assert_eq!(tasks[1].id, "b");
    }

    #[test]
    fn test_metadata_flags_round_trip() {
        let (_dir, queue) = queue();
        queue
            .enqueue(
                PendingTask::new("doc1", "default", TaskType::Embed, "c")
                    .with_flag("content_changed", true),
            )
            .unwrap();

        let tasks = queue.dequeue(1).unwrap();
        assert!(tasks[0].flag("content_changed"));
        assert!(!tasks[0].flag("missing"));
    }

    #[test]
    fn test_discard_for_removes_all_types() {
        let (_dir, queue) = queue();
        queue
            .enqueue(PendingTask::new("doc1", "default", TaskType::Embed, "c"))
            .unwrap();
        queue
            .enqueue(PendingTask::new("doc1", "default", TaskType::Analyze, "c"))
            .unwrap();
        queue.discard_for("doc1", "default").unwrap();
        assert_eq!(queue.count().unwrap(), 0);
    }

    #[test]
    fn test_null_queue_discards() {
        let queue = NullPendingQueue;
        queue
            .enqueue(PendingTask::new("id", "coll", TaskType::Embed, "content"))
            .unwrap();
        assert_eq!(queue.count().unwrap(), 0);
        assert!(queue.dequeue(10).unwrap().is_empty());
    }
}
