//! Deferred (cloud) mode: put defers embedding and summarization to the
//! queue; `process_pending` drains it.

mod common;

use common::{deferred_engine, put_opts};
use mnemo_core::{PendingQueue, SqlitePendingQueue, TaskType};

#[test]
fn put_defers_embedding() {
    let (_dir, engine, counting) = deferred_engine();

    engine.put("hello world", put_opts("test-note")).unwrap();

    // No synchronous embedding call
    assert_eq!(counting.calls(), 0);

    // Exactly one embed task carrying the content
    let queue = SqlitePendingQueue::new(engine.records());
    let embed_tasks: Vec<_> = queue
        .dequeue(50)
        .unwrap()
        .into_iter()
        .filter(|t| t.task_type == TaskType::Embed)
        .collect();
    assert_eq!(embed_tasks.len(), 1);
    assert_eq!(embed_tasks[0].id, "test-note");
    assert_eq!(embed_tasks[0].content, "hello world");
}

#[test]
fn record_store_is_written_immediately() {
    let (_dir, engine, _counting) = deferred_engine();

    let item = engine.put("some content", put_opts("doc1")).unwrap();
    assert_eq!(item.id, "doc1");
    assert_eq!(engine.get("doc1", None).unwrap().unwrap().summary, "some content");

    // Vector index is still empty
    assert!(engine.vectors().get("default", "doc1").unwrap().is_none());
}

#[test]
fn process_pending_embeds_and_writes_vector() {
    let (_dir, engine, counting) = deferred_engine();

    engine.put("content for embedding", put_opts("doc1")).unwrap();
    assert_eq!(counting.calls(), 0);

    let processed = engine.process_pending(10).unwrap();
    assert!(processed >= 1);
    assert_eq!(counting.calls(), 1);
    assert!(engine.vectors().exists("default", "doc1").unwrap());
    assert_eq!(engine.pending_count().unwrap(), 0);
}

#[test]
fn content_change_flag_archives_old_embedding() {
    let (_dir, engine, counting) = deferred_engine();

    engine.put("version one content", put_opts("doc1")).unwrap();
    engine.process_pending(10).unwrap();
    assert_eq!(counting.calls(), 1);
    assert!(engine.vectors().exists("default", "doc1").unwrap());

    engine
        .put("version two content, completely different", put_opts("doc1"))
        .unwrap();
    engine.process_pending(10).unwrap();
    assert_eq!(counting.calls(), 2);

    // The old embedding moved to the versioned key
    assert!(engine.vectors().exists("default", "doc1@v1").unwrap());
    assert!(engine.vectors().exists("default", "doc1").unwrap());
}

#[test]
fn unchanged_content_does_not_set_flag() {
    let (_dir, engine, _counting) = deferred_engine();

    engine.put("same content", put_opts("doc1")).unwrap();
    engine.process_pending(10).unwrap();

    // Re-put of identical content is a dedup no-op, nothing new queued
    engine.put("same content", put_opts("doc1")).unwrap();
    assert_eq!(engine.pending_count().unwrap(), 0);
}

#[test]
fn queue_coalesces_multiple_puts() {
    let (_dir, engine, counting) = deferred_engine();

    engine.put("first version", put_opts("doc1")).unwrap();
    engine.put("second version", put_opts("doc1")).unwrap();
    engine.put("third version", put_opts("doc1")).unwrap();

    engine.process_pending(10).unwrap();

    // One embed call despite three puts: enqueues coalesced
    assert_eq!(counting.calls(), 1);
    assert!(engine.vectors().exists("default", "doc1").unwrap());
}

#[test]
fn deleted_item_makes_task_a_no_op() {
    let (_dir, engine, counting) = deferred_engine();

    engine.put("content to delete", put_opts("doc1")).unwrap();
    engine.delete("doc1", None).unwrap();

    engine.process_pending(10).unwrap();
    assert_eq!(counting.calls(), 0);
    assert_eq!(engine.pending_count().unwrap(), 0);
}

#[test]
fn deferred_summary_is_placeholder_then_replaced() {
    let (_dir, engine, _counting) = deferred_engine();

    let long_content = format!("{} trailing body", "word ".repeat(100));
    engine.put(&long_content, put_opts("doc1")).unwrap();

    let placeholder = engine.get("doc1", None).unwrap().unwrap().summary;
    assert!(placeholder.chars().count() <= 204);

    engine.process_pending(10).unwrap();
    let summary = engine.get("doc1", None).unwrap().unwrap().summary;
    // Truncate summarizer produces the same prefix shape; the queue entry
    // for summarize is gone either way
    assert!(!summary.is_empty());
    assert_eq!(engine.pending_count().unwrap(), 0);
}

#[test]
fn reconcile_enqueues_missing_embeddings() {
    let (_dir, engine, _counting) = deferred_engine();

    engine.put("content without vector", put_opts("doc1")).unwrap();
    engine.process_pending(10).unwrap();

    // Simulate a lost vector entry
    engine.vectors().delete("default", "doc1").unwrap();
    assert!(!engine.vectors().exists("default", "doc1").unwrap());

    let repaired = engine.reconcile().unwrap();
    assert_eq!(repaired, 1);
    engine.process_pending(10).unwrap();
    assert!(engine.vectors().exists("default", "doc1").unwrap());
}

#[test]
fn local_mode_embeds_synchronously() {
    let (_dir, engine) = common::local_engine();

    engine.put("hello world", put_opts("doc1")).unwrap();
    assert!(engine.vectors().exists("default", "doc1").unwrap());
    assert_eq!(engine.pending_count().unwrap(), 0);
}

#[test]
fn task_type_round_trip() {
    assert_eq!(TaskType::parse("embed").unwrap(), TaskType::Embed);
    assert_eq!(TaskType::Analyze.as_str(), "analyze");
    assert!(TaskType::parse("unknown").is_err());
}
