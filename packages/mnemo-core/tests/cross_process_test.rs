//! Cross-process safety: the write lock, the epoch sentinel, and stale-index
//! reloads. Two engine (or vector store) instances on the same directory
//! stand in for two processes; the coordination runs entirely through the
//! filesystem either way.

mod common;

use std::sync::Arc;

use common::{put_opts, TEST_DIMENSION};
use mnemo_core::{Coherence, HashEmbeddingProvider, MemoryEngine, Tags, VectorStore};
use tempfile::TempDir;

fn vector_store(dir: &std::path::Path) -> VectorStore {
    VectorStore::open(dir, 4, Arc::new(Coherence::new(dir))).unwrap()
}

#[test]
fn write_creates_lock_and_epoch_files() {
    let dir = TempDir::new().unwrap();
    let store = vector_store(dir.path());

    store
        .upsert("test", "doc:1", &[0.1, 0.2, 0.3, 0.4], "Test", &Tags::new())
        .unwrap();

    assert!(dir.path().join(".chroma.lock").exists());
    assert!(dir.path().join(".chroma.epoch").exists());
}

#[test]
fn epoch_advances_on_every_write_kind() {
    let dir = TempDir::new().unwrap();
    let store = vector_store(dir.path());
    let coherence = Coherence::new(dir.path());
    let embedding = [0.1, 0.2, 0.3, 0.4];

    let mut last = None;
    let mut observe = |label: &str| {
        let mtime = coherence.epoch_mtime().expect("epoch should exist");
        if let Some(previous) = last {
            assert!(mtime > previous, "epoch did not advance after {}", label);
        }
        last = Some(mtime);
    };

    store.upsert("test", "doc:1", &embedding, "Test", &Tags::new()).unwrap();
    observe("upsert");
    store.update_summary("test", "doc:1", "Updated").unwrap();
    observe("update_summary");
    store.update_tags("test", "doc:1", &Tags::new()).unwrap();
    observe("update_tags");
    store.delete("test", "doc:1").unwrap();
    observe("delete");
}

#[test]
fn second_instance_sees_write_after_reload() {
    let dir = TempDir::new().unwrap();
    let a = vector_store(dir.path());
    let b = vector_store(dir.path());

    a.upsert("test", "doc:1", &[0.1, 0.2, 0.3, 0.4], "From A", &Tags::new())
        .unwrap();

    let generation_before = b.generation();
    let entry = b.get("test", "doc:1").unwrap().expect("B should see A's write");
    assert_eq!(entry.summary, "From A");
    assert!(b.generation() > generation_before, "B's client should reload");
}

#[test]
fn deletion_is_visible_across_instances() {
    let dir = TempDir::new().unwrap();
    let a = vector_store(dir.path());
    let b = vector_store(dir.path());

    a.upsert("test", "doc:1", &[0.1, 0.2, 0.3, 0.4], "To delete", &Tags::new())
        .unwrap();
    assert!(b.get("test", "doc:1").unwrap().is_some());

    a.delete("test", "doc:1").unwrap();
    assert!(b.get("test", "doc:1").unwrap().is_none());
}

#[test]
fn interleaved_writes_from_both_instances() {
    let dir = TempDir::new().unwrap();
    let a = vector_store(dir.path());
    let b = vector_store(dir.path());
    let va = [0.1, 0.2, 0.3, 0.4];
    let vb = [0.5, 0.6, 0.7, 0.8];

    a.upsert("test", "doc:1", &va, "From A", &Tags::new()).unwrap();
    b.upsert("test", "doc:2", &vb, "From B", &Tags::new()).unwrap();
    a.upsert("test", "doc:3", &va, "Also from A", &Tags::new()).unwrap();

    assert_eq!(a.count("test").unwrap(), 3);
    assert_eq!(b.count("test").unwrap(), 3);
}

#[test]
fn similarity_search_sees_other_instance_writes() {
    let dir = TempDir::new().unwrap();
    let a = vector_store(dir.path());
    let b = vector_store(dir.path());

    a.upsert("test", "doc:1", &[0.1, 0.2, 0.3, 0.4], "Searchable", &Tags::new())
        .unwrap();

    let hits = b
        .query_embedding("test", &[0.1, 0.2, 0.3, 0.4], 5, None)
        .unwrap();
    assert_eq!(hits[0].key, "doc:1");
}

#[test]
fn engine_write_visible_to_engine_opened_before() {
    let dir = TempDir::new().unwrap();
    let open = || {
        MemoryEngine::builder(dir.path())
            .embedding_provider(Arc::new(HashEmbeddingProvider::new(TEST_DIMENSION)))
            .open()
            .unwrap()
    };
    let a = open();
    let b = open();

    a.put("written by process A", put_opts("shared")).unwrap();

    // B opened before the write; both record and vector reads see it
    assert!(b.exists("shared", None).unwrap());
    assert_eq!(
        b.get("shared", None).unwrap().unwrap().summary,
        "written by process A"
    );
    assert!(b.vectors().exists("default", "shared").unwrap());
}

#[test]
fn concurrent_writers_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    // Create the store up front so config writing and schema migration do
    // not race the workers
    drop(
        MemoryEngine::builder(&path)
            .embedding_provider(Arc::new(HashEmbeddingProvider::new(TEST_DIMENSION)))
            .open()
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let path = path.clone();
            std::thread::spawn(move || {
                let engine = MemoryEngine::builder(&path)
                    .embedding_provider(Arc::new(HashEmbeddingProvider::new(TEST_DIMENSION)))
                    .open()
                    .unwrap();
                for n in 0..10 {
                    engine
                        .put(
                            &format!("worker {} note {}", worker, n),
                            put_opts(&format!("worker{}:doc{}", worker, n)),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let fresh = MemoryEngine::builder(&path)
        .embedding_provider(Arc::new(HashEmbeddingProvider::new(TEST_DIMENSION)))
        .open()
        .unwrap();
    assert_eq!(fresh.count(None).unwrap(), 80);
    for worker in 0..8 {
        for n in 0..10 {
            let id = format!("worker{}:doc{}", worker, n);
            let item = fresh.get(&id, None).unwrap().unwrap();
            assert!(!item.summary.is_empty(), "empty summary for {}", id);
        }
    }
}
