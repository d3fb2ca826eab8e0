//! Migration paths against real files: legacy schemas upgrade to current,
//! and a current-version file reopens without a single write.

use mnemo_core::{RecordStore, Tags, SCHEMA_VERSION};
use rusqlite::Connection;
use tempfile::TempDir;

fn create_v0_db(path: &std::path::Path, docs: &[(&str, &str, &str, &str)]) {
    let conn = Connection::open(path).unwrap();
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(())).unwrap();
    conn.execute_batch(
        "CREATE TABLE documents (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            summary TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (id, collection)
        )",
    )
    .unwrap();
    for (id, collection, summary, tags_json) in docs {
        conn.execute(
            "INSERT INTO documents (id, collection, summary, tags_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, '2025-01-01', '2025-01-01')",
            rusqlite::params![id, collection, summary, tags_json],
        )
        .unwrap();
    }
}

fn user_version(path: &std::path::Path) -> i32 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap()
}

fn columns(path: &std::path::Path, table: &str) -> Vec<String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
    stmt.query_map([], |row| row.get::<_, String>(1))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn v0_database_migrates_to_current() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.db");
    let legacy_hash_tags = format!(r#"{{"bundled_hash": "{}"}}"#, "a".repeat(64));
    create_v0_db(
        &path,
        &[
            ("doc1", "default", "hello", legacy_hash_tags.as_str()),
            ("doc2", "default", "world", "{}"),
        ],
    );

    let store = RecordStore::open(&path).unwrap();

    assert_eq!(user_version(&path), SCHEMA_VERSION);
    let cols = columns(&path, "documents");
    assert!(cols.contains(&"accessed_at".to_string()));
    assert!(cols.contains(&"content_hash".to_string()));
    assert!(cols.contains(&"content_hash_full".to_string()));

    // Data preserved
    assert_eq!(store.get("default", "doc1").unwrap().unwrap().summary, "hello");
    assert_eq!(store.get("default", "doc2").unwrap().unwrap().summary, "world");

    // Legacy 64-char hash tag truncated to the 10-char prefix
    let tags = store.get("default", "doc1").unwrap().unwrap().tags;
    assert_eq!(tags.get("bundled_hash").unwrap().len(), 10);
}

#[test]
fn migrated_database_supports_all_tables() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.db");
    create_v0_db(&path, &[("doc1", "default", "hello", "{}")]);

    let store = RecordStore::open(&path).unwrap();

    // Versions, parts, edges, and the queue table all work post-migration
    let record = store.get("default", "doc1").unwrap().unwrap();
    store.archive_current(&record).unwrap();
    assert_eq!(store.max_version("default", "doc1").unwrap(), 1);
    store
        .upsert_edge("default", "doc1", "refines", "doc2", "refined_by", "2026-01-01")
        .unwrap();
    assert_eq!(store.get_forward_edges("default", "doc1").unwrap().len(), 1);
}

#[test]
fn reopen_of_current_version_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.db");

    {
        let store = RecordStore::open(&path).unwrap();
        store
            .upsert("default", "x", "hello", &Tags::new(), None, None)
            .unwrap();
    }

    // Flush the WAL so any write on reopen would grow it from zero
    {
        let conn = Connection::open(&path).unwrap();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .unwrap();
    }
    let wal_path = format!("{}-wal", path.display());
    let wal_size = |p: &str| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0);
    let before = wal_size(&wal_path);

    {
        let _store = RecordStore::open(&path).unwrap();
        let after = wal_size(&wal_path);
        assert_eq!(before, after, "reopen grew the WAL: {} -> {}", before, after);
    }
}

#[test]
fn fresh_store_is_stamped_current() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.db");
    RecordStore::open(&path).unwrap();
    assert_eq!(user_version(&path), SCHEMA_VERSION);
}
