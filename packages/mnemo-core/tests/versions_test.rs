//! Version history and the move operation.

mod common;

use common::{local_engine, put_opts, tags};

#[test]
fn content_change_archives_prior_state() {
    let (_dir, engine) = local_engine();

    engine.put("v1", put_opts("x")).unwrap();
    engine.put("v2", put_opts("x")).unwrap();

    assert_eq!(engine.records().max_version("default", "x").unwrap(), 1);
    let versions = engine.records().list_versions("default", "x", 10).unwrap();
    assert_eq!(versions[0].summary, "v1");
    assert_eq!(engine.get("x", None).unwrap().unwrap().summary, "v2");
}

#[test]
fn version_chain_is_monotonic() {
    let (_dir, engine) = local_engine();

    for n in 1..=4 {
        engine.put(&format!("distinct content {}", n), put_opts("x")).unwrap();
    }

    // N distinct puts leave N-1 archived versions
    assert_eq!(engine.records().max_version("default", "x").unwrap(), 3);
    let versions = engine.records().list_versions("default", "x", 10).unwrap();
    let numbers: Vec<i64> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![3, 2, 1]);

    // Chain is strictly ordered by creation time
    for pair in versions.windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at);
        assert!(pair[0].version > pair[1].version);
    }
}

#[test]
fn archived_version_gets_vector_entry() {
    let (_dir, engine) = local_engine();

    engine.put("version one content", put_opts("x")).unwrap();
    engine.put("version two content", put_opts("x")).unwrap();

    assert!(engine.vectors().exists("default", "x@v1").unwrap());
    assert!(engine.vectors().exists("default", "x").unwrap());
}

#[test]
fn restore_promotes_latest_version() {
    let (_dir, engine) = local_engine();
    engine.put("old state", put_opts("x")).unwrap();
    engine.put("new state", put_opts("x")).unwrap();

    let restored = engine
        .records()
        .restore_latest_version("default", "x")
        .unwrap()
        .unwrap();
    assert_eq!(restored.summary, "old state");
    assert_eq!(engine.records().version_count("default", "x").unwrap(), 0);
}

#[test]
fn move_all_versions_dissolves_source() {
    let (_dir, engine) = local_engine();
    engine.put("first note", put_opts("now")).unwrap();
    engine.put("second note", put_opts("now")).unwrap();
    engine.put("third note", put_opts("now")).unwrap();

    let target = engine.move_versions("notes", "now", None, false, None).unwrap();
    assert_eq!(target.id, "notes");
    assert_eq!(target.summary, "third note");

    // Target carries the full history
    assert_eq!(engine.records().max_version("default", "notes").unwrap(), 2);
    let versions = engine.records().list_versions("default", "notes", 10).unwrap();
    assert_eq!(versions[0].summary, "second note");
    assert_eq!(versions[1].summary, "first note");

    // Source is gone entirely
    assert!(engine.get("now", None).unwrap().is_none());
}

#[test]
fn move_only_current_keeps_source_history() {
    let (_dir, engine) = local_engine();
    engine.put("older entry", put_opts("now")).unwrap();
    engine.put("current entry", put_opts("now")).unwrap();

    let target = engine.move_versions("extracted", "now", None, true, None).unwrap();
    assert_eq!(target.summary, "current entry");

    // Source restored to its previous state
    let source = engine.get("now", None).unwrap().unwrap();
    assert_eq!(source.summary, "older entry");
    assert_eq!(engine.records().version_count("default", "now").unwrap(), 0);
}

#[test]
fn move_filters_by_tags() {
    let (_dir, engine) = local_engine();
    engine
        .put("tagged entry", put_opts("now").tags(tags(&[("topic", "rust")])))
        .unwrap();
    engine
        .put("untagged entry", put_opts("now"))
        .unwrap();
    engine
        .put("current tagged", put_opts("now").tags(tags(&[("topic", "rust")])))
        .unwrap();

    let target = engine
        .move_versions("rust-notes", "now", Some(&tags(&[("topic", "rust")])), false, None)
        .unwrap();
    assert_eq!(target.summary, "current tagged");

    // The untagged middle version stayed behind and was promoted to current
    let source = engine.get("now", None).unwrap().unwrap();
    assert_eq!(source.summary, "untagged entry");
    let moved = engine.records().list_versions("default", "rust-notes", 10).unwrap();
    assert!(moved.iter().all(|v| v.summary != "untagged entry"));
}

#[test]
fn move_skips_duplicate_content_on_target() {
    let (_dir, engine) = local_engine();
    engine.put("shared text", put_opts("target")).unwrap();
    engine.put("shared text part two", put_opts("src")).unwrap();
    // src's history will contain "shared text part two" only; its current
    // content collides with nothing, but re-moving into a target that
    // already saw the hash must not duplicate versions
    engine.put("fresh current", put_opts("src")).unwrap();

    engine.move_versions("target", "src", None, false, None).unwrap();
    let versions = engine.records().list_versions("default", "target", 20).unwrap();
    let hashes: Vec<_> = versions.iter().filter_map(|v| v.content_hash.clone()).collect();
    let unique: std::collections::HashSet<_> = hashes.iter().cloned().collect();
    assert_eq!(hashes.len(), unique.len(), "duplicate version content on target");
}

#[test]
fn move_rejects_self_and_missing_source() {
    let (_dir, engine) = local_engine();
    engine.put("content", put_opts("a")).unwrap();

    assert!(engine.move_versions("a", "a", None, false, None).is_err());
    assert!(engine.move_versions("t", "ghost", None, false, None).is_err());
}
