//! Schema migrations for the record store.
//!
//! The database file carries its schema version in `PRAGMA user_version`.
//! Migrations are forward-only functions indexed by the version they migrate
//! from; `apply` chains them until the file is current. Opening a
//! current-version database performs no writes at all (verified by WAL byte
//! growth in the migration tests).

use rusqlite::Connection;
use tracing::info;

use crate::shared::models::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 3;

/// Apply pending migrations. Returns whether the FTS index is available.
pub fn apply(conn: &Connection) -> Result<bool> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version == SCHEMA_VERSION {
        // Fast path: nothing to do, not even CREATE IF NOT EXISTS
        return Ok(fts_table_exists(conn));
    }

    if version == 0 && !table_exists(conn, "documents") {
        // Fresh file: create the full current schema in one shot
        let fts = create_base_schema(conn)?;
        return Ok(fts);
    }

    let mut current = version;
    while current < SCHEMA_VERSION {
        info!(from = current, "migrating record store schema");
        match current {
            0 => migrate_v0_to_v1(conn)?,
            1 => migrate_v1_to_v2(conn)?,
            2 => migrate_v2_to_v3(conn)?,
            _ => break,
        }
        current += 1;
        conn.execute_batch(&format!("PRAGMA user_version = {}", current))?;
    }

    Ok(fts_table_exists(conn))
}

pub fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [name],
        |_| Ok(()),
    )
    .is_ok()
}

fn fts_table_exists(conn: &Connection) -> bool {
    table_exists(conn, "fts_entries")
}

/// Create the complete current schema and stamp the version.
/// Returns whether the FTS virtual table could be created.
pub fn create_base_schema(conn: &Connection) -> Result<bool> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            summary TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT,
            content_hash TEXT,
            content_hash_full TEXT,
            PRIMARY KEY (id, collection)
        );
        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
        CREATE INDEX IF NOT EXISTS idx_documents_updated ON documents(updated_at);
        CREATE INDEX IF NOT EXISTS idx_documents_accessed ON documents(accessed_at);
        CREATE INDEX IF NOT EXISTS idx_documents_content_hash
            ON documents(collection, content_hash);

        CREATE TABLE IF NOT EXISTS document_versions (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            version INTEGER NOT NULL,
            summary TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, collection, version)
        );
        CREATE INDEX IF NOT EXISTS idx_versions_doc
            ON document_versions(id, collection, version DESC);

        CREATE TABLE IF NOT EXISTS document_parts (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            part_num INTEGER NOT NULL,
            summary TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            tags_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, collection, part_num)
        );
        CREATE INDEX IF NOT EXISTS idx_parts_doc ON document_parts(id, collection);

        CREATE TABLE IF NOT EXISTS edges (
            collection TEXT NOT NULL,
            source_id TEXT NOT NULL,
            predicate TEXT NOT NULL,
            target_id TEXT NOT NULL,
            inverse TEXT NOT NULL,
            created TEXT NOT NULL,
            PRIMARY KEY (collection, source_id, predicate)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(collection, target_id);

        CREATE TABLE IF NOT EXISTS pending (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            task_type TEXT NOT NULL,
            content TEXT NOT NULL,
            queued_at TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (id, collection, task_type)
        );
        CREATE INDEX IF NOT EXISTS idx_pending_queued ON pending(queued_at);
        ",
    )?;

    let fts = create_fts_table(conn);
    conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    Ok(fts)
}

/// FTS5 ships with the bundled SQLite, so this normally succeeds. A non-FTS5
/// build degrades keyword search to a substring scan instead of failing open.
fn create_fts_table(conn: &Connection) -> bool {
    let result = conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS fts_entries
         USING fts5(key UNINDEXED, collection UNINDEXED, summary, content)",
    );
    if let Err(err) = &result {
        tracing::warn!(error = %err, "FTS5 unavailable, keyword search degrades to substring scan");
    }
    result.is_ok()
}

/// v0 → v1: version-history table + content-hash column.
fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS document_versions (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            version INTEGER NOT NULL,
            summary TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, collection, version)
        );
        CREATE INDEX IF NOT EXISTS idx_versions_doc
            ON document_versions(id, collection, version DESC);
        ",
    )?;
    if !column_exists(conn, "documents", "content_hash") {
        conn.execute_batch("ALTER TABLE documents ADD COLUMN content_hash TEXT")?;
    }
    Ok(())
}

/// v1 → v2: accessed_at column, backfilled from updated_at.
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "documents", "accessed_at") {
        conn.execute_batch("ALTER TABLE documents ADD COLUMN accessed_at TEXT")?;
    }
    conn.execute_batch(
        "
        UPDATE documents SET accessed_at = updated_at WHERE accessed_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_documents_accessed ON documents(accessed_at);
        ",
    )?;
    Ok(())
}

/// v2 → v3: full-hash column, truncation of legacy 64-char hashes, the
/// remaining current-schema tables, and baseline indexes older files lack.
fn migrate_v2_to_v3(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "documents", "content_hash_full") {
        conn.execute_batch("ALTER TABLE documents ADD COLUMN content_hash_full TEXT")?;
    }

    conn.execute_batch(
        "
        UPDATE documents
           SET content_hash = substr(content_hash, 1, 10)
         WHERE content_hash IS NOT NULL AND length(content_hash) = 64;

        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
        CREATE INDEX IF NOT EXISTS idx_documents_updated ON documents(updated_at);
        CREATE INDEX IF NOT EXISTS idx_documents_content_hash
            ON documents(collection, content_hash);

        CREATE TABLE IF NOT EXISTS document_parts (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            part_num INTEGER NOT NULL,
            summary TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            tags_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, collection, part_num)
        );
        CREATE INDEX IF NOT EXISTS idx_parts_doc ON document_parts(id, collection);

        CREATE TABLE IF NOT EXISTS edges (
            collection TEXT NOT NULL,
            source_id TEXT NOT NULL,
            predicate TEXT NOT NULL,
            target_id TEXT NOT NULL,
            inverse TEXT NOT NULL,
            created TEXT NOT NULL,
            PRIMARY KEY (collection, source_id, predicate)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(collection, target_id);

        CREATE TABLE IF NOT EXISTS pending (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            task_type TEXT NOT NULL,
            content TEXT NOT NULL,
            queued_at TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (id, collection, task_type)
        );
        CREATE INDEX IF NOT EXISTS idx_pending_queued ON pending(queued_at);
        ",
    )?;

    truncate_legacy_hash_tags(conn)?;
    create_fts_table(conn);
    rebuild_fts(conn)?;
    Ok(())
}

/// Legacy databases stored full 64-char digests in `*_hash` tag values.
fn truncate_legacy_hash_tags(conn: &Connection) -> Result<()> {
    let mut updates: Vec<(String, String, String)> = Vec::new();
    {
        let mut stmt = conn.prepare("SELECT id, collection, tags_json FROM documents")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let collection: String = row.get(1)?;
            let tags_json: String = row.get(2)?;
            let mut tags: serde_json::Map<String, serde_json::Value> =
                match serde_json::from_str(&tags_json) {
                    Ok(tags) => tags,
                    Err(_) => continue,
                };

            let mut changed = false;
            for (key, value) in tags.iter_mut() {
                if !key.ends_with("_hash") {
                    continue;
                }
                if let Some(text) = value.as_str() {
                    if text.len() == 64 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
                        *value = serde_json::Value::String(text[..10].to_string());
                        changed = true;
                    }
                }
            }
            if changed {
                updates.push((id, collection, serde_json::to_string(&tags)?));
            }
        }
    }
    for (id, collection, tags_json) in updates {
        conn.execute(
            "UPDATE documents SET tags_json = ?1 WHERE id = ?2 AND collection = ?3",
            rusqlite::params![tags_json, id, collection],
        )?;
    }
    Ok(())
}

/// Repopulate the FTS index from documents and parts. Used after migration
/// and after corruption recovery.
pub fn rebuild_fts(conn: &Connection) -> Result<()> {
    if !fts_table_exists(conn) {
        return Ok(());
    }
    conn.execute_batch(
        "
        DELETE FROM fts_entries;
        INSERT INTO fts_entries (key, collection, summary, content)
            SELECT id, collection, summary, '' FROM documents;
        INSERT INTO fts_entries (key, collection, summary, content)
            SELECT id || '@p' || part_num, collection, summary, content
              FROM document_parts;
        ",
    )?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    let mut stmt = match conn.prepare(&format!("PRAGMA table_info({})", table)) {
        Ok(stmt) => stmt,
        Err(_) => return false,
    };
    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(_) => return false,
    };
    while let Ok(Some(row)) = rows.next() {
        if let Ok(name) = row.get::<_, String>(1) {
            if name == column {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_schema_is_current() {
        let conn = Connection::open_in_memory().unwrap();
        let fts = apply(&conn).unwrap();
        assert!(fts);

        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        for table in [
            "documents",
            "document_versions",
            "document_parts",
            "edges",
            "pending",
            "fts_entries",
        ] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        apply(&conn).unwrap();
        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_v0_ladder_reaches_current() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE documents (
                id TEXT NOT NULL,
                collection TEXT NOT NULL,
                summary TEXT NOT NULL,
                tags_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (id, collection)
            );
            INSERT INTO documents VALUES
                ('doc1', 'default', 'hello', '{}', '2025-01-01', '2025-01-01');
            ",
        )
        .unwrap();

        apply(&conn).unwrap();

        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert!(column_exists(&conn, "documents", "accessed_at"));
        assert!(column_exists(&conn, "documents", "content_hash"));
        assert!(column_exists(&conn, "documents", "content_hash_full"));
        assert!(table_exists(&conn, "document_versions"));

        let summary: String = conn
            .query_row("SELECT summary FROM documents WHERE id = 'doc1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(summary, "hello");
    }

    #[test]
    fn test_legacy_hash_truncation() {
        let conn = Connection::open_in_memory().unwrap();
        let long_hash = "a".repeat(64);
        conn.execute_batch(&format!(
            "CREATE TABLE documents (
                id TEXT NOT NULL,
                collection TEXT NOT NULL,
                summary TEXT NOT NULL,
                tags_json TEXT NOT NULL DEFAULT '{{}}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (id, collection)
            );
            INSERT INTO documents VALUES
                ('doc1', 'default', 'hello',
                 '{{\"bundled_hash\": \"{long}\"}}', '2025-01-01', '2025-01-01');
            ",
            long = long_hash
        ))
        .unwrap();
        conn.execute(
            "ALTER TABLE documents ADD COLUMN content_hash TEXT",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE documents SET content_hash = ?1",
            [long_hash.as_str()],
        )
        .unwrap();
        conn.execute_batch("PRAGMA user_version = 1").unwrap();

        apply(&conn).unwrap();

        let content_hash: String = conn
            .query_row("SELECT content_hash FROM documents WHERE id = 'doc1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(content_hash.len(), 10);

        let tags_json: String = conn
            .query_row("SELECT tags_json FROM documents WHERE id = 'doc1'", [], |r| r.get(0))
            .unwrap();
        let tags: serde_json::Value = serde_json::from_str(&tags_json).unwrap();
        assert_eq!(tags["bundled_hash"].as_str().unwrap().len(), 10);
    }
}
