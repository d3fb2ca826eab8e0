//! Corruption recovery for the record store.
//!
//! A malformed database file is renamed to `{path}.corrupt`, stale WAL/SHM
//! sidecars are removed, and every readable row is replayed into a fresh
//! database. A file too damaged to enumerate propagates a hard error; the
//! renamed backup is left in place either way.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::features::record_store::migrations;
use crate::shared::models::{MemoryError, Result};

/// Tables replayed during recovery, in dependency order.
const RECOVERABLE_TABLES: &[&str] = &[
    "documents",
    "document_versions",
    "document_parts",
    "edges",
    "pending",
];

/// Rename the malformed file aside and rebuild from its readable rows.
pub fn recover_malformed(path: &Path) -> Result<()> {
    let corrupt_path = PathBuf::from(format!("{}.corrupt", path.display()));
    if corrupt_path.exists() {
        std::fs::remove_file(&corrupt_path)?;
    }
    if path.exists() {
        std::fs::rename(path, &corrupt_path)?;
    }
    for suffix in ["-wal", "-shm"] {
        for base in [path, corrupt_path.as_path()] {
            let sidecar = PathBuf::from(format!("{}{}", base.display(), suffix));
            if sidecar.exists() {
                let _ = std::fs::remove_file(&sidecar);
            }
        }
    }

    let source = Connection::open_with_flags(
        &corrupt_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        MemoryError::corruption(format!(
            "corrupt database cannot be opened for dump: {}",
            e
        ))
    })?;

    // If the master table is unreadable the file is beyond recovery
    let source_tables = list_tables(&source).map_err(|e| {
        MemoryError::corruption(format!("corrupt database is not dumpable: {}", e.message))
    })?;

    let dest = Connection::open(path)?;
    migrations::create_base_schema(&dest)?;

    let mut copied = 0usize;
    let mut skipped = 0usize;
    for table in RECOVERABLE_TABLES {
        if !source_tables.iter().any(|t| t == table) {
            continue;
        }
        let (rows, failures) = copy_table(&source, &dest, table);
        copied += rows;
        skipped += failures;
    }
    migrations::rebuild_fts(&dest)?;

    info!(
        path = %path.display(),
        copied,
        skipped,
        backup = %corrupt_path.display(),
        "record store recovered from malformed file"
    );
    Ok(())
}

fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tables)
}

/// Copy the intersection of source and destination columns, row by row.
/// Rows that fail to read are skipped; the count of failures is returned.
fn copy_table(source: &Connection, dest: &Connection, table: &str) -> (usize, usize) {
    let source_columns = match table_columns(source, table) {
        Ok(columns) => columns,
        Err(err) => {
            warn!(table, error = %err, "table schema unreadable, skipping");
            return (0, 1);
        }
    };
    let dest_columns = match table_columns(dest, table) {
        Ok(columns) => columns,
        Err(_) => return (0, 0),
    };
    let columns: Vec<String> = source_columns
        .into_iter()
        .filter(|c| dest_columns.contains(c))
        .collect();
    if columns.is_empty() {
        return (0, 0);
    }

    let column_list = columns.join(", ");
    let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let select = format!("SELECT {} FROM {}", column_list, table);
    let insert = format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
        table, column_list, placeholders
    );

    let mut stmt = match source.prepare(&select) {
        Ok(stmt) => stmt,
        Err(err) => {
            warn!(table, error = %err, "table unreadable, skipping");
            return (0, 1);
        }
    };
    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(err) => {
            warn!(table, error = %err, "table query failed, skipping");
            return (0, 1);
        }
    };

    let mut copied = 0usize;
    let mut failures = 0usize;
    loop {
        match rows.next() {
            Ok(Some(row)) => {
                let values: rusqlite::Result<Vec<rusqlite::types::Value>> =
                    (0..columns.len()).map(|i| row.get(i)).collect();
                match values {
                    Ok(values) => {
                        let params = rusqlite::params_from_iter(values);
                        if dest.execute(&insert, params).is_ok() {
                            copied += 1;
                        } else {
                            failures += 1;
                        }
                    }
                    Err(_) => failures += 1,
                }
            }
            Ok(None) => break,
            Err(err) => {
                // A damaged page ends the scan for this table
                warn!(table, error = %err, "row scan aborted mid-table");
                failures += 1;
                break;
            }
        }
    }
    (copied, failures)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::record_store::RecordStore;
    use crate::shared::models::Tags;
    use tempfile::TempDir;

    fn seed(path: &Path) {
        let store = RecordStore::open(path).unwrap();
        store
            .upsert("default", "doc1", "First document", &Tags::new(), None, None)
            .unwrap();
        store
            .upsert("default", "doc2", "Second document", &Tags::new(), None, None)
            .unwrap();
    }

    #[test]
    fn test_recovery_preserves_rows_and_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("documents.db");
        seed(&path);

        recover_malformed(&path).unwrap();

        let backup = PathBuf::from(format!("{}.corrupt", path.display()));
        assert!(backup.exists());

        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.get("default", "doc1").unwrap().unwrap().summary, "First document");
        assert_eq!(store.count("default").unwrap(), 2);
    }

    #[test]
    fn test_unreadable_file_propagates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("documents.db");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let err = recover_malformed(&path).unwrap_err();
        assert!(err.is_malformed(), "expected corruption error, got {}", err);
    }

    #[test]
    fn test_store_open_recovers_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("documents.db");
        seed(&path);

        // Checkpoint the WAL so corruption lands in the main file
        {
            let conn = Connection::open(&path).unwrap();
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .unwrap();
        }
        for suffix in ["-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }

        // Overwrite bytes past the header to damage a data page
        let mut bytes = std::fs::read(&path).unwrap();
        let start = 1200.min(bytes.len().saturating_sub(1));
        let end = (start + 800).min(bytes.len());
        for b in &mut bytes[start..end] {
            *b = 0;
        }
        std::fs::write(&path, &bytes).unwrap();

        // Opening should either recover in place or propagate corruption;
        // a recovered store must be writable
        match RecordStore::open(&path) {
            Ok(store) => {
                store
                    .upsert("default", "new", "post-recovery", &Tags::new(), None, None)
                    .unwrap();
                assert!(store.get("default", "new").unwrap().is_some());
            }
            Err(err) => assert!(err.is_malformed()),
        }
    }
}
