//! SQLite-backed canonical record store.
//!
//! The record store is the source of truth for item identity, summaries,
//! tags, timestamps, and version history. Embeddings live in the vector
//! index; both stores agree because every write group runs under the
//! coherence lock and the record store commits first.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::features::record_store::{fts, migrations, recovery};
use crate::shared::models::{ItemRecord, MemoryError, Result, Tags};
use crate::shared::utils::time::now_iso;

pub(crate) const DOC_COLUMNS: &str = "id, collection, summary, tags_json, created_at, updated_at, \
     accessed_at, content_hash, content_hash_full";

/// Sort order for `list_recent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Updated,
    Accessed,
    Created,
}

impl OrderBy {
    fn column(self) -> &'static str {
        match self {
            OrderBy::Updated => "updated_at",
            OrderBy::Accessed => "accessed_at",
            OrderBy::Created => "created_at",
        }
    }
}

/// SQLite-backed store for canonical item records, versions, parts, edges,
/// and the deferred-work queue table.
#[derive(Clone)]
pub struct RecordStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) path: PathBuf,
    pub(crate) fts_available: Arc<AtomicBool>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("fts_available", &self.fts_available.load(Ordering::Relaxed))
            .finish()
    }
}

impl RecordStore {
    /// Open (or create) the store at the given path, running migrations and
    /// the integrity check. A malformed file triggers automatic recovery.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (conn, fts_available) = match Self::init(&path) {
            Ok(ok) => ok,
            Err(err) if err.is_malformed() => {
                warn!(path = %path.display(), error = %err, "record store malformed, recovering");
                recovery::recover_malformed(&path)?;
                Self::init(&path)?
            }
            Err(err) => return Err(err),
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            fts_available: Arc::new(AtomicBool::new(fts_available)),
        })
    }

    fn init(path: &Path) -> Result<(Connection, bool)> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL allows concurrent readers during writes across processes
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(MemoryError::corruption(format!(
                "integrity check failed: {}",
                check
            )));
        }

        let fts_available = migrations::apply(&conn)?;
        Ok((conn, fts_available))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fts_available(&self) -> bool {
        self.fts_available.load(Ordering::Relaxed)
    }

    /// Shared connection handle for the pending queue, which lives in the
    /// same database file (one transaction domain).
    pub(crate) fn conn_handle(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub(crate) fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRecord> {
        let tags_json: String = row.get(3)?;
        let updated_at: String = row.get(5)?;
        let accessed_at: Option<String> = row.get(6)?;
        Ok(ItemRecord {
            id: row.get(0)?,
            collection: row.get(1)?,
            summary: row.get(2)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            created_at: row.get(4)?,
            accessed_at: accessed_at.unwrap_or_else(|| updated_at.clone()),
            updated_at,
            content_hash: row.get(7)?,
            content_hash_full: row.get(8)?,
        })
    }

    // -------------------------------------------------------------------
    // Write operations
    // -------------------------------------------------------------------

    /// Insert or update an item record.
    ///
    /// Preserves `created_at` on update, refreshes `updated_at` and
    /// `accessed_at`. The second return value is true iff a prior record
    /// existed with a different content hash.
    pub fn upsert(
        &self,
        collection: &str,
        id: &str,
        summary: &str,
        tags: &Tags,
        content_hash: Option<&str>,
        content_hash_full: Option<&str>,
    ) -> Result<(ItemRecord, bool)> {
        let now = now_iso();
        let tags_json = serde_json::to_string(tags)?;

        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE id = ?1 AND collection = ?2",
                    DOC_COLUMNS
                ),
                params![id, collection],
                Self::record_from_row,
            )
            .optional()?;

        let content_changed = match &existing {
            Some(prior) => {
                content_hash.is_some() && prior.content_hash.as_deref() != content_hash
            }
            None => false,
        };
        let created_at = existing
            .as_ref()
            .map(|prior| prior.created_at.clone())
            .unwrap_or_else(|| now.clone());

        conn.execute(
            "INSERT OR REPLACE INTO documents
             (id, collection, summary, tags_json, created_at, updated_at,
              accessed_at, content_hash, content_hash_full)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                collection,
                summary,
                tags_json,
                created_at,
                now,
                now,
                content_hash,
                content_hash_full
            ],
        )?;
        fts::upsert_entry(&conn, self.fts_available(), collection, id, summary, "")?;

        Ok((
            ItemRecord {
                id: id.to_string(),
                collection: collection.to_string(),
                summary: summary.to_string(),
                tags: tags.clone(),
                created_at,
                updated_at: now.clone(),
                accessed_at: now,
                content_hash: content_hash.map(str::to_string),
                content_hash_full: content_hash_full.map(str::to_string),
            },
            content_changed,
        ))
    }

    /// Update just the summary of an existing record. Used when a deferred
    /// summarization replaces the placeholder.
    pub fn update_summary(&self, collection: &str, id: &str, summary: &str) -> Result<bool> {
        let now = now_iso();
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE documents SET summary = ?1, updated_at = ?2
             WHERE id = ?3 AND collection = ?4",
            params![summary, now, id, collection],
        )?;
        if changed > 0 {
            fts::upsert_entry(&conn, self.fts_available(), collection, id, summary, "")?;
        }
        Ok(changed > 0)
    }

    /// Replace the tag map of an existing record.
    pub fn update_tags(&self, collection: &str, id: &str, tags: &Tags) -> Result<bool> {
        let now = now_iso();
        let tags_json = serde_json::to_string(tags)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE documents SET tags_json = ?1, updated_at = ?2
             WHERE id = ?3 AND collection = ?4",
            params![tags_json, now, id, collection],
        )?;
        Ok(changed > 0)
    }

    pub fn update_content_hash(
        &self,
        collection: &str,
        id: &str,
        content_hash: &str,
        content_hash_full: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE documents SET content_hash = ?1, content_hash_full = ?2
             WHERE id = ?3 AND collection = ?4",
            params![content_hash, content_hash_full, id, collection],
        )?;
        Ok(changed > 0)
    }

    /// Delete a record. Returns true if it existed.
    pub fn delete(&self, collection: &str, id: &str, cascade_versions: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM documents WHERE id = ?1 AND collection = ?2",
            params![id, collection],
        )?;
        if cascade_versions {
            conn.execute(
                "DELETE FROM document_versions WHERE id = ?1 AND collection = ?2",
                params![id, collection],
            )?;
        }
        fts::delete_entry(&conn, self.fts_available(), collection, id)?;
        Ok(deleted > 0)
    }

    /// Delete every record in a collection. Returns the number removed.
    pub fn delete_collection(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM documents WHERE collection = ?1",
            params![collection],
        )?;
        conn.execute(
            "DELETE FROM document_versions WHERE collection = ?1",
            params![collection],
        )?;
        conn.execute(
            "DELETE FROM document_parts WHERE collection = ?1",
            params![collection],
        )?;
        conn.execute("DELETE FROM edges WHERE collection = ?1", params![collection])?;
        if self.fts_available() {
            conn.execute(
                "DELETE FROM fts_entries WHERE collection = ?1",
                params![collection],
            )?;
        }
        Ok(deleted)
    }

    /// Refresh `accessed_at`, best effort. A malformed database here is
    /// non-fatal: we attempt in-place recovery and report success.
    pub fn touch(&self, collection: &str, id: &str) {
        if let Err(err) = self.touch_inner(collection, &[id]) {
            if err.is_malformed() {
                warn!(error = %err, "touch hit a malformed database, attempting recovery");
                self.try_runtime_recover();
            }
        }
    }

    /// Refresh `accessed_at` for many ids, best effort.
    pub fn touch_many(&self, collection: &str, ids: &[&str]) {
        if ids.is_empty() {
            return;
        }
        if let Err(err) = self.touch_inner(collection, ids) {
            if err.is_malformed() {
                warn!(error = %err, "touch hit a malformed database, attempting recovery");
                self.try_runtime_recover();
            }
        }
    }

    fn touch_inner(&self, collection: &str, ids: &[&str]) -> Result<()> {
        let now = now_iso();
        let conn = self.conn.lock().unwrap();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE documents SET accessed_at = ?1
             WHERE collection = ?2 AND id IN ({})",
            placeholders
        );
        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&now, &collection];
        for id in ids {
            values.push(id);
        }
        conn.execute(&sql, values.as_slice())?;
        Ok(())
    }

    /// Replace the live connection with a fresh one after recovering the
    /// file on disk. Returns false when recovery itself failed.
    pub fn try_runtime_recover(&self) -> bool {
        let result: Result<()> = (|| {
            let mut guard = self.conn.lock().unwrap();
            // Drop the old connection first so the file handle is released
            let old = std::mem::replace(&mut *guard, Connection::open_in_memory()?);
            drop(old);
            recovery::recover_malformed(&self.path)?;
            let (conn, fts_available) = Self::init(&self.path)?;
            self.fts_available.store(fts_available, Ordering::Relaxed);
            *guard = conn;
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "runtime recovery failed");
                false
            }
        }
    }

    // -------------------------------------------------------------------
    // Read operations
    // -------------------------------------------------------------------

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<ItemRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE id = ?1 AND collection = ?2",
                    DOC_COLUMNS
                ),
                params![id, collection],
                Self::record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_many(&self, collection: &str, ids: &[&str]) -> Result<Vec<ItemRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT {} FROM documents WHERE collection = ? AND id IN ({})",
            DOC_COLUMNS, placeholders
        );
        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&collection];
        for id in ids {
            values.push(id);
        }
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(values.as_slice(), Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1 AND collection = ?2",
                params![id, collection],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Dedup lookup: another record in the collection with this content
    /// hash. When both sides carry a full hash it must match too (prefix
    /// collisions disambiguate on the full digest).
    pub fn find_by_content_hash(
        &self,
        collection: &str,
        content_hash: &str,
        content_hash_full: Option<&str>,
        exclude_id: Option<&str>,
    ) -> Result<Option<ItemRecord>> {
        if content_hash.is_empty() {
            return Ok(None);
        }
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents
             WHERE collection = ?1 AND content_hash = ?2",
            DOC_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![collection, content_hash], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for record in records {
            if exclude_id == Some(record.id.as_str()) {
                continue;
            }
            if let (Some(full), Some(record_full)) =
                (content_hash_full, record.content_hash_full.as_deref())
            {
                if full != record_full {
                    continue;
                }
            }
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Copy a record to a new id. Refuses to overwrite an existing target.
    pub fn copy_record(
        &self,
        collection: &str,
        from_id: &str,
        to_id: &str,
    ) -> Result<Option<ItemRecord>> {
        {
            let conn = self.conn.lock().unwrap();
            let target_exists = conn
                .query_row(
                    "SELECT 1 FROM documents WHERE id = ?1 AND collection = ?2",
                    params![to_id, collection],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if target_exists {
                return Ok(None);
            }
            let copied = conn.execute(
                "INSERT INTO documents
                 (id, collection, summary, tags_json, created_at, updated_at,
                  accessed_at, content_hash, content_hash_full)
                 SELECT ?1, collection, summary, tags_json, created_at, updated_at,
                        accessed_at, content_hash, content_hash_full
                   FROM documents WHERE id = ?2 AND collection = ?3",
                params![to_id, from_id, collection],
            )?;
            if copied == 0 {
                return Ok(None);
            }
        }
        self.get(collection, to_id)
    }

    pub fn list_ids(&self, collection: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let sql = match limit {
            Some(_) => {
                "SELECT id FROM documents WHERE collection = ?1
                 ORDER BY updated_at DESC LIMIT ?2"
            }
            None => {
                "SELECT id FROM documents WHERE collection = ?1
                 ORDER BY updated_at DESC"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let ids = match limit {
            Some(limit) => stmt
                .query_map(params![collection, limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?,
            None => stmt
                .query_map(params![collection], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?,
        };
        Ok(ids)
    }

    pub fn list_recent(
        &self,
        collection: &str,
        limit: usize,
        order_by: OrderBy,
    ) -> Result<Vec<ItemRecord>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM documents WHERE collection = ?1
             ORDER BY {} DESC LIMIT ?2",
            DOC_COLUMNS,
            order_by.column()
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![collection, limit as i64], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Filtered listing used by `list_items`: optional id LIKE pattern,
    /// tag equality pairs, and an updated_at window.
    pub fn query_items(
        &self,
        collection: &str,
        id_like: Option<&str>,
        tags: Option<&Tags>,
        since: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ItemRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = format!(
            "SELECT {} FROM documents WHERE collection = ?",
            DOC_COLUMNS
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(collection.to_string())];
        if let Some(pattern) = id_like {
            sql.push_str(" AND id LIKE ? ESCAPE '\\'");
            values.push(Box::new(pattern.to_string()));
        }
        if let Some(since) = since {
            sql.push_str(" AND updated_at >= ?");
            values.push(Box::new(since.to_string()));
        }
        if let Some(until) = until {
            sql.push_str(" AND updated_at < ?");
            values.push(Box::new(until.to_string()));
        }
        sql.push_str(" ORDER BY updated_at DESC");
        let filter_tags = tags.filter(|t| !t.is_empty());
        if filter_tags.is_none() {
            sql.push_str(" LIMIT ?");
            values.push(Box::new(limit as i64));
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut records = stmt
            .query_map(params_ref.as_slice(), Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if let Some(filter) = filter_tags {
            records.retain(|record| crate::shared::models::tags_match(&record.tags, filter));
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Records whose tag map contains the given key (any value).
    pub fn query_by_tag_key(
        &self,
        collection: &str,
        key: &str,
        limit: usize,
    ) -> Result<Vec<ItemRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents
             WHERE collection = ?1 AND json_extract(tags_json, ?2) IS NOT NULL
             ORDER BY updated_at DESC LIMIT ?3",
            DOC_COLUMNS
        ))?;
        let records = stmt
            .query_map(
                params![collection, format!("$.{}", key), limit as i64],
                Self::record_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// AND-equality tag query.
    pub fn query_by_tags(
        &self,
        collection: &str,
        tags: &Tags,
        limit: usize,
    ) -> Result<Vec<ItemRecord>> {
        if tags.is_empty() {
            return Err(MemoryError::invalid_input(
                "At least one tag must be specified",
            ));
        }
        let conn = self.conn.lock().unwrap();
        let mut sql = format!(
            "SELECT {} FROM documents WHERE collection = ?",
            DOC_COLUMNS
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(collection.to_string())];
        for (key, value) in tags {
            sql.push_str(" AND json_extract(tags_json, ?) = ?");
            values.push(Box::new(format!("$.{}", key)));
            values.push(Box::new(value.clone()));
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ?");
        values.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let records = stmt
            .query_map(params_ref.as_slice(), Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Records whose id starts with the given prefix.
    pub fn query_by_id_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<ItemRecord>> {
        let pattern = format!("{}%", escape_like(prefix));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents
             WHERE collection = ?1 AND id LIKE ?2 ESCAPE '\\'
             ORDER BY updated_at DESC",
            DOC_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![collection, pattern], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Distinct non-system tag keys in a collection, sorted.
    pub fn list_distinct_tag_keys(&self, collection: &str) -> Result<Vec<String>> {
        let mut keys = std::collections::BTreeSet::new();
        for tags in self.all_tag_maps(collection)? {
            for key in tags.keys() {
                if !crate::shared::models::is_system_tag(key) {
                    keys.insert(key.clone());
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Distinct values for one tag key, sorted.
    pub fn list_distinct_tag_values(&self, collection: &str, key: &str) -> Result<Vec<String>> {
        let mut values = std::collections::BTreeSet::new();
        for tags in self.all_tag_maps(collection)? {
            if let Some(value) = tags.get(key) {
                values.insert(value.clone());
            }
        }
        Ok(values.into_iter().collect())
    }

    /// Count of items per (key, value) pair, system tags excluded.
    pub fn tag_pair_counts(
        &self,
        collection: &str,
    ) -> Result<std::collections::BTreeMap<(String, String), usize>> {
        let mut counts = std::collections::BTreeMap::new();
        for tags in self.all_tag_maps(collection)? {
            for (key, value) in tags {
                if crate::shared::models::is_system_tag(&key) {
                    continue;
                }
                *counts.entry((key, value)).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    fn all_tag_maps(&self, collection: &str) -> Result<Vec<Tags>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT tags_json FROM documents WHERE collection = ?1")?;
        let maps = stmt
            .query_map(params![collection], |row| {
                let tags_json: String = row.get(0)?;
                Ok(serde_json::from_str(&tags_json).unwrap_or_default())
            })?
            .collect::<rusqlite::Result<Vec<Tags>>>()?;
        Ok(maps)
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_all(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT DISTINCT collection FROM documents ORDER BY collection")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}

/// Escape `%`, `_`, and `\` for a LIKE pattern with ESCAPE '\'.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '%' || ch == '_' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Translate a glob pattern (`*`, `?`) into a LIKE pattern.
pub fn glob_to_like(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len());
    for ch in glob.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}
