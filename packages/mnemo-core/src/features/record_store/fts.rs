//! Keyword search over item summaries and part content.
//!
//! Backed by an FTS5 virtual table (`fts_entries`) keyed by `{id}` for items
//! and `{id}@p{n}` for parts. bm25 ranks are negative, lower is a better
//! match. When FTS5 is unavailable the same queries run as a case-insensitive
//! substring scan with a constant score of -1.0.

use rusqlite::{params, Connection, OptionalExtension};

use crate::features::record_store::store::RecordStore;
use crate::shared::models::{tags_match, Result, Tags};

/// One keyword hit: `(key, summary, score)`; lower scores are better.
pub type FtsHit = (String, String, f64);

const LIKE_FALLBACK_SCORE: f64 = -1.0;

pub(crate) fn upsert_entry(
    conn: &Connection,
    fts_available: bool,
    collection: &str,
    key: &str,
    summary: &str,
    content: &str,
) -> Result<()> {
    if !fts_available {
        return Ok(());
    }
    conn.execute(
        "DELETE FROM fts_entries WHERE key = ?1 AND collection = ?2",
        params![key, collection],
    )?;
    conn.execute(
        "INSERT INTO fts_entries (key, collection, summary, content)
         VALUES (?1, ?2, ?3, ?4)",
        params![key, collection, summary, content],
    )?;
    Ok(())
}

pub(crate) fn delete_entry(
    conn: &Connection,
    fts_available: bool,
    collection: &str,
    key: &str,
) -> Result<()> {
    if !fts_available {
        return Ok(());
    }
    conn.execute(
        "DELETE FROM fts_entries WHERE key = ?1 AND collection = ?2",
        params![key, collection],
    )?;
    Ok(())
}

pub(crate) fn delete_entries_with_prefix(
    conn: &Connection,
    fts_available: bool,
    collection: &str,
    key_prefix: &str,
) -> Result<()> {
    if !fts_available {
        return Ok(());
    }
    let pattern = format!("{}%", super::store::escape_like(key_prefix));
    conn.execute(
        "DELETE FROM fts_entries WHERE collection = ?1 AND key LIKE ?2 ESCAPE '\\'",
        params![collection, pattern],
    )?;
    Ok(())
}

/// Build an OR-of-tokens FTS5 match expression. Tokens are quoted so query
/// punctuation cannot reach the FTS5 query parser.
fn match_expression(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

impl RecordStore {
    /// Case-insensitive OR-token keyword search over summaries and part
    /// content. Hits carry negative bm25 scores (lower is better). An
    /// optional tag filter is applied against the owning document or part.
    pub fn query_fts(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        tags_filter: Option<&Tags>,
    ) -> Result<Vec<FtsHit>> {
        let hits = if self.fts_available() {
            self.query_fts_inner(collection, query, limit.saturating_mul(4))?
        } else {
            self.query_like_inner(collection, query, limit.saturating_mul(4))?
        };
        self.apply_tags_filter(collection, hits, tags_filter, limit)
    }

    /// Keyword search restricted to the given base ids (part keys match on
    /// their base id).
    pub fn query_fts_scoped(
        &self,
        collection: &str,
        query: &str,
        ids: &[&str],
        limit: usize,
        tags_filter: Option<&Tags>,
    ) -> Result<Vec<FtsHit>> {
        let id_set: std::collections::HashSet<&str> = ids.iter().copied().collect();
        let hits = self.query_fts(collection, query, limit.saturating_mul(4), tags_filter)?;
        let scoped: Vec<FtsHit> = hits
            .into_iter()
            .filter(|(key, _, _)| id_set.contains(base_id(key)))
            .take(limit)
            .collect();
        Ok(scoped)
    }

    fn query_fts_inner(
        &self,
        collection: &str,
        query: &str,
        fetch_limit: usize,
    ) -> Result<Vec<FtsHit>> {
        let expr = match match_expression(query) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, summary, bm25(fts_entries) AS score
               FROM fts_entries
              WHERE collection = ?1 AND fts_entries MATCH ?2
              ORDER BY score
              LIMIT ?3",
        )?;
        let hits = stmt
            .query_map(params![collection, expr, fetch_limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<FtsHit>>>()?;
        Ok(hits)
    }

    /// Substring-scan degradation used when FTS5 could not be created.
    fn query_like_inner(
        &self,
        collection: &str,
        query: &str,
        fetch_limit: usize,
    ) -> Result<Vec<FtsHit>> {
        let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let mut hits = Vec::new();

        let mut stmt =
            conn.prepare("SELECT id, summary FROM documents WHERE collection = ?1")?;
        let mut rows = stmt.query(params![collection])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let summary: String = row.get(1)?;
            let lower = summary.to_lowercase();
            if tokens.iter().any(|t| lower.contains(t)) {
                hits.push((id, summary, LIKE_FALLBACK_SCORE));
            }
        }

        let mut stmt = conn.prepare(
            "SELECT id, part_num, summary, content FROM document_parts WHERE collection = ?1",
        )?;
        let mut rows = stmt.query(params![collection])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let part_num: i64 = row.get(1)?;
            let summary: String = row.get(2)?;
            let content: String = row.get(3)?;
            let lower = format!("{} {}", summary, content).to_lowercase();
            if tokens.iter().any(|t| lower.contains(t)) {
                hits.push((format!("{}@p{}", id, part_num), summary, LIKE_FALLBACK_SCORE));
            }
        }

        hits.truncate(fetch_limit);
        Ok(hits)
    }

    fn apply_tags_filter(
        &self,
        collection: &str,
        hits: Vec<FtsHit>,
        tags_filter: Option<&Tags>,
        limit: usize,
    ) -> Result<Vec<FtsHit>> {
        let filter = match tags_filter.filter(|t| !t.is_empty()) {
            Some(filter) => filter,
            None => return Ok(hits.into_iter().take(limit).collect()),
        };

        let mut kept = Vec::new();
        for hit in hits {
            let tags = self.tags_for_key(collection, &hit.0)?;
            if let Some(tags) = tags {
                if tags_match(&tags, filter) {
                    kept.push(hit);
                    if kept.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(kept)
    }

    /// Tag map for an FTS key: a document id or `{id}@p{n}` part key.
    fn tags_for_key(&self, collection: &str, key: &str) -> Result<Option<Tags>> {
        let conn = self.conn.lock().unwrap();
        if let Some((id, part_num)) = split_part_key(key) {
            let tags_json: Option<String> = conn
                .query_row(
                    "SELECT tags_json FROM document_parts
                     WHERE id = ?1 AND collection = ?2 AND part_num = ?3",
                    params![id, collection, part_num],
                    |row| row.get(0),
                )
                .optional()?;
            return Ok(tags_json.map(|t| serde_json::from_str(&t).unwrap_or_default()));
        }
        let tags_json: Option<String> = conn
            .query_row(
                "SELECT tags_json FROM documents WHERE id = ?1 AND collection = ?2",
                params![key, collection],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tags_json.map(|t| serde_json::from_str(&t).unwrap_or_default()))
    }
}

/// Base item id of an FTS key (`note@p2` → `note`).
pub fn base_id(key: &str) -> &str {
    match key.rfind("@p").or_else(|| key.rfind("@v")) {
        Some(pos) if key[pos + 2..].chars().all(|c| c.is_ascii_digit()) => &key[..pos],
        _ => key,
    }
}

/// Split a part key into `(id, part_num)`.
fn split_part_key(key: &str) -> Option<(&str, i64)> {
    let pos = key.rfind("@p")?;
    let num: i64 = key[pos + 2..].parse().ok()?;
    Some((&key[..pos], num))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Tags;
    use tempfile::TempDir;

    fn store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("documents.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_or_token_matching() {
        let (_dir, store) = store();
        store
            .upsert("default", "a", "rust memory engine", &Tags::new(), None, None)
            .unwrap();
        store
            .upsert("default", "b", "python bindings", &Tags::new(), None, None)
            .unwrap();

        let hits = store.query_fts("default", "memory python", 10, None).unwrap();
        let keys: Vec<&str> = hits.iter().map(|(k, _, _)| k.as_str()).collect();
        assert!(keys.contains(&"a"));
        assert!(keys.contains(&"b"));
    }

    #[test]
    fn test_scores_are_negative() {
        let (_dir, store) = store();
        store
            .upsert("default", "a", "searchable text body", &Tags::new(), None, None)
            .unwrap();

        let hits = store.query_fts("default", "searchable", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].2 < 0.0, "bm25 score should be negative: {}", hits[0].2);
    }

    #[test]
    fn test_case_insensitive() {
        let (_dir, store) = store();
        store
            .upsert("default", "a", "Important Decision", &Tags::new(), None, None)
            .unwrap();

        let hits = store.query_fts("default", "important", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_tags_filter() {
        let (_dir, store) = store();
        let mut tagged = Tags::new();
        tagged.insert("topic".into(), "auth".into());
        store
            .upsert("default", "a", "login design notes", &tagged, None, None)
            .unwrap();
        store
            .upsert("default", "b", "login bug report", &Tags::new(), None, None)
            .unwrap();

        let mut filter = Tags::new();
        filter.insert("topic".into(), "auth".into());
        let hits = store
            .query_fts("default", "login", 10, Some(&filter))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a");
    }

    #[test]
    fn test_update_summary_refreshes_index() {
        let (_dir, store) = store();
        store
            .upsert("default", "a", "original wording", &Tags::new(), None, None)
            .unwrap();
        store.update_summary("default", "a", "replacement text").unwrap();

        assert!(store.query_fts("default", "original", 10, None).unwrap().is_empty());
        assert_eq!(store.query_fts("default", "replacement", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn test_scoped_query_filters_base_ids() {
        let (_dir, store) = store();
        store
            .upsert("default", "a", "shared keyword", &Tags::new(), None, None)
            .unwrap();
        store
            .upsert("default", "b", "shared keyword", &Tags::new(), None, None)
            .unwrap();

        let hits = store
            .query_fts_scoped("default", "shared", &["a"], 10, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a");
    }

    #[test]
    fn test_base_id_parsing() {
        assert_eq!(base_id("note"), "note");
        assert_eq!(base_id("note@p2"), "note");
        assert_eq!(base_id("note@v11"), "note");
        assert_eq!(base_id("user@provider"), "user@provider");
    }
}
