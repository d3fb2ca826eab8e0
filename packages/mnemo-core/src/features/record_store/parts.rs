//! Part (decomposition) operations.
//!
//! Parts are ordered sub-sections of an item produced by the analyzer.
//! `part_num == 0` is reserved for the version-history overview. A fresh
//! analysis replaces all prior parts atomically.

use rusqlite::{params, OptionalExtension};

use crate::features::record_store::store::RecordStore;
use crate::shared::models::{PartInfo, Result, Tags};

const PART_COLUMNS: &str = "part_num, summary, content, tags_json, created_at";

fn part_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartInfo> {
    let tags_json: String = row.get(3)?;
    Ok(PartInfo {
        part_num: row.get(0)?,
        summary: row.get(1)?,
        content: row.get(2)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: row.get(4)?,
    })
}

impl RecordStore {
    /// Atomically replace all parts of an item. Returns the number written.
    pub fn upsert_parts(&self, collection: &str, id: &str, parts: &[PartInfo]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM document_parts WHERE id = ?1 AND collection = ?2",
            params![id, collection],
        )?;
        super::fts::delete_entries_with_prefix(
            &tx,
            self.fts_available(),
            collection,
            &format!("{}@p", id),
        )?;

        for part in parts {
            let tags_json = serde_json::to_string(&part.tags)?;
            tx.execute(
                "INSERT OR REPLACE INTO document_parts
                 (id, collection, part_num, summary, content, tags_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    collection,
                    part.part_num,
                    part.summary,
                    part.content,
                    tags_json,
                    part.created_at
                ],
            )?;
            super::fts::upsert_entry(
                &tx,
                self.fts_available(),
                collection,
                &format!("{}@p{}", id, part.part_num),
                &part.summary,
                &part.content,
            )?;
        }

        tx.commit()?;
        Ok(parts.len())
    }

    /// Insert or replace one part without touching the others.
    pub fn upsert_single_part(&self, collection: &str, id: &str, part: &PartInfo) -> Result<()> {
        let tags_json = serde_json::to_string(&part.tags)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO document_parts
             (id, collection, part_num, summary, content, tags_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                collection,
                part.part_num,
                part.summary,
                part.content,
                tags_json,
                part.created_at
            ],
        )?;
        super::fts::upsert_entry(
            &conn,
            self.fts_available(),
            collection,
            &format!("{}@p{}", id, part.part_num),
            &part.summary,
            &part.content,
        )?;
        Ok(())
    }

    pub fn get_part(
        &self,
        collection: &str,
        id: &str,
        part_num: i64,
    ) -> Result<Option<PartInfo>> {
        let conn = self.conn.lock().unwrap();
        let part = conn
            .query_row(
                &format!(
                    "SELECT {} FROM document_parts
                     WHERE id = ?1 AND collection = ?2 AND part_num = ?3",
                    PART_COLUMNS
                ),
                params![id, collection, part_num],
                part_from_row,
            )
            .optional()?;
        Ok(part)
    }

    /// All parts of an item, ordered by part number (overview first).
    pub fn list_parts(&self, collection: &str, id: &str) -> Result<Vec<PartInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM document_parts
             WHERE id = ?1 AND collection = ?2
             ORDER BY part_num ASC",
            PART_COLUMNS
        ))?;
        let parts = stmt
            .query_map(params![id, collection], part_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(parts)
    }

    pub fn part_count(&self, collection: &str, id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM document_parts WHERE id = ?1 AND collection = ?2",
            params![id, collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Remove all parts of an item. Returns the number removed.
    pub fn delete_parts(&self, collection: &str, id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM document_parts WHERE id = ?1 AND collection = ?2",
            params![id, collection],
        )?;
        super::fts::delete_entries_with_prefix(
            &conn,
            self.fts_available(),
            collection,
            &format!("{}@p", id),
        )?;
        Ok(deleted)
    }

    /// Replace the tag map of one part.
    pub fn update_part_tags(
        &self,
        collection: &str,
        id: &str,
        part_num: i64,
        tags: &Tags,
    ) -> Result<bool> {
        let tags_json = serde_json::to_string(tags)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE document_parts SET tags_json = ?1
             WHERE id = ?2 AND collection = ?3 AND part_num = ?4",
            params![tags_json, id, collection, part_num],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::utils::time::now_iso;
    use tempfile::TempDir;

    fn store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("documents.db")).unwrap();
        (dir, store)
    }

    fn part(num: i64, summary: &str, content: &str) -> PartInfo {
        PartInfo {
            part_num: num,
            summary: summary.into(),
            content: content.into(),
            tags: Tags::new(),
            created_at: now_iso(),
        }
    }

    #[test]
    fn test_upsert_parts_replaces_atomically() {
        let (_dir, store) = store();
        store
            .upsert_parts(
                "default",
                "doc",
                &[part(1, "old a", "aaa"), part(2, "old b", "bbb")],
            )
            .unwrap();
        store
            .upsert_parts("default", "doc", &[part(1, "new a", "xxx")])
            .unwrap();

        let parts = store.list_parts("default", "doc").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].summary, "new a");
    }

    #[test]
    fn test_list_parts_overview_first() {
        let (_dir, store) = store();
        store
            .upsert_parts(
                "default",
                "doc",
                &[part(2, "second", "b"), part(0, "overview", "o"), part(1, "first", "a")],
            )
            .unwrap();

        let parts = store.list_parts("default", "doc").unwrap();
        assert_eq!(
            parts.iter().map(|p| p.part_num).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_part_content_is_searchable() {
        let (_dir, store) = store();
        store
            .upsert("default", "doc", "parent summary", &Tags::new(), None, None)
            .unwrap();
        store
            .upsert_parts(
                "default",
                "doc",
                &[part(1, "section", "unusual internals discussion")],
            )
            .unwrap();

        let hits = store.query_fts("default", "internals", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "doc@p1");
    }

    #[test]
    fn test_delete_parts_clears_search_rows() {
        let (_dir, store) = store();
        store
            .upsert_parts("default", "doc", &[part(1, "section", "findable token")])
            .unwrap();
        assert_eq!(store.delete_parts("default", "doc").unwrap(), 1);
        assert!(store.query_fts("default", "findable", 10, None).unwrap().is_empty());
        assert_eq!(store.part_count("default", "doc").unwrap(), 0);
    }

    #[test]
    fn test_update_part_tags() {
        let (_dir, store) = store();
        store
            .upsert_parts("default", "doc", &[part(1, "section", "text")])
            .unwrap();

        let mut tags = Tags::new();
        tags.insert("reviewed".into(), "yes".into());
        assert!(store.update_part_tags("default", "doc", 1, &tags).unwrap());

        let loaded = store.get_part("default", "doc", 1).unwrap().unwrap();
        assert_eq!(loaded.tags.get("reviewed").map(String::as_str), Some("yes"));
    }
}
