//! Version history operations.
//!
//! Every content-changing upsert archives the prior `(summary, tags,
//! content_hash)` as an immutable version row. Versions are numbered from 1
//! and form a strict chain ordered by `created_at`.

use rusqlite::{params, OptionalExtension};

use crate::features::record_store::store::RecordStore;
use crate::shared::models::{ItemRecord, Result, Tags, VersionInfo, VersionNav};
use crate::shared::utils::time::now_iso;

const VERSION_COLUMNS: &str = "version, summary, tags_json, content_hash, created_at";

fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionInfo> {
    let tags_json: String = row.get(2)?;
    Ok(VersionInfo {
        version: row.get(0)?,
        summary: row.get(1)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        content_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl RecordStore {
    /// Archive a snapshot as an explicit version number.
    pub fn upsert_version(
        &self,
        collection: &str,
        id: &str,
        version: i64,
        summary: &str,
        tags: &Tags,
        content_hash: Option<&str>,
    ) -> Result<()> {
        let tags_json = serde_json::to_string(tags)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO document_versions
             (id, collection, version, summary, tags_json, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, collection, version, summary, tags_json, content_hash, now_iso()],
        )?;
        Ok(())
    }

    /// Archive the current state of a record as the next version number.
    /// Returns the version that was written.
    pub fn archive_current(&self, record: &ItemRecord) -> Result<i64> {
        let version = self.max_version(&record.collection, &record.id)? + 1;
        self.upsert_version(
            &record.collection,
            &record.id,
            version,
            &record.summary,
            &record.tags,
            record.content_hash.as_deref(),
        )?;
        Ok(version)
    }

    /// Versions newest-first.
    pub fn list_versions(
        &self,
        collection: &str,
        id: &str,
        limit: usize,
    ) -> Result<Vec<VersionInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM document_versions
             WHERE id = ?1 AND collection = ?2
             ORDER BY version DESC LIMIT ?3",
            VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map(params![id, collection, limit as i64], version_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    /// Versions within `radius` of a reference version, newest-first.
    pub fn list_versions_around(
        &self,
        collection: &str,
        id: &str,
        version: i64,
        radius: i64,
    ) -> Result<Vec<VersionInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM document_versions
             WHERE id = ?1 AND collection = ?2 AND version BETWEEN ?3 AND ?4
             ORDER BY version DESC",
            VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map(
                params![id, collection, version - radius, version + radius],
                version_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    /// A single version by reverse offset from the tip (0 = newest).
    pub fn get_version(
        &self,
        collection: &str,
        id: &str,
        offset: usize,
    ) -> Result<Option<VersionInfo>> {
        let conn = self.conn.lock().unwrap();
        let version = conn
            .query_row(
                &format!(
                    "SELECT {} FROM document_versions
                     WHERE id = ?1 AND collection = ?2
                     ORDER BY version DESC LIMIT 1 OFFSET ?3",
                    VERSION_COLUMNS
                ),
                params![id, collection, offset as i64],
                version_from_row,
            )
            .optional()?;
        Ok(version)
    }

    /// Navigation around a reference version. With no reference (viewing the
    /// current state), `prev` holds the newest archived versions.
    pub fn get_version_nav(
        &self,
        collection: &str,
        id: &str,
        current: Option<i64>,
        limit: usize,
    ) -> Result<VersionNav> {
        match current {
            None => Ok(VersionNav {
                prev: self.list_versions(collection, id, limit)?,
                next: Vec::new(),
            }),
            Some(current) => {
                let conn = self.conn.lock().unwrap();
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM document_versions
                     WHERE id = ?1 AND collection = ?2 AND version < ?3
                     ORDER BY version DESC LIMIT ?4",
                    VERSION_COLUMNS
                ))?;
                let prev = stmt
                    .query_map(params![id, collection, current, limit as i64], version_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM document_versions
                     WHERE id = ?1 AND collection = ?2 AND version > ?3
                     ORDER BY version ASC LIMIT ?4",
                    VERSION_COLUMNS
                ))?;
                let next = stmt
                    .query_map(params![id, collection, current, limit as i64], version_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(VersionNav { prev, next })
            }
        }
    }

    /// Promote the newest archived version to the current state and remove
    /// it from history. Returns the updated record, or None when there is no
    /// history to restore.
    pub fn restore_latest_version(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<ItemRecord>> {
        let latest = match self.get_version(collection, id, 0)? {
            Some(version) => version,
            None => return Ok(None),
        };

        {
            let now = now_iso();
            let tags_json = serde_json::to_string(&latest.tags)?;
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE documents
                    SET summary = ?1, tags_json = ?2, content_hash = ?3,
                        content_hash_full = NULL, updated_at = ?4
                  WHERE id = ?5 AND collection = ?6",
                params![latest.summary, tags_json, latest.content_hash, now, id, collection],
            )?;
            conn.execute(
                "DELETE FROM document_versions
                 WHERE id = ?1 AND collection = ?2 AND version = ?3",
                params![id, collection, latest.version],
            )?;
            super::fts::upsert_entry(
                &conn,
                self.fts_available(),
                collection,
                id,
                &latest.summary,
                "",
            )?;
        }
        self.get(collection, id)
    }

    /// Highest archived version number (0 when no history exists).
    pub fn max_version(&self, collection: &str, id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM document_versions
             WHERE id = ?1 AND collection = ?2",
            params![id, collection],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    pub fn version_count(&self, collection: &str, id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM document_versions WHERE id = ?1 AND collection = ?2",
            params![id, collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Remove one archived version. Returns true if it existed.
    pub fn delete_version(&self, collection: &str, id: &str, version: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM document_versions
             WHERE id = ?1 AND collection = ?2 AND version = ?3",
            params![id, collection, version],
        )?;
        Ok(deleted > 0)
    }

    /// Remove all archived versions for an item. Returns the number removed.
    pub fn delete_versions(&self, collection: &str, id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM document_versions WHERE id = ?1 AND collection = ?2",
            params![id, collection],
        )?;
        Ok(deleted)
    }
}
