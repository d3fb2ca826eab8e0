//! Edge (graph overlay) operations.
//!
//! An edge is `(collection, source_id, predicate) → (target_id, inverse)`.
//! The predicate is unique per source, so re-asserting an edge replaces the
//! old target. Inverse lookups drive backward navigation in item context.

use rusqlite::params;

use crate::features::record_store::store::RecordStore;
use crate::shared::models::{EdgeInfo, Result};

impl RecordStore {
    pub fn upsert_edge(
        &self,
        collection: &str,
        source_id: &str,
        predicate: &str,
        target_id: &str,
        inverse: &str,
        created: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO edges
             (collection, source_id, predicate, target_id, inverse, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![collection, source_id, predicate, target_id, inverse, created],
        )?;
        Ok(())
    }

    pub fn delete_edge(&self, collection: &str, source_id: &str, predicate: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM edges
             WHERE collection = ?1 AND source_id = ?2 AND predicate = ?3",
            params![collection, source_id, predicate],
        )?;
        Ok(deleted)
    }

    pub fn delete_edges_for_source(&self, collection: &str, source_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM edges WHERE collection = ?1 AND source_id = ?2",
            params![collection, source_id],
        )?;
        Ok(deleted)
    }

    pub fn delete_edges_for_target(&self, collection: &str, target_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM edges WHERE collection = ?1 AND target_id = ?2",
            params![collection, target_id],
        )?;
        Ok(deleted)
    }

    pub fn delete_edges_for_predicate(&self, collection: &str, predicate: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM edges WHERE collection = ?1 AND predicate = ?2",
            params![collection, predicate],
        )?;
        Ok(deleted)
    }

    /// Outbound edges of an item, ordered by predicate then recency.
    pub fn get_forward_edges(&self, collection: &str, source_id: &str) -> Result<Vec<EdgeInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT predicate, target_id, created FROM edges
             WHERE collection = ?1 AND source_id = ?2
             ORDER BY predicate ASC, created DESC",
        )?;
        let edges = stmt
            .query_map(params![collection, source_id], |row| {
                Ok(EdgeInfo {
                    label: row.get(0)?,
                    other_id: row.get(1)?,
                    created: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Inbound edges of an item under their inverse names, ordered by
    /// inverse then recency.
    pub fn get_inverse_edges(&self, collection: &str, target_id: &str) -> Result<Vec<EdgeInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT inverse, source_id, created FROM edges
             WHERE collection = ?1 AND target_id = ?2
             ORDER BY inverse ASC, created DESC",
        )?;
        let edges = stmt
            .query_map(params![collection, target_id], |row| {
                Ok(EdgeInfo {
                    label: row.get(0)?,
                    other_id: row.get(1)?,
                    created: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    pub fn has_edges(&self, collection: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE collection = ?1 LIMIT 1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
