//! Content-addressed embedding cache.
//!
//! Embeddings are pure functions of `(content, model)`, so recomputation is
//! wasted provider work. The cache is a small standalone SQLite file keyed by
//! `(content_hash_full, model)`; vectors are stored as little-endian f32
//! blobs. `CachingEmbeddingProvider` wraps any provider as a decorator.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{ByteOrder, LittleEndian};
use rusqlite::{params, Connection, OptionalExtension};

use crate::features::providers::EmbeddingProvider;
use crate::shared::models::Result;
use crate::shared::utils::hash::content_hash_full;
use crate::shared::utils::time::now_iso;

/// Cache usage counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// `(content_hash_full, model) → vector` cache file.
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl EmbeddingCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS embedding_cache (
                content_hash_full TEXT NOT NULL,
                model TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                vector BLOB NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (content_hash_full, model)
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn get(&self, content_hash_full: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT dimension, vector FROM embedding_cache
                 WHERE content_hash_full = ?1 AND model = ?2",
                params![content_hash_full, model],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        drop(conn);

        match row {
            Some((dimension, blob)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let mut vector = vec![0f32; dimension as usize];
                LittleEndian::read_f32_into(&blob, &mut vector);
                Ok(Some(vector))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    pub fn put(&self, content_hash_full: &str, model: &str, vector: &[f32]) -> Result<()> {
        let mut blob = vec![0u8; vector.len() * 4];
        LittleEndian::write_f32_into(vector, &mut blob);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO embedding_cache
             (content_hash_full, model, dimension, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![content_hash_full, model, vector.len() as i64, blob, now_iso()],
        )?;
        Ok(())
    }

    pub fn entries(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        Ok(CacheStats {
            entries: self.entries()?,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        })
    }
}

/// Decorator that serves embeddings from the cache, falling back to the
/// wrapped provider on miss.
#[derive(Debug)]
pub struct CachingEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
}

impl CachingEmbeddingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: Arc<EmbeddingCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> Arc<EmbeddingCache> {
        Arc::clone(&self.cache)
    }
}

impl EmbeddingProvider for CachingEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let hash = content_hash_full(text);
        let model = self.inner.model_name().to_string();
        if let Some(vector) = self.cache.get(&hash, &model)? {
            return Ok(vector);
        }
        let vector = self.inner.embed(text)?;
        self.cache.put(&hash, &model, &vector)?;
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
