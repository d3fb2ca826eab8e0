//! Shared helpers for integration tests.
//!
//! All engines here run on deterministic local providers (hash embeddings,
//! truncation summaries): no network, no models.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mnemo_core::{
    EmbeddingProvider, EngineMode, HashEmbeddingProvider, MemoryEngine, PutOptions, Result, Tags,
};
use tempfile::TempDir;

pub const TEST_DIMENSION: usize = 32;

/// Embedding provider that counts calls into the real implementation.
#[derive(Debug)]
pub struct CountingEmbedding {
    inner: HashEmbeddingProvider,
    calls: AtomicUsize,
}

impl CountingEmbedding {
    pub fn new() -> Self {
        Self {
            inner: HashEmbeddingProvider::new(TEST_DIMENSION),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
    }
}

impl EmbeddingProvider for CountingEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.inner.embed(text)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Local-mode engine on a fresh temp store.
pub fn local_engine() -> (TempDir, MemoryEngine) {
    let dir = TempDir::new().unwrap();
    let engine = MemoryEngine::builder(dir.path())
        .embedding_provider(Arc::new(HashEmbeddingProvider::new(TEST_DIMENSION)))
        .open()
        .unwrap();
    (dir, engine)
}

/// Deferred-mode engine plus a handle on the counting embedding provider.
pub fn deferred_engine() -> (TempDir, MemoryEngine, Arc<CountingEmbedding>) {
    let dir = TempDir::new().unwrap();
    let counting = Arc::new(CountingEmbedding::new());
    let engine = MemoryEngine::builder(dir.path())
        .mode(EngineMode::Deferred)
        .embedding_provider(counting.clone())
        .embedding_cache(false)
        .open()
        .unwrap();
    (dir, engine, counting)
}

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn put_opts(id: &str) -> PutOptions {
    PutOptions::default().id(id)
}
