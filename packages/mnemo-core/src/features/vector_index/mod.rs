//! Dense vector index with cross-process freshness.

pub mod index;
pub mod segment;

pub use index::{part_key, version_key, VectorEntry, VectorHit, VectorStore, VECTOR_DIR};
