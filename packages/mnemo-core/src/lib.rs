//! mnemo-core: embeddable reflective associative memory.
//!
//! Stores text artifacts ("items") in a per-user store directory, indexes
//! them by dense embeddings and full-text tokens, answers similarity and
//! keyword queries with recency decay, preserves version history on
//! mutation, and decomposes long items into independently searchable parts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      MemoryEngine                        │
//! │   put / get / find / tag / delete / analyze / move       │
//! ├────────────┬───────────────┬──────────────┬──────────────┤
//! │ RecordStore│  VectorStore  │ PendingQueue │ EmbeddingCache│
//! │  (SQLite,  │ (mmap segments│ (table in the│ (hash+model → │
//! │   source of│  + entry table│  record store│   vector)     │
//! │   truth)   │  per coll.)   │  file)       │               │
//! ├────────────┴───────────────┴──────────────┴──────────────┤
//! │        Coherence: .chroma.lock + .chroma.epoch           │
//! │   (cross-process writer serialization + reader freshness)│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mnemo_core::{MemoryEngine, PutOptions, FindOptions};
//!
//! let engine = MemoryEngine::open("/tmp/my-store")?;
//! engine.put("prefers dark roast coffee", PutOptions::default().id("pref:coffee"))?;
//! let hits = engine.find("coffee preferences", FindOptions::default())?;
//! # Ok::<(), mnemo_core::MemoryError>(())
//! ```

pub mod api;
pub mod config;
pub mod features;
pub mod shared;

pub use api::{
    EngineMode, FindOptions, MemoryEngine, MemoryEngineBuilder, PutOptions, DEFAULT_COLLECTION,
    DEFAULT_DECAY_HALF_LIFE_DAYS,
};
pub use config::{ProviderConfig, StoreConfig, CONFIG_FILENAME};
pub use features::analyze::DefaultAnalyzer;
pub use features::coherence::Coherence;
pub use features::embedding_cache::{CacheStats, CachingEmbeddingProvider, EmbeddingCache};
pub use features::pending::{
    NullPendingQueue, PendingQueue, PendingTask, QueueStats, SqlitePendingQueue, TaskType,
};
pub use features::providers::{
    AnalysisChunk, AnalyzerProvider, CompositeDocumentProvider, DocumentProvider,
    EmbeddingProvider, FetchedDocument, FileDocumentProvider, HashEmbeddingProvider, PartDraft,
    PassthroughSummarization, ProviderRegistry, SummarizationProvider, TruncateSummarization,
};
pub use features::record_store::{OrderBy, RecordStore, SCHEMA_VERSION};
pub use features::vector_index::{part_key, version_key, VectorEntry, VectorHit, VectorStore};
pub use shared::models::{
    filter_non_system_tags, merge_tags, EdgeInfo, ErrorKind, Item, ItemContext, ItemRecord,
    MemoryError, PartInfo, Result, Tags, VersionInfo, VersionNav,
};
pub use shared::models::tags::{system, SYSTEM_TAG_PREFIX};
