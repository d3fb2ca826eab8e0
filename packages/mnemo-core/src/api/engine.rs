//! The memory engine.
//!
//! `MemoryEngine` orchestrates the four substores (records, vectors,
//! queue, embedding cache) and the configured providers behind the public
//! operations: put / get / find / tag / delete / analyze / move. Every write
//! group acquires the coherence lock once, commits the record store first,
//! then the vector index, then bumps the epoch sentinel.
//!
//! Local mode computes embeddings and summaries inline; deferred (cloud)
//! mode stores a placeholder and enqueues work for `process_pending`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::{self, StoreConfig};
use crate::features::analyze::build_overview;
use crate::features::coherence::Coherence;
use crate::features::embedding_cache::{CacheStats, CachingEmbeddingProvider, EmbeddingCache};
use crate::features::pending::{NullPendingQueue, PendingQueue, PendingTask, SqlitePendingQueue, TaskType};
use crate::features::providers::{
    AnalysisChunk, AnalyzerProvider, DocumentProvider, EmbeddingProvider, ProviderRegistry,
    SummarizationProvider,
};
use crate::features::record_store::{glob_to_like, store::escape_like, RecordStore};
use crate::features::vector_index::{part_key, version_key, VectorHit, VectorStore};
use crate::shared::models::{
    filter_non_system_tags, merge_tags, tags::system, tags_match, Item, ItemContext, ItemRecord,
    MemoryError, PartInfo, Result, Tags, VersionInfo,
};
use crate::shared::utils::hash::{auto_id, content_hash_full, short_hash};
use crate::shared::utils::time::{days_since, now_iso, resolve_point};

pub const DEFAULT_COLLECTION: &str = "default";
pub const DEFAULT_DECAY_HALF_LIFE_DAYS: f64 = 30.0;

/// Placeholder summary length used in deferred mode until the real
/// summarization task runs.
const PLACEHOLDER_SUMMARY_LEN: usize = 200;

/// Max versions considered by analyze and move.
const VERSION_SCAN_LIMIT: usize = 200;

static COLLECTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"));

/// Whether expensive work runs inline or goes through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Local,
    Deferred,
}

/// Options for `put` / `put_uri`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub id: Option<String>,
    pub summary: Option<String>,
    pub tags: Option<Tags>,
    pub collection: Option<String>,
}

impl PutOptions {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

/// Options for `find`.
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub tags: Option<Tags>,
    pub limit: usize,
    pub since: Option<String>,
    pub until: Option<String>,
    pub collection: Option<String>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            tags: None,
            limit: 10,
            since: None,
            until: None,
            collection: None,
        }
    }
}

/// Builder for `MemoryEngine`.
pub struct MemoryEngineBuilder {
    store_path: PathBuf,
    collection: String,
    decay_half_life_days: f64,
    mode: EngineMode,
    registry: Option<ProviderRegistry>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    summarization: Option<Arc<dyn SummarizationProvider>>,
    document: Option<Arc<dyn DocumentProvider>>,
    analyzer: Option<Arc<dyn AnalyzerProvider>>,
    embedding_cache: bool,
}

impl MemoryEngineBuilder {
    pub fn new(store_path: impl AsRef<Path>) -> Self {
        Self {
            store_path: store_path.as_ref().to_path_buf(),
            collection: DEFAULT_COLLECTION.to_string(),
            decay_half_life_days: DEFAULT_DECAY_HALF_LIFE_DAYS,
            mode: EngineMode::Local,
            registry: None,
            embedding: None,
            summarization: None,
            document: None,
            analyzer: None,
            embedding_cache: true,
        }
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Decay half-life in days; zero or negative disables decay.
    pub fn decay_half_life_days(mut self, days: f64) -> Self {
        self.decay_half_life_days = days;
        self
    }

    pub fn mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding = Some(provider);
        self
    }

    pub fn summarization_provider(mut self, provider: Arc<dyn SummarizationProvider>) -> Self {
        self.summarization = Some(provider);
        self
    }

    pub fn document_provider(mut self, provider: Arc<dyn DocumentProvider>) -> Self {
        self.document = Some(provider);
        self
    }

    pub fn analyzer_provider(mut self, provider: Arc<dyn AnalyzerProvider>) -> Self {
        self.analyzer = Some(provider);
        self
    }

    pub fn embedding_cache(mut self, enabled: bool) -> Self {
        self.embedding_cache = enabled;
        self
    }

    pub fn open(self) -> Result<MemoryEngine> {
        if !COLLECTION_NAME.is_match(&self.collection) {
            return Err(MemoryError::invalid_input(format!(
                "Invalid collection name '{}'. Must be lowercase ASCII, starting with a letter.",
                self.collection
            )));
        }

        let registry = self.registry.unwrap_or_else(ProviderRegistry::with_defaults);
        let config_existed = config::config_path(&self.store_path).exists();
        let mut config = config::load_or_create_config(&self.store_path)?;

        let base_embedding = match self.embedding {
            Some(provider) => {
                if !config_existed {
                    // Stamp the store with the provider it was created under
                    config.embedding = config::ProviderConfig::new(provider.model_name())
                        .with_param("dimension", provider.dimension() as i64);
                    config::save_config(&self.store_path, &config)?;
                }
                provider
            }
            None => registry.create_embedding(&config.embedding)?,
        };
        let dimension = base_embedding.dimension();
        if dimension == 0 {
            return Err(MemoryError::invalid_input(
                "embedding provider reports dimension 0",
            ));
        }
        // The store dimension is fixed at creation; a different provider
        // output is a hard error, not a silent re-index
        if config.embedding_dimension() != dimension {
            return Err(MemoryError::config(format!(
                "embedding dimension {} does not match store dimension {} (store created with '{}')",
                dimension,
                config.embedding_dimension(),
                config.embedding.name
            )));
        }

        let embedding_cache = if self.embedding_cache {
            Some(Arc::new(EmbeddingCache::open(
                self.store_path.join("embedding_cache.db"),
            )?))
        } else {
            None
        };
        let embedding: Arc<dyn EmbeddingProvider> = match &embedding_cache {
            Some(cache) => Arc::new(CachingEmbeddingProvider::new(
                base_embedding,
                Arc::clone(cache),
            )),
            None => base_embedding,
        };

        let summarization = match self.summarization {
            Some(provider) => provider,
            None => registry.create_summarization(&config.summarization)?,
        };
        let document = match self.document {
            Some(provider) => provider,
            None => registry.create_document(&config.document)?,
        };
        let analyzer = match self.analyzer {
            Some(provider) => provider,
            None => registry.create_analyzer("default", Some(Arc::clone(&summarization)))?,
        };

        let coherence = Arc::new(Coherence::new(&self.store_path));
        let records = RecordStore::open(self.store_path.join("documents.db"))?;
        let vectors = VectorStore::open(&self.store_path, dimension, Arc::clone(&coherence))?;
        let queue: Box<dyn PendingQueue> = match self.mode {
            EngineMode::Local => Box::new(NullPendingQueue),
            EngineMode::Deferred => Box::new(SqlitePendingQueue::new(&records)),
        };

        Ok(MemoryEngine {
            store_path: self.store_path,
            default_collection: self.collection,
            decay_half_life_days: self.decay_half_life_days,
            mode: self.mode,
            config,
            coherence,
            records,
            vectors,
            queue,
            embedding,
            embedding_cache,
            summarization,
            document,
            analyzer,
        })
    }
}

/// Persistent associative memory with semantic search.
pub struct MemoryEngine {
    store_path: PathBuf,
    default_collection: String,
    decay_half_life_days: f64,
    mode: EngineMode,
    config: StoreConfig,
    coherence: Arc<Coherence>,
    records: RecordStore,
    vectors: VectorStore,
    queue: Box<dyn PendingQueue>,
    embedding: Arc<dyn EmbeddingProvider>,
    embedding_cache: Option<Arc<EmbeddingCache>>,
    summarization: Arc<dyn SummarizationProvider>,
    document: Arc<dyn DocumentProvider>,
    analyzer: Arc<dyn AnalyzerProvider>,
}

impl MemoryEngine {
    /// Open a store with default providers in local mode.
    pub fn open(store_path: impl AsRef<Path>) -> Result<Self> {
        MemoryEngineBuilder::new(store_path).open()
    }

    pub fn builder(store_path: impl AsRef<Path>) -> MemoryEngineBuilder {
        MemoryEngineBuilder::new(store_path)
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.queue.count()
    }

    fn resolve_collection(&self, collection: Option<&str>) -> Result<String> {
        match collection {
            None => Ok(self.default_collection.clone()),
            Some(name) => {
                if COLLECTION_NAME.is_match(name) {
                    Ok(name.to_string())
                } else {
                    Err(MemoryError::invalid_input(format!(
                        "Invalid collection name: {}",
                        name
                    )))
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Write operations
    // -------------------------------------------------------------------

    /// Store inline content. Returns the item with `changed=false` when the
    /// collection already holds this exact content.
    pub fn put(&self, content: &str, opts: PutOptions) -> Result<Item> {
        let mut tags = opts
            .tags
            .as_ref()
            .map(filter_non_system_tags)
            .unwrap_or_default();
        tags.insert(system::SOURCE.to_string(), "inline".to_string());
        self.put_with_tags(content, opts, tags)
    }

    /// Fetch a URI through the document provider and store the result. The
    /// URI becomes the id unless one is supplied.
    pub fn put_uri(&self, uri: &str, opts: PutOptions) -> Result<Item> {
        let doc = self.document.fetch(uri)?;
        let mut tags = opts
            .tags
            .as_ref()
            .map(filter_non_system_tags)
            .unwrap_or_default();
        if let Some(doc_tags) = &doc.tags {
            for (key, value) in filter_non_system_tags(doc_tags) {
                tags.entry(key).or_insert(value);
            }
        }
        tags.insert(system::SOURCE.to_string(), "uri".to_string());
        if let Some(content_type) = &doc.content_type {
            tags.insert(system::MIME_TYPE.to_string(), content_type.clone());
        }

        let mut opts = opts;
        if opts.id.is_none() {
            opts.id = Some(uri.to_string());
        }
        self.put_with_tags(&doc.content, opts, tags)
    }

    /// Shortcut for updating the working context item.
    pub fn set_now(&self, content: &str, tags: Option<Tags>) -> Result<Item> {
        self.put(
            content,
            PutOptions {
                id: Some("now".to_string()),
                tags,
                ..PutOptions::default()
            },
        )
    }

    fn put_with_tags(&self, content: &str, opts: PutOptions, tags: Tags) -> Result<Item> {
        let collection = self.resolve_collection(opts.collection.as_deref())?;
        let hash_full = content_hash_full(content);
        let hash = short_hash(&hash_full);
        let id = opts.id.clone().unwrap_or_else(|| auto_id(&hash_full));

        // Content-hash dedup: identical content in the collection is a no-op
        if let Some(existing) =
            self.records
                .find_by_content_hash(&collection, &hash, Some(&hash_full), None)?
        {
            debug!(id = %existing.id, "put matched existing content hash");
            self.records.touch(&collection, &existing.id);
            let mut item = existing.to_item();
            item.changed = Some(false);
            return Ok(item);
        }

        let summary = match &opts.summary {
            Some(summary) => summary.clone(),
            None => match self.mode {
                EngineMode::Local => {
                    self.summarization
                        .summarize(content, PLACEHOLDER_SUMMARY_LEN, None)?
                }
                EngineMode::Deferred => {
                    crate::features::providers::summarize::truncate_at_word(
                        content.trim(),
                        PLACEHOLDER_SUMMARY_LEN,
                    )
                }
            },
        };

        // Provider calls stay outside the lock; the embedding is ready
        // before the write group begins.
        let embedding = match self.mode {
            EngineMode::Local => Some(self.embedding.embed(content)?),
            EngineMode::Deferred => None,
        };

        let guard = self.coherence.acquire()?;
        self.vectors.check_freshness();

        let prior = self.records.get(&collection, &id)?;
        let (record, content_changed) = self.records.upsert(
            &collection,
            &id,
            &summary,
            &tags,
            Some(&hash),
            Some(&hash_full),
        )?;

        if content_changed {
            if let Some(prior) = &prior {
                let version = self.records.archive_current(prior)?;
                self.archive_vector_entry(&collection, &id, version);
            }
        }

        match self.mode {
            EngineMode::Local => {
                if let Some(embedding) = &embedding {
                    if let Err(err) = self.vectors.upsert_locked(
                        &collection,
                        &id,
                        embedding,
                        &record.summary,
                        &record.tags_with_system(),
                    ) {
                        // Record store is authoritative; reconcile re-embeds later
                        warn!(id = %id, error = %err, "vector write failed after record commit");
                    }
                }
            }
            EngineMode::Deferred => {
                self.queue.enqueue(
                    PendingTask::new(id.clone(), collection.clone(), TaskType::Embed, content)
                        .with_flag("content_changed", content_changed),
                )?;
                if opts.summary.is_none() {
                    self.queue.enqueue(PendingTask::new(
                        id.clone(),
                        collection.clone(),
                        TaskType::Summarize,
                        content,
                    ))?;
                }
            }
        }

        guard.commit()?;
        info!(id = %id, collection = %collection, changed = content_changed, "put");

        let mut item = record.to_item();
        item.changed = Some(true);
        Ok(item)
    }

    /// Copy the current vector entry to its versioned key before the new
    /// embedding overwrites it. Best effort: the versions table already has
    /// the canonical snapshot.
    fn archive_vector_entry(&self, collection: &str, id: &str, version: i64) {
        let archived: Result<()> = (|| {
            let entry = match self.vectors.get(collection, id)? {
                Some(entry) => entry,
                None => return Ok(()),
            };
            let embedding = match self.vectors.get_embedding(collection, id)? {
                Some(embedding) => embedding,
                None => return Ok(()),
            };
            self.vectors.upsert_locked(
                collection,
                &version_key(id, version),
                &embedding,
                &entry.summary,
                &entry.tags,
            )
        })();
        if let Err(err) = archived {
            warn!(id, version, error = %err, "failed to archive vector entry");
        }
    }

    /// Merge-update tags. Empty string values delete keys; system keys in
    /// the input are ignored. Returns None for an unknown id.
    pub fn tag(&self, id: &str, updates: &Tags, collection: Option<&str>) -> Result<Option<Item>> {
        let collection = self.resolve_collection(collection)?;
        let record = match self.records.get(&collection, id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        let merged = merge_tags(&record.tags, updates);

        let guard = self.coherence.acquire()?;
        self.vectors.check_freshness();
        self.records.update_tags(&collection, id, &merged)?;

        let refreshed = self.records.get(&collection, id)?;
        if let Some(refreshed) = &refreshed {
            if let Err(err) =
                self.vectors
                    .update_tags_locked(&collection, id, &refreshed.tags_with_system())
            {
                warn!(id, error = %err, "vector tag update failed");
            }
        }
        guard.commit()?;

        Ok(refreshed.map(|record| record.to_item()))
    }

    /// Delete an item and everything attached to it: versions, parts, edges
    /// in both directions, queued work, and vector entries under `{id}`,
    /// `{id}@v*`, `{id}@p*`.
    pub fn delete(&self, id: &str, collection: Option<&str>) -> Result<bool> {
        let collection = self.resolve_collection(collection)?;

        let guard = self.coherence.acquire()?;
        self.vectors.check_freshness();

        let existed = self.records.delete(&collection, id, true)?;
        self.records.delete_parts(&collection, id)?;
        self.records.delete_edges_for_source(&collection, id)?;
        self.records.delete_edges_for_target(&collection, id)?;
        self.queue.discard_for(id, &collection)?;
        if let Err(err) = self.vectors.delete_by_base_locked(&collection, id) {
            warn!(id, error = %err, "vector cascade delete failed");
        }

        guard.commit()?;
        if existed {
            info!(id, collection = %collection, "deleted");
        }
        Ok(existed)
    }

    // -------------------------------------------------------------------
    // Read operations
    // -------------------------------------------------------------------

    pub fn get(&self, id: &str, collection: Option<&str>) -> Result<Option<Item>> {
        let collection = self.resolve_collection(collection)?;
        self.vectors.check_freshness();
        let record = self.records.get(&collection, id)?;
        if record.is_some() {
            self.records.touch(&collection, id);
        }
        Ok(record.map(|record| record.to_item()))
    }

    pub fn exists(&self, id: &str, collection: Option<&str>) -> Result<bool> {
        let collection = self.resolve_collection(collection)?;
        self.vectors.check_freshness();
        self.records.exists(&collection, id)
    }

    /// Item plus its surroundings: similar items, parts, version navigation,
    /// and edges in both directions.
    pub fn get_context(&self, id: &str, collection: Option<&str>) -> Result<Option<ItemContext>> {
        let coll = self.resolve_collection(collection)?;
        self.vectors.check_freshness();
        let record = match self.records.get(&coll, id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        self.records.touch(&coll, id);

        let similar = match self.embedding.embed(&record.summary) {
            Ok(embedding) => {
                let hits = self.vectors.query_embedding(&coll, &embedding, 8, None)?;
                self.hydrate_hits(&coll, hits, 5, Some(id))?
            }
            Err(err) => {
                warn!(id, error = %err, "similarity lookup failed for context");
                Vec::new()
            }
        };

        let parts = self.records.list_parts(&coll, id)?;
        let versions = self.records.get_version_nav(&coll, id, None, 3)?;
        let edges_out = self.records.get_forward_edges(&coll, id)?;
        let edges_in = self.records.get_inverse_edges(&coll, id)?;

        Ok(Some(ItemContext {
            item: record.to_item(),
            similar,
            parts,
            versions,
            edges_out,
            edges_in,
        }))
    }

    /// Semantic search with recency decay.
    pub fn find(&self, query: &str, opts: FindOptions) -> Result<Vec<Item>> {
        let collection = self.resolve_collection(opts.collection.as_deref())?;
        let embedding = self.embedding.embed(query)?;

        let fetch_limit = if self.decay_half_life_days > 0.0 {
            opts.limit * 2
        } else {
            opts.limit
        };
        let hits = self.vectors.query_embedding(
            &collection,
            &embedding,
            // Parts collapse onto their base item, so overfetch a bit
            fetch_limit * 2,
            opts.tags.as_ref(),
        )?;

        let since = opts
            .since
            .as_deref()
            .map(|value| resolve_point(value, Utc::now()))
            .transpose()?;
        let until = opts
            .until
            .as_deref()
            .map(|value| resolve_point(value, Utc::now()))
            .transpose()?;

        let mut items = self.hydrate_hits(&collection, hits, fetch_limit, None)?;
        if since.is_some() || until.is_some() {
            items.retain(|item| {
                let updated = item
                    .updated()
                    .and_then(crate::shared::utils::time::parse_instant);
                match updated {
                    Some(updated) => {
                        since.map_or(true, |s| updated >= s) && until.map_or(true, |u| updated < u)
                    }
                    None => false,
                }
            });
        }

        self.apply_decay(&mut items);
        items.truncate(opts.limit);

        let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        self.records.touch_many(&collection, &ids);
        Ok(items)
    }

    /// Items similar to an existing item, by its summary embedding.
    pub fn find_similar(
        &self,
        id: &str,
        limit: usize,
        include_self: bool,
        collection: Option<&str>,
    ) -> Result<Vec<Item>> {
        let coll = self.resolve_collection(collection)?;
        self.vectors.check_freshness();
        let record = self
            .records
            .get(&coll, id)?
            .ok_or_else(|| MemoryError::invalid_input(format!("Item not found: {}", id)))?;

        let embedding = self.embedding.embed(&record.summary)?;
        let hits = self
            .vectors
            .query_embedding(&coll, &embedding, (limit + 1) * 2, None)?;
        let exclude = if include_self { None } else { Some(id) };
        let mut items = self.hydrate_hits(&coll, hits, limit + 1, exclude)?;
        self.apply_decay(&mut items);
        items.truncate(limit);
        Ok(items)
    }

    /// AND-equality tag query, no embedding involved.
    pub fn query_tag(
        &self,
        tags: &Tags,
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<Item>> {
        let collection = self.resolve_collection(collection)?;
        let records = self.records.query_by_tags(&collection, tags, limit)?;
        Ok(records.into_iter().map(|record| record.to_item()).collect())
    }

    /// Keyword search over summaries and part content.
    pub fn query_fulltext(
        &self,
        query: &str,
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<Item>> {
        let collection = self.resolve_collection(collection)?;
        let hits = self.records.query_fts(&collection, query, limit, None)?;

        let mut items = Vec::with_capacity(hits.len());
        for (key, summary, score) in hits {
            let tags = if let Some((id, part_num)) = split_part_key(&key) {
                self.records
                    .get_part(&collection, id, part_num)?
                    .map(|part| part.tags)
                    .unwrap_or_default()
            } else {
                self.records
                    .get(&collection, &key)?
                    .map(|record| record.tags_with_system())
                    .unwrap_or_default()
            };
            items.push(Item {
                id: key,
                summary,
                tags,
                score: Some(score as f32),
                changed: None,
            });
        }
        Ok(items)
    }

    /// Listing with optional id prefix/glob, tag filters, and date window.
    pub fn list_items(
        &self,
        prefix: Option<&str>,
        tags: Option<&Tags>,
        since: Option<&str>,
        until: Option<&str>,
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<Item>> {
        let collection = self.resolve_collection(collection)?;
        let pattern = prefix.map(|prefix| {
            if prefix.contains('*') || prefix.contains('?') {
                glob_to_like(prefix)
            } else {
                format!("{}%", escape_like(prefix))
            }
        });
        let since = since
            .map(|value| resolve_point(value, Utc::now()))
            .transpose()?
            .map(|point| point.to_rfc3339());
        let until = until
            .map(|value| resolve_point(value, Utc::now()))
            .transpose()?
            .map(|point| point.to_rfc3339());

        let records = self.records.query_items(
            &collection,
            pattern.as_deref(),
            tags,
            since.as_deref(),
            until.as_deref(),
            limit,
        )?;
        Ok(records.into_iter().map(|record| record.to_item()).collect())
    }

    pub fn count(&self, collection: Option<&str>) -> Result<usize> {
        let collection = self.resolve_collection(collection)?;
        self.records.count(&collection)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.records.list_collections()
    }

    pub fn embedding_cache_stats(&self) -> Result<Option<CacheStats>> {
        match &self.embedding_cache {
            Some(cache) => Ok(Some(cache.stats()?)),
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------
    // Analyze
    // -------------------------------------------------------------------

    /// Decompose an item into parts. Existing parts are returned untouched
    /// unless `force` is set. Items with version history get a `@p0`
    /// overview part ahead of the content parts.
    pub fn analyze(&self, id: &str, force: bool, collection: Option<&str>) -> Result<Vec<PartInfo>> {
        let coll = self.resolve_collection(collection)?;
        let record = self
            .records
            .get(&coll, id)?
            .ok_or_else(|| MemoryError::invalid_input(format!("Item not found: {}", id)))?;

        let existing = self.records.list_parts(&coll, id)?;
        if !existing.is_empty() && !force {
            return Ok(existing);
        }

        let versions = self.records.list_versions(&coll, id, VERSION_SCAN_LIMIT)?;
        let chunks = gather_analyze_chunks(&record, &versions);
        let drafts = self.analyzer.analyze(&chunks, "")?;

        let parent_tags = filter_non_system_tags(&record.tags);
        let now = now_iso();
        let mut parts: Vec<PartInfo> = Vec::new();

        if !versions.is_empty() {
            let (content, summary) =
                build_overview(&versions, &record.summary, Some(&self.summarization));
            let mut tags = parent_tags.clone();
            tags.insert(system::PART_TYPE.to_string(), "overview".to_string());
            parts.push(PartInfo {
                part_num: 0,
                summary,
                content,
                tags,
                created_at: now.clone(),
            });
        }

        for (index, draft) in drafts.iter().enumerate() {
            let mut tags = parent_tags.clone();
            if let Some(draft_tags) = &draft.tags {
                for (key, value) in filter_non_system_tags(draft_tags) {
                    tags.insert(key, value);
                }
            }
            parts.push(PartInfo {
                part_num: (index + 1) as i64,
                summary: draft.summary.clone(),
                content: draft.content.clone(),
                tags,
                created_at: now.clone(),
            });
        }

        if parts.is_empty() {
            return Ok(parts);
        }

        // Embed outside the lock, write inside it
        let mut embedded = Vec::with_capacity(parts.len());
        for part in &parts {
            let text = if part.content.is_empty() {
                &part.summary
            } else {
                &part.content
            };
            embedded.push(self.embedding.embed(text)?);
        }

        let guard = self.coherence.acquire()?;
        self.vectors.check_freshness();
        self.records.upsert_parts(&coll, id, &parts)?;
        if let Err(err) = self.vectors.delete_parts_locked(&coll, id) {
            warn!(id, error = %err, "failed to clear prior part vectors");
        }
        for (part, embedding) in parts.iter().zip(&embedded) {
            let mut tags = part.tags.clone();
            tags.insert(system::BASE_ID.to_string(), id.to_string());
            tags.insert(system::PART_NUM.to_string(), part.part_num.to_string());
            tags.insert(system::UPDATED.to_string(), record.updated_at.clone());
            if let Err(err) = self.vectors.upsert_locked(
                &coll,
                &part_key(id, part.part_num),
                embedding,
                &part.summary,
                &tags,
            ) {
                warn!(id, part = part.part_num, error = %err, "part vector write failed");
            }
        }
        guard.commit()?;

        info!(id, parts = parts.len(), "analyzed");
        Ok(parts)
    }

    // -------------------------------------------------------------------
    // Move
    // -------------------------------------------------------------------

    /// Extract versions (and the current state) from a source item into a
    /// named target item. Versions whose content hash already exists on the
    /// target are skipped; moved versions leave the source.
    pub fn move_versions(
        &self,
        name: &str,
        source_id: &str,
        tags: Option<&Tags>,
        only_current: bool,
        collection: Option<&str>,
    ) -> Result<Item> {
        let coll = self.resolve_collection(collection)?;
        if name == source_id {
            return Err(MemoryError::invalid_input(
                "move target must differ from source",
            ));
        }
        let source = self
            .records
            .get(&coll, source_id)?
            .ok_or_else(|| MemoryError::invalid_input(format!("Item not found: {}", source_id)))?;

        let history = self.records.list_versions(&coll, source_id, VERSION_SCAN_LIMIT)?;

        // Candidates in chronological order; the current state is last
        let mut candidates: Vec<(Option<i64>, VersionInfo)> = Vec::new();
        if !only_current {
            for version in history.iter().rev() {
                if tags.map_or(true, |filter| tags_match(&version.tags, filter)) {
                    candidates.push((Some(version.version), version.clone()));
                }
            }
        }
        let current_matches = tags.map_or(true, |filter| tags_match(&source.tags, filter));
        if current_matches {
            candidates.push((
                None,
                VersionInfo {
                    version: 0,
                    summary: source.summary.clone(),
                    tags: source.tags.clone(),
                    content_hash: source.content_hash.clone(),
                    created_at: source.updated_at.clone(),
                },
            ));
        }
        if candidates.is_empty() {
            return Err(MemoryError::invalid_input("No versions match the filter"));
        }

        // Hashes already present on the target (current + history)
        let mut seen_hashes: HashSet<String> = HashSet::new();
        if let Some(target) = self.records.get(&coll, name)? {
            seen_hashes.extend(target.content_hash.clone());
            for version in self.records.list_versions(&coll, name, VERSION_SCAN_LIMIT)? {
                seen_hashes.extend(version.content_hash.clone());
            }
        }

        let guard = self.coherence.acquire()?;
        self.vectors.check_freshness();

        let mut moved_versions: Vec<i64> = Vec::new();
        let mut current_moved = false;
        for (source_version, candidate) in &candidates {
            let duplicate = candidate
                .content_hash
                .as_ref()
                .is_some_and(|hash| seen_hashes.contains(hash));

            if !duplicate {
                let target = self.records.get(&coll, name)?;
                if let Some(target) = &target {
                    self.records.archive_current(target)?;
                }
                self.records.upsert(
                    &coll,
                    name,
                    &candidate.summary,
                    &candidate.tags,
                    candidate.content_hash.as_deref(),
                    None,
                )?;
                if let Some(hash) = &candidate.content_hash {
                    seen_hashes.insert(hash.clone());
                }
            }

            match source_version {
                Some(version) => moved_versions.push(*version),
                None => current_moved = true,
            }
        }

        // Remove moved history from the source
        for version in &moved_versions {
            self.records.delete_version(&coll, source_id, *version)?;
            let _ = self
                .vectors
                .delete_locked(&coll, &version_key(source_id, *version));
        }
        if current_moved {
            match self.records.restore_latest_version(&coll, source_id)? {
                Some(_) => {}
                None => {
                    // Nothing left; the source item dissolves into the target
                    self.records.delete(&coll, source_id, true)?;
                    self.records.delete_parts(&coll, source_id)?;
                    if let Err(err) = self.vectors.delete_by_base_locked(&coll, source_id) {
                        warn!(source_id, error = %err, "vector cleanup failed during move");
                    }
                }
            }
        }

        // Re-embed the target's new current state (or defer it)
        let target = self.records.get(&coll, name)?.ok_or_else(|| {
            MemoryError::storage("move completed but target record is missing")
        })?;
        match self.mode {
            EngineMode::Local => match self.embedding.embed(&target.summary) {
                Ok(embedding) => {
                    if let Err(err) = self.vectors.upsert_locked(
                        &coll,
                        name,
                        &embedding,
                        &target.summary,
                        &target.tags_with_system(),
                    ) {
                        warn!(target_id = name, error = %err, "target vector write failed");
                    }
                }
                Err(err) => warn!(target_id = name, error = %err, "target embedding failed"),
            },
            EngineMode::Deferred => {
                self.queue.enqueue(PendingTask::new(
                    name.to_string(),
                    coll.clone(),
                    TaskType::Embed,
                    target.summary.clone(),
                ))?;
            }
        }

        guard.commit()?;
        info!(source = source_id, dest = name, moved = candidates.len(), "moved versions");

        let mut item = target.to_item();
        item.changed = Some(true);
        Ok(item)
    }

    // -------------------------------------------------------------------
    // Deferred work
    // -------------------------------------------------------------------

    /// Worker loop: drain up to `limit` queued tasks. A task whose item was
    /// deleted completes as a no-op; a provider failure leaves the task in
    /// the queue for the next run.
    pub fn process_pending(&self, limit: usize) -> Result<usize> {
        let tasks = self.queue.dequeue(limit)?;
        let mut processed = 0usize;

        for task in tasks {
            let outcome = match task.task_type {
                TaskType::Embed => self.process_embed_task(&task),
                TaskType::Summarize => self.process_summarize_task(&task),
                TaskType::Analyze => self.analyze(&task.id, true, Some(&task.collection)).map(|_| ()),
            };
            match outcome {
                Ok(()) => {
                    self.queue.complete(&task.id, &task.collection, task.task_type)?;
                    processed += 1;
                    info!(id = %task.id, task = %task.task_type, "processed pending task");
                }
                Err(err) => {
                    // Stays queued; retried on the next process_pending run
                    warn!(id = %task.id, task = %task.task_type, error = %err, "pending task failed");
                }
            }
        }
        Ok(processed)
    }

    fn process_embed_task(&self, task: &PendingTask) -> Result<()> {
        let record = match self.records.get(&task.collection, &task.id)? {
            Some(record) => record,
            None => {
                debug!(id = %task.id, "embed task for deleted item, skipping");
                return Ok(());
            }
        };

        let embedding = self.embedding.embed(&task.content)?;

        let guard = self.coherence.acquire()?;
        self.vectors.check_freshness();
        if task.flag("content_changed") {
            let version = self.records.max_version(&task.collection, &task.id)?;
            if version > 0 {
                self.archive_vector_entry(&task.collection, &task.id, version);
            }
        }
        self.vectors.upsert_locked(
            &task.collection,
            &task.id,
            &embedding,
            &record.summary,
            &record.tags_with_system(),
        )?;
        guard.commit()?;
        Ok(())
    }

    fn process_summarize_task(&self, task: &PendingTask) -> Result<()> {
        if self.records.get(&task.collection, &task.id)?.is_none() {
            debug!(id = %task.id, "summarize task for deleted item, skipping");
            return Ok(());
        }

        let summary = self
            .summarization
            .summarize(&task.content, PLACEHOLDER_SUMMARY_LEN, None)?;

        let guard = self.coherence.acquire()?;
        self.vectors.check_freshness();
        self.records.update_summary(&task.collection, &task.id, &summary)?;
        if let Err(err) = self
            .vectors
            .update_summary_locked(&task.collection, &task.id, &summary)
        {
            warn!(id = %task.id, error = %err, "vector summary update failed");
        }
        guard.commit()?;
        Ok(())
    }

    /// Re-embed record-store items missing from the vector index. Local
    /// mode embeds inline; deferred mode enqueues embed tasks. Returns the
    /// number of items repaired or enqueued.
    pub fn reconcile(&self) -> Result<usize> {
        let mut repaired = 0usize;
        for collection in self.records.list_collections()? {
            let ids = self.records.list_ids(&collection, None)?;
            let missing = self.vectors.find_missing_ids(&collection, &ids)?;
            for id in missing {
                let record = match self.records.get(&collection, &id)? {
                    Some(record) => record,
                    None => continue,
                };
                match self.mode {
                    EngineMode::Local => {
                        let embedding = self.embedding.embed(&record.summary)?;
                        self.vectors.upsert(
                            &collection,
                            &id,
                            &embedding,
                            &record.summary,
                            &record.tags_with_system(),
                        )?;
                    }
                    EngineMode::Deferred => {
                        self.queue.enqueue(PendingTask::new(
                            id.clone(),
                            collection.clone(),
                            TaskType::Embed,
                            record.summary.clone(),
                        ))?;
                    }
                }
                repaired += 1;
            }
        }
        if repaired > 0 {
            info!(repaired, "reconciled vector index with record store");
        }
        Ok(repaired)
    }

    // -------------------------------------------------------------------
    // Ranking
    // -------------------------------------------------------------------

    /// Map raw vector hits to items: archived versions are skipped, part
    /// hits collapse onto their base item keeping the best distance.
    fn hydrate_hits(
        &self,
        collection: &str,
        hits: Vec<VectorHit>,
        limit: usize,
        exclude_id: Option<&str>,
    ) -> Result<Vec<Item>> {
        let mut best: HashMap<String, f32> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for hit in hits {
            if is_version_key(&hit.key) {
                continue;
            }
            let base = match split_part_key(&hit.key) {
                Some((id, _)) => hit
                    .tags
                    .get(system::BASE_ID)
                    .cloned()
                    .unwrap_or_else(|| id.to_string()),
                None => hit.key.clone(),
            };
            if exclude_id == Some(base.as_str()) {
                continue;
            }
            match best.get(&base) {
                Some(&existing) if existing <= hit.distance => {}
                _ => {
                    if !best.contains_key(&base) {
                        order.push(base.clone());
                    }
                    best.insert(base, hit.distance);
                }
            }
        }
        order.truncate(limit * 2);

        let id_refs: Vec<&str> = order.iter().map(String::as_str).collect();
        let records = self.records.get_many(collection, &id_refs)?;
        let by_id: HashMap<&str, &ItemRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut items = Vec::new();
        for base in &order {
            if let Some(record) = by_id.get(base.as_str()) {
                let mut item = record.to_item();
                item.score = best.get(base).map(|distance| 1.0 - distance);
                items.push(item);
                if items.len() >= limit {
                    break;
                }
            }
        }
        Ok(items)
    }

    fn apply_decay(&self, items: &mut Vec<Item>) {
        decay_items(items, self.decay_half_life_days, Utc::now());
    }
}

/// ACT-R recency decay: `score × 0.5^(days/half_life)`, re-sorted
/// descending. A non-positive half-life disables the down-weighting; items
/// with an unparseable `_updated` keep their raw score.
pub(crate) fn decay_items(items: &mut Vec<Item>, half_life_days: f64, now: chrono::DateTime<Utc>) {
    if half_life_days > 0.0 {
        for item in items.iter_mut() {
            let (Some(score), Some(updated)) = (item.score, item.updated()) else {
                continue;
            };
            if let Some(days) = days_since(updated, now) {
                let factor = 0.5f64.powf(days / half_life_days);
                item.score = Some((score as f64 * factor) as f32);
            }
        }
    }
    items.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .total_cmp(&a.score.unwrap_or(0.0))
    });
}

/// Chunks fed to the analyzer: dated version summaries oldest-first, then
/// the current state.
fn gather_analyze_chunks(record: &ItemRecord, versions: &[VersionInfo]) -> Vec<AnalysisChunk> {
    let mut chunks = Vec::with_capacity(versions.len() + 1);
    for (index, version) in versions.iter().rev().enumerate() {
        let date: String = version.created_at.chars().take(10).collect();
        chunks.push(AnalysisChunk {
            content: format!("[{}]\n{}", date, version.summary),
            tags: version.tags.clone(),
            index,
        });
    }
    chunks.push(AnalysisChunk {
        content: format!("[current]\n{}", record.summary),
        tags: record.tags.clone(),
        index: chunks.len(),
    });
    chunks
}

fn is_version_key(key: &str) -> bool {
    key.rfind("@v")
        .map(|pos| {
            let digits = &key[pos + 2..];
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        })
        .unwrap_or(false)
}

fn split_part_key(key: &str) -> Option<(&str, i64)> {
    let pos = key.rfind("@p")?;
    let num: i64 = key[pos + 2..].parse().ok()?;
    Some((&key[..pos], num))
}
