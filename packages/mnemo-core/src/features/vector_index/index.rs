//! Per-collection dense vector index.
//!
//! Each collection lives under `{store}/chroma/{collection}/` as a
//! memory-mapped slot file (`vectors.bin`) plus an entry table
//! (`entries.json`) mapping keys to live slots with their summary and
//! metadata. Key conventions: plain `{id}` for the current version,
//! `{id}@v{n}` for archived versions, `{id}@p{n}` for parts.
//!
//! Every public write runs under the coherence lock and bumps the epoch
//! sentinel; every read runs the freshness check first and drops the
//! in-memory handles when another process has written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::coherence::Coherence;
use crate::features::vector_index::segment::Segment;
use crate::shared::models::{tags_match, MemoryError, Result, Tags};

pub const VECTOR_DIR: &str = "chroma";
const ENTRIES_FILENAME: &str = "entries.json";
const SEGMENT_FILENAME: &str = "vectors.bin";

/// Key for an archived version entry.
pub fn version_key(id: &str, version: i64) -> String {
    format!("{}@v{}", id, version)
}

/// Key for a part entry.
pub fn part_key(id: &str, part_num: i64) -> String {
    format!("{}@p{}", id, part_num)
}

fn is_suffix_key(key: &str, id: &str, marker: &str) -> bool {
    key.strip_prefix(id)
        .and_then(|rest| rest.strip_prefix(marker))
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// A stored entry without a query score.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub key: String,
    pub summary: String,
    pub tags: Tags,
}

/// A similarity query hit. Distance is cosine distance (lower is closer).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub key: String,
    pub summary: String,
    pub tags: Tags,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    slot: usize,
    summary: String,
    #[serde(default)]
    tags: Tags,
    #[serde(default)]
    deleted: bool,
}

struct CollectionHandle {
    dir: PathBuf,
    entries: Vec<EntryMeta>,
    by_key: HashMap<String, usize>,
    segment: Option<Segment>,
}

impl CollectionHandle {
    fn load(root: &Path, name: &str, dimension: usize, create: bool) -> Result<Self> {
        let dir = root.join(name);
        if !dir.exists() && !create {
            return Ok(Self {
                dir,
                entries: Vec::new(),
                by_key: HashMap::new(),
                segment: None,
            });
        }
        std::fs::create_dir_all(&dir)?;

        let entries_path = dir.join(ENTRIES_FILENAME);
        let entries: Vec<EntryMeta> = if entries_path.exists() {
            let text = std::fs::read_to_string(&entries_path)?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            Vec::new()
        };
        let by_key = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.deleted)
            .map(|(i, e)| (e.key.clone(), i))
            .collect();
        let segment = Some(Segment::open(dir.join(SEGMENT_FILENAME), dimension)?);

        Ok(Self {
            dir,
            entries,
            by_key,
            segment,
        })
    }

    /// Persist the entry table atomically (tmp + rename).
    fn persist(&self) -> Result<()> {
        let live: Vec<&EntryMeta> = self.entries.iter().filter(|e| !e.deleted).collect();
        let text = serde_json::to_string(&live)?;
        let path = self.dir.join(ENTRIES_FILENAME);
        let tmp = self.dir.join(format!("{}.tmp", ENTRIES_FILENAME));
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn segment_mut(&mut self, dimension: usize) -> Result<&mut Segment> {
        if self.segment.is_none() {
            self.segment = Some(Segment::open(self.dir.join(SEGMENT_FILENAME), dimension)?);
        }
        Ok(self.segment.as_mut().expect("segment just initialized"))
    }

    fn upsert(
        &mut self,
        key: &str,
        embedding: &[f32],
        summary: &str,
        tags: &Tags,
        dimension: usize,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let slot = self.segment_mut(dimension)?.append(embedding)?;
        if let Some(&index) = self.by_key.get(key) {
            let entry = &mut self.entries[index];
            entry.slot = slot;
            entry.summary = summary.to_string();
            entry.tags = tags.clone();
            entry.deleted = false;
        } else {
            self.entries.push(EntryMeta {
                key: key.to_string(),
                slot,
                summary: summary.to_string(),
                tags: tags.clone(),
                deleted: false,
            });
            self.by_key.insert(key.to_string(), self.entries.len() - 1);
        }
        Ok(())
    }

    fn delete(&mut self, key: &str) -> bool {
        match self.by_key.remove(key) {
            Some(index) => {
                self.entries[index].deleted = true;
                true
            }
            None => false,
        }
    }

    fn live_entries(&self) -> impl Iterator<Item = &EntryMeta> {
        self.entries.iter().filter(|e| !e.deleted)
    }
}

/// Dense vector store over all collections of one store directory.
pub struct VectorStore {
    root: PathBuf,
    dimension: usize,
    coherence: Arc<Coherence>,
    collections: Mutex<HashMap<String, CollectionHandle>>,
    generation: AtomicU64,
}

impl VectorStore {
    pub fn open(store_dir: &Path, dimension: usize, coherence: Arc<Coherence>) -> Result<Self> {
        let root = store_dir.join(VECTOR_DIR);
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            dimension,
            coherence,
            collections: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Identity of the in-memory client; changes whenever a staleness check
    /// forced a reload.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Drop in-memory handles when another process has published a write.
    pub fn check_freshness(&self) {
        if let Some(observed) = self.coherence.check_stale() {
            debug!("epoch sentinel advanced, reloading vector index");
            self.collections.lock().clear();
            self.generation.fetch_add(1, Ordering::Relaxed);
            self.coherence.mark_fresh(observed);
        }
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::invalid_input(format!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn with_collection<T>(
        &self,
        name: &str,
        create: bool,
        f: impl FnOnce(&mut CollectionHandle) -> Result<T>,
    ) -> Result<T> {
        let mut collections = self.collections.lock();
        if !collections.contains_key(name) {
            let handle = CollectionHandle::load(&self.root, name, self.dimension, create)?;
            collections.insert(name.to_string(), handle);
        }
        f(collections.get_mut(name).expect("collection just inserted"))
    }

    // -------------------------------------------------------------------
    // Writes (public forms acquire the coherence lock and bump the epoch)
    // -------------------------------------------------------------------

    pub fn upsert(
        &self,
        collection: &str,
        key: &str,
        embedding: &[f32],
        summary: &str,
        tags: &Tags,
    ) -> Result<()> {
        let guard = self.coherence.acquire()?;
        self.check_freshness();
        self.upsert_locked(collection, key, embedding, summary, tags)?;
        guard.commit()
    }

    /// Write variant for callers already holding the coherence lock.
    pub(crate) fn upsert_locked(
        &self,
        collection: &str,
        key: &str,
        embedding: &[f32],
        summary: &str,
        tags: &Tags,
    ) -> Result<()> {
        self.check_dimension(embedding)?;
        self.with_collection(collection, true, |handle| {
            handle.upsert(key, embedding, summary, tags, self.dimension)?;
            handle.persist()
        })
    }

    pub fn upsert_batch(
        &self,
        collection: &str,
        rows: &[(String, Vec<f32>, String, Tags)],
    ) -> Result<()> {
        let guard = self.coherence.acquire()?;
        self.check_freshness();
        for (key, embedding, _, _) in rows {
            self.check_dimension(embedding)
                .map_err(|e| MemoryError::invalid_input(format!("{} (key {})", e.message, key)))?;
        }
        self.with_collection(collection, true, |handle| {
            for (key, embedding, summary, tags) in rows {
                handle.upsert(key, embedding, summary, tags, self.dimension)?;
            }
            handle.persist()
        })?;
        guard.commit()
    }

    pub fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let guard = self.coherence.acquire()?;
        self.check_freshness();
        let deleted = self.delete_locked(collection, key)?;
        guard.commit()?;
        Ok(deleted)
    }

    pub(crate) fn delete_locked(&self, collection: &str, key: &str) -> Result<bool> {
        self.with_collection(collection, false, |handle| {
            let deleted = handle.delete(key);
            if deleted {
                handle.persist()?;
            }
            Ok(deleted)
        })
    }

    pub fn delete_entries(&self, collection: &str, keys: &[String]) -> Result<usize> {
        let guard = self.coherence.acquire()?;
        self.check_freshness();
        let removed = self.with_collection(collection, false, |handle| {
            let mut removed = 0;
            for key in keys {
                if handle.delete(key) {
                    removed += 1;
                }
            }
            if removed > 0 {
                handle.persist()?;
            }
            Ok(removed)
        })?;
        guard.commit()?;
        Ok(removed)
    }

    /// Remove the item's entry plus every `{id}@v*` and `{id}@p*` key.
    /// Returns the number of entries removed.
    pub(crate) fn delete_by_base_locked(&self, collection: &str, id: &str) -> Result<usize> {
        self.with_collection(collection, false, |handle| {
            let doomed: Vec<String> = handle
                .live_entries()
                .filter(|e| {
                    e.key == id
                        || is_suffix_key(&e.key, id, "@v")
                        || is_suffix_key(&e.key, id, "@p")
                })
                .map(|e| e.key.clone())
                .collect();
            for key in &doomed {
                handle.delete(key);
            }
            if !doomed.is_empty() {
                handle.persist()?;
            }
            Ok(doomed.len())
        })
    }

    /// Remove all `{id}@p*` part entries. Returns the number removed.
    pub(crate) fn delete_parts_locked(&self, collection: &str, id: &str) -> Result<usize> {
        self.with_collection(collection, false, |handle| {
            let doomed: Vec<String> = handle
                .live_entries()
                .filter(|e| is_suffix_key(&e.key, id, "@p"))
                .map(|e| e.key.clone())
                .collect();
            for key in &doomed {
                handle.delete(key);
            }
            if !doomed.is_empty() {
                handle.persist()?;
            }
            Ok(doomed.len())
        })
    }

    /// Metadata update without re-embedding.
    pub fn update_summary(&self, collection: &str, key: &str, summary: &str) -> Result<bool> {
        let guard = self.coherence.acquire()?;
        self.check_freshness();
        let updated = self.update_summary_locked(collection, key, summary)?;
        guard.commit()?;
        Ok(updated)
    }

    pub(crate) fn update_summary_locked(
        &self,
        collection: &str,
        key: &str,
        summary: &str,
    ) -> Result<bool> {
        self.with_collection(collection, false, |handle| {
            let index = match handle.by_key.get(key) {
                Some(&index) => index,
                None => return Ok(false),
            };
            handle.entries[index].summary = summary.to_string();
            handle.persist()?;
            Ok(true)
        })
    }

    /// Metadata update without re-embedding.
    pub fn update_tags(&self, collection: &str, key: &str, tags: &Tags) -> Result<bool> {
        let guard = self.coherence.acquire()?;
        self.check_freshness();
        let updated = self.update_tags_locked(collection, key, tags)?;
        guard.commit()?;
        Ok(updated)
    }

    pub(crate) fn update_tags_locked(
        &self,
        collection: &str,
        key: &str,
        tags: &Tags,
    ) -> Result<bool> {
        self.with_collection(collection, false, |handle| {
            let index = match handle.by_key.get(key) {
                Some(&index) => index,
                None => return Ok(false),
            };
            handle.entries[index].tags = tags.clone();
            handle.persist()?;
            Ok(true)
        })
    }

    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        let guard = self.coherence.acquire()?;
        self.check_freshness();
        self.collections.lock().remove(name);
        let dir = self.root.join(name);
        let existed = dir.exists();
        if existed {
            std::fs::remove_dir_all(&dir)?;
        }
        guard.commit()?;
        Ok(existed)
    }

    // -------------------------------------------------------------------
    // Reads (freshness-checked)
    // -------------------------------------------------------------------

    pub fn get(&self, collection: &str, key: &str) -> Result<Option<VectorEntry>> {
        self.check_freshness();
        self.with_collection(collection, false, |handle| {
            Ok(handle.by_key.get(key).map(|&index| {
                let entry = &handle.entries[index];
                VectorEntry {
                    key: entry.key.clone(),
                    summary: entry.summary.clone(),
                    tags: entry.tags.clone(),
                }
            }))
        })
    }

    pub fn get_embedding(&self, collection: &str, key: &str) -> Result<Option<Vec<f32>>> {
        self.check_freshness();
        self.with_collection(collection, false, |handle| {
            let slot = match handle.by_key.get(key) {
                Some(&index) => handle.entries[index].slot,
                None => return Ok(None),
            };
            Ok(handle.segment.as_ref().and_then(|s| s.vector(slot)))
        })
    }

    pub fn exists(&self, collection: &str, key: &str) -> Result<bool> {
        Ok(self.get(collection, key)?.is_some())
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        self.check_freshness();
        self.with_collection(collection, false, |handle| Ok(handle.live_entries().count()))
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.check_freshness();
        let mut names = std::collections::BTreeSet::new();
        if self.root.exists() {
            for entry in std::fs::read_dir(&self.root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        names.insert(name.to_string());
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Keys matching `{id}`, `{id}@v*`, `{id}@p*` for one item.
    pub fn keys_with_base(&self, collection: &str, id: &str) -> Result<Vec<String>> {
        self.check_freshness();
        self.with_collection(collection, false, |handle| {
            Ok(handle
                .live_entries()
                .filter(|e| {
                    e.key == id
                        || is_suffix_key(&e.key, id, "@v")
                        || is_suffix_key(&e.key, id, "@p")
                })
                .map(|e| e.key.clone())
                .collect())
        })
    }

    /// Of the given ids, which have no entry in the index (reconciliation).
    pub fn find_missing_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<String>> {
        self.check_freshness();
        self.with_collection(collection, false, |handle| {
            Ok(ids
                .iter()
                .filter(|id| !handle.by_key.contains_key(id.as_str()))
                .cloned()
                .collect())
        })
    }

    /// Nearest entries by cosine distance, optionally filtered by tag
    /// equality (AND over all pairs).
    pub fn query_embedding(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        where_tags: Option<&Tags>,
    ) -> Result<Vec<VectorHit>> {
        self.check_dimension(embedding)?;
        self.check_freshness();
        self.with_collection(collection, false, |handle| {
            let segment = match handle.segment.as_ref() {
                Some(segment) => segment,
                None => return Ok(Vec::new()),
            };
            let mut hits: Vec<VectorHit> = handle
                .live_entries()
                .filter(|entry| match where_tags {
                    Some(filter) => tags_match(&entry.tags, filter),
                    None => true,
                })
                .filter_map(|entry| {
                    let distance = segment.cosine_distance(entry.slot, embedding)?;
                    Some(VectorHit {
                        key: entry.key.clone(),
                        summary: entry.summary.clone(),
                        tags: entry.tags.clone(),
                        distance,
                    })
                })
                .collect();
            hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            hits.truncate(limit);
            Ok(hits)
        })
    }
}
