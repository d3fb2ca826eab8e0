//! Domain records: items, versions, parts, edges.
//!
//! `ItemRecord` is the canonical row shape held by the record store (the
//! source of truth). `Item` is the API-facing view returned by the engine,
//! carrying system timestamps inside the tag map plus an optional similarity
//! score for search results.

use serde::{Deserialize, Serialize};

use super::tags::{system, Tags};

/// Canonical record store row for one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    pub id: String,
    pub collection: String,
    pub summary: String,
    pub tags: Tags,
    pub created_at: String,
    pub updated_at: String,
    pub accessed_at: String,
    pub content_hash: Option<String>,
    pub content_hash_full: Option<String>,
}

impl ItemRecord {
    /// Tags with the timestamp columns injected as system tags.
    pub fn tags_with_system(&self) -> Tags {
        let mut tags = self.tags.clone();
        tags.insert(system::CREATED.to_string(), self.created_at.clone());
        tags.insert(system::UPDATED.to_string(), self.updated_at.clone());
        tags.insert(
            system::UPDATED_DATE.to_string(),
            date_prefix(&self.updated_at),
        );
        tags.insert(system::ACCESSED.to_string(), self.accessed_at.clone());
        tags
    }

    pub fn to_item(&self) -> Item {
        Item {
            id: self.id.clone(),
            summary: self.summary.clone(),
            tags: self.tags_with_system(),
            score: None,
            changed: None,
        }
    }
}

/// First 10 chars of an ISO-8601 timestamp (the date).
fn date_prefix(iso: &str) -> String {
    iso.chars().take(10).collect()
}

/// API-facing item view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub tags: Tags,
    /// Similarity score for search results (higher is better).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Whether a `put` changed stored content (None outside of writes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

impl Item {
    pub fn created(&self) -> Option<&str> {
        self.tags.get(system::CREATED).map(String::as_str)
    }

    pub fn updated(&self) -> Option<&str> {
        self.tags.get(system::UPDATED).map(String::as_str)
    }
}

/// Immutable snapshot of a prior item state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionInfo {
    pub version: i64,
    pub summary: String,
    pub tags: Tags,
    pub content_hash: Option<String>,
    pub created_at: String,
}

/// One sub-section of an item's decomposition. `part_num == 0` is the
/// version-history overview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartInfo {
    pub part_num: i64,
    pub summary: String,
    pub content: String,
    pub tags: Tags,
    pub created_at: String,
}

/// A labeled directed relation between two items in a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeInfo {
    /// Predicate for forward edges, inverse name for inbound edges.
    pub label: String,
    /// Target id for forward edges, source id for inbound edges.
    pub other_id: String,
    pub created: String,
}

/// Version navigation around the current state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VersionNav {
    /// Versions before the current one, newest first.
    pub prev: Vec<VersionInfo>,
    /// Versions after the reference version (only when navigating history).
    pub next: Vec<VersionInfo>,
}

/// Full item context: the item plus everything attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemContext {
    pub item: Item,
    pub similar: Vec<Item>,
    pub parts: Vec<PartInfo>,
    pub versions: VersionNav,
    pub edges_out: Vec<EdgeInfo>,
    pub edges_in: Vec<EdgeInfo>,
}
