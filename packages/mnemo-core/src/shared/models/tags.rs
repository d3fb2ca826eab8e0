//! Tag map helpers and system-tag conventions.
//!
//! Tags are an ordered string→string map. Keys starting with `_` are system
//! tags, written only by the engine; caller-supplied tags are filtered so a
//! caller can never overwrite them.

use std::collections::BTreeMap;

/// Ordered tag map. BTreeMap keeps serialization deterministic.
pub type Tags = BTreeMap<String, String>;

/// Prefix that marks a tag key as engine-owned.
pub const SYSTEM_TAG_PREFIX: char = '_';

/// Reserved system tag keys.
pub mod system {
    pub const CREATED: &str = "_created";
    pub const UPDATED: &str = "_updated";
    pub const UPDATED_DATE: &str = "_updated_date";
    pub const ACCESSED: &str = "_accessed";
    pub const SOURCE: &str = "_source";
    pub const MIME_TYPE: &str = "_mime_type";
    pub const PART_TYPE: &str = "_part_type";
    pub const BASE_ID: &str = "_base_id";
    pub const PART_NUM: &str = "_part_num";
}

/// Whether a key is engine-owned.
pub fn is_system_tag(key: &str) -> bool {
    key.starts_with(SYSTEM_TAG_PREFIX)
}

/// Drop every system-prefixed key from a caller-supplied tag map.
pub fn filter_non_system_tags(tags: &Tags) -> Tags {
    tags.iter()
        .filter(|(k, _)| !is_system_tag(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Merge tag updates into an existing map.
///
/// System keys in `updates` are ignored. An empty-string value deletes the
/// key. Returns the merged map.
pub fn merge_tags(existing: &Tags, updates: &Tags) -> Tags {
    let mut merged = existing.clone();
    for (key, value) in updates {
        if is_system_tag(key) {
            continue;
        }
        if value.is_empty() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// True when every `filter` pair is present in `tags` with an equal value.
pub fn tags_match(tags: &Tags, filter: &Tags) -> bool {
    filter.iter().all(|(k, v)| tags.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_filter_removes_system_tags() {
        let input = tags(&[
            ("project", "myapp"),
            ("category", "docs"),
            ("_created", "2026-01-30T10:00:00Z"),
            ("_sneaky", "should be removed"),
        ]);
        let filtered = filter_non_system_tags(&input);

        assert!(filtered.contains_key("project"));
        assert!(filtered.contains_key("category"));
        assert!(!filtered.contains_key("_created"));
        assert!(!filtered.contains_key("_sneaky"));
    }

    #[test]
    fn test_filter_preserves_non_system_tags() {
        let input = tags(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(filter_non_system_tags(&input), input);
    }

    #[test]
    fn test_filter_empty() {
        assert_eq!(filter_non_system_tags(&Tags::new()), Tags::new());
    }

    #[test]
    fn test_filter_all_system_tags() {
        let input = tags(&[("_a", "1"), ("_b", "2")]);
        assert_eq!(filter_non_system_tags(&input), Tags::new());
    }

    #[test]
    fn test_merge_updates_and_deletes() {
        let existing = tags(&[("topic", "auth"), ("status", "draft")]);
        let updates = tags(&[("status", ""), ("owner", "me"), ("_updated", "x")]);
        let merged = merge_tags(&existing, &updates);

        assert_eq!(merged.get("topic").map(String::as_str), Some("auth"));
        assert_eq!(merged.get("owner").map(String::as_str), Some("me"));
        assert!(!merged.contains_key("status"));
        assert!(!merged.contains_key("_updated"));
    }

    #[test]
    fn test_tags_match_requires_all_pairs() {
        let item = tags(&[("topic", "auth"), ("status", "draft")]);
        assert!(tags_match(&item, &tags(&[("topic", "auth")])));
        assert!(tags_match(&item, &tags(&[("topic", "auth"), ("status", "draft")])));
        assert!(!tags_match(&item, &tags(&[("topic", "auth"), ("status", "final")])));
        assert!(tags_match(&item, &Tags::new()));
    }
}
