//! Read-side field-alias layer
//!
//! Older datasets carried `description`/`details` where the canonical shape
//! uses `title`/`content`. Rows written by those versions keep the legacy
//! values inside the metadata JSON. The normalizer below promotes them into
//! the canonical fields at read time so nothing above the storage layer ever
//! sees a legacy name. The write path always writes canonical names, so no
//! denormalizer exists.

use std::collections::HashMap;

/// Legacy metadata key for `title`
const LEGACY_TITLE: &str = "description";
/// Legacy metadata key for `content`
const LEGACY_CONTENT: &str = "details";

/// Promote legacy field names out of a memory's metadata map.
///
/// A legacy value only fills a canonical field that is empty; a row that has
/// both keeps the canonical value and drops the stale alias.
pub fn canonicalize_memory_fields(
    title: &mut String,
    content: &mut String,
    metadata: &mut HashMap<String, serde_json::Value>,
) {
    if let Some(value) = metadata.remove(LEGACY_TITLE) {
        if title.is_empty() {
            if let Some(s) = value.as_str() {
                *title = s.to_string();
            }
        }
    }

    if let Some(value) = metadata.remove(LEGACY_CONTENT) {
        if content.is_empty() {
            if let Some(s) = value.as_str() {
                *content = s.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_fields_promoted() {
        let mut title = String::new();
        let mut content = String::new();
        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("description".to_string(), json!("Old title"));
        metadata.insert("details".to_string(), json!("Old body"));
        metadata.insert("projectId".to_string(), json!("alpha"));

        canonicalize_memory_fields(&mut title, &mut content, &mut metadata);

        assert_eq!(title, "Old title");
        assert_eq!(content, "Old body");
        assert!(!metadata.contains_key("description"));
        assert!(!metadata.contains_key("details"));
        assert_eq!(metadata.get("projectId"), Some(&json!("alpha")));
    }

    #[test]
    fn test_canonical_value_wins() {
        let mut title = "Current".to_string();
        let mut content = String::new();
        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("description".to_string(), json!("Stale"));

        canonicalize_memory_fields(&mut title, &mut content, &mut metadata);

        assert_eq!(title, "Current");
        assert!(!metadata.contains_key("description"));
    }
}
