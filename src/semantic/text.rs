//! Embed-text construction and fingerprinting.

use sha2::{Digest, Sha256};

use crate::graph::entities::Entity;

/// Build the embeddable text for an entity: `"<type>: <display_name>"`,
/// the summary when present, then every string-valued metadata entry as
/// `"<key>: <value>"` in sorted key order. The ordering keeps the
/// fingerprint stable for a given entity state.
pub fn entity_text(entity: &Entity) -> String {
    let mut parts = vec![format!("{}: {}", entity.entity_type, entity.display_name)];
    if !entity.summary.is_empty() {
        parts.push(entity.summary.clone());
    }
    if let serde_json::Value::Object(map) = &entity.metadata {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            if let Some(serde_json::Value::String(value)) = map.get(key) {
                if !value.is_empty() {
                    parts.push(format!("{key}: {value}"));
                }
            }
        }
    }
    parts.join(". ")
}

/// SHA-256 hex digest of the embed text, used for change detection.
pub fn text_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(metadata: serde_json::Value) -> Entity {
        Entity {
            id: "e1".into(),
            entity_type: "person".into(),
            key: "email:ada@x".into(),
            display_name: "Ada".into(),
            summary: "first programmer".into(),
            metadata,
            created_at: String::new(),
            updated_at: String::new(),
            deleted_at: None,
        }
    }

    #[test]
    fn text_includes_type_name_summary_and_string_metadata() {
        let e = entity(serde_json::json!({
            "timezone": "UTC",
            "age": 36,
            "email": "ada@x",
            "note": ""
        }));
        // Sorted keys, non-string and empty values dropped.
        assert_eq!(
            entity_text(&e),
            "person: Ada. first programmer. email: ada@x. timezone: UTC"
        );
    }

    #[test]
    fn metadata_order_does_not_change_the_hash() {
        let a = entity(serde_json::json!({"b": "2", "a": "1"}));
        let b = entity(serde_json::json!({"a": "1", "b": "2"}));
        assert_eq!(text_hash(&entity_text(&a)), text_hash(&entity_text(&b)));
    }

    #[test]
    fn hash_is_sha256_hex() {
        let h = text_hash("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
