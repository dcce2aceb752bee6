//! Document model and reserved attributes.
//!
//! Documents are JSON objects with reserved system attributes: `_key`
//! (primary key string), `_rev` (revision id, re-generated on every mutating
//! operation), and for edge collections `_from`/`_to` (endpoint references of
//! the form `collection/key`). All other attributes belong to the user.

use crate::{CoralError, CoralResult, ErrorCode, KeyGenerator, RevisionId};
use serde_json::{Map, Value};

// ============================================================================
// RESERVED ATTRIBUTE NAMES
// ============================================================================

pub const KEY_STRING: &str = "_key";
pub const ID_STRING: &str = "_id";
pub const REV_STRING: &str = "_rev";
pub const FROM_STRING: &str = "_from";
pub const TO_STRING: &str = "_to";

/// Whether `name` is one of the reserved system attributes.
pub fn is_system_attribute(name: &str) -> bool {
    matches!(
        name,
        self::KEY_STRING | self::ID_STRING | self::REV_STRING | self::FROM_STRING | self::TO_STRING
    )
}

// ============================================================================
// EXTRACTION HELPERS
// ============================================================================

/// Extract the `_key` attribute from a document body.
pub fn extract_key(doc: &Value) -> Option<&str> {
    doc.get(KEY_STRING).and_then(Value::as_str)
}

/// Extract the `_rev` attribute from a document body.
///
/// Revisions are stored as decimal strings; numeric values are accepted on
/// input for robustness.
pub fn extract_rev(doc: &Value) -> Option<RevisionId> {
    match doc.get(REV_STRING) {
        Some(Value::String(s)) => s.parse::<u64>().ok().map(RevisionId::new),
        Some(Value::Number(n)) => n.as_u64().map(RevisionId::new),
        _ => None,
    }
}

/// Split an edge endpoint reference `collection/key` into its parts.
pub fn parse_document_ref(handle: &str) -> CoralResult<(&str, &str)> {
    let mut parts = handle.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(collection), Some(key)) if !collection.is_empty() && !key.is_empty() => {
            Ok((collection, key))
        }
        _ => Err(CoralError::new(
            ErrorCode::DocumentHandleBad,
            format!("invalid document handle '{}'", handle),
        )),
    }
}

// ============================================================================
// DOCUMENT CONSTRUCTION
// ============================================================================

fn require_object(body: &Value) -> CoralResult<&Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| CoralError::bad_parameter("expecting a document object"))
}

fn validate_edge_refs(doc: &Map<String, Value>) -> CoralResult<()> {
    for attr in [FROM_STRING, TO_STRING] {
        let value = doc
            .get(attr)
            .and_then(Value::as_str)
            .ok_or_else(|| CoralError::new(ErrorCode::DocumentHandleBad, format!("missing or invalid '{}' attribute", attr)))?;
        parse_document_ref(value)?;
    }
    Ok(())
}

/// Build the stored form of a new document.
///
/// Strips unknown system attributes, generates or validates `_key`, checks
/// edge endpoint references, and stamps a fresh `_rev`. With `is_restore` an
/// incoming `_rev` is preserved instead, so dump application reproduces the
/// leader's revisions.
pub fn new_object_for_insert(
    body: &Value,
    is_edge: bool,
    is_restore: bool,
    keygen: &KeyGenerator,
) -> CoralResult<(Value, RevisionId, String)> {
    let input = require_object(body)?;

    let key = match input.get(KEY_STRING) {
        None | Some(Value::Null) => keygen.generate()?,
        Some(Value::String(k)) => {
            keygen.validate_user_key(k)?;
            k.clone()
        }
        Some(_) => return Err(CoralError::from_code(ErrorCode::DocumentKeyBad)),
    };

    let revision = if is_restore {
        extract_rev(body).unwrap_or_else(RevisionId::create)
    } else {
        RevisionId::create()
    };

    let mut out = Map::with_capacity(input.len() + 2);
    out.insert(KEY_STRING.to_string(), Value::String(key.clone()));
    out.insert(REV_STRING.to_string(), Value::String(revision.to_string()));
    if is_edge {
        validate_edge_refs(input)?;
        out.insert(FROM_STRING.to_string(), input[FROM_STRING].clone());
        out.insert(TO_STRING.to_string(), input[TO_STRING].clone());
    }
    for (k, v) in input {
        if !is_system_attribute(k) {
            out.insert(k.clone(), v.clone());
        }
    }

    Ok((Value::Object(out), revision, key))
}

fn merge_maps(old: &Map<String, Value>, patch: &Map<String, Value>, keep_null: bool, recursive: bool) -> Map<String, Value> {
    let mut out = old.clone();
    for (k, v) in patch {
        match v {
            Value::Null if !keep_null => {
                out.remove(k);
            }
            Value::Object(patch_inner) if recursive => {
                match out.get(k).and_then(Value::as_object) {
                    Some(old_inner) => {
                        let merged = merge_maps(old_inner, patch_inner, keep_null, recursive);
                        out.insert(k.clone(), Value::Object(merged));
                    }
                    None => {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
            _ => {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    out
}

/// Build the stored form for an update (patch) of `old`.
///
/// With `merge_objects` nested objects are merged recursively, otherwise
/// replaced wholesale. `keep_null == false` removes attributes that the patch
/// sets to null. `_key` is always taken from the old document; `_from`/`_to`
/// may be changed by the patch on edges.
pub fn merge_objects_for_update(
    old: &Value,
    patch: &Value,
    is_edge: bool,
    merge_objects: bool,
    keep_null: bool,
    is_restore: bool,
) -> CoralResult<(Value, RevisionId)> {
    let old_map = require_object(old)?;
    let patch_map = require_object(patch)?;

    let revision = if is_restore {
        extract_rev(patch).unwrap_or_else(RevisionId::create)
    } else {
        RevisionId::create()
    };

    let mut user_patch = Map::with_capacity(patch_map.len());
    for (k, v) in patch_map {
        if !is_system_attribute(k) {
            user_patch.insert(k.clone(), v.clone());
        }
    }

    let mut out = merge_maps(old_map, &user_patch, keep_null, merge_objects);
    out.insert(KEY_STRING.to_string(), old_map[KEY_STRING].clone());
    out.insert(REV_STRING.to_string(), Value::String(revision.to_string()));
    if is_edge {
        for attr in [FROM_STRING, TO_STRING] {
            if let Some(Value::String(handle)) = patch_map.get(attr) {
                parse_document_ref(handle)?;
                out.insert(attr.to_string(), Value::String(handle.clone()));
            } else {
                out.insert(attr.to_string(), old_map[attr].clone());
            }
        }
    }

    Ok((Value::Object(out), revision))
}

/// Build the stored form for a replace of `old` with `body`.
///
/// User attributes come entirely from `body`; `_key` is carried over from the
/// old document; edges must supply valid `_from`/`_to`.
pub fn new_object_for_replace(
    old: &Value,
    body: &Value,
    is_edge: bool,
    is_restore: bool,
) -> CoralResult<(Value, RevisionId)> {
    let old_map = require_object(old)?;
    let body_map = require_object(body)?;

    let revision = if is_restore {
        extract_rev(body).unwrap_or_else(RevisionId::create)
    } else {
        RevisionId::create()
    };

    let mut out = Map::with_capacity(body_map.len() + 2);
    out.insert(KEY_STRING.to_string(), old_map[KEY_STRING].clone());
    out.insert(REV_STRING.to_string(), Value::String(revision.to_string()));
    if is_edge {
        validate_edge_refs(body_map)?;
        out.insert(FROM_STRING.to_string(), body_map[FROM_STRING].clone());
        out.insert(TO_STRING.to_string(), body_map[TO_STRING].clone());
    }
    for (k, v) in body_map {
        if !is_system_attribute(k) {
            out.insert(k.clone(), v.clone());
        }
    }

    Ok((Value::Object(out), revision))
}

// ============================================================================
// IMMUTABLE-ATTRIBUTE CHECKS
// ============================================================================

/// Whether any of the collection's sharding attributes differ between the old
/// and the new version of a document.
///
/// For patch updates (`is_patch`), an attribute missing from the new version
/// counts as unchanged.
pub fn shard_keys_changed(shard_keys: &[String], old: &Value, new: &Value, is_patch: bool) -> bool {
    for key in shard_keys {
        // _key never changes between versions of the same document
        if key == KEY_STRING {
            continue;
        }
        let new_value = new.get(key);
        if is_patch && new_value.is_none() {
            continue;
        }
        if old.get(key) != new_value {
            return true;
        }
    }
    false
}

/// Whether the smart-join attribute differs between versions.
pub fn smart_join_attribute_changed(
    attribute: &str,
    old: &Value,
    new: &Value,
    is_patch: bool,
) -> bool {
    let new_value = new.get(attribute);
    if is_patch && new_value.is_none() {
        return false;
    }
    old.get(attribute) != new_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyOptions;
    use serde_json::json;

    fn keygen() -> KeyGenerator {
        KeyGenerator::new(KeyOptions::default())
    }

    #[test]
    fn test_insert_generates_key_and_rev() {
        let (doc, rev, key) = new_object_for_insert(&json!({"x": 1}), false, false, &keygen())
            .expect("insert object should build");
        assert_eq!(extract_key(&doc), Some(key.as_str()));
        assert_eq!(extract_rev(&doc), Some(rev));
        assert_eq!(doc["x"], json!(1));
    }

    #[test]
    fn test_insert_keeps_valid_user_key() {
        let (doc, _, key) = new_object_for_insert(&json!({"_key": "k1"}), false, false, &keygen())
            .expect("user key should be accepted");
        assert_eq!(key, "k1");
        assert_eq!(extract_key(&doc), Some("k1"));
    }

    #[test]
    fn test_insert_rejects_non_string_key() {
        let err = new_object_for_insert(&json!({"_key": 17}), false, false, &keygen())
            .expect_err("numeric _key must be rejected");
        assert!(err.is(ErrorCode::DocumentKeyBad));
    }

    #[test]
    fn test_insert_edge_requires_refs() {
        let err = new_object_for_insert(&json!({"_from": "a/1"}), true, false, &keygen())
            .expect_err("edge without _to must fail");
        assert!(err.is(ErrorCode::DocumentHandleBad));

        let (doc, _, _) = new_object_for_insert(
            &json!({"_from": "a/1", "_to": "b/2"}),
            true,
            false,
            &keygen(),
        )
        .expect("valid edge should build");
        assert_eq!(doc[FROM_STRING], json!("a/1"));
        assert_eq!(doc[TO_STRING], json!("b/2"));
    }

    #[test]
    fn test_restore_preserves_rev() {
        let (doc, rev, _) = new_object_for_insert(
            &json!({"_key": "k", "_rev": "12345"}),
            false,
            true,
            &keygen(),
        )
        .expect("restore insert should build");
        assert_eq!(rev, RevisionId::new(12345));
        assert_eq!(doc[REV_STRING], json!("12345"));
    }

    #[test]
    fn test_update_merges_nested_objects() {
        let old = json!({"_key": "k", "_rev": "1", "a": {"x": 1, "y": 2}, "b": 1});
        let patch = json!({"a": {"y": 3}});
        let (merged, _) = merge_objects_for_update(&old, &patch, false, true, true, false)
            .expect("update should merge");
        assert_eq!(merged["a"], json!({"x": 1, "y": 3}));
        assert_eq!(merged["b"], json!(1));
        assert_eq!(extract_key(&merged), Some("k"));
    }

    #[test]
    fn test_update_keep_null_false_removes() {
        let old = json!({"_key": "k", "_rev": "1", "a": 1, "b": 2});
        let patch = json!({"a": null});
        let (merged, _) = merge_objects_for_update(&old, &patch, false, true, false, false)
            .expect("update should merge");
        assert!(merged.get("a").is_none());
        assert_eq!(merged["b"], json!(2));
    }

    #[test]
    fn test_replace_drops_old_attributes() {
        let old = json!({"_key": "k", "_rev": "1", "a": 1});
        let (doc, _) = new_object_for_replace(&old, &json!({"b": 2}), false, false)
            .expect("replace should build");
        assert!(doc.get("a").is_none());
        assert_eq!(doc["b"], json!(2));
        assert_eq!(extract_key(&doc), Some("k"));
    }

    #[test]
    fn test_shard_keys_changed() {
        let shard_keys = vec!["region".to_string()];
        let old = json!({"region": "eu", "x": 1});
        assert!(!shard_keys_changed(&shard_keys, &old, &json!({"region": "eu", "x": 2}), false));
        assert!(shard_keys_changed(&shard_keys, &old, &json!({"region": "us"}), false));
        // patch without the attribute leaves it unchanged
        assert!(!shard_keys_changed(&shard_keys, &old, &json!({"x": 2}), true));
        // full replace without the attribute changes it to "absent"
        assert!(shard_keys_changed(&shard_keys, &old, &json!({"x": 2}), false));
    }

    #[test]
    fn test_parse_document_ref() {
        let (c, k) = parse_document_ref("users/alice").expect("handle should parse");
        assert_eq!((c, k), ("users", "alice"));
        assert!(parse_document_ref("nokey").is_err());
        assert!(parse_document_ref("/x").is_err());
        assert!(parse_document_ref("x/").is_err());
    }
}
