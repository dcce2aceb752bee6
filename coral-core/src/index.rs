//! Index definitions.
//!
//! Every collection has exactly one primary index; edge collections
//! additionally carry two edge indexes (one per direction). All other index
//! kinds are user-created and persisted in the collection definition. The
//! registry order (primary, then edge, then the rest) is observable: it is
//! the fan-out order on writes and the reverse order on failure.

use crate::{CoralError, CoralResult, ErrorCode, IndexId};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// INDEX KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Primary,
    Edge,
    Hash,
    Skiplist,
    Ttl,
    Geo,
    Fulltext,
    Persistent,
}

impl IndexKind {
    /// Position class inside the registry: primary before edge before the
    /// rest; within a class, indexes order by id.
    pub fn order_rank(&self) -> u8 {
        match self {
            IndexKind::Primary => 0,
            IndexKind::Edge => 1,
            _ => 2,
        }
    }

    /// Primary and edge indexes exist implicitly and are never persisted in
    /// the user-visible index list.
    pub fn is_implicit(&self) -> bool {
        matches!(self, IndexKind::Primary | IndexKind::Edge)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexKind::Primary => "primary",
            IndexKind::Edge => "edge",
            IndexKind::Hash => "hash",
            IndexKind::Skiplist => "skiplist",
            IndexKind::Ttl => "ttl",
            IndexKind::Geo => "geo",
            IndexKind::Fulltext => "fulltext",
            IndexKind::Persistent => "persistent",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// INDEX DEFINITION
// ============================================================================

/// A user-facing index definition, as accepted by the index API and stored in
/// the collection definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub id: IndexId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IndexKind,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    /// Build the index without blocking writes.
    #[serde(default)]
    pub in_background: bool,
    /// TTL indexes only: seconds after the indexed timestamp at which a
    /// document expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<f64>,
}

impl IndexDefinition {
    pub fn persistent(id: IndexId, name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: IndexKind::Persistent,
            fields,
            unique: false,
            sparse: false,
            in_background: false,
            expire_after: None,
        }
    }

    pub fn primary(id: IndexId) -> Self {
        Self {
            id,
            name: "primary".to_string(),
            kind: IndexKind::Primary,
            fields: vec![crate::KEY_STRING.to_string()],
            unique: true,
            sparse: false,
            in_background: false,
            expire_after: None,
        }
    }

    pub fn edge(id: IndexId, direction_field: &str) -> Self {
        Self {
            id,
            name: format!("edge-{}", direction_field.trim_start_matches('_')),
            kind: IndexKind::Edge,
            fields: vec![direction_field.to_string()],
            unique: false,
            sparse: false,
            in_background: false,
            expire_after: None,
        }
    }

    /// Validate what can be validated without a collection.
    pub fn validate(&self) -> CoralResult<()> {
        if self.fields.is_empty() {
            return Err(CoralError::bad_parameter("index fields must not be empty"));
        }
        if self.kind == IndexKind::Ttl {
            if self.fields.len() != 1 {
                return Err(CoralError::bad_parameter(
                    "ttl indexes must index exactly one field",
                ));
            }
            if self.expire_after.is_none() {
                return Err(CoralError::bad_parameter(
                    "ttl indexes require expireAfter",
                ));
            }
        }
        Ok(())
    }

    /// Whether an existing index with this definition satisfies a request for
    /// `other`. Field order is significant.
    pub fn matches(&self, other: &IndexDefinition) -> bool {
        self.kind == other.kind
            && self.fields == other.fields
            && self.unique == other.unique
            && self.sparse == other.sparse
            && (self.kind != IndexKind::Ttl || self.expire_after == other.expire_after)
    }
}

// ============================================================================
// REGISTRY ORDER VALIDATION
// ============================================================================

/// Check that an index list is a valid registry for the given collection
/// type: primary first, and for edge collections two edge indexes right
/// after it.
pub fn validate_index_order(definitions: &[IndexDefinition], is_edge: bool) -> CoralResult<()> {
    let invalid = || {
        CoralError::new(
            ErrorCode::Internal,
            "got invalid indexes for collection",
        )
    };
    let mut it = definitions.iter();
    match it.next() {
        Some(first) if first.kind == IndexKind::Primary => {}
        _ => return Err(invalid()),
    }
    if is_edge {
        if definitions.len() < 3 {
            return Err(invalid());
        }
        if definitions[1].kind != IndexKind::Edge || definitions[2].kind != IndexKind::Edge {
            return Err(invalid());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_rank() {
        assert!(IndexKind::Primary.order_rank() < IndexKind::Edge.order_rank());
        assert!(IndexKind::Edge.order_rank() < IndexKind::Persistent.order_rank());
        assert_eq!(IndexKind::Hash.order_rank(), IndexKind::Ttl.order_rank());
    }

    #[test]
    fn test_matches_field_order_sensitive() {
        let a = IndexDefinition::persistent(IndexId::new(1), "i1", vec!["a".into(), "b".into()]);
        let mut b = IndexDefinition::persistent(IndexId::new(2), "i2", vec!["a".into(), "b".into()]);
        assert!(a.matches(&b));
        b.fields.reverse();
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_ttl_match_includes_expire_after() {
        let mut a = IndexDefinition::persistent(IndexId::new(1), "t1", vec!["ts".into()]);
        a.kind = IndexKind::Ttl;
        a.expire_after = Some(60.0);
        let mut b = a.clone();
        b.id = IndexId::new(2);
        assert!(a.matches(&b));
        b.expire_after = Some(120.0);
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_ttl_validation() {
        let mut def = IndexDefinition::persistent(IndexId::new(1), "t", vec!["ts".into()]);
        def.kind = IndexKind::Ttl;
        assert!(def.validate().is_err(), "ttl requires expireAfter");
        def.expire_after = Some(1.0);
        def.validate().expect("valid ttl definition");
        def.fields.push("other".into());
        assert!(def.validate().is_err(), "ttl indexes a single field");
    }

    #[test]
    fn test_index_order_document_collection() {
        let defs = vec![IndexDefinition::primary(IndexId::new(0))];
        validate_index_order(&defs, false).expect("primary alone is fine for documents");
        // but not for an edge collection
        assert!(validate_index_order(&defs, true).is_err());
    }

    #[test]
    fn test_index_order_edge_collection() {
        let defs = vec![
            IndexDefinition::primary(IndexId::new(0)),
            IndexDefinition::edge(IndexId::new(1), crate::FROM_STRING),
            IndexDefinition::edge(IndexId::new(2), crate::TO_STRING),
        ];
        validate_index_order(&defs, true).expect("full edge index set");

        // exactly two entries (missing the second edge index) is rejected
        let short = &defs[..2];
        assert!(validate_index_order(short, true).is_err());
    }

    #[test]
    fn test_definition_json_round_trip() {
        let def = IndexDefinition::persistent(IndexId::new(5), "byName", vec!["name".into()]);
        let json = serde_json::to_value(&def).expect("serialize");
        assert_eq!(json["type"], "persistent");
        let back: IndexDefinition = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, def);
    }
}
