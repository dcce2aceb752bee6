//! Index implementations over the key-value codec.
//!
//! The registry inside a physical collection is an ordered set: primary
//! first, then edge indexes, then everything else by id. Writes fan out over
//! the set in order; on failure at position k the already-visited indexes are
//! walked in reverse, undoing only those whose `needs_reversal()` is true
//! (plain idempotent puts of deterministic keys need no undo).

mod builder;

pub use builder::fill_index;

use crate::keys::{self, KeyBounds};
use coral_core::{
    extract_key, CoralError, CoralResult, ErrorCode, IndexDefinition, IndexKind, LocalDocumentId,
    ObjectId, RevisionId, SequenceNumber,
};
use coral_txn::{ColumnFamilyId, Transaction};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// ============================================================================
// INDEX TRAIT
// ============================================================================

/// Engine-specific figures of one index.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IndexFigures {
    pub memory: u64,
    pub selectivity_estimate: f64,
}

/// One index of a physical collection.
pub trait Index: Send + Sync {
    fn definition(&self) -> &IndexDefinition;

    /// The id prefixing all of this index's keys.
    fn object_id(&self) -> ObjectId;

    /// Whether a failed write requires this index's entries to be undone
    /// explicitly during the reverse walk.
    fn needs_reversal(&self) -> bool;

    /// True while a background build is still filling the index.
    fn in_progress(&self) -> bool {
        false
    }

    fn insert(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()>;

    fn remove(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()>;

    fn update(
        &self,
        trx: &mut Transaction,
        old_document_id: LocalDocumentId,
        old_doc: &Value,
        new_document_id: LocalDocumentId,
        new_doc: &Value,
    ) -> CoralResult<()> {
        self.remove(trx, old_document_id, old_doc)?;
        self.insert(trx, new_document_id, new_doc)
    }

    /// `(start, end)` covering every entry of this index.
    fn bounds(&self) -> KeyBounds;

    /// Called after a range-delete truncate with the post-commit sequence so
    /// caches and estimators flush.
    fn after_truncate(&self, seq: SequenceNumber);

    fn selectivity_estimate(&self) -> f64 {
        1.0
    }

    fn figures(&self) -> IndexFigures {
        IndexFigures {
            memory: 0,
            selectivity_estimate: self.selectivity_estimate(),
        }
    }
}

/// Attribute-path lookup supporting dotted paths (`a.b.c`).
fn lookup_path<'a>(doc: &'a Value, path: &str) -> &'a Value {
    let mut current = doc;
    for part in path.split('.') {
        match current.get(part) {
            Some(next) => current = next,
            None => return &Value::Null,
        }
    }
    current
}

/// Extract the indexed field tuple; `None` when sparse and a field is
/// null/missing.
pub(crate) fn indexed_values<'a>(
    definition: &IndexDefinition,
    doc: &'a Value,
) -> Option<Vec<&'a Value>> {
    let mut values = Vec::with_capacity(definition.fields.len());
    for field in &definition.fields {
        let value = lookup_path(doc, field);
        if definition.sparse && value.is_null() {
            return None;
        }
        values.push(value);
    }
    Some(values)
}

// ============================================================================
// PRIMARY INDEX
// ============================================================================

/// The implicit primary index: maps a document's `_key` to its current
/// LocalDocumentId and revision.
pub struct PrimaryIndex {
    definition: IndexDefinition,
    object_id: ObjectId,
    last_truncate_seq: AtomicU64,
}

impl PrimaryIndex {
    pub fn new(definition: IndexDefinition, object_id: ObjectId) -> Self {
        debug_assert_eq!(definition.kind, IndexKind::Primary);
        Self {
            definition,
            object_id,
            last_truncate_seq: AtomicU64::new(0),
        }
    }

    fn entry_value(document_id: LocalDocumentId, revision: RevisionId) -> [u8; 16] {
        let mut value = [0u8; 16];
        value[..8].copy_from_slice(&document_id.id().to_be_bytes());
        value[8..].copy_from_slice(&revision.id().to_be_bytes());
        value
    }

    fn decode_entry(value: &[u8]) -> Option<(LocalDocumentId, Option<RevisionId>)> {
        let document_id = value
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .map(|b: [u8; 8]| LocalDocumentId::new(u64::from_be_bytes(b)))?;
        let revision = value
            .get(8..16)
            .and_then(|b| b.try_into().ok())
            .map(|b: [u8; 8]| RevisionId::new(u64::from_be_bytes(b)));
        Some((document_id, revision))
    }

    /// Resolve a user key to the current LocalDocumentId.
    pub fn lookup_key(&self, trx: &Transaction, key: &str) -> CoralResult<Option<LocalDocumentId>> {
        Ok(self.lookup_key_and_revision(trx, key)?.map(|(id, _)| id))
    }

    /// Resolve a user key to LocalDocumentId and the revision stored in the
    /// index entry.
    pub fn lookup_key_and_revision(
        &self,
        trx: &Transaction,
        key: &str,
    ) -> CoralResult<Option<(LocalDocumentId, Option<RevisionId>)>> {
        let entry_key = keys::primary_index_key(self.object_id, key);
        match trx.get(ColumnFamilyId::Primary, &entry_key)? {
            Some(value) => Ok(Self::decode_entry(&value)),
            None => Ok(None),
        }
    }

    pub fn last_truncate_sequence(&self) -> SequenceNumber {
        self.last_truncate_seq.load(Ordering::Acquire)
    }
}

impl Index for PrimaryIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn needs_reversal(&self) -> bool {
        // entries are deterministic puts keyed by the user key; savepoint
        // rollback and transaction abort cover the failure paths
        false
    }

    fn insert(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()> {
        let key = extract_key(doc)
            .ok_or_else(|| CoralError::internal("document misses _key on index insert"))?;
        let entry_key = keys::primary_index_key(self.object_id, key);
        if trx.get(ColumnFamilyId::Primary, &entry_key)?.is_some() {
            return Err(CoralError::new(
                ErrorCode::UniqueConstraintViolated,
                key.to_string(),
            ));
        }
        let revision = coral_core::extract_rev(doc).unwrap_or_default();
        trx.put(
            ColumnFamilyId::Primary,
            &entry_key,
            &Self::entry_value(document_id, revision),
        )
    }

    fn remove(
        &self,
        trx: &mut Transaction,
        _document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()> {
        let key = extract_key(doc)
            .ok_or_else(|| CoralError::internal("document misses _key on index remove"))?;
        trx.delete(
            ColumnFamilyId::Primary,
            &keys::primary_index_key(self.object_id, key),
        )
    }

    fn update(
        &self,
        trx: &mut Transaction,
        _old_document_id: LocalDocumentId,
        _old_doc: &Value,
        new_document_id: LocalDocumentId,
        new_doc: &Value,
    ) -> CoralResult<()> {
        // same _key between versions; overwrite the entry in place
        let key = extract_key(new_doc)
            .ok_or_else(|| CoralError::internal("document misses _key on index update"))?;
        let revision = coral_core::extract_rev(new_doc).unwrap_or_default();
        trx.put(
            ColumnFamilyId::Primary,
            &keys::primary_index_key(self.object_id, key),
            &Self::entry_value(new_document_id, revision),
        )
    }

    fn bounds(&self) -> KeyBounds {
        KeyBounds::primary_index(self.object_id)
    }

    fn after_truncate(&self, seq: SequenceNumber) {
        self.last_truncate_seq.store(seq, Ordering::Release);
    }
}

// ============================================================================
// EDGE INDEX
// ============================================================================

/// One direction of the implicit edge index (`_from` or `_to`).
pub struct EdgeIndex {
    definition: IndexDefinition,
    object_id: ObjectId,
    last_truncate_seq: AtomicU64,
}

impl EdgeIndex {
    pub fn new(definition: IndexDefinition, object_id: ObjectId) -> Self {
        debug_assert_eq!(definition.kind, IndexKind::Edge);
        Self {
            definition,
            object_id,
            last_truncate_seq: AtomicU64::new(0),
        }
    }

    fn entry_key(&self, document_id: LocalDocumentId, doc: &Value) -> CoralResult<Vec<u8>> {
        let field = &self.definition.fields[0];
        let value = lookup_path(doc, field);
        if !value.is_string() {
            return Err(CoralError::new(
                ErrorCode::DocumentHandleBad,
                format!("edge document misses '{}'", field),
            ));
        }
        let sort_key = keys::encode_sort_key(&[value]);
        Ok(keys::index_entry_key(self.object_id, &sort_key, document_id))
    }
}

impl Index for EdgeIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn needs_reversal(&self) -> bool {
        false
    }

    fn insert(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()> {
        let key = self.entry_key(document_id, doc)?;
        trx.put(ColumnFamilyId::Index, &key, &[])
    }

    fn remove(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()> {
        let key = self.entry_key(document_id, doc)?;
        trx.delete(ColumnFamilyId::Index, &key)
    }

    fn bounds(&self) -> KeyBounds {
        KeyBounds::secondary_index(self.object_id)
    }

    fn after_truncate(&self, seq: SequenceNumber) {
        self.last_truncate_seq.store(seq, Ordering::Release);
    }

    fn selectivity_estimate(&self) -> f64 {
        0.1
    }
}

// ============================================================================
// PERSISTENT INDEX
// ============================================================================

/// User-created secondary index (persistent/hash/skiplist/ttl share this
/// implementation; the kinds differ only in their definition).
pub struct PersistentIndex {
    definition: IndexDefinition,
    object_id: ObjectId,
    in_progress: AtomicBool,
    last_truncate_seq: AtomicU64,
}

impl PersistentIndex {
    pub fn new(definition: IndexDefinition, object_id: ObjectId) -> Self {
        Self {
            definition,
            object_id,
            in_progress: AtomicBool::new(false),
            last_truncate_seq: AtomicU64::new(0),
        }
    }

    /// Install in "building" state for a background fill.
    pub fn new_building(definition: IndexDefinition, object_id: ObjectId) -> Self {
        let index = Self::new(definition, object_id);
        index.in_progress.store(true, Ordering::Release);
        index
    }

    /// Flip out of "building" state once the fill finished.
    pub fn mark_ready(&self) {
        self.in_progress.store(false, Ordering::Release);
    }

    pub fn last_truncate_sequence(&self) -> SequenceNumber {
        self.last_truncate_seq.load(Ordering::Acquire)
    }
}

impl Index for PersistentIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn needs_reversal(&self) -> bool {
        // unique entries are keyed by field values alone; a later failure in
        // the fan-out must remove them explicitly or a phantom entry blocks
        // unrelated documents
        self.definition.unique
    }

    fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn insert(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()> {
        let Some(values) = indexed_values(&self.definition, doc) else {
            return Ok(()); // sparse: not indexed
        };
        let sort_key = keys::encode_sort_key(&values);
        if self.definition.unique {
            let entry_key = keys::unique_index_key(self.object_id, &sort_key);
            if trx.get(ColumnFamilyId::Index, &entry_key)?.is_some() {
                let offending = extract_key(doc).unwrap_or_default().to_string();
                return Err(CoralError::new(ErrorCode::UniqueConstraintViolated, offending));
            }
            trx.put(
                ColumnFamilyId::Index,
                &entry_key,
                &document_id.id().to_be_bytes(),
            )
        } else {
            let entry_key = keys::index_entry_key(self.object_id, &sort_key, document_id);
            trx.put(ColumnFamilyId::Index, &entry_key, &[])
        }
    }

    fn remove(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()> {
        let Some(values) = indexed_values(&self.definition, doc) else {
            return Ok(());
        };
        let sort_key = keys::encode_sort_key(&values);
        let entry_key = if self.definition.unique {
            keys::unique_index_key(self.object_id, &sort_key)
        } else {
            keys::index_entry_key(self.object_id, &sort_key, document_id)
        };
        trx.delete(ColumnFamilyId::Index, &entry_key)
    }

    fn bounds(&self) -> KeyBounds {
        KeyBounds::secondary_index(self.object_id)
    }

    fn after_truncate(&self, seq: SequenceNumber) {
        self.last_truncate_seq.store(seq, Ordering::Release);
    }

    fn selectivity_estimate(&self) -> f64 {
        if self.definition.unique {
            1.0
        } else {
            0.2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_path_dotted() {
        let doc = json!({"a": {"b": {"c": 7}}});
        assert_eq!(lookup_path(&doc, "a.b.c"), &json!(7));
        assert_eq!(lookup_path(&doc, "a.x"), &Value::Null);
    }

    #[test]
    fn test_sparse_skips_null_fields() {
        let def = IndexDefinition {
            sparse: true,
            ..IndexDefinition::persistent(coral_core::IndexId::new(1), "i", vec!["a".into()])
        };
        assert!(indexed_values(&def, &json!({"a": null})).is_none());
        assert!(indexed_values(&def, &json!({"b": 1})).is_none());
        assert!(indexed_values(&def, &json!({"a": 1})).is_some());
    }

    #[test]
    fn test_needs_reversal_policy() {
        let primary = PrimaryIndex::new(
            IndexDefinition::primary(coral_core::IndexId::new(0)),
            ObjectId::new(1),
        );
        assert!(!primary.needs_reversal());

        let unique = PersistentIndex::new(
            IndexDefinition {
                unique: true,
                ..IndexDefinition::persistent(coral_core::IndexId::new(1), "u", vec!["a".into()])
            },
            ObjectId::new(2),
        );
        assert!(unique.needs_reversal());

        let plain = PersistentIndex::new(
            IndexDefinition::persistent(coral_core::IndexId::new(2), "p", vec!["a".into()]),
            ObjectId::new(3),
        );
        assert!(!plain.needs_reversal());
    }
}
