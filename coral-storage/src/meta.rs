//! Per-collection metadata: document counter, revision high-water mark, and
//! sequence-number blockers.
//!
//! Blockers pin a sequence number so engine housekeeping (log pruning,
//! estimator maintenance) cannot advance past a transaction's snapshot. A
//! blocker must be placed before the transaction relies on any external
//! sequence-number observation, and removed after commit or abort. A leaked
//! blocker degrades housekeeping, it does not break correctness.

use coral_core::{CollectionId, RevisionId, SequenceNumber, TransactionId};
use coral_txn::MetaSink;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

// ============================================================================
// COLLECTION META
// ============================================================================

#[derive(Default)]
pub struct CollectionMeta {
    /// Committed document count.
    number_documents: AtomicI64,
    /// Highest revision id observed.
    revision: AtomicU64,
    /// Sequence number of the last applied count adjustment.
    count_sequence: AtomicU64,
    /// transaction id -> pinned sequence number
    blockers: Mutex<BTreeMap<u64, SequenceNumber>>,
}

impl CollectionMeta {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn number_documents(&self) -> u64 {
        self.number_documents.load(Ordering::Acquire).max(0) as u64
    }

    pub fn revision(&self) -> RevisionId {
        RevisionId::new(self.revision.load(Ordering::Acquire))
    }

    pub fn count_sequence(&self) -> SequenceNumber {
        self.count_sequence.load(Ordering::Acquire)
    }

    /// Apply a committed delta at `seq`, raising the revision high-water
    /// mark.
    pub fn adjust_number_documents(&self, seq: SequenceNumber, revision: RevisionId, delta: i64) {
        self.number_documents.fetch_add(delta, Ordering::AcqRel);
        self.count_sequence.fetch_max(seq, Ordering::AcqRel);
        self.revision.fetch_max(revision.id(), Ordering::AcqRel);
    }

    /// Pin `seq` for the transaction; re-placing moves the pin.
    pub fn place_blocker(&self, tid: TransactionId, seq: SequenceNumber) {
        if let Ok(mut blockers) = self.blockers.lock() {
            blockers.insert(tid.id(), seq);
        }
    }

    pub fn remove_blocker(&self, tid: TransactionId) {
        if let Ok(mut blockers) = self.blockers.lock() {
            blockers.remove(&tid.id());
        }
    }

    /// Smallest pinned sequence number, if any transaction holds a pin.
    pub fn min_blocked_sequence(&self) -> Option<SequenceNumber> {
        self.blockers
            .lock()
            .ok()
            .and_then(|blockers| blockers.values().min().copied())
    }

    pub fn has_blockers(&self) -> bool {
        self.blockers.lock().map(|b| !b.is_empty()).unwrap_or(false)
    }
}

// ============================================================================
// META REGISTRY
// ============================================================================

/// Server-wide registry mapping collection ids to their metadata; this is the
/// transaction layer's [`MetaSink`].
#[derive(Default)]
pub struct MetaRegistry {
    metas: RwLock<HashMap<u64, Arc<CollectionMeta>>>,
}

impl MetaRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get or create the metadata for a collection.
    pub fn meta(&self, collection_id: CollectionId) -> Arc<CollectionMeta> {
        if let Ok(metas) = self.metas.read() {
            if let Some(meta) = metas.get(&collection_id.id()) {
                return Arc::clone(meta);
            }
        }
        let mut metas = match self.metas.write() {
            Ok(metas) => metas,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            metas
                .entry(collection_id.id())
                .or_insert_with(CollectionMeta::new),
        )
    }

    pub fn drop_meta(&self, collection_id: CollectionId) {
        if let Ok(mut metas) = self.metas.write() {
            metas.remove(&collection_id.id());
        }
    }
}

impl MetaSink for MetaRegistry {
    fn place_blocker(&self, collection_id: CollectionId, tid: TransactionId, seq: SequenceNumber) {
        self.meta(collection_id).place_blocker(tid, seq);
    }

    fn remove_blocker(&self, collection_id: CollectionId, tid: TransactionId) {
        self.meta(collection_id).remove_blocker(tid);
    }

    fn adjust_counts(
        &self,
        collection_id: CollectionId,
        delta: i64,
        revision: RevisionId,
        seq: SequenceNumber,
    ) {
        self.meta(collection_id)
            .adjust_number_documents(seq, revision, delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_revision_accumulate() {
        let meta = CollectionMeta::new();
        meta.adjust_number_documents(10, RevisionId::new(5), 3);
        meta.adjust_number_documents(12, RevisionId::new(4), -1);
        assert_eq!(meta.number_documents(), 2);
        assert_eq!(meta.revision(), RevisionId::new(5), "revision is a high-water mark");
        assert_eq!(meta.count_sequence(), 12);
    }

    #[test]
    fn test_blockers_min_query() {
        let meta = CollectionMeta::new();
        assert_eq!(meta.min_blocked_sequence(), None);
        meta.place_blocker(TransactionId::new(1), 100);
        meta.place_blocker(TransactionId::new(2), 50);
        assert_eq!(meta.min_blocked_sequence(), Some(50));
        meta.remove_blocker(TransactionId::new(2));
        assert_eq!(meta.min_blocked_sequence(), Some(100));
        meta.remove_blocker(TransactionId::new(1));
        assert!(!meta.has_blockers());
    }

    #[test]
    fn test_replacing_blocker_moves_pin() {
        let meta = CollectionMeta::new();
        meta.place_blocker(TransactionId::new(1), 10);
        meta.place_blocker(TransactionId::new(1), 90);
        assert_eq!(meta.min_blocked_sequence(), Some(90));
    }

    #[test]
    fn test_registry_shares_meta() {
        let registry = MetaRegistry::new();
        let a = registry.meta(CollectionId::new(1));
        a.adjust_number_documents(1, RevisionId::new(1), 5);
        let b = registry.meta(CollectionId::new(1));
        assert_eq!(b.number_documents(), 5);
    }
}
