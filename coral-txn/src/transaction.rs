//! The transaction state machine.
//!
//! Mutations accumulate in an ordered op list plus a per-column-family
//! overlay map providing read-own-writes. Savepoints capture a position in
//! the op list together with the operation counters; rolling back truncates
//! the list and rebuilds the overlay. Intermediate commits write the batch
//! early and renew the snapshot, keeping the transaction usable.

use crate::hints::TransactionHints;
use crate::rocks::{cf_handle, convert_rocks_error, ColumnFamilyId, RocksDb};
use crate::snapshot::EngineSnapshot;
use crate::wal::{LogValue, OperationType};
use coral_core::{
    next_tick, CollectionId, CoralError, CoralResult, ErrorCode, RevisionId, SequenceNumber,
    TransactionId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// SUPPORT TYPES
// ============================================================================

/// Hook through which the transaction reports committed effects to the
/// collection metadata layer (document counters, revision high-water marks,
/// sequence-number blockers).
pub trait MetaSink: Send + Sync {
    fn place_blocker(&self, collection_id: CollectionId, tid: TransactionId, seq: SequenceNumber);
    fn remove_blocker(&self, collection_id: CollectionId, tid: TransactionId);
    fn adjust_counts(
        &self,
        collection_id: CollectionId,
        delta: i64,
        revision: RevisionId,
        seq: SequenceNumber,
    );
}

/// Tunable limits of a transaction.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Operation count at which an intermediate commit fires.
    pub intermediate_commit_count: u64,
    /// Accumulated batch size (bytes) at which an intermediate commit fires.
    pub intermediate_commit_size: u64,
    pub wait_for_sync: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            intermediate_commit_count: 1_000_000,
            intermediate_commit_size: 512 * 1024 * 1024,
            wait_for_sync: false,
        }
    }
}

/// Per-collection operation accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionOperations {
    pub inserts: u64,
    pub updates: u64,
    pub removes: u64,
    pub last_revision: RevisionId,
}

impl CollectionOperations {
    fn track(&mut self, operation: OperationType, revision: RevisionId) {
        match operation {
            OperationType::Insert => self.inserts += 1,
            OperationType::Update | OperationType::Replace => self.updates += 1,
            OperationType::Remove | OperationType::Truncate => self.removes += 1,
        }
        self.last_revision = revision;
    }

    pub fn count_delta(&self) -> i64 {
        self.inserts as i64 - self.removes as i64
    }
}

#[derive(Debug, Clone)]
enum BatchOp {
    Put {
        cf: ColumnFamilyId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: ColumnFamilyId,
        key: Vec<u8>,
    },
    Log {
        key: Vec<u8>,
        value: Vec<u8>,
    },
}

struct SavepointEntry {
    ops_len: usize,
    num_ops: u64,
    estimated_size: u64,
    counters: HashMap<CollectionId, CollectionOperations>,
}

/// Handle to an open savepoint; positions are indices into the savepoint
/// stack and become stale after an intermediate commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavepointToken(usize);

// ============================================================================
// TRANSACTION
// ============================================================================

pub struct Transaction {
    id: TransactionId,
    hints: TransactionHints,
    options: TransactionOptions,
    db: Arc<RocksDb>,
    sink: Arc<dyn MetaSink>,
    snapshot: EngineSnapshot,
    ops: Vec<BatchOp>,
    overlay: HashMap<ColumnFamilyId, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    counters: HashMap<CollectionId, CollectionOperations>,
    tracked: HashSet<CollectionId>,
    savepoints: Vec<SavepointEntry>,
    num_ops: u64,
    estimated_size: u64,
    num_commits: u64,
    num_intermediate_commits: u64,
    wait_for_sync: bool,
    running: bool,
}

impl Transaction {
    /// Begin a transaction. The MVCC snapshot is taken immediately.
    pub fn begin(
        db: Arc<RocksDb>,
        sink: Arc<dyn MetaSink>,
        hints: TransactionHints,
        options: TransactionOptions,
    ) -> Self {
        let snapshot = EngineSnapshot::new(Arc::clone(&db));
        let wait_for_sync = options.wait_for_sync;
        Self {
            id: TransactionId::create(),
            hints,
            options,
            db,
            sink,
            snapshot,
            ops: Vec::new(),
            overlay: HashMap::new(),
            counters: HashMap::new(),
            tracked: HashSet::new(),
            savepoints: Vec::new(),
            num_ops: 0,
            estimated_size: 0,
            num_commits: 0,
            num_intermediate_commits: 0,
            wait_for_sync,
            running: true,
        }
    }

    // --- accessors ---

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn hints(&self) -> TransactionHints {
        self.hints
    }

    pub fn has_hint(&self, hint: TransactionHints) -> bool {
        self.hints.contains(hint)
    }

    pub fn is_single_operation(&self) -> bool {
        self.has_hint(TransactionHints::SINGLE_OPERATION)
    }

    pub fn is_exclusive(&self) -> bool {
        self.has_hint(TransactionHints::EXCLUSIVE)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_operations(&self) -> bool {
        !self.ops.is_empty()
    }

    pub fn num_commits(&self) -> u64 {
        self.num_commits
    }

    pub fn num_intermediate_commits(&self) -> u64 {
        self.num_intermediate_commits
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut TransactionOptions {
        &mut self.options
    }

    pub fn snapshot(&self) -> &EngineSnapshot {
        &self.snapshot
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.snapshot.sequence_number()
    }

    /// Accumulate a waitForSync request from an operation.
    pub fn track_wait_for_sync(&mut self, wait: bool) {
        self.wait_for_sync |= wait;
    }

    /// Replace the MVCC snapshot with a fresh one, permitted only while no
    /// uncommitted operations are pending. Returns whether a refresh
    /// happened; used by the read retry path for freshly inserted documents.
    pub fn refresh_snapshot_if_unused(&mut self) -> bool {
        if self.has_operations() {
            return false;
        }
        self.snapshot = EngineSnapshot::new(Arc::clone(&self.db));
        true
    }

    // --- reads ---

    /// Read-own-writes point lookup: the overlay shadows the snapshot.
    pub fn get(&self, cf: ColumnFamilyId, key: &[u8]) -> CoralResult<Option<Vec<u8>>> {
        if let Some(per_cf) = self.overlay.get(&cf) {
            if let Some(entry) = per_cf.get(key) {
                return Ok(entry.clone());
            }
        }
        self.snapshot.get(cf, key)
    }

    /// First visible entry with `from <= key < end`, merging the overlay over
    /// the snapshot. Engine range deletes are not reflected here; they only
    /// occur on the exclusive truncate path which bypasses the transaction.
    pub fn next_in_range(
        &self,
        cf: ColumnFamilyId,
        from: &[u8],
        end: &[u8],
    ) -> CoralResult<Option<(Vec<u8>, Vec<u8>)>> {
        let empty = BTreeMap::new();
        let per_cf = self.overlay.get(&cf).unwrap_or(&empty);
        let mut cursor: Vec<u8> = from.to_vec();
        loop {
            let snap_next = self.snapshot.seek(cf, &cursor, end)?;
            let overlay_next = per_cf
                .range(cursor.clone()..end.to_vec())
                .next()
                .map(|(k, v)| (k.clone(), v.clone()));

            let use_overlay = match (&snap_next, &overlay_next) {
                (None, None) => return Ok(None),
                (Some(_), None) => false,
                (None, Some(_)) => true,
                // on equal keys the overlay shadows the snapshot
                (Some((sk, _)), Some((ok, _))) => ok <= sk,
            };
            if !use_overlay {
                return Ok(snap_next);
            }
            let (key, value) = overlay_next.expect("overlay entry checked above");
            match value {
                Some(v) => return Ok(Some((key, v))),
                None => {
                    // deleted in this transaction; skip past the key
                    cursor = key;
                    cursor.push(0);
                }
            }
        }
    }

    // --- writes ---

    fn overlay_set(&mut self, cf: ColumnFamilyId, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.overlay.entry(cf).or_default().insert(key, value);
    }

    pub fn put(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> CoralResult<()> {
        self.assert_running()?;
        self.estimated_size += (key.len() + value.len()) as u64;
        self.ops.push(BatchOp::Put {
            cf,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self.overlay_set(cf, key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    pub fn delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> CoralResult<()> {
        self.assert_running()?;
        self.estimated_size += key.len() as u64;
        self.ops.push(BatchOp::Delete {
            cf,
            key: key.to_vec(),
        });
        self.overlay_set(cf, key.to_vec(), None);
        Ok(())
    }

    /// Append a log record binding the following mutations to a collection
    /// and revision, and pin a blocker for the collection if this is its
    /// first operation in the transaction.
    pub fn prepare_operation(
        &mut self,
        collection_id: CollectionId,
        revision: RevisionId,
        operation: OperationType,
    ) -> CoralResult<()> {
        self.assert_running()?;
        if self.tracked.insert(collection_id) {
            self.sink
                .place_blocker(collection_id, self.id, self.db.latest_sequence_number());
        }
        let record = LogValue::DocumentOperation {
            collection_id,
            revision,
            operation,
        };
        self.ops.push(BatchOp::Log {
            key: next_tick().to_be_bytes().to_vec(),
            value: record.encode(),
        });
        Ok(())
    }

    // --- savepoints ---

    pub fn create_savepoint(&mut self) -> SavepointToken {
        self.savepoints.push(SavepointEntry {
            ops_len: self.ops.len(),
            num_ops: self.num_ops,
            estimated_size: self.estimated_size,
            counters: self.counters.clone(),
        });
        SavepointToken(self.savepoints.len() - 1)
    }

    /// Discard the savepoint after a successful operation. If an
    /// intermediate commit fired in between, the stack was already replaced
    /// and there is nothing to discard.
    pub fn finish_savepoint(&mut self, token: SavepointToken, has_intermediate_commit: bool) {
        if has_intermediate_commit {
            debug_assert!(self.savepoints.is_empty());
            return;
        }
        debug_assert_eq!(token.0 + 1, self.savepoints.len());
        self.savepoints.truncate(token.0);
    }

    /// Roll the transaction back to the savepoint: truncate the op list,
    /// restore counters, rebuild the overlay.
    pub fn rollback_to_savepoint(&mut self, token: SavepointToken) -> CoralResult<()> {
        let entry = self
            .savepoints
            .drain(token.0..)
            .next()
            .ok_or_else(|| CoralError::internal("savepoint token is stale"))?;
        self.ops.truncate(entry.ops_len);
        self.num_ops = entry.num_ops;
        self.estimated_size = entry.estimated_size;
        self.counters = entry.counters;
        self.rebuild_overlay();
        Ok(())
    }

    fn rebuild_overlay(&mut self) {
        self.overlay.clear();
        let replay: Vec<(ColumnFamilyId, Vec<u8>, Option<Vec<u8>>)> = self
            .ops
            .iter()
            .filter_map(|op| match op {
                BatchOp::Put { cf, key, value } => Some((*cf, key.clone(), Some(value.clone()))),
                BatchOp::Delete { cf, key } => Some((*cf, key.clone(), None)),
                BatchOp::Log { .. } => None,
            })
            .collect();
        for (cf, key, value) in replay {
            self.overlay_set(cf, key, value);
        }
    }

    // --- operation accounting & intermediate commits ---

    /// Account one finished document operation. Fires an intermediate commit
    /// when thresholds are reached and the hint allows; returns whether one
    /// was performed.
    pub fn add_operation(
        &mut self,
        collection_id: CollectionId,
        revision: RevisionId,
        operation: OperationType,
    ) -> CoralResult<bool> {
        self.assert_running()?;
        self.counters
            .entry(collection_id)
            .or_default()
            .track(operation, revision);
        self.num_ops += 1;

        let should_commit = self.has_hint(TransactionHints::INTERMEDIATE_COMMITS)
            && (self.num_ops >= self.options.intermediate_commit_count
                || self.estimated_size >= self.options.intermediate_commit_size);
        if should_commit {
            self.intermediate_commit()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn intermediate_commit(&mut self) -> CoralResult<()> {
        tracing::debug!(
            tid = self.id.id(),
            num_ops = self.num_ops,
            "performing intermediate commit"
        );
        let seq = self.write_batch()?;
        self.apply_counters(seq);
        // keep blockers but move them up to the new snapshot
        for cid in &self.tracked {
            self.sink.place_blocker(*cid, self.id, seq);
        }
        self.ops.clear();
        self.overlay.clear();
        self.savepoints.clear();
        self.num_ops = 0;
        self.estimated_size = 0;
        self.num_intermediate_commits += 1;
        self.num_commits += 1;
        self.snapshot = EngineSnapshot::new(Arc::clone(&self.db));
        Ok(())
    }

    // --- commit / abort ---

    /// Commit the transaction, returning the post-commit sequence number.
    pub fn commit(mut self) -> CoralResult<SequenceNumber> {
        self.assert_running()?;
        let seq = if self.ops.is_empty() {
            self.db.latest_sequence_number()
        } else {
            let seq = self.write_batch()?;
            self.apply_counters(seq);
            self.num_commits += 1;
            seq
        };
        self.release_blockers();
        self.running = false;
        Ok(seq)
    }

    /// Abort: discard all pending operations.
    pub fn abort(mut self) -> CoralResult<()> {
        self.assert_running()?;
        self.ops.clear();
        self.overlay.clear();
        self.counters.clear();
        self.release_blockers();
        self.running = false;
        Ok(())
    }

    fn write_batch(&mut self) -> CoralResult<SequenceNumber> {
        let mut batch = rocksdb::WriteBatch::default();
        for op in &self.ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    let handle = cf_handle(&self.db, *cf)?;
                    batch.put_cf(&handle, key, value);
                }
                BatchOp::Delete { cf, key } => {
                    let handle = cf_handle(&self.db, *cf)?;
                    batch.delete_cf(&handle, key);
                }
                BatchOp::Log { key, value } => {
                    let handle = cf_handle(&self.db, ColumnFamilyId::Wal)?;
                    batch.put_cf(&handle, key, value);
                }
            }
        }
        let mut write_options = rocksdb::WriteOptions::default();
        write_options.set_sync(self.wait_for_sync);
        self.db
            .write_opt(batch, &write_options)
            .map_err(convert_rocks_error)?;
        Ok(self.db.latest_sequence_number())
    }

    fn apply_counters(&mut self, seq: SequenceNumber) {
        for (cid, ops) in self.counters.drain() {
            self.sink
                .adjust_counts(cid, ops.count_delta(), ops.last_revision, seq);
        }
    }

    fn release_blockers(&mut self) {
        for cid in self.tracked.drain() {
            self.sink.remove_blocker(cid, self.id);
        }
    }

    fn assert_running(&self) -> CoralResult<()> {
        if !self.running {
            return Err(CoralError::new(
                ErrorCode::Internal,
                "transaction is not running",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocksdb::{ColumnFamilyDescriptor, Options};
    use std::sync::Mutex;

    struct RecordingSink {
        deltas: Mutex<Vec<(CollectionId, i64)>>,
        blockers: Mutex<HashMap<u64, SequenceNumber>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deltas: Mutex::new(Vec::new()),
                blockers: Mutex::new(HashMap::new()),
            })
        }
    }

    impl MetaSink for RecordingSink {
        fn place_blocker(&self, cid: CollectionId, _tid: TransactionId, seq: SequenceNumber) {
            self.blockers
                .lock()
                .expect("sink lock")
                .insert(cid.id(), seq);
        }
        fn remove_blocker(&self, cid: CollectionId, _tid: TransactionId) {
            self.blockers.lock().expect("sink lock").remove(&cid.id());
        }
        fn adjust_counts(
            &self,
            cid: CollectionId,
            delta: i64,
            _revision: RevisionId,
            _seq: SequenceNumber,
        ) {
            self.deltas.lock().expect("sink lock").push((cid, delta));
        }
    }

    fn open_db() -> (tempfile::TempDir, Arc<RocksDb>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let cfs: Vec<ColumnFamilyDescriptor> = crate::ALL_COLUMN_FAMILIES
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), Options::default()))
            .collect();
        let db = RocksDb::open_cf_descriptors(&options, dir.path(), cfs).expect("open rocksdb");
        (dir, Arc::new(db))
    }

    fn begin(db: &Arc<RocksDb>, sink: &Arc<RecordingSink>, hints: TransactionHints) -> Transaction {
        Transaction::begin(
            Arc::clone(db),
            Arc::clone(sink) as Arc<dyn MetaSink>,
            hints,
            TransactionOptions::default(),
        )
    }

    #[test]
    fn test_read_own_writes() {
        let (_dir, db) = open_db();
        let sink = RecordingSink::new();
        let mut trx = begin(&db, &sink, TransactionHints::empty());

        trx.put(ColumnFamilyId::Documents, b"k1", b"v1").expect("put");
        assert_eq!(
            trx.get(ColumnFamilyId::Documents, b"k1").expect("get"),
            Some(b"v1".to_vec())
        );
        trx.delete(ColumnFamilyId::Documents, b"k1").expect("delete");
        assert_eq!(trx.get(ColumnFamilyId::Documents, b"k1").expect("get"), None);
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let (_dir, db) = open_db();
        let sink = RecordingSink::new();
        let cid = CollectionId::new(9);

        let mut trx = begin(&db, &sink, TransactionHints::empty());
        trx.prepare_operation(cid, RevisionId::new(1), OperationType::Insert)
            .expect("prepare");
        trx.put(ColumnFamilyId::Documents, b"k1", b"v1").expect("put");
        trx.add_operation(cid, RevisionId::new(1), OperationType::Insert)
            .expect("add op");
        trx.commit().expect("commit");

        let trx2 = begin(&db, &sink, TransactionHints::empty());
        assert_eq!(
            trx2.get(ColumnFamilyId::Documents, b"k1").expect("get"),
            Some(b"v1".to_vec())
        );
        assert_eq!(
            sink.deltas.lock().expect("sink lock").as_slice(),
            &[(cid, 1)]
        );
        assert!(sink.blockers.lock().expect("sink lock").is_empty());
    }

    #[test]
    fn test_snapshot_isolation() {
        let (_dir, db) = open_db();
        let sink = RecordingSink::new();
        let cid = CollectionId::new(9);

        let reader = begin(&db, &sink, TransactionHints::empty());

        let mut writer = begin(&db, &sink, TransactionHints::empty());
        writer
            .prepare_operation(cid, RevisionId::new(1), OperationType::Insert)
            .expect("prepare");
        writer.put(ColumnFamilyId::Documents, b"k1", b"v1").expect("put");
        writer
            .add_operation(cid, RevisionId::new(1), OperationType::Insert)
            .expect("add op");
        writer.commit().expect("commit");

        // the reader's snapshot predates the commit
        assert_eq!(reader.get(ColumnFamilyId::Documents, b"k1").expect("get"), None);
    }

    #[test]
    fn test_savepoint_rollback_restores_state() {
        let (_dir, db) = open_db();
        let sink = RecordingSink::new();
        let cid = CollectionId::new(9);
        let mut trx = begin(&db, &sink, TransactionHints::empty());

        trx.put(ColumnFamilyId::Documents, b"k1", b"v1").expect("put");
        trx.add_operation(cid, RevisionId::new(1), OperationType::Insert)
            .expect("add op");

        let sp = trx.create_savepoint();
        trx.put(ColumnFamilyId::Documents, b"k2", b"v2").expect("put");
        trx.delete(ColumnFamilyId::Documents, b"k1").expect("delete");
        trx.rollback_to_savepoint(sp).expect("rollback");

        assert_eq!(
            trx.get(ColumnFamilyId::Documents, b"k1").expect("get"),
            Some(b"v1".to_vec()),
            "rollback must restore the pre-savepoint overlay"
        );
        assert_eq!(trx.get(ColumnFamilyId::Documents, b"k2").expect("get"), None);
        assert_eq!(
            trx.counters.get(&cid).map(|c| c.inserts),
            Some(1),
            "counters snapshot must survive rollback"
        );
    }

    #[test]
    fn test_intermediate_commit_fires_and_renews() {
        let (_dir, db) = open_db();
        let sink = RecordingSink::new();
        let cid = CollectionId::new(9);
        let mut trx = Transaction::begin(
            Arc::clone(&db),
            Arc::clone(&sink) as Arc<dyn MetaSink>,
            TransactionHints::INTERMEDIATE_COMMITS,
            TransactionOptions {
                intermediate_commit_count: 2,
                ..Default::default()
            },
        );

        for i in 0..2u8 {
            let sp = trx.create_savepoint();
            trx.put(ColumnFamilyId::Documents, &[b'k', i], b"v").expect("put");
            let intermediate = trx
                .add_operation(cid, RevisionId::new(i as u64 + 1), OperationType::Insert)
                .expect("add op");
            trx.finish_savepoint(sp, intermediate);
            if i == 1 {
                assert!(intermediate, "second operation must trigger the commit");
            }
        }

        assert_eq!(trx.num_intermediate_commits(), 1);
        assert!(!trx.has_operations(), "batch must be clear after the commit");
        // the blocker now pins the renewed snapshot, not the original one
        assert!(sink.blockers.lock().expect("sink lock").contains_key(&cid.id()));
        trx.commit().expect("commit");
        assert!(sink.blockers.lock().expect("sink lock").is_empty());
    }

    #[test]
    fn test_next_in_range_merges_overlay() {
        let (_dir, db) = open_db();
        let sink = RecordingSink::new();
        let cid = CollectionId::new(9);

        // commit a base row
        let mut setup = begin(&db, &sink, TransactionHints::empty());
        setup.put(ColumnFamilyId::Documents, b"a", b"base").expect("put");
        setup.put(ColumnFamilyId::Documents, b"c", b"base").expect("put");
        setup
            .add_operation(cid, RevisionId::new(1), OperationType::Insert)
            .expect("add");
        setup.commit().expect("commit");

        let mut trx = begin(&db, &sink, TransactionHints::empty());
        trx.delete(ColumnFamilyId::Documents, b"a").expect("delete");
        trx.put(ColumnFamilyId::Documents, b"b", b"new").expect("put");

        let first = trx
            .next_in_range(ColumnFamilyId::Documents, b"a", b"z")
            .expect("seek")
            .expect("row");
        assert_eq!(first, (b"b".to_vec(), b"new".to_vec()));

        let second = trx
            .next_in_range(ColumnFamilyId::Documents, b"b\0", b"z")
            .expect("seek")
            .expect("row");
        assert_eq!(second, (b"c".to_vec(), b"base".to_vec()));
    }

    #[test]
    fn test_abort_discards_everything() {
        let (_dir, db) = open_db();
        let sink = RecordingSink::new();
        let cid = CollectionId::new(9);

        let mut trx = begin(&db, &sink, TransactionHints::empty());
        trx.prepare_operation(cid, RevisionId::new(1), OperationType::Insert)
            .expect("prepare");
        trx.put(ColumnFamilyId::Documents, b"k1", b"v1").expect("put");
        trx.abort().expect("abort");

        let reader = begin(&db, &sink, TransactionHints::empty());
        assert_eq!(reader.get(ColumnFamilyId::Documents, b"k1").expect("get"), None);
        assert!(sink.deltas.lock().expect("sink lock").is_empty());
        assert!(sink.blockers.lock().expect("sink lock").is_empty());
    }
}
