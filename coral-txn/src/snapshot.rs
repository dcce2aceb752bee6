//! MVCC read snapshots.

use crate::rocks::{cf_handle, convert_rocks_error, ColumnFamilyId, RocksDb};
use coral_core::{CoralResult, SequenceNumber};
use rocksdb::{Direction, IteratorMode, SnapshotWithThreadMode};
use std::sync::Arc;

/// A point-in-time view of the database.
///
/// The snapshot borrows the database it was taken on; we keep the database
/// alive through the `Arc` held next to it and erase the borrow's lifetime.
/// Field order matters: `snap` must drop before `db`.
pub struct EngineSnapshot {
    snap: SnapshotWithThreadMode<'static, RocksDb>,
    db: Arc<RocksDb>,
    seq: SequenceNumber,
}

impl EngineSnapshot {
    pub fn new(db: Arc<RocksDb>) -> Self {
        let seq = db.latest_sequence_number();
        // SAFETY: the snapshot only dereferences the database, which stays
        // alive for at least as long as this struct via the `db` Arc, and the
        // field order above guarantees the snapshot is dropped first.
        let snap = unsafe {
            std::mem::transmute::<SnapshotWithThreadMode<'_, RocksDb>, SnapshotWithThreadMode<'static, RocksDb>>(
                db.snapshot(),
            )
        };
        Self { snap, db, seq }
    }

    /// The engine sequence number at which this snapshot was taken.
    pub fn sequence_number(&self) -> SequenceNumber {
        self.seq
    }

    /// Point lookup under the snapshot.
    pub fn get(&self, cf: ColumnFamilyId, key: &[u8]) -> CoralResult<Option<Vec<u8>>> {
        let handle = cf_handle(&self.db, cf)?;
        self.snap.get_cf(&handle, key).map_err(convert_rocks_error)
    }

    /// First entry with `from <= key < end` under the snapshot.
    pub fn seek(
        &self,
        cf: ColumnFamilyId,
        from: &[u8],
        end: &[u8],
    ) -> CoralResult<Option<(Vec<u8>, Vec<u8>)>> {
        let handle = cf_handle(&self.db, cf)?;
        let mut iter = self
            .snap
            .iterator_cf(&handle, IteratorMode::From(from, Direction::Forward));
        match iter.next() {
            Some(entry) => {
                let (key, value) = entry.map_err(convert_rocks_error)?;
                if key.as_ref() < end {
                    Ok(Some((key.into_vec(), value.into_vec())))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Collect up to `limit` entries in `[from, end)` under the snapshot.
    pub fn scan(
        &self,
        cf: ColumnFamilyId,
        from: &[u8],
        end: &[u8],
        limit: usize,
    ) -> CoralResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = cf_handle(&self.db, cf)?;
        let iter = self
            .snap
            .iterator_cf(&handle, IteratorMode::From(from, Direction::Forward));
        let mut out = Vec::new();
        for entry in iter {
            let (key, value) = entry.map_err(convert_rocks_error)?;
            if key.as_ref() >= end || out.len() >= limit {
                break;
            }
            out.push((key.into_vec(), value.into_vec()));
        }
        Ok(out)
    }
}
