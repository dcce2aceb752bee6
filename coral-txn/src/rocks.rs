//! RocksDB plumbing shared by the transaction and storage layers.
//!
//! This module is the single translation point between the engine's status
//! codes and [`CoralError`] (spec: storage-engine errors are mapped in one
//! place).

use coral_core::{CoralError, CoralResult, ErrorCode};
use rocksdb::{BoundColumnFamily, DBWithThreadMode, MultiThreaded};
use std::sync::Arc;

/// The concrete database handle used everywhere.
pub type RocksDb = DBWithThreadMode<MultiThreaded>;

// ============================================================================
// COLUMN FAMILIES
// ============================================================================

/// The column families of a CORAL data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamilyId {
    /// Collection and index definitions, engine bookkeeping.
    Definitions,
    /// Document bodies, keyed `<objectId:8BE><LocalDocumentId:8BE>`.
    Documents,
    /// Primary index entries, keyed `<objectId:8BE><key-bytes>`.
    Primary,
    /// Secondary index entries.
    Index,
    /// Log records binding batches to collections and revisions.
    Wal,
}

/// All column families, in creation order.
pub const ALL_COLUMN_FAMILIES: [ColumnFamilyId; 5] = [
    ColumnFamilyId::Definitions,
    ColumnFamilyId::Documents,
    ColumnFamilyId::Primary,
    ColumnFamilyId::Index,
    ColumnFamilyId::Wal,
];

impl ColumnFamilyId {
    pub const fn name(&self) -> &'static str {
        match self {
            ColumnFamilyId::Definitions => "definitions",
            ColumnFamilyId::Documents => "documents",
            ColumnFamilyId::Primary => "primary",
            ColumnFamilyId::Index => "index",
            ColumnFamilyId::Wal => "wal",
        }
    }
}

/// Resolve a column family handle on an open database.
pub fn cf_handle(db: &RocksDb, cf: ColumnFamilyId) -> CoralResult<Arc<BoundColumnFamily<'_>>> {
    db.cf_handle(cf.name()).ok_or_else(|| {
        CoralError::new(
            ErrorCode::StorageCorrupted,
            format!("column family '{}' missing from data directory", cf.name()),
        )
    })
}

// ============================================================================
// STATUS TRANSLATION
// ============================================================================

/// Map an engine error to a stable CORAL error code.
pub fn convert_rocks_error(err: rocksdb::Error) -> CoralError {
    use rocksdb::ErrorKind;
    let code = match err.kind() {
        ErrorKind::NotFound => ErrorCode::DocumentNotFound,
        ErrorKind::Busy | ErrorKind::TryAgain => ErrorCode::Conflict,
        ErrorKind::TimedOut => ErrorCode::LockTimeout,
        ErrorKind::ShutdownInProgress => ErrorCode::ShuttingDown,
        ErrorKind::Corruption => ErrorCode::StorageCorrupted,
        _ => ErrorCode::StorageEngine,
    };
    CoralError::new(code, err.to_string())
}
