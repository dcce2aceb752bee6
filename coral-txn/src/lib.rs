//! CORAL Transaction Layer
//!
//! Transactions collect their mutations in an in-memory overlay batch that is
//! written to RocksDB atomically at commit. The overlay provides
//! read-own-writes, savepoints (by position), per-collection operation
//! accounting, write-ahead log records, and inline intermediate commits.

mod hints;
mod rocks;
mod snapshot;
mod transaction;
mod wal;

pub use hints::TransactionHints;
pub use rocks::{cf_handle, convert_rocks_error, ColumnFamilyId, RocksDb, ALL_COLUMN_FAMILIES};
pub use snapshot::EngineSnapshot;
pub use transaction::{
    CollectionOperations, MetaSink, SavepointToken, Transaction, TransactionOptions,
};
pub use wal::{LogValue, OperationType};
