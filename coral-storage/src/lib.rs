//! CORAL Storage - RocksDB-backed collection engine
//!
//! Physical collections over a shared RocksDB instance: key codec and range
//! bounds, transactional document cache, per-collection metadata (counters,
//! revision, blockers), CRUD with MVCC snapshot reads, ordered index fan-out,
//! and online index building.

pub mod cache;
pub mod collection;
pub mod database;
pub mod engine;
pub mod indexes;
pub mod keys;
pub mod meta;

pub use cache::{CacheFind, CacheInsert, DocumentCache};
pub use collection::{OperationOptions, OperationResult, PhysicalCollection};
pub use database::Database;
pub use engine::{select_engine, EngineConfig, EngineKind, StorageEngine, ENGINE_FILE};
pub use indexes::{Index, IndexFigures, PrimaryIndex};
pub use keys::{encode_sort_key, KeyBounds};
pub use meta::{CollectionMeta, MetaRegistry};
