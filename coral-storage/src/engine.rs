//! Storage engine bootstrap.
//!
//! A data directory carries a single-line marker file named `ENGINE` naming
//! the engine that created it. On start the marker must match the configured
//! engine or startup aborts; a missing marker is written. Engine selection is
//! process-wide and happens once, before any collection is opened.

use coral_core::{CoralError, CoralResult, ErrorCode, SequenceNumber};
use coral_txn::{cf_handle, convert_rocks_error, ColumnFamilyId, RocksDb, ALL_COLUMN_FAMILIES};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Name of the engine marker file inside the data directory.
pub const ENGINE_FILE: &str = "ENGINE";

// ============================================================================
// ENGINE SELECTION
// ============================================================================

/// Available storage engines. The log-structured engine is the default and
/// currently the only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Rocksdb,
}

impl EngineKind {
    pub const fn name(&self) -> &'static str {
        match self {
            EngineKind::Rocksdb => "rocksdb",
        }
    }
}

impl Default for EngineKind {
    fn default() -> Self {
        EngineKind::Rocksdb
    }
}

static SELECTED_ENGINE: OnceLock<EngineKind> = OnceLock::new();

/// Check the `ENGINE` marker file against the configured engine, writing it
/// on first start. Re-selection of a different engine after serving started
/// is refused.
pub fn select_engine(data_directory: &Path, configured: EngineKind) -> CoralResult<EngineKind> {
    if let Some(previous) = SELECTED_ENGINE.get() {
        if *previous != configured {
            return Err(CoralError::internal(
                "engine was already selected for this process",
            ));
        }
    }

    let marker = data_directory.join(ENGINE_FILE);
    if marker.exists() {
        let content = std::fs::read_to_string(&marker)
            .map_err(|e| CoralError::new(ErrorCode::StorageEngine, format!("unable to read '{}': {}", marker.display(), e)))?;
        let stored = content.trim();
        if stored != configured.name() {
            return Err(CoralError::new(
                ErrorCode::Internal,
                format!(
                    "content of '{}' file is '{}', but configured engine is '{}'",
                    marker.display(),
                    stored,
                    configured.name()
                ),
            ));
        }
        tracing::debug!(engine = stored, "using previously selected engine");
    } else {
        std::fs::create_dir_all(data_directory).map_err(|e| {
            CoralError::new(ErrorCode::StorageEngine, format!("unable to create data directory: {}", e))
        })?;
        std::fs::write(&marker, configured.name()).map_err(|e| {
            CoralError::new(
                ErrorCode::StorageEngine,
                format!("unable to write '{}': {}", marker.display(), e),
            )
        })?;
        tracing::info!(engine = configured.name(), "selected storage engine");
    }

    let _ = SELECTED_ENGINE.set(configured);
    Ok(configured)
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Tunables of the storage engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub data_directory: PathBuf,
    /// Number of cache buckets per collection cache.
    pub cache_buckets: usize,
    /// Entries per cache bucket before LRU eviction kicks in.
    pub cache_bucket_capacity: usize,
    /// Document count at which truncate switches to engine range deletes.
    pub range_delete_threshold: u64,
    /// Range deletes are only permissible outside a cluster.
    pub is_single_server: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("coral-data"),
            cache_buckets: 16,
            cache_bucket_capacity: 1024,
            range_delete_threshold: 32 * 1024,
            is_single_server: true,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The open RocksDB instance plus engine-level bookkeeping. Shared by every
/// collection of every database.
pub struct StorageEngine {
    config: EngineConfig,
    db: Arc<RocksDb>,
    stopping: AtomicBool,
}

impl StorageEngine {
    /// Select the engine for the data directory and open it.
    pub fn open(config: EngineConfig) -> CoralResult<Arc<Self>> {
        select_engine(&config.data_directory, EngineKind::default())?;

        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let descriptors: Vec<ColumnFamilyDescriptor> = ALL_COLUMN_FAMILIES
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), Options::default()))
            .collect();
        let db = RocksDb::open_cf_descriptors(&options, &config.data_directory, descriptors)
            .map_err(convert_rocks_error)?;

        Ok(Arc::new(Self {
            config,
            db: Arc::new(db),
            stopping: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<RocksDb> {
        &self.db
    }

    pub fn latest_sequence_number(&self) -> SequenceNumber {
        self.db.latest_sequence_number()
    }

    /// Cooperative shutdown flag, polled at loop headers by range scans and
    /// long-running maintenance.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    /// Write a raw batch, bypassing any transaction. Used by the
    /// range-delete truncate path and by definition markers.
    pub fn write_raw_batch(&self, batch: WriteBatch) -> CoralResult<SequenceNumber> {
        self.db.write(batch).map_err(convert_rocks_error)?;
        Ok(self.db.latest_sequence_number())
    }

    // --- definitions column family ---

    fn definition_key(collection_id: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.push(b'c');
        key.extend_from_slice(&collection_id.to_be_bytes());
        key
    }

    /// Persist the collection marker: the full definition document including
    /// the current index list. Crash recovery replays these to rebuild the
    /// catalog, so mid-build interim states are recoverable.
    pub fn write_collection_marker(
        &self,
        collection_id: u64,
        definition: &serde_json::Value,
        log: Option<coral_txn::LogValue>,
    ) -> CoralResult<()> {
        let handle = cf_handle(&self.db, ColumnFamilyId::Definitions)?;
        let mut batch = WriteBatch::default();
        let body = serde_json::to_vec(definition)
            .map_err(|e| CoralError::internal(format!("definition not serializable: {}", e)))?;
        batch.put_cf(&handle, Self::definition_key(collection_id), body);
        if let Some(record) = log {
            let wal = cf_handle(&self.db, ColumnFamilyId::Wal)?;
            batch.put_cf(&wal, coral_core::next_tick().to_be_bytes(), record.encode());
        }
        self.db.write(batch).map_err(convert_rocks_error)?;
        Ok(())
    }

    /// Read back a collection marker.
    pub fn read_collection_marker(&self, collection_id: u64) -> CoralResult<Option<serde_json::Value>> {
        let handle = cf_handle(&self.db, ColumnFamilyId::Definitions)?;
        match self
            .db
            .get_cf(&handle, Self::definition_key(collection_id))
            .map_err(convert_rocks_error)?
        {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    CoralError::new(
                        ErrorCode::StorageCorrupted,
                        format!("unreadable collection marker: {}", e),
                    )
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Remove a collection marker (drop).
    pub fn remove_collection_marker(&self, collection_id: u64) -> CoralResult<()> {
        let handle = cf_handle(&self.db, ColumnFamilyId::Definitions)?;
        self.db
            .delete_cf(&handle, Self::definition_key(collection_id))
            .map_err(convert_rocks_error)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(dir: &tempfile::TempDir) -> EngineConfig {
        EngineConfig {
            data_directory: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_engine_file_written_on_first_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = StorageEngine::open(config_for(&dir)).expect("open");
        drop(engine);
        let content = std::fs::read_to_string(dir.path().join(ENGINE_FILE)).expect("marker file");
        assert_eq!(content.trim(), "rocksdb");
    }

    #[test]
    fn test_engine_file_mismatch_aborts() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(ENGINE_FILE), "pagestore").expect("write marker");
        let err = select_engine(dir.path(), EngineKind::Rocksdb).expect_err("mismatch must abort");
        assert!(err.message.contains("pagestore"));
    }

    #[test]
    fn test_collection_marker_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = StorageEngine::open(config_for(&dir)).expect("open");
        let def = serde_json::json!({"name": "users", "indexes": []});
        engine
            .write_collection_marker(7, &def, None)
            .expect("write marker");
        let back = engine
            .read_collection_marker(7)
            .expect("read marker")
            .expect("marker present");
        assert_eq!(back, def);
        engine.remove_collection_marker(7).expect("remove marker");
        assert!(engine.read_collection_marker(7).expect("read").is_none());
    }
}
