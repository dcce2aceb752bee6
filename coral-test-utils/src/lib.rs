//! Shared test fixtures: a throwaway engine plus document builders.

use coral_core::{CollectionDefinition, DatabaseId};
use coral_storage::{Database, EngineConfig, StorageEngine};
use serde_json::{json, Value};
use std::sync::Arc;

/// A temporary engine with a `_system` database; the data directory lives
/// until the fixture drops.
pub struct TestEngine {
    _dir: tempfile::TempDir,
    pub engine: Arc<StorageEngine>,
    pub database: Arc<Database>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir for test engine");
        let mut config = EngineConfig {
            data_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        configure(&mut config);
        let engine = StorageEngine::open(config).expect("open test engine");
        let database = Database::new(Arc::clone(&engine), DatabaseId::new(1), "_system");
        Self {
            _dir: dir,
            engine,
            database,
        }
    }

    /// Create a plain document collection.
    pub fn collection(&self, name: &str) -> Arc<coral_storage::PhysicalCollection> {
        self.database
            .create_collection(CollectionDefinition::document(name))
            .expect("create test collection")
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A document body with the given key and one payload attribute.
pub fn doc(key: &str, value: i64) -> Value {
    json!({ "_key": key, "value": value })
}

/// A batch of documents `k0..k{n-1}`.
pub fn docs(n: usize) -> Vec<Value> {
    (0..n).map(|i| doc(&format!("k{}", i), i as i64)).collect()
}
