//! Glue between the storage engine and the query pipeline.
//!
//! The pipeline reaches collections through the [`DocumentSource`] seam;
//! this module implements it over physical collections and exposes a
//! database-backed [`BlockEnv`] for plan instantiation.

use coral_core::{CoralResult, ErrorCode};
use coral_query::executors::DocumentSource;
use coral_query::plan::BlockEnv;
use coral_storage::{Database, PhysicalCollection};
use coral_txn::TransactionHints;
use serde_json::Value;
use std::sync::Arc;

/// Full-scan source over one physical collection; every `load` runs under a
/// fresh MVCC snapshot.
pub struct CollectionDocumentSource {
    collection: Arc<PhysicalCollection>,
}

impl CollectionDocumentSource {
    pub fn new(collection: Arc<PhysicalCollection>) -> Self {
        Self { collection }
    }
}

impl DocumentSource for CollectionDocumentSource {
    fn load(&self) -> CoralResult<Vec<Value>> {
        let trx = self.collection.begin_transaction(TransactionHints::empty());
        let mut out = Vec::new();
        self.collection.get_all_iterator(&trx, |_, doc| {
            out.push(doc);
            true
        })?;
        Ok(out)
    }
}

/// [`BlockEnv`] over a database: collections resolve to scan sources.
pub struct DatabaseBlockEnv {
    database: Arc<Database>,
    is_coordinator: bool,
}

impl DatabaseBlockEnv {
    pub fn new(database: Arc<Database>, is_coordinator: bool) -> Self {
        Self {
            database,
            is_coordinator,
        }
    }
}

impl BlockEnv for DatabaseBlockEnv {
    fn document_source(&self, collection: &str) -> CoralResult<Arc<dyn DocumentSource>> {
        let collection = self.database.collection(collection).map_err(|mut e| {
            e.code = ErrorCode::CollectionNotFound;
            e
        })?;
        Ok(Arc::new(CollectionDocumentSource::new(collection)))
    }

    fn is_coordinator(&self) -> bool {
        self.is_coordinator
    }
}
