//! Database (vocbase): the named registry of collections.

use crate::collection::PhysicalCollection;
use crate::engine::StorageEngine;
use crate::meta::MetaRegistry;
use coral_core::{
    CollectionDefinition, CollectionStatus, CoralError, CoralResult, DatabaseId, ErrorCode,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct Database {
    id: DatabaseId,
    name: String,
    engine: Arc<StorageEngine>,
    metas: Arc<MetaRegistry>,
    collections: RwLock<HashMap<String, Arc<PhysicalCollection>>>,
    is_db_server: bool,
}

impl Database {
    pub fn new(engine: Arc<StorageEngine>, id: DatabaseId, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            engine,
            metas: MetaRegistry::new(),
            collections: RwLock::new(HashMap::new()),
            is_db_server: false,
        })
    }

    pub fn id(&self) -> DatabaseId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn metas(&self) -> &Arc<MetaRegistry> {
        &self.metas
    }

    /// Create a collection from a definition. Fails on duplicate names.
    pub fn create_collection(
        &self,
        mut definition: CollectionDefinition,
    ) -> CoralResult<Arc<PhysicalCollection>> {
        definition.database_id = self.id;
        definition.status = CollectionStatus::Loaded;
        definition.validate()?;

        let mut collections = match self.collections.write() {
            Ok(collections) => collections,
            Err(poisoned) => poisoned.into_inner(),
        };
        if collections.contains_key(&definition.name) {
            return Err(CoralError::new(
                ErrorCode::DuplicateName,
                format!("duplicate collection name '{}'", definition.name),
            ));
        }
        let name = definition.name.clone();
        let collection = PhysicalCollection::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.metas),
            definition,
            self.is_db_server,
        )?;
        collection.load();
        collections.insert(name.clone(), Arc::clone(&collection));
        tracing::info!(database = %self.name, collection = %name, "created collection");
        Ok(collection)
    }

    pub fn collection(&self, name: &str) -> CoralResult<Arc<PhysicalCollection>> {
        self.collections
            .read()
            .ok()
            .and_then(|collections| collections.get(name).cloned())
            .ok_or_else(|| {
                CoralError::new(
                    ErrorCode::CollectionNotFound,
                    format!("collection or view not found: {}", name),
                )
            })
    }

    pub fn collections(&self) -> Vec<Arc<PhysicalCollection>> {
        self.collections
            .read()
            .map(|collections| collections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a collection. System collections require `allow_drop_system`.
    pub fn drop_collection(&self, name: &str, allow_drop_system: bool) -> CoralResult<()> {
        let collection = self.collection(name)?;
        let def = collection.definition();
        if def.is_system && !allow_drop_system {
            return Err(CoralError::new(
                ErrorCode::Forbidden,
                "cannot drop a system collection",
            ));
        }
        collection.unload();
        collection.drop_data()?;
        if let Ok(mut collections) = self.collections.write() {
            collections.remove(name);
        }
        tracing::info!(database = %self.name, collection = %name, "dropped collection");
        Ok(())
    }

    /// Rename a collection, keeping its globally unique id.
    pub fn rename_collection(&self, old_name: &str, new_name: &str) -> CoralResult<()> {
        let mut collections = match self.collections.write() {
            Ok(collections) => collections,
            Err(poisoned) => poisoned.into_inner(),
        };
        if collections.contains_key(new_name) {
            return Err(CoralError::new(
                ErrorCode::DuplicateName,
                format!("duplicate collection name '{}'", new_name),
            ));
        }
        let Some(collection) = collections.remove(old_name) else {
            return Err(CoralError::from_code(ErrorCode::CollectionNotFound));
        };
        collection.rename(new_name)?;
        collections.insert(new_name.to_string(), collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;

    fn open_database() -> (tempfile::TempDir, Arc<Database>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = StorageEngine::open(EngineConfig {
            data_directory: dir.path().to_path_buf(),
            ..Default::default()
        })
        .expect("open engine");
        let db = Database::new(engine, DatabaseId::new(1), "_system");
        (dir, db)
    }

    #[test]
    fn test_create_get_drop_collection() {
        let (_dir, db) = open_database();
        db.create_collection(CollectionDefinition::document("users"))
            .expect("create");
        let collection = db.collection("users").expect("lookup");
        assert_eq!(collection.name(), "users");

        db.drop_collection("users", false).expect("drop");
        let err = db.collection("users").expect_err("collection is gone");
        assert!(err.is(ErrorCode::CollectionNotFound));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (_dir, db) = open_database();
        db.create_collection(CollectionDefinition::document("users"))
            .expect("create");
        let err = db
            .create_collection(CollectionDefinition::document("users"))
            .expect_err("duplicate must fail");
        assert!(err.is(ErrorCode::DuplicateName));
    }

    #[test]
    fn test_system_collection_drop_guard() {
        let (_dir, db) = open_database();
        let mut def = CollectionDefinition::document("_internal");
        def.is_system = true;
        db.create_collection(def).expect("create");
        assert!(db.drop_collection("_internal", false).is_err());
        db.drop_collection("_internal", true).expect("forced drop");
    }

    #[test]
    fn test_rename_collection() {
        let (_dir, db) = open_database();
        db.create_collection(CollectionDefinition::document("old"))
            .expect("create");
        db.rename_collection("old", "new").expect("rename");
        assert!(db.collection("old").is_err());
        assert_eq!(db.collection("new").expect("lookup").name(), "new");
    }
}
