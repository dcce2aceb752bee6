//! Physical collection: CRUD over the key-value codec.
//!
//! Reads resolve the primary index under the transaction's MVCC snapshot and
//! fetch bodies through the document cache. Writes run under a savepoint,
//! fan out over the ordered index set, and account themselves with the
//! transaction. Truncate picks between engine range deletes and per-document
//! removal at runtime.

use crate::cache::{CacheFind, DocumentCache};
use crate::engine::StorageEngine;
use crate::indexes::{fill_index, EdgeIndex, Index, PersistentIndex, PrimaryIndex};
use crate::keys::{self, KeyBounds};
use crate::meta::{CollectionMeta, MetaRegistry};
use coral_core::{
    extract_key, extract_rev, merge_objects_for_update, new_object_for_insert,
    new_object_for_replace, shard_keys_changed, smart_join_attribute_changed, validate_index_order,
    CollectionDefinition, CollectionStatus, CoralError, CoralResult, ErrorCode, IndexDefinition,
    IndexId, IndexKind, KeyGenerator, LocalDocumentId, ObjectId, RevisionId, SequenceNumber,
    FROM_STRING, TO_STRING,
};
use coral_txn::{
    cf_handle, ColumnFamilyId, LogValue, MetaSink, OperationType, Transaction, TransactionHints,
};
use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// Iterative truncate never defers intermediate commits longer than this.
const TRUNCATE_INTERMEDIATE_COMMIT_CAP: u64 = 10_000;

// ============================================================================
// OPERATION OPTIONS & RESULTS
// ============================================================================

/// Per-operation modifiers, mirroring the document API surface.
#[derive(Debug, Clone)]
pub struct OperationOptions {
    pub overwrite: bool,
    pub ignore_revs: bool,
    pub is_restore: bool,
    pub wait_for_sync: bool,
    pub merge_objects: bool,
    pub keep_null: bool,
    pub return_old: bool,
    pub return_new: bool,
    pub silent: bool,
    /// Internal callers get the offending key inside conflict errors.
    pub internal: bool,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            ignore_revs: true,
            is_restore: false,
            wait_for_sync: false,
            merge_objects: true,
            keep_null: true,
            return_old: false,
            return_new: false,
            silent: false,
            internal: false,
        }
    }
}

/// Outcome of a successful document write.
#[derive(Debug, Clone, Default)]
pub struct OperationResult {
    pub key: String,
    pub revision: RevisionId,
    pub old_revision: Option<RevisionId>,
    pub new_document: Option<Value>,
    pub old_document: Option<Value>,
}

// ============================================================================
// PHYSICAL COLLECTION
// ============================================================================

pub struct PhysicalCollection {
    definition: RwLock<CollectionDefinition>,
    engine: Arc<StorageEngine>,
    metas: Arc<MetaRegistry>,
    meta: Arc<CollectionMeta>,
    object_id: ObjectId,
    key_generator: KeyGenerator,
    primary: Arc<PrimaryIndex>,
    indexes: RwLock<Vec<Arc<dyn Index>>>,
    /// Readers: document writes (for index fan-out). Writer: index creation
    /// outside its background fill phase.
    builder_lock: RwLock<()>,
    cache: RwLock<Option<Arc<DocumentCache>>>,
    /// While > 0, range-delete truncate is not permissible.
    num_index_creations: AtomicU32,
    is_db_server: bool,
}

impl PhysicalCollection {
    pub fn new(
        engine: Arc<StorageEngine>,
        metas: Arc<MetaRegistry>,
        definition: CollectionDefinition,
        is_db_server: bool,
    ) -> CoralResult<Arc<Self>> {
        definition.validate()?;
        let meta = metas.meta(definition.id);
        let object_id = ObjectId::new(coral_core::next_tick());
        let key_generator = KeyGenerator::new(definition.key_options.clone());

        let primary = Arc::new(PrimaryIndex::new(
            IndexDefinition::primary(IndexId::new(0)),
            ObjectId::new(coral_core::next_tick()),
        ));
        let mut indexes: Vec<Arc<dyn Index>> = vec![Arc::clone(&primary) as Arc<dyn Index>];
        if definition.is_edge() {
            indexes.push(Arc::new(EdgeIndex::new(
                IndexDefinition::edge(IndexId::new(1), FROM_STRING),
                ObjectId::new(coral_core::next_tick()),
            )));
            indexes.push(Arc::new(EdgeIndex::new(
                IndexDefinition::edge(IndexId::new(2), TO_STRING),
                ObjectId::new(coral_core::next_tick()),
            )));
        }
        let ordered: Vec<IndexDefinition> = indexes.iter().map(|i| i.definition().clone()).collect();
        validate_index_order(&ordered, definition.is_edge())?;

        let collection = Arc::new(Self {
            definition: RwLock::new(definition),
            engine,
            metas,
            meta,
            object_id,
            key_generator,
            primary,
            indexes: RwLock::new(indexes),
            builder_lock: RwLock::new(()),
            cache: RwLock::new(None),
            num_index_creations: AtomicU32::new(0),
            is_db_server,
        });
        collection.persist_marker(None)?;
        Ok(collection)
    }

    // --- accessors ---

    pub fn definition(&self) -> CollectionDefinition {
        self.definition.read().map(|d| d.clone()).unwrap_or_else(|p| p.into_inner().clone())
    }

    pub fn name(&self) -> String {
        self.definition().name
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn meta(&self) -> &Arc<CollectionMeta> {
        &self.meta
    }

    pub fn number_documents(&self) -> u64 {
        self.meta.number_documents()
    }

    pub fn revision(&self) -> RevisionId {
        self.meta.revision()
    }

    pub fn primary_index(&self) -> &Arc<PrimaryIndex> {
        &self.primary
    }

    pub fn indexes(&self) -> Vec<Arc<dyn Index>> {
        self.indexes
            .read()
            .map(|i| i.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    pub fn bounds(&self) -> KeyBounds {
        KeyBounds::collection_documents(self.object_id)
    }

    /// Begin a transaction against this collection's engine.
    pub fn begin_transaction(&self, hints: TransactionHints) -> Transaction {
        Transaction::begin(
            Arc::clone(self.engine.db()),
            Arc::clone(&self.metas) as Arc<dyn MetaSink>,
            hints,
            Default::default(),
        )
    }

    // --- lifecycle ---

    /// Load the collection: create the document cache when enabled.
    pub fn load(&self) {
        let enabled = self.definition().cache_enabled;
        if enabled {
            self.create_cache();
        }
        self.set_status(CollectionStatus::Loaded);
    }

    pub fn unload(&self) {
        if let Ok(mut cache) = self.cache.write() {
            if let Some(existing) = cache.take() {
                existing.begin_shutdown();
            }
        }
        self.set_status(CollectionStatus::Unloaded);
    }

    fn set_status(&self, status: CollectionStatus) {
        if let Ok(mut def) = self.definition.write() {
            def.status = status;
        }
    }

    /// The cache handle is created lazily, once, when caching is enabled.
    fn create_cache(&self) {
        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cache.is_none() {
            tracing::debug!(collection = %self.name(), "creating document cache");
            let config = self.engine.config();
            *cache = Some(Arc::new(DocumentCache::new(
                config.cache_buckets,
                config.cache_bucket_capacity,
            )));
        }
    }

    fn cache_handle(&self) -> Option<Arc<DocumentCache>> {
        self.cache.read().ok().and_then(|c| c.clone())
    }

    fn blacklist_key(&self, key: &[u8]) {
        if let Some(cache) = self.cache_handle() {
            cache.blacklist(key);
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read a document by key. A transient NotFound is retried once after
    /// refreshing the snapshot: primary-index and document writes are not
    /// strictly ordered, so a freshly inserted row may need a newer view.
    pub fn read(&self, trx: &mut Transaction, key: &str) -> CoralResult<Value> {
        let mut retried = false;
        loop {
            let result = match self.primary.lookup_key(trx, key)? {
                Some(document_id) => self.lookup_document(trx, document_id, true, true),
                None => Err(CoralError::from_code(ErrorCode::DocumentNotFound)),
            };
            match result {
                Err(e) if e.is(ErrorCode::DocumentNotFound) && !retried => {
                    if !trx.refresh_snapshot_if_unused() {
                        return Err(e);
                    }
                    retried = true;
                }
                other => return other,
            }
        }
    }

    /// Read by LocalDocumentId (token-based read).
    pub fn read_document(
        &self,
        trx: &Transaction,
        document_id: LocalDocumentId,
    ) -> CoralResult<Value> {
        self.lookup_document(trx, document_id, true, true)
    }

    /// Resolve a key to its LocalDocumentId.
    pub fn lookup_key(&self, trx: &Transaction, key: &str) -> CoralResult<Option<LocalDocumentId>> {
        self.primary.lookup_key(trx, key)
    }

    /// Resolve a key to its revision, reading the document body when the
    /// primary entry predates revision stamping.
    pub fn lookup_revision(&self, trx: &Transaction, key: &str) -> CoralResult<Option<RevisionId>> {
        let Some((document_id, revision)) = self.primary.lookup_key_and_revision(trx, key)? else {
            return Ok(None);
        };
        if let Some(revision) = revision {
            if revision.is_set() {
                return Ok(Some(revision));
            }
        }
        let doc = self.lookup_document(trx, document_id, true, false)?;
        Ok(extract_rev(&doc))
    }

    fn lookup_document(
        &self,
        trx: &Transaction,
        document_id: LocalDocumentId,
        read_cache: bool,
        fill_cache: bool,
    ) -> CoralResult<Value> {
        let key = keys::document_key(self.object_id, document_id);
        let cache = self.cache_handle();

        let mut lock_timeout = false;
        if read_cache {
            if let Some(cache) = &cache {
                match cache.find(&key) {
                    CacheFind::Hit(body) => return parse_document(&body),
                    CacheFind::Miss => {}
                    CacheFind::LockTimeout => {
                        // a concurrent writer holds the bucket; skip the fill
                        lock_timeout = true;
                    }
                }
            }
        }

        let Some(body) = trx.get(ColumnFamilyId::Documents, &key)? else {
            tracing::debug!(
                document_id = document_id.id(),
                object_id = self.object_id.id(),
                collection = %self.name(),
                "document body not found"
            );
            return Err(CoralError::from_code(ErrorCode::DocumentNotFound));
        };

        if fill_cache && !lock_timeout {
            if let Some(cache) = &cache {
                cache.insert_with_retry(&key, &body);
            }
        }
        parse_document(&body)
    }

    /// Visit all documents in LocalDocumentId order; the callback returns
    /// false to stop.
    pub fn get_all_iterator(
        &self,
        trx: &Transaction,
        mut callback: impl FnMut(LocalDocumentId, Value) -> bool,
    ) -> CoralResult<()> {
        let bounds = self.bounds();
        let mut cursor = bounds.start().to_vec();
        loop {
            if self.engine.is_stopping() {
                return Err(ErrorCode::ShuttingDown.into());
            }
            let Some((key, value)) = trx.next_in_range(bounds.column_family(), &cursor, bounds.end())?
            else {
                return Ok(());
            };
            cursor = key.clone();
            cursor.push(0);
            let document_id = keys::document_id_from_key(&key)
                .ok_or_else(|| CoralError::new(ErrorCode::StorageCorrupted, "malformed document key"))?;
            if !callback(document_id, parse_document(&value)?) {
                return Ok(());
            }
        }
    }

    /// Fetch one pseudo-random document, wrapping around the key space.
    pub fn get_any_iterator(
        &self,
        trx: &Transaction,
    ) -> CoralResult<Option<(LocalDocumentId, Value)>> {
        let bounds = self.bounds();
        let pivot = keys::document_key(self.object_id, LocalDocumentId::new(rand::thread_rng().gen()));
        let hit = match trx.next_in_range(bounds.column_family(), &pivot, bounds.end())? {
            Some(hit) => Some(hit),
            None => trx.next_in_range(bounds.column_family(), bounds.start(), bounds.end())?,
        };
        match hit {
            Some((key, value)) => {
                let document_id = keys::document_id_from_key(&key).ok_or_else(|| {
                    CoralError::new(ErrorCode::StorageCorrupted, "malformed document key")
                })?;
                Ok(Some((document_id, parse_document(&value)?)))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    pub fn insert(
        &self,
        trx: &mut Transaction,
        body: &Value,
        options: &OperationOptions,
    ) -> CoralResult<OperationResult> {
        let def = self.definition();
        let (new_doc, revision, key) =
            new_object_for_insert(body, def.is_edge(), options.is_restore, &self.key_generator)?;
        self.check_smart_join_present(&def, &new_doc)?;

        if options.overwrite {
            // probe the primary index before creating a savepoint: rolling a
            // savepoint back rebuilds the whole batch, which is expensive in
            // big transactions. On a hit the insert turns into a replace.
            if self.primary.lookup_key(trx, &key)?.is_some() {
                let mut repsert = body.clone();
                if let Some(map) = repsert.as_object_mut() {
                    map.insert(
                        coral_core::KEY_STRING.to_string(),
                        Value::String(key.clone()),
                    );
                }
                return self.replace(trx, &repsert, options);
            }
        }

        let document_id = LocalDocumentId::create();
        let _writes = self.builder_read_lock();
        let savepoint = trx.create_savepoint();
        trx.prepare_operation(def.id, revision, OperationType::Insert)?;

        match self.insert_document(trx, document_id, &new_doc, options) {
            Ok(()) => {
                trx.track_wait_for_sync(def.wait_for_sync || options.wait_for_sync);
                let intermediate = trx.add_operation(def.id, revision, OperationType::Insert)?;
                trx.finish_savepoint(savepoint, intermediate);
                Ok(OperationResult {
                    key,
                    revision,
                    old_revision: None,
                    new_document: options.return_new.then_some(new_doc),
                    old_document: None,
                })
            }
            Err(e) => {
                trx.rollback_to_savepoint(savepoint)?;
                Err(e)
            }
        }
    }

    pub fn update(
        &self,
        trx: &mut Transaction,
        body: &Value,
        options: &OperationOptions,
    ) -> CoralResult<OperationResult> {
        self.modify(trx, body, options, OperationType::Update)
    }

    pub fn replace(
        &self,
        trx: &mut Transaction,
        body: &Value,
        options: &OperationOptions,
    ) -> CoralResult<OperationResult> {
        self.modify(trx, body, options, OperationType::Replace)
    }

    fn modify(
        &self,
        trx: &mut Transaction,
        body: &Value,
        options: &OperationOptions,
        operation: OperationType,
    ) -> CoralResult<OperationResult> {
        let def = self.definition();
        let key = match body.get(coral_core::KEY_STRING) {
            None => return Err(CoralError::from_code(ErrorCode::DocumentHandleBad)),
            Some(Value::String(k)) => k.clone(),
            Some(_) => return Err(CoralError::from_code(ErrorCode::DocumentKeyBad)),
        };

        let Some(old_document_id) = self.primary.lookup_key(trx, &key)? else {
            return Err(CoralError::from_code(ErrorCode::DocumentNotFound));
        };
        let old_doc = self.lookup_document(trx, old_document_id, true, false)?;
        let old_revision = extract_rev(&old_doc).unwrap_or_default();

        if !options.ignore_revs {
            check_revision(extract_rev(body), old_revision)?;
        }

        let (new_doc, revision) = match operation {
            OperationType::Update => merge_objects_for_update(
                &old_doc,
                body,
                def.is_edge(),
                options.merge_objects,
                options.keep_null,
                options.is_restore,
            )?,
            _ => new_object_for_replace(&old_doc, body, def.is_edge(), options.is_restore)?,
        };

        if self.is_db_server {
            let is_patch = operation == OperationType::Update;
            if shard_keys_changed(&def.shard_keys, &old_doc, &new_doc, is_patch) {
                return Err(ErrorCode::MustNotChangeShardingAttributes.into());
            }
            if let Some(attribute) = &def.smart_join_attribute {
                if smart_join_attribute_changed(attribute, &old_doc, &new_doc, is_patch) {
                    return Err(ErrorCode::MustNotChangeSmartJoinAttribute.into());
                }
            }
        }

        let new_document_id = LocalDocumentId::create();
        let _writes = self.builder_read_lock();
        let savepoint = trx.create_savepoint();
        trx.prepare_operation(def.id, revision, operation)?;

        match self.update_document(trx, old_document_id, &old_doc, new_document_id, &new_doc, options)
        {
            Ok(()) => {
                trx.track_wait_for_sync(def.wait_for_sync || options.wait_for_sync);
                let intermediate = trx.add_operation(def.id, revision, operation)?;
                trx.finish_savepoint(savepoint, intermediate);
                Ok(OperationResult {
                    key,
                    revision,
                    old_revision: Some(old_revision),
                    new_document: options.return_new.then_some(new_doc),
                    old_document: options.return_old.then_some(old_doc),
                })
            }
            Err(e) => {
                trx.rollback_to_savepoint(savepoint)?;
                Err(e)
            }
        }
    }

    /// Remove a document; `selector` is either a bare key string or an object
    /// carrying `_key` (and possibly `_rev` for the precondition).
    pub fn remove(
        &self,
        trx: &mut Transaction,
        selector: &Value,
        options: &OperationOptions,
    ) -> CoralResult<OperationResult> {
        let def = self.definition();
        let key = match selector {
            Value::String(k) => k.clone(),
            Value::Object(_) => match extract_key(selector) {
                Some(k) => k.to_string(),
                None => return Err(CoralError::from_code(ErrorCode::DocumentKeyBad)),
            },
            _ => return Err(CoralError::from_code(ErrorCode::DocumentKeyBad)),
        };

        let Some(document_id) = self.primary.lookup_key(trx, &key)? else {
            return Err(CoralError::from_code(ErrorCode::DocumentNotFound));
        };
        let old_doc = self.lookup_document(trx, document_id, true, false)?;
        let old_revision = extract_rev(&old_doc).unwrap_or_default();

        if !options.ignore_revs && selector.is_object() {
            check_revision(extract_rev(selector), old_revision)?;
        }

        let _writes = self.builder_read_lock();
        let savepoint = trx.create_savepoint();
        trx.prepare_operation(def.id, old_revision, OperationType::Remove)?;

        match self.remove_document(trx, document_id, &old_doc) {
            Ok(()) => {
                trx.track_wait_for_sync(def.wait_for_sync || options.wait_for_sync);
                let intermediate =
                    trx.add_operation(def.id, RevisionId::create(), OperationType::Remove)?;
                trx.finish_savepoint(savepoint, intermediate);
                Ok(OperationResult {
                    key,
                    revision: old_revision,
                    old_revision: Some(old_revision),
                    new_document: None,
                    old_document: options.return_old.then_some(old_doc),
                })
            }
            Err(e) => {
                trx.rollback_to_savepoint(savepoint)?;
                Err(e)
            }
        }
    }

    // --- low-level document ops with index fan-out ---

    fn insert_document(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
        options: &OperationOptions,
    ) -> CoralResult<()> {
        let key = keys::document_key(self.object_id, document_id);
        if trx.has_hint(TransactionHints::GLOBAL_MANAGED) {
            // forbid caching the new version before this transaction commits
            self.blacklist_key(&key);
        }
        trx.put(ColumnFamilyId::Documents, &key, &encode_document(doc)?)?;

        if trx.has_hint(TransactionHints::NO_INDEXING) {
            return Ok(());
        }
        let indexes = self.indexes();
        let mut need_reversal = false;
        for (position, index) in indexes.iter().enumerate() {
            let result = index.insert(trx, document_id, doc);
            need_reversal = need_reversal || index.needs_reversal();
            if let Err(e) = result {
                if need_reversal && !trx.is_single_operation() {
                    reverse_index_ops(&indexes[..position], |index| {
                        index.remove(trx, document_id, doc)
                    })?;
                }
                return Err(adjust_conflict(e, options));
            }
        }
        Ok(())
    }

    fn remove_document(
        &self,
        trx: &mut Transaction,
        document_id: LocalDocumentId,
        doc: &Value,
    ) -> CoralResult<()> {
        let key = keys::document_key(self.object_id, document_id);
        self.blacklist_key(&key);
        trx.delete(ColumnFamilyId::Documents, &key)?;

        if trx.has_hint(TransactionHints::NO_INDEXING) {
            return Ok(());
        }
        let indexes = self.indexes();
        let mut need_reversal = false;
        for (position, index) in indexes.iter().enumerate() {
            let result = index.remove(trx, document_id, doc);
            need_reversal = need_reversal || index.needs_reversal();
            if let Err(e) = result {
                if need_reversal && !trx.is_single_operation() {
                    reverse_index_ops(&indexes[..position], |index| {
                        index.insert(trx, document_id, doc)
                    })?;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn update_document(
        &self,
        trx: &mut Transaction,
        old_document_id: LocalDocumentId,
        old_doc: &Value,
        new_document_id: LocalDocumentId,
        new_doc: &Value,
        options: &OperationOptions,
    ) -> CoralResult<()> {
        let old_key = keys::document_key(self.object_id, old_document_id);
        self.blacklist_key(&old_key);
        trx.delete(ColumnFamilyId::Documents, &old_key)?;

        let new_key = keys::document_key(self.object_id, new_document_id);
        trx.put(ColumnFamilyId::Documents, &new_key, &encode_document(new_doc)?)?;
        if trx.has_hint(TransactionHints::GLOBAL_MANAGED) {
            self.blacklist_key(&new_key);
        }

        if trx.has_hint(TransactionHints::NO_INDEXING) {
            return Ok(());
        }
        let indexes = self.indexes();
        let mut need_reversal = false;
        for (position, index) in indexes.iter().enumerate() {
            let result = index.update(trx, old_document_id, old_doc, new_document_id, new_doc);
            need_reversal = need_reversal || index.needs_reversal();
            if let Err(e) = result {
                if need_reversal && !trx.is_single_operation() {
                    reverse_index_ops(&indexes[..position], |index| {
                        index.update(trx, new_document_id, new_doc, old_document_id, old_doc)
                    })?;
                }
                return Err(adjust_conflict(e, options));
            }
        }
        Ok(())
    }

    // ========================================================================
    // TRUNCATE
    // ========================================================================

    pub fn truncate(&self, trx: &mut Transaction, options: &OperationOptions) -> CoralResult<()> {
        let def = self.definition();
        if trx.is_exclusive()
            && trx.has_hint(TransactionHints::ALLOW_RANGE_DELETE)
            && self.can_use_range_delete()
            && self.meta.number_documents() >= self.engine.config().range_delete_threshold
        {
            // callers must not mix the range-delete truncate with other
            // operations on the same transaction state
            debug_assert!(!trx.has_operations());
            return self.truncate_with_range_delete(trx, &def);
        }

        // cap intermediate commits so huge truncates cannot exhaust memory
        let previous = trx.options().intermediate_commit_count;
        trx.options_mut().intermediate_commit_count =
            previous.min(TRUNCATE_INTERMEDIATE_COMMIT_CAP);
        let result = self.truncate_iterative(trx, &def, options);
        trx.options_mut().intermediate_commit_count = previous;
        result
    }

    /// Non-transactional truncate: one raw batch of range deletes plus a log
    /// record, bypassing the transaction's own batch.
    fn truncate_with_range_delete(
        &self,
        trx: &mut Transaction,
        def: &CollectionDefinition,
    ) -> CoralResult<()> {
        let db = self.engine.db();

        // pre-commit sequence pins a blocker so housekeeping cannot advance
        // past the deletion
        let seq = self.engine.latest_sequence_number();
        self.meta.place_blocker(trx.id(), seq);
        let result = (|| -> CoralResult<()> {
            let mut batch = rocksdb::WriteBatch::default();
            let bounds = self.bounds();
            let documents = cf_handle(db, bounds.column_family())?;
            batch.delete_range_cf(&documents, bounds.start(), bounds.end());

            for index in self.indexes() {
                let bounds = index.bounds();
                let handle = cf_handle(db, bounds.column_family())?;
                batch.delete_range_cf(&handle, bounds.start(), bounds.end());
            }

            // the log record lets crash recovery reconstruct the counter
            let record = LogValue::CollectionTruncate {
                database_id: def.database_id,
                collection_id: def.id,
                object_id: self.object_id,
            };
            let wal = cf_handle(db, ColumnFamilyId::Wal)?;
            batch.put_cf(&wal, coral_core::next_tick().to_be_bytes(), record.encode());

            self.engine.write_raw_batch(batch)?;

            // post-commit sequence
            let seq: SequenceNumber = self.engine.latest_sequence_number().saturating_sub(1);
            let num_docs = self.meta.number_documents();
            self.meta
                .adjust_number_documents(seq, RevisionId::create(), -(num_docs as i64));

            for index in self.indexes() {
                index.after_truncate(seq);
            }
            if let Some(cache) = self.cache_handle() {
                cache.clear();
            }
            Ok(())
        })();
        self.meta.remove_blocker(trx.id());
        debug_assert!(!trx.has_operations());
        result
    }

    fn truncate_iterative(
        &self,
        trx: &mut Transaction,
        def: &CollectionDefinition,
        options: &OperationOptions,
    ) -> CoralResult<()> {
        let bounds = self.bounds();
        let mut cursor = bounds.start().to_vec();
        loop {
            if self.engine.is_stopping() {
                return Err(ErrorCode::ShuttingDown.into());
            }
            let Some((key, value)) = trx.next_in_range(bounds.column_family(), &cursor, bounds.end())?
            else {
                return Ok(());
            };
            cursor = key.clone();
            cursor.push(0);

            debug_assert_eq!(keys::object_id_from_key(&key), Some(self.object_id));
            let document_id = keys::document_id_from_key(&key)
                .ok_or_else(|| CoralError::new(ErrorCode::StorageCorrupted, "malformed document key"))?;
            let doc = parse_document(&value)?;
            let revision = extract_rev(&doc).unwrap_or_default();

            let _writes = self.builder_read_lock();
            let savepoint = trx.create_savepoint();
            trx.prepare_operation(def.id, revision, OperationType::Remove)?;
            match self.remove_document(trx, document_id, &doc) {
                Ok(()) => {
                    let intermediate =
                        trx.add_operation(def.id, RevisionId::create(), OperationType::Remove)?;
                    trx.finish_savepoint(savepoint, intermediate);
                    trx.track_wait_for_sync(def.wait_for_sync || options.wait_for_sync);
                }
                Err(e) => {
                    trx.rollback_to_savepoint(savepoint)?;
                    return Err(e);
                }
            }
        }
    }

    /// Range deletes bypass the transaction log, which is only safe outside
    /// a cluster and while no index build streams the collection.
    fn can_use_range_delete(&self) -> bool {
        self.engine.config().is_single_server
            && self.num_index_creations.load(Ordering::Acquire) == 0
    }

    // ========================================================================
    // INDEX LIFECYCLE
    // ========================================================================

    /// Create an index per definition; returns the index and whether it was
    /// newly created.
    pub fn create_index(
        &self,
        mut definition: IndexDefinition,
        restore: bool,
    ) -> CoralResult<(Arc<dyn Index>, bool)> {
        definition.validate()?;
        if definition.kind.is_implicit() {
            return Err(CoralError::bad_parameter(
                "cannot create primary or edge indexes explicitly",
            ));
        }

        self.num_index_creations.fetch_add(1, Ordering::Release);
        let result = self.create_index_inner(&mut definition, restore);
        self.num_index_creations.fetch_sub(1, Ordering::Release);
        result
    }

    fn create_index_inner(
        &self,
        definition: &mut IndexDefinition,
        restore: bool,
    ) -> CoralResult<(Arc<dyn Index>, bool)> {
        // Step 0: take the builder lock; writes block while we hold it
        let mut locker: RwLockWriteGuard<'_, ()> = self
            .builder_lock
            .write()
            .map_err(|_| CoralError::from_code(ErrorCode::LockTimeout))?;

        // Step 1: an existing matching index is returned as-is; TTL is
        // special-cased, any second non-identical TTL index is refused
        {
            let existing = self.indexes();
            if let Some(index) = existing.iter().find(|i| i.definition().matches(definition)) {
                return Ok((Arc::clone(index), false));
            }
            if definition.kind == IndexKind::Ttl
                && existing.iter().any(|i| i.definition().kind == IndexKind::Ttl)
            {
                return Err(CoralError::bad_parameter(
                    "there can only be one ttl index per collection",
                ));
            }
        }

        // Step 2: construct the new index object
        if !restore || !definition.id.is_set() {
            definition.id = IndexId::new(coral_core::next_tick());
        }
        if definition.name.is_empty() {
            definition.name = format!("idx_{}", definition.id);
        }
        {
            let existing = self.indexes();
            for other in &existing {
                let other_def = other.definition();
                if other_def.id == definition.id || other_def.name == definition.name {
                    return Err(CoralError::new(
                        ErrorCode::DuplicateIdentifier,
                        "duplicate value for index `id` or `name`",
                    ));
                }
            }
        }
        let index = Arc::new(if definition.in_background {
            PersistentIndex::new_building(definition.clone(), ObjectId::new(coral_core::next_tick()))
        } else {
            PersistentIndex::new(definition.clone(), ObjectId::new(coral_core::next_tick()))
        });
        let def = self.definition();

        // Step 3: persist an interim marker listing the new index, so a
        // crash mid-build leaves a recoverable stub
        let mut result = self.persist_marker_with_extra(Some(definition));

        // Step 4: fill
        if result.is_ok() {
            if definition.in_background {
                // install in "building" state, release the lock so writes
                // flow (they will also write to the building index), fill,
                // then re-acquire and flip the state
                self.register_index(Arc::clone(&index) as Arc<dyn Index>);
                drop(locker);
                let fill_result = fill_index(
                    &self.engine,
                    Arc::clone(&self.metas) as Arc<dyn MetaSink>,
                    self.object_id,
                    &index,
                );
                locker = self
                    .builder_lock
                    .write()
                    .map_err(|_| CoralError::from_code(ErrorCode::LockTimeout))?;
                result = fill_result.map(|_| ());
                if result.is_ok() {
                    index.mark_ready();
                }
            } else {
                result = fill_index(
                    &self.engine,
                    Arc::clone(&self.metas) as Arc<dyn MetaSink>,
                    self.object_id,
                    &index,
                )
                .map(|_| ());
                if result.is_ok() {
                    // Step 5: register in the index list
                    self.register_index(Arc::clone(&index) as Arc<dyn Index>);
                }
            }
        }

        // Step 6: persist the final marker plus the per-index create record
        if result.is_ok() {
            result = self.persist_marker(Some(LogValue::IndexCreate {
                collection_id: def.id,
                index_id: definition.id,
            }));
        }

        let outcome = match result {
            Ok(()) => Ok((index as Arc<dyn Index>, true)),
            Err(e) => {
                // Step 7: failed builds are not retried; unregister and drop
                // whatever was written
                self.unregister_index(definition.id);
                if let Err(drop_error) = self.drop_index_data(index.bounds()) {
                    tracing::warn!(
                        index = %definition.name,
                        error = %drop_error,
                        "failed to drop half-built index data"
                    );
                }
                let _ = self.persist_marker(None);
                Err(e)
            }
        };
        drop(locker);
        outcome
    }

    /// Drop an index by id. Dropping the primary index (id 0) is a no-op
    /// reported as success.
    pub fn drop_index(&self, id: IndexId) -> CoralResult<bool> {
        if !id.is_set() {
            return Ok(true);
        }
        let _locker = self
            .builder_lock
            .write()
            .map_err(|_| CoralError::from_code(ErrorCode::LockTimeout))?;

        let Some(index) = self.take_index(id) else {
            return Ok(false);
        };
        self.drop_index_data(index.bounds())?;
        let def = self.definition();
        self.persist_marker(Some(LogValue::IndexDrop {
            collection_id: def.id,
            index_id: id,
        }))?;
        tracing::info!(collection = %def.name, index = id.id(), "dropped index");
        Ok(true)
    }

    fn drop_index_data(&self, bounds: KeyBounds) -> CoralResult<()> {
        let db = self.engine.db();
        let handle = cf_handle(db, bounds.column_family())?;
        let mut batch = rocksdb::WriteBatch::default();
        batch.delete_range_cf(&handle, bounds.start(), bounds.end());
        self.engine.write_raw_batch(batch)?;
        Ok(())
    }

    fn register_index(&self, index: Arc<dyn Index>) {
        let mut indexes = match self.indexes.write() {
            Ok(indexes) => indexes,
            Err(poisoned) => poisoned.into_inner(),
        };
        indexes.push(index);
        indexes.sort_by_key(|i| (i.definition().kind.order_rank(), i.definition().id));
    }

    fn unregister_index(&self, id: IndexId) {
        if let Ok(mut indexes) = self.indexes.write() {
            indexes.retain(|i| i.definition().id != id);
        }
    }

    fn take_index(&self, id: IndexId) -> Option<Arc<dyn Index>> {
        let mut indexes = self.indexes.write().ok()?;
        let position = indexes
            .iter()
            .position(|i| i.definition().id == id && !i.definition().kind.is_implicit())?;
        Some(indexes.remove(position))
    }

    fn builder_read_lock(&self) -> std::sync::RwLockReadGuard<'_, ()> {
        match self.builder_lock.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ========================================================================
    // MARKERS, FIGURES, CHECKSUM
    // ========================================================================

    fn user_index_definitions(&self) -> Vec<IndexDefinition> {
        self.indexes()
            .iter()
            .map(|i| i.definition().clone())
            .filter(|d| !d.kind.is_implicit())
            .collect()
    }

    /// Persist the collection marker with the current definition and index
    /// list.
    pub fn persist_marker(&self, log: Option<LogValue>) -> CoralResult<()> {
        self.persist_marker_inner(self.user_index_definitions(), log)
    }

    fn persist_marker_with_extra(&self, extra: Option<&IndexDefinition>) -> CoralResult<()> {
        let mut indexes = self.user_index_definitions();
        if let Some(extra) = extra {
            if !indexes.iter().any(|d| d.id == extra.id) {
                indexes.push(extra.clone());
            }
        }
        self.persist_marker_inner(indexes, None)
    }

    fn persist_marker_inner(
        &self,
        indexes: Vec<IndexDefinition>,
        log: Option<LogValue>,
    ) -> CoralResult<()> {
        let def = self.definition();
        let marker = serde_json::json!({
            "definition": def,
            "objectId": self.object_id,
            "indexes": indexes,
        });
        self.engine.write_collection_marker(def.id.id(), &marker, log)
    }

    /// Update mutable collection properties and persist the marker.
    pub fn update_properties(&self, update: &Value) -> CoralResult<CollectionDefinition> {
        {
            let mut def = match self.definition.write() {
                Ok(def) => def,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut next = def.clone();
            if let Some(wait) = update.get("waitForSync").and_then(Value::as_bool) {
                next.wait_for_sync = wait;
            }
            if let Some(enabled) = update.get("cacheEnabled").and_then(Value::as_bool) {
                next.cache_enabled = enabled;
            }
            if let Some(factor) = update.get("replicationFactor").and_then(Value::as_u64) {
                next.replication_factor = factor as u32;
            }
            if let Some(concern) = update
                .get("writeConcern")
                .or_else(|| update.get("minReplicationFactor"))
                .and_then(Value::as_u64)
            {
                next.write_concern = concern as u32;
            }
            next.validate()?;
            if def.immutable_options_changed(&next) {
                return Err(CoralError::bad_parameter(
                    "cannot change immutable collection options",
                ));
            }
            *def = next;
        }
        if self.definition().cache_enabled {
            self.create_cache();
        }
        self.persist_marker(None)?;
        Ok(self.definition())
    }

    pub fn rename(&self, new_name: &str) -> CoralResult<()> {
        if new_name.is_empty() {
            return Err(CoralError::bad_parameter("collection name must not be empty"));
        }
        if let Ok(mut def) = self.definition.write() {
            def.name = new_name.to_string();
        }
        self.persist_marker(None)
    }

    /// Engine-specific figures.
    pub fn figures(&self) -> Value {
        let cache = self.cache_handle();
        serde_json::json!({
            "count": self.number_documents(),
            "indexes": {
                "count": self.indexes().len(),
            },
            "cacheInUse": cache.is_some(),
            "cacheSize": cache.as_ref().map(|c| c.len()).unwrap_or(0),
            "cacheLifeTimeHitRate": cache.as_ref().map(|c| c.hit_rate()).unwrap_or(0.0),
        })
    }

    /// SHA-256 checksum over keys (and optionally revisions and user data).
    pub fn checksum(
        &self,
        trx: &Transaction,
        with_revisions: bool,
        with_data: bool,
    ) -> CoralResult<String> {
        let mut hasher = Sha256::new();
        self.get_all_iterator(trx, |_, doc| {
            if let Some(key) = extract_key(&doc) {
                hasher.update(key.as_bytes());
            }
            if with_revisions {
                if let Some(rev) = extract_rev(&doc) {
                    hasher.update(rev.id().to_be_bytes());
                }
            }
            if with_data {
                let mut stripped = doc.clone();
                if let Some(map) = stripped.as_object_mut() {
                    map.retain(|k, _| !coral_core::is_system_attribute(k));
                }
                hasher.update(stripped.to_string().as_bytes());
            }
            true
        })?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Drop all data belonging to this collection.
    pub fn drop_data(&self) -> CoralResult<()> {
        let db = self.engine.db();
        let mut batch = rocksdb::WriteBatch::default();
        let bounds = self.bounds();
        let handle = cf_handle(db, bounds.column_family())?;
        batch.delete_range_cf(&handle, bounds.start(), bounds.end());
        let primary_bounds = self.primary.bounds();
        let handle = cf_handle(db, primary_bounds.column_family())?;
        batch.delete_range_cf(&handle, primary_bounds.start(), primary_bounds.end());
        for index in self.indexes() {
            let bounds = index.bounds();
            let handle = cf_handle(db, bounds.column_family())?;
            batch.delete_range_cf(&handle, bounds.start(), bounds.end());
        }
        self.engine.write_raw_batch(batch)?;
        let def = self.definition();
        self.engine.remove_collection_marker(def.id.id())?;
        self.metas.drop_meta(def.id);
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn encode_document(doc: &Value) -> CoralResult<Vec<u8>> {
    serde_json::to_vec(doc).map_err(|e| CoralError::internal(format!("unencodable document: {}", e)))
}

fn parse_document(bytes: &[u8]) -> CoralResult<Value> {
    serde_json::from_slice(bytes).map_err(|e| {
        CoralError::new(ErrorCode::StorageCorrupted, format!("unreadable document: {}", e))
    })
}

fn check_revision(expected: Option<RevisionId>, found: RevisionId) -> CoralResult<()> {
    match expected {
        Some(expected) if expected != found => Err(CoralError::new(
            ErrorCode::Conflict,
            "conflict, _rev values do not match",
        )),
        _ => Ok(()),
    }
}

fn adjust_conflict(e: CoralError, options: &OperationOptions) -> CoralError {
    if e.is(ErrorCode::UniqueConstraintViolated) && !options.internal {
        CoralError::from_code(ErrorCode::UniqueConstraintViolated)
    } else {
        e
    }
}

/// Walk `visited` in reverse, undoing entries of indexes that need reversal.
/// A failing undo would leave storage and indexes inconsistent, so it
/// escalates to an internal error.
fn reverse_index_ops(
    visited: &[Arc<dyn Index>],
    mut undo: impl FnMut(&Arc<dyn Index>) -> CoralResult<()>,
) -> CoralResult<()> {
    for index in visited.iter().rev() {
        if index.needs_reversal() {
            if undo(index).is_err() {
                return Err(CoralError::internal("failed to reverse index operation"));
            }
        }
    }
    Ok(())
}

impl PhysicalCollection {
    fn check_smart_join_present(
        &self,
        def: &CollectionDefinition,
        doc: &Value,
    ) -> CoralResult<()> {
        if let Some(attribute) = &def.smart_join_attribute {
            if !doc.get(attribute).map(Value::is_string).unwrap_or(false) {
                return Err(CoralError::bad_parameter(format!(
                    "smart join attribute '{}' must be a string",
                    attribute
                )));
            }
        }
        Ok(())
    }
}
