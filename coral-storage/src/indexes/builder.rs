//! Index fill for online index creation.
//!
//! The fill iterates every document of the collection under MVCC snapshots,
//! applying index inserts in batched transactions. Foreground fills run while
//! the caller holds the builder write-lock; background fills run with the
//! lock released, so concurrent document writes keep flowing (and also write
//! to the building index).

use super::{Index, PersistentIndex};
use crate::engine::StorageEngine;
use crate::keys::{self, KeyBounds};
use coral_core::{CoralResult, ErrorCode, LocalDocumentId, ObjectId};
use coral_txn::{MetaSink, Transaction, TransactionHints, TransactionOptions};
use std::sync::Arc;

/// Documents applied per fill transaction.
const FILL_BATCH_SIZE: usize = 5_000;

/// Iterate all documents in `documents_object_id` and insert them into the
/// building index. Returns the number of documents applied.
///
/// A `UniqueConstraintViolated` pointing at the same document is tolerated:
/// it means a concurrent writer already wrote the entry during a background
/// fill.
pub fn fill_index(
    engine: &Arc<StorageEngine>,
    sink: Arc<dyn MetaSink>,
    documents_object_id: ObjectId,
    index: &PersistentIndex,
) -> CoralResult<u64> {
    let bounds = KeyBounds::collection_documents(documents_object_id);
    let mut applied: u64 = 0;
    let mut cursor: Vec<u8> = bounds.start().to_vec();

    'outer: loop {
        let mut trx = Transaction::begin(
            Arc::clone(engine.db()),
            Arc::clone(&sink),
            TransactionHints::empty(),
            TransactionOptions::default(),
        );
        let mut in_batch = 0usize;

        loop {
            if engine.is_stopping() {
                trx.abort()?;
                return Err(ErrorCode::ShuttingDown.into());
            }
            let Some((key, value)) = trx.next_in_range(bounds.column_family(), &cursor, bounds.end())?
            else {
                trx.commit()?;
                break 'outer;
            };
            cursor = key.clone();
            cursor.push(0);

            let document_id = keys::document_id_from_key(&key).ok_or_else(|| {
                coral_core::CoralError::new(
                    ErrorCode::StorageCorrupted,
                    "malformed document key during index fill",
                )
            })?;
            let doc: serde_json::Value = serde_json::from_slice(&value).map_err(|e| {
                coral_core::CoralError::new(
                    ErrorCode::StorageCorrupted,
                    format!("unreadable document during index fill: {}", e),
                )
            })?;

            match index.insert(&mut trx, document_id, &doc) {
                Ok(()) => {}
                Err(e) if e.is(ErrorCode::UniqueConstraintViolated) => {
                    if !entry_points_at(&trx, index, document_id, &doc)? {
                        trx.abort()?;
                        return Err(e);
                    }
                    // concurrent insert already indexed this document
                }
                Err(e) => {
                    trx.abort()?;
                    return Err(e);
                }
            }

            applied += 1;
            in_batch += 1;
            if in_batch >= FILL_BATCH_SIZE {
                trx.commit()?;
                break;
            }
        }
    }

    tracing::debug!(
        index = index.definition().name,
        documents = applied,
        "index fill finished"
    );
    Ok(applied)
}

/// Whether the existing unique entry for `doc`'s field tuple maps to
/// `document_id`.
fn entry_points_at(
    trx: &Transaction,
    index: &PersistentIndex,
    document_id: LocalDocumentId,
    doc: &serde_json::Value,
) -> CoralResult<bool> {
    let Some(values) = super::indexed_values(index.definition(), doc) else {
        return Ok(false);
    };
    let sort_key = keys::encode_sort_key(&values);
    let entry_key = keys::unique_index_key(index.object_id(), &sort_key);
    match trx.get(coral_txn::ColumnFamilyId::Index, &entry_key)? {
        Some(existing) => Ok(existing == document_id.id().to_be_bytes()),
        None => Ok(false),
    }
}
