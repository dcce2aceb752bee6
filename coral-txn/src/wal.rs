//! Write-ahead log records.
//!
//! Every mutating operation prepends a small log record to the write batch
//! that binds the following storage mutations to a collection and a revision.
//! Truncate writes a dedicated marker carrying the objectId so crash recovery
//! can reconstruct the document counter.

use coral_core::{CollectionId, DatabaseId, IndexId, ObjectId, RevisionId};
use serde::{Deserialize, Serialize};

// ============================================================================
// OPERATION TYPE
// ============================================================================

/// Document operation discriminator, also used for per-collection accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationType {
    Insert = 1,
    Update = 2,
    Replace = 3,
    Remove = 4,
    Truncate = 5,
}

impl OperationType {
    /// Contribution of one such operation to the document count.
    pub fn count_delta(&self) -> i64 {
        match self {
            OperationType::Insert => 1,
            OperationType::Remove => -1,
            _ => 0,
        }
    }
}

// ============================================================================
// LOG VALUES
// ============================================================================

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogValue {
    /// Binds subsequent mutations in the batch to a collection and revision.
    DocumentOperation {
        collection_id: CollectionId,
        revision: RevisionId,
        operation: OperationType,
    },
    /// Marks a non-transactional range-delete truncate.
    CollectionTruncate {
        database_id: DatabaseId,
        collection_id: CollectionId,
        object_id: ObjectId,
    },
    /// Marks the completion of an index build.
    IndexCreate {
        collection_id: CollectionId,
        index_id: IndexId,
    },
    /// Marks an index drop.
    IndexDrop {
        collection_id: CollectionId,
        index_id: IndexId,
    },
}

const TAG_DOCUMENT_OPERATION: u8 = 1;
const TAG_COLLECTION_TRUNCATE: u8 = 2;
const TAG_INDEX_CREATE: u8 = 3;
const TAG_INDEX_DROP: u8 = 4;

impl LogValue {
    /// Fixed-width binary encoding: tag byte followed by big-endian fields.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogValue::DocumentOperation {
                collection_id,
                revision,
                operation,
            } => {
                let mut out = Vec::with_capacity(18);
                out.push(TAG_DOCUMENT_OPERATION);
                out.push(*operation as u8);
                out.extend_from_slice(&collection_id.id().to_be_bytes());
                out.extend_from_slice(&revision.id().to_be_bytes());
                out
            }
            LogValue::CollectionTruncate {
                database_id,
                collection_id,
                object_id,
            } => {
                let mut out = Vec::with_capacity(25);
                out.push(TAG_COLLECTION_TRUNCATE);
                out.extend_from_slice(&database_id.id().to_be_bytes());
                out.extend_from_slice(&collection_id.id().to_be_bytes());
                out.extend_from_slice(&object_id.id().to_be_bytes());
                out
            }
            LogValue::IndexCreate {
                collection_id,
                index_id,
            } => {
                let mut out = Vec::with_capacity(17);
                out.push(TAG_INDEX_CREATE);
                out.extend_from_slice(&collection_id.id().to_be_bytes());
                out.extend_from_slice(&index_id.id().to_be_bytes());
                out
            }
            LogValue::IndexDrop {
                collection_id,
                index_id,
            } => {
                let mut out = Vec::with_capacity(17);
                out.push(TAG_INDEX_DROP);
                out.extend_from_slice(&collection_id.id().to_be_bytes());
                out.extend_from_slice(&index_id.id().to_be_bytes());
                out
            }
        }
    }

    /// Decode a record written by [`LogValue::encode`].
    pub fn decode(bytes: &[u8]) -> Option<LogValue> {
        let read_u64 = |b: &[u8]| -> Option<u64> { b.try_into().ok().map(u64::from_be_bytes) };
        match bytes.first()? {
            &TAG_DOCUMENT_OPERATION if bytes.len() == 18 => {
                let operation = match bytes[1] {
                    1 => OperationType::Insert,
                    2 => OperationType::Update,
                    3 => OperationType::Replace,
                    4 => OperationType::Remove,
                    5 => OperationType::Truncate,
                    _ => return None,
                };
                Some(LogValue::DocumentOperation {
                    collection_id: CollectionId::new(read_u64(&bytes[2..10])?),
                    revision: RevisionId::new(read_u64(&bytes[10..18])?),
                    operation,
                })
            }
            &TAG_COLLECTION_TRUNCATE if bytes.len() == 25 => Some(LogValue::CollectionTruncate {
                database_id: DatabaseId::new(read_u64(&bytes[1..9])?),
                collection_id: CollectionId::new(read_u64(&bytes[9..17])?),
                object_id: ObjectId::new(read_u64(&bytes[17..25])?),
            }),
            &TAG_INDEX_CREATE if bytes.len() == 17 => Some(LogValue::IndexCreate {
                collection_id: CollectionId::new(read_u64(&bytes[1..9])?),
                index_id: IndexId::new(read_u64(&bytes[9..17])?),
            }),
            &TAG_INDEX_DROP if bytes.len() == 17 => Some(LogValue::IndexDrop {
                collection_id: CollectionId::new(read_u64(&bytes[1..9])?),
                index_id: IndexId::new(read_u64(&bytes[9..17])?),
            }),
            _ => None,
        }
    }
}
