//! Key codec and range bounds.
//!
//! Every key belonging to a collection or index starts with its owner's
//! 8-byte big-endian objectId, so one prefix range covers exactly one owner:
//!
//! - document bodies:      `<objectId:8BE><LocalDocumentId:8BE>`
//! - primary index:        `<objectId:8BE><key-bytes>`
//! - secondary (non-uniq): `<objectId:8BE><sort-key><LocalDocumentId:8BE>`
//! - secondary (unique):   `<objectId:8BE><sort-key>`
//!
//! Sort keys are an order-preserving byte encoding of field values so that a
//! plain lexicographic scan yields index order.

use coral_core::{LocalDocumentId, ObjectId};
use coral_txn::ColumnFamilyId;
use serde_json::Value;

// ============================================================================
// KEY CONSTRUCTION
// ============================================================================

pub fn document_key(object_id: ObjectId, document_id: LocalDocumentId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&object_id.to_be_bytes());
    key[8..].copy_from_slice(&document_id.id().to_be_bytes());
    key
}

/// Extract the LocalDocumentId from a document key.
pub fn document_id_from_key(key: &[u8]) -> Option<LocalDocumentId> {
    key.get(8..16)
        .and_then(|b| b.try_into().ok())
        .map(|b: [u8; 8]| LocalDocumentId::new(u64::from_be_bytes(b)))
}

/// Extract the objectId prefix from any owned key.
pub fn object_id_from_key(key: &[u8]) -> Option<ObjectId> {
    key.get(..8)
        .and_then(|b| b.try_into().ok())
        .map(|b: [u8; 8]| ObjectId::new(u64::from_be_bytes(b)))
}

pub fn primary_index_key(object_id: ObjectId, user_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + user_key.len());
    key.extend_from_slice(&object_id.to_be_bytes());
    key.extend_from_slice(user_key.as_bytes());
    key
}

pub fn index_entry_key(
    object_id: ObjectId,
    sort_key: &[u8],
    document_id: LocalDocumentId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + sort_key.len());
    key.extend_from_slice(&object_id.to_be_bytes());
    key.extend_from_slice(sort_key);
    key.extend_from_slice(&document_id.id().to_be_bytes());
    key
}

pub fn unique_index_key(object_id: ObjectId, sort_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + sort_key.len());
    key.extend_from_slice(&object_id.to_be_bytes());
    key.extend_from_slice(sort_key);
    key
}

// ============================================================================
// BOUNDS
// ============================================================================

/// A `(start, end)` pair with `start <= k <= end` (lexicographically) for
/// every key `k` of the owner, used for range scans and range deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBounds {
    cf: ColumnFamilyId,
    start: Vec<u8>,
    end: Vec<u8>,
}

impl KeyBounds {
    fn prefix_range(cf: ColumnFamilyId, object_id: ObjectId) -> Self {
        // end is the first key of the next objectId; objectIds are allocated
        // from the tick generator and never reach u64::MAX
        Self {
            cf,
            start: object_id.to_be_bytes().to_vec(),
            end: (object_id.id() + 1).to_be_bytes().to_vec(),
        }
    }

    /// All document bodies of a collection.
    pub fn collection_documents(object_id: ObjectId) -> Self {
        Self::prefix_range(ColumnFamilyId::Documents, object_id)
    }

    /// All primary-index entries of a collection.
    pub fn primary_index(object_id: ObjectId) -> Self {
        Self::prefix_range(ColumnFamilyId::Primary, object_id)
    }

    /// All entries of one secondary index.
    pub fn secondary_index(object_id: ObjectId) -> Self {
        Self::prefix_range(ColumnFamilyId::Index, object_id)
    }

    pub fn column_family(&self) -> ColumnFamilyId {
        self.cf
    }

    pub fn start(&self) -> &[u8] {
        &self.start
    }

    pub fn end(&self) -> &[u8] {
        &self.end
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.start.as_slice() <= key && key < self.end.as_slice()
    }
}

// ============================================================================
// SORT-KEY ENCODING
// ============================================================================

// type tags, ordered like AQL values: null < bool < number < string < array
// < object
const TAG_TERMINATOR: u8 = 0x01;
const TAG_NULL: u8 = 0x02;
const TAG_FALSE: u8 = 0x03;
const TAG_TRUE: u8 = 0x04;
const TAG_NUMBER: u8 = 0x05;
const TAG_STRING: u8 = 0x06;
const TAG_ARRAY: u8 = 0x07;
const TAG_OBJECT: u8 = 0x08;

fn encode_f64(out: &mut Vec<u8>, value: f64) {
    let bits = value.to_bits();
    // flip so that the byte order matches numeric order: positive numbers get
    // the sign bit set, negatives are inverted entirely
    let ordered = if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) };
    out.extend_from_slice(&ordered.to_be_bytes());
}

fn encode_str(out: &mut Vec<u8>, value: &str) {
    // 0x00 inside the string is escaped as 0x00 0xFF; the terminator
    // 0x00 0x00 therefore sorts below every continuation
    for &b in value.as_bytes() {
        out.push(b);
        if b == 0 {
            out.push(0xFF);
        }
    }
    out.push(0);
    out.push(0);
}

fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Number(n) => {
            out.push(TAG_NUMBER);
            encode_f64(out, n.as_f64().unwrap_or(0.0));
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            encode_str(out, s);
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            for item in items {
                encode_value(out, item);
            }
            out.push(TAG_TERMINATOR);
        }
        Value::Object(map) => {
            out.push(TAG_OBJECT);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                out.push(TAG_STRING);
                encode_str(out, key);
                encode_value(out, &map[key]);
            }
            out.push(TAG_TERMINATOR);
        }
    }
}

/// Encode one indexed field tuple into an order-preserving byte string.
pub fn encode_sort_key(values: &[&Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 10);
    for value in values {
        encode_value(&mut out, value);
    }
    out
}
