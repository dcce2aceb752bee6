//! Identifier types for CORAL entities
//!
//! All identifiers are 64-bit ticks drawn from the process-wide hybrid clock
//! (see [`crate::tick`]). Each gets its own newtype so ids of different kinds
//! cannot be mixed up at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sequence number of the underlying key-value engine's write log.
pub type SequenceNumber = u64;

// ============================================================================
// NUMERIC ID TYPE SYSTEM
// ============================================================================

/// Error type for parsing numeric ids from strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    pub id_name: &'static str,
    pub input: String,
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to parse {} from '{}'", self.id_name, self.input)
    }
}

impl std::error::Error for IdParseError {}

/// Macro to define a type-safe 64-bit id newtype.
///
/// Ids serialize transparently as numbers and display as decimal strings,
/// which is also the wire representation used by the REST layer.
macro_rules! define_numeric_id {
    ($name:ident, $id_name:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            pub const ID_NAME: &'static str = $id_name;

            /// Wrap a raw 64-bit value.
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// The all-zero id, used as "not set".
            pub const fn none() -> Self {
                Self(0)
            }

            /// Get the underlying value.
            pub const fn id(&self) -> u64 {
                self.0
            }

            /// Whether the id carries a real value.
            pub const fn is_set(&self) -> bool {
                self.0 != 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self::new).map_err(|_| IdParseError {
                    id_name: Self::ID_NAME,
                    input: s.to_string(),
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::none()
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self::new(id)
            }
        }
    };
}

// ============================================================================
// ID TYPES
// ============================================================================

define_numeric_id!(DatabaseId, "database id", "Id of a database (vocbase).");
define_numeric_id!(CollectionId, "collection id", "Cluster-wide id of a logical collection.");
define_numeric_id!(
    ObjectId,
    "object id",
    "Engine-local id prefixing every key-value entry of one collection."
);
define_numeric_id!(IndexId, "index id", "Id of an index, unique per collection.");
define_numeric_id!(
    LocalDocumentId,
    "local document id",
    "Opaque per-collection handle assigned to a document version at insert time."
);
define_numeric_id!(
    RevisionId,
    "revision id",
    "Monotonic revision id, regenerated on every mutating operation."
);
define_numeric_id!(TransactionId, "transaction id", "Id of a transaction.");
define_numeric_id!(QueryId, "query id", "Server-local id of a running query.");

impl LocalDocumentId {
    /// Assign a fresh id from the hybrid clock.
    pub fn create() -> Self {
        Self::new(crate::tick::next_tick())
    }
}

impl RevisionId {
    /// Generate a fresh revision id from the hybrid clock.
    pub fn create() -> Self {
        Self::new(crate::tick::next_tick())
    }
}

impl TransactionId {
    /// Assign a fresh transaction id.
    pub fn create() -> Self {
        Self::new(crate::tick::next_tick())
    }
}

impl ObjectId {
    /// Big-endian byte form used as the key prefix for range scans.
    pub const fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

// ============================================================================
// SERVER-SCOPE STRING IDENTIFIERS
// ============================================================================

/// Id of a database server in the cluster (e.g. `PRMR-<uuid>`).
pub type ServerId = String;

/// Name of one shard of a collection (e.g. `s100042`).
pub type ShardId = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_type_safety() {
        let c = CollectionId::new(7);
        let i = IndexId::new(7);
        // Different id types with the same value compare only against their
        // own kind; the following would not compile:
        // assert_eq!(c, i);
        assert_eq!(c.id(), i.id());
    }

    #[test]
    fn test_id_display_and_parse() {
        let id = CollectionId::new(100042);
        assert_eq!(id.to_string(), "100042");
        let parsed: CollectionId = "100042".parse().expect("numeric id should parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_id_parse_error() {
        let result: Result<CollectionId, _> = "not-a-number".parse();
        let err = result.expect_err("non-numeric input must fail");
        assert_eq!(err.id_name, "collection id");
        assert_eq!(err.input, "not-a-number");
    }

    #[test]
    fn test_id_is_set() {
        assert!(!LocalDocumentId::none().is_set());
        assert!(LocalDocumentId::create().is_set());
    }

    #[test]
    fn test_object_id_be_bytes_sort() {
        let a = ObjectId::new(1).to_be_bytes();
        let b = ObjectId::new(256).to_be_bytes();
        assert!(a < b, "big-endian encoding must sort numerically");
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = RevisionId::new(42);
        let json = serde_json::to_string(&id).expect("serialization should succeed");
        assert_eq!(json, "42");
        let back: RevisionId = serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(back, id);
    }
}
