//! Transaction hints.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Behavioral hints attached to a transaction at creation time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransactionHints: u32 {
        /// The transaction consists of exactly one operation; index fan-out
        /// may rely on the transaction abort instead of explicit reversal.
        const SINGLE_OPERATION = 1 << 0;
        /// The transaction is managed outside the current thread of control
        /// (streaming transactions); written keys must be blacklisted from
        /// the document cache until commit.
        const GLOBAL_MANAGED = 1 << 1;
        /// Commit and renew the transaction inline once the configured
        /// operation-count or byte-size thresholds are reached.
        const INTERMEDIATE_COMMITS = 1 << 2;
        /// Truncate may replace per-document deletes with engine range
        /// deletes.
        const ALLOW_RANGE_DELETE = 1 << 3;
        /// The transaction holds exclusive locks on all participating
        /// collections.
        const EXCLUSIVE = 1 << 4;
        /// Started by a top-level AQL query.
        const FROM_TOPLEVEL_AQL = 1 << 5;
        /// Index fan-out is suppressed (used by recovery).
        const NO_INDEXING = 1 << 6;
    }
}

impl Default for TransactionHints {
    fn default() -> Self {
        TransactionHints::empty()
    }
}

// Manual serde implementation (bitflags 2.x + serde)
impl Serialize for TransactionHints {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TransactionHints {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid TransactionHints bits: {:#010x}", bits))
        })
    }
}
