//! Transactional document cache.
//!
//! A content-addressed map from document key to encoded body, sharded into
//! buckets with per-bucket locks. Lookups never block: a bucket whose lock is
//! held by a concurrent writer reports `LockTimeout`, which callers treat as
//! a miss that also skips the subsequent fill. Writers blacklist keys before
//! mutating storage so a stale body cannot be re-inserted for the bucket's
//! current epoch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Result of a cache lookup. `LockTimeout` is distinguishable from `Miss`:
/// it means a concurrent writer holds the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheFind {
    Hit(Vec<u8>),
    Miss,
    LockTimeout,
}

/// Result of a cache insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheInsert {
    Ok,
    LockTimeout,
    Shutdown,
}

// ============================================================================
// BUCKET
// ============================================================================

struct CacheEntry {
    value: Vec<u8>,
    last_used: u64,
}

#[derive(Default)]
struct Bucket {
    map: HashMap<Vec<u8>, CacheEntry>,
    blacklist: HashSet<Vec<u8>>,
    epoch: u64,
}

impl Bucket {
    fn evict_one(&mut self) {
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.map.remove(&key);
        }
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// One collection's document cache.
pub struct DocumentCache {
    buckets: Vec<Mutex<Bucket>>,
    bucket_capacity: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    shutdown: AtomicBool,
}

impl DocumentCache {
    pub fn new(buckets: usize, bucket_capacity: usize) -> Self {
        let buckets = buckets.max(1);
        Self {
            buckets: (0..buckets).map(|_| Mutex::new(Bucket::default())).collect(),
            bucket_capacity: bucket_capacity.max(1),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    fn bucket_for(&self, key: &[u8]) -> &Mutex<Bucket> {
        // FNV-1a; stable across processes, cheap for short keys
        let mut hash: u64 = 0xcbf29ce484222325;
        for &b in key {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        &self.buckets[(hash % self.buckets.len() as u64) as usize]
    }

    /// Look up a key without blocking.
    pub fn find(&self, key: &[u8]) -> CacheFind {
        let Ok(mut bucket) = self.bucket_for(key).try_lock() else {
            return CacheFind::LockTimeout;
        };
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        match bucket.map.get_mut(key) {
            Some(entry) => {
                entry.last_used = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                CacheFind::Hit(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CacheFind::Miss
            }
        }
    }

    /// Insert a key without blocking. Blacklisted keys are silently skipped
    /// for the bucket's current epoch.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> CacheInsert {
        if self.shutdown.load(Ordering::Acquire) {
            return CacheInsert::Shutdown;
        }
        let Ok(mut bucket) = self.bucket_for(key).try_lock() else {
            return CacheInsert::LockTimeout;
        };
        if bucket.blacklist.contains(key) {
            return CacheInsert::Ok;
        }
        if bucket.map.len() >= self.bucket_capacity && !bucket.map.contains_key(key) {
            bucket.evict_one();
        }
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        bucket.map.insert(
            key.to_vec(),
            CacheEntry {
                value: value.to_vec(),
                last_used: tick,
            },
        );
        CacheInsert::Ok
    }

    /// Insert with the documented retry discipline: on lock timeout, one
    /// spin-yield and one retry is sufficient.
    pub fn insert_with_retry(&self, key: &[u8], value: &[u8]) -> CacheInsert {
        match self.insert(key, value) {
            CacheInsert::LockTimeout => {
                std::thread::yield_now();
                self.insert(key, value)
            }
            outcome => outcome,
        }
    }

    /// Forbid the key from being inserted for the bucket's current epoch and
    /// drop any cached body. Blocks on the bucket lock; must be called before
    /// the storage mutation it covers.
    pub fn blacklist(&self, key: &[u8]) {
        let Ok(mut bucket) = self.bucket_for(key).lock() else {
            // a poisoned bucket only ever means a panicking reader; the
            // cache content is disposable
            return;
        };
        bucket.map.remove(key);
        bucket.blacklist.insert(key.to_vec());
    }

    /// Drop all content and start a fresh epoch in every bucket, clearing
    /// blacklists. Used after truncate.
    pub fn clear(&self) {
        for bucket in &self.buckets {
            if let Ok(mut bucket) = bucket.lock() {
                bucket.map.clear();
                bucket.blacklist.clear();
                bucket.epoch += 1;
            }
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Number of cached entries across all buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.lock().map(|b| b.map.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_miss_then_hit() {
        let cache = DocumentCache::new(4, 8);
        assert_eq!(cache.find(b"k"), CacheFind::Miss);
        assert_eq!(cache.insert(b"k", b"v"), CacheInsert::Ok);
        assert_eq!(cache.find(b"k"), CacheFind::Hit(b"v".to_vec()));
    }

    #[test]
    fn test_blacklist_blocks_insert_until_clear() {
        let cache = DocumentCache::new(1, 8);
        cache.insert(b"k", b"old");
        cache.blacklist(b"k");
        assert_eq!(cache.find(b"k"), CacheFind::Miss, "blacklist drops the entry");
        assert_eq!(cache.insert(b"k", b"stale"), CacheInsert::Ok);
        assert_eq!(
            cache.find(b"k"),
            CacheFind::Miss,
            "blacklisted key must not be re-insertable in the same epoch"
        );
        cache.clear();
        cache.insert(b"k", b"fresh");
        assert_eq!(cache.find(b"k"), CacheFind::Hit(b"fresh".to_vec()));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = DocumentCache::new(1, 2);
        cache.insert(b"a", b"1");
        cache.insert(b"b", b"2");
        // touch "a" so "b" becomes the LRU victim
        assert!(matches!(cache.find(b"a"), CacheFind::Hit(_)));
        cache.insert(b"c", b"3");
        assert_eq!(cache.len(), 2);
        assert!(matches!(cache.find(b"a"), CacheFind::Hit(_)));
        assert_eq!(cache.find(b"b"), CacheFind::Miss);
    }

    #[test]
    fn test_shutdown_refuses_inserts() {
        let cache = DocumentCache::new(2, 8);
        cache.begin_shutdown();
        assert_eq!(cache.insert(b"k", b"v"), CacheInsert::Shutdown);
    }

    #[test]
    fn test_lock_timeout_is_distinguishable() {
        let cache = DocumentCache::new(1, 8);
        let _held = cache.buckets[0].lock().expect("bucket lock");
        assert_eq!(cache.find(b"k"), CacheFind::LockTimeout);
        assert_eq!(cache.insert(b"k", b"v"), CacheInsert::LockTimeout);
    }
}
