//! Shared server state.

use coral_cluster::FollowerInfo;
use coral_query::cluster::BlockServer;
use coral_storage::Database;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A read lock held on behalf of a syncing follower. Carries a TTL; the
/// client must release before it expires or face forcible release.
#[derive(Debug, Clone)]
pub struct ReadLockEntry {
    pub collection: String,
    pub soft: bool,
    pub expires_at: Instant,
}

pub struct AppState {
    pub database: Arc<Database>,
    /// Per-shard follower bookkeeping (leader side).
    pub followers: DashMap<String, Arc<FollowerInfo>>,
    /// Read locks by lock job id.
    pub read_locks: DashMap<u64, ReadLockEntry>,
    /// WAL barriers by barrier id.
    pub barriers: DashMap<i64, Instant>,
    /// Server-side execution blocks addressed by remote peers.
    pub block_server: Mutex<BlockServer>,
}

impl AppState {
    pub fn new(database: Arc<Database>) -> Arc<Self> {
        Arc::new(Self {
            database,
            followers: DashMap::new(),
            read_locks: DashMap::new(),
            barriers: DashMap::new(),
            block_server: Mutex::new(BlockServer::new()),
        })
    }

    pub fn followers_for(&self, shard: &str) -> Arc<FollowerInfo> {
        self.followers
            .entry(shard.to_string())
            .or_insert_with(|| Arc::new(FollowerInfo::new()))
            .clone()
    }

    /// Drop read locks whose TTL expired (forcible release).
    pub fn expire_read_locks(&self) {
        let now = Instant::now();
        self.read_locks.retain(|id, entry| {
            let keep = entry.expires_at > now;
            if !keep {
                tracing::warn!(
                    lock_id = *id,
                    collection = %entry.collection,
                    "forcibly releasing expired read lock"
                );
            }
            keep
        });
    }

    pub fn register_read_lock(&self, id: u64, collection: String, soft: bool, ttl: Duration) {
        self.read_locks.insert(
            id,
            ReadLockEntry {
                collection,
                soft,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}
