//! The synchronize-shard action.
//!
//! Executed by a follower to catch up with the shard leader and get
//! registered as in-sync. The sequence: wait for the plan to converge, try
//! the zero-document shortcut, apply an initial dump under a WAL barrier,
//! tail the WAL under repeated soft locks until caught up, then freeze
//! writes with a hard lock, tail the residue, and have the leader verify the
//! document count while adding us as follower.

use crate::client::{AddFollowerRequest, LeaderClient, TailResult};
use coral_core::{CoralError, CoralResult, ErrorCode, ServerId, ShardId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CONFIGURATION & SEAMS
// ============================================================================

/// Budgets of the catch-up protocol. The defaults give up after roughly one
/// hour of soft-lock rounds.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum soft-lock catch-up rounds.
    pub max_catchup_rounds: u32,
    /// Wall-clock budget per round.
    pub round_timeout: Duration,
    /// Fraction of the round budget we may hold the soft lock.
    pub hold_fraction: f64,
    /// TTL the leader attaches to our read locks; we must release before it
    /// expires or face forcible release.
    pub lock_ttl: Duration,
    /// Budget for the plan-convergence wait.
    pub plan_wait: Duration,
    /// Poll interval of the plan-convergence wait.
    pub plan_poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_catchup_rounds: 18,
            round_timeout: Duration::from_secs(300),
            hold_fraction: 0.6,
            lock_ttl: Duration::from_secs(600),
            plan_wait: Duration::from_secs(600),
            plan_poll_interval: Duration::from_millis(100),
        }
    }
}

/// View of the cluster plan (the configuration store), polled until the
/// shard's layout matches expectations.
pub trait PlanView: Send + Sync {
    /// Current `(leader, planned servers)` for a shard, if planned at all.
    fn shard_plan(&self, shard: &str) -> Option<(ServerId, Vec<ServerId>)>;
}

/// The local (follower-side) shard the sync writes into.
pub trait LocalShard: Send + Sync {
    fn document_count(&self) -> CoralResult<u64>;
    /// Apply the initial dump.
    fn apply_dump(&self, documents: &[Value]) -> CoralResult<()>;
    /// Apply tailed WAL operations.
    fn apply_operations(&self, operations: &[Value]) -> CoralResult<()>;
    /// Cooperative cancellation.
    fn is_stopping(&self) -> bool {
        false
    }
}

/// How the synchronization concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Leader and follower were both empty; registered without a dump.
    Shortcut,
    /// Full protocol ran; carries the soft-lock rounds used.
    Synced { catchup_rounds: u32 },
}

// ============================================================================
// ACTION
// ============================================================================

pub struct SynchronizeShard {
    client: Arc<dyn LeaderClient>,
    local: Arc<dyn LocalShard>,
    plan: Arc<dyn PlanView>,
    config: SyncConfig,
    shard: ShardId,
    leader: ServerId,
    server_id: ServerId,
    syncer_id: String,
}

impl SynchronizeShard {
    pub fn new(
        client: Arc<dyn LeaderClient>,
        local: Arc<dyn LocalShard>,
        plan: Arc<dyn PlanView>,
        config: SyncConfig,
        shard: impl Into<ShardId>,
        leader: impl Into<ServerId>,
        server_id: impl Into<ServerId>,
    ) -> Self {
        let server_id = server_id.into();
        let syncer_id = format!("syncer-{}-{}", server_id, coral_core::next_tick());
        Self {
            client,
            local,
            plan,
            config,
            shard: shard.into(),
            leader: leader.into(),
            server_id,
            syncer_id,
        }
    }

    pub fn syncer_id(&self) -> &str {
        &self.syncer_id
    }

    /// Run the full protocol.
    pub async fn run(&self) -> CoralResult<SyncOutcome> {
        self.wait_for_plan().await?;

        // Step 2: zero-document shortcut. If we are empty, ask the leader to
        // add us directly; the leader verifies its own count matches.
        if self.local.document_count()? == 0 {
            match self.add_follower(0).await {
                Ok(()) => {
                    tracing::info!(shard = %self.shard, "synchronize shard: shortcut worked, done");
                    return Ok(SyncOutcome::Shortcut);
                }
                Err(e) => {
                    // can happen, no problem: fall through to the full sync
                    tracing::debug!(shard = %self.shard, error = %e, "shortcut not taken");
                }
            }
        }

        // Step 3: initial sync; the barrier keeps the leader's WAL alive.
        let dump = self.client.start_dump().await?;
        let barrier_id = dump.barrier_id;
        let result = self.sync_from(dump.last_tick, &dump.documents).await;
        if let Err(e) = self.client.cancel_barrier(barrier_id).await {
            tracing::warn!(shard = %self.shard, error = %e, "failed to cancel WAL barrier");
        }
        result
    }

    /// Step 1: poll the plan until the leader is listed first and we appear
    /// among the planned servers.
    async fn wait_for_plan(&self) -> CoralResult<()> {
        let deadline = tokio::time::Instant::now() + self.config.plan_wait;
        loop {
            if self.local.is_stopping() {
                return Err(self.cancelled("shutting down"));
            }
            match self.plan.shard_plan(&self.shard) {
                Some((leader, servers))
                    if leader == self.leader && servers.iter().any(|s| *s == self.server_id) =>
                {
                    return Ok(());
                }
                Some(_) | None => {
                    // leader moved or we were unplanned: cancelled
                    if self.plan.shard_plan(&self.shard).is_none() {
                        return Err(self.cancelled("shard vanished from the plan"));
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(self.cancelled("plan did not converge in time"));
            }
            tokio::time::sleep(self.config.plan_poll_interval).await;
        }
    }

    async fn sync_from(&self, mut last_tick: u64, documents: &[Value]) -> CoralResult<SyncOutcome> {
        self.local.apply_dump(documents)?;

        // Step 4: soft-lock catch-up rounds.
        let mut rounds = 0u32;
        let mut did_timeout = true;
        while did_timeout && rounds < self.config.max_catchup_rounds {
            if self.local.is_stopping() {
                return Err(self.cancelled("shutting down"));
            }
            rounds += 1;
            let tail = self.tail_under_lock(true, last_tick).await?;
            last_tick = tail.tick_reached;
            did_timeout = tail.did_timeout;
            if did_timeout {
                tracing::debug!(
                    shard = %self.shard,
                    round = rounds,
                    "not caught up yet, renewing soft lock"
                );
            }
        }
        if did_timeout {
            tracing::warn!(
                shard = %self.shard,
                leader = %self.leader,
                "could not catch up under soft locks, proceeding to hard lock; \
                 this is expected under high load"
            );
        }

        // Step 5: hard-lock finalization. Writes are frozen while we tail the
        // residue and the leader verifies the count.
        let lock_id = self.client.read_lock_id().await?;
        self.client
            .hold_read_lock(lock_id, false, self.config.lock_ttl)
            .await?;
        let result = self.finalize_under_hard_lock(last_tick, lock_id).await;
        self.release_lock(lock_id).await;
        result?;

        Ok(SyncOutcome::Synced {
            catchup_rounds: rounds,
        })
    }

    /// One soft-lock round: acquire, tail within the hold budget, release on
    /// every path.
    async fn tail_under_lock(&self, soft: bool, from_tick: u64) -> CoralResult<TailResult> {
        let lock_id = self.client.read_lock_id().await?;
        self.client
            .hold_read_lock(lock_id, soft, self.config.lock_ttl)
            .await?;
        let budget = self.config.round_timeout.mul_f64(self.config.hold_fraction);
        let result = async {
            let tail = self.client.tail_wal(from_tick, budget).await?;
            self.local.apply_operations(&tail.operations)?;
            Ok(tail)
        }
        .await;
        self.release_lock(lock_id).await;
        result
    }

    async fn finalize_under_hard_lock(&self, from_tick: u64, lock_id: u64) -> CoralResult<()> {
        let budget = self.config.round_timeout;
        let tail = self.client.tail_wal(from_tick, budget).await?;
        self.local.apply_operations(&tail.operations)?;
        self.add_follower(lock_id).await
    }

    /// Register as follower; the document count is the checksum the leader
    /// verifies.
    async fn add_follower(&self, read_lock_id: u64) -> CoralResult<()> {
        let count = self.local.document_count()?;
        self.client
            .add_follower(&AddFollowerRequest {
                follower_id: self.server_id.clone(),
                shard: self.shard.clone(),
                checksum: count.to_string(),
                server_id: self.server_id.clone(),
                syncer_id: Some(self.syncer_id.clone()),
                read_lock_id,
            })
            .await
    }

    /// Release a read lock; a failure is logged but never changes the
    /// overall outcome.
    async fn release_lock(&self, lock_id: u64) {
        if let Err(e) = self.client.cancel_read_lock(lock_id).await {
            tracing::warn!(
                shard = %self.shard,
                lock_id,
                error = %e,
                "failed to cancel read lock on leader"
            );
        }
    }

    fn cancelled(&self, reason: &str) -> CoralError {
        CoralError::new(
            ErrorCode::ShardSyncCancelled,
            format!("synchronize shard {} cancelled: {}", self.shard, reason),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DumpResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Leader mock: a document store plus a WAL that fills during catch-up.
    struct MockLeader {
        documents: Mutex<Vec<Value>>,
        /// Batches handed out per tail call; `did_timeout` while more than
        /// one remains.
        pending_batches: Mutex<Vec<Vec<Value>>>,
        /// Operations already shipped via tailing; they still count as
        /// leader documents.
        shipped: Mutex<usize>,
        locks_held: Mutex<HashSet<u64>>,
        lock_counter: Mutex<u64>,
        hard_locks_taken: Mutex<u32>,
        add_follower_calls: Mutex<Vec<AddFollowerRequest>>,
        barriers_cancelled: Mutex<Vec<i64>>,
        tick: Mutex<u64>,
    }

    impl MockLeader {
        fn new(documents: Vec<Value>, batches: Vec<Vec<Value>>) -> Arc<Self> {
            Arc::new(Self {
                documents: Mutex::new(documents),
                pending_batches: Mutex::new(batches),
                shipped: Mutex::new(0),
                locks_held: Mutex::new(HashSet::new()),
                lock_counter: Mutex::new(0),
                hard_locks_taken: Mutex::new(0),
                add_follower_calls: Mutex::new(Vec::new()),
                barriers_cancelled: Mutex::new(Vec::new()),
                tick: Mutex::new(1),
            })
        }

        fn total_count(&self) -> u64 {
            let base = self.documents.lock().expect("lock").len();
            let shipped = *self.shipped.lock().expect("lock");
            let pending: usize = self
                .pending_batches
                .lock()
                .expect("lock")
                .iter()
                .map(Vec::len)
                .sum();
            (base + shipped + pending) as u64
        }
    }

    #[async_trait]
    impl LeaderClient for MockLeader {
        async fn document_count(&self) -> CoralResult<u64> {
            Ok(self.total_count())
        }

        async fn start_dump(&self) -> CoralResult<DumpResult> {
            Ok(DumpResult {
                barrier_id: 77,
                last_tick: *self.tick.lock().expect("lock"),
                documents: self.documents.lock().expect("lock").clone(),
            })
        }

        async fn tail_wal(&self, _from: u64, _budget: Duration) -> CoralResult<TailResult> {
            let mut batches = self.pending_batches.lock().expect("lock");
            let operations = if batches.is_empty() {
                Vec::new()
            } else {
                batches.remove(0)
            };
            *self.shipped.lock().expect("lock") += operations.len();
            let mut tick = self.tick.lock().expect("lock");
            *tick += operations.len() as u64;
            // the last remaining batch is the residue the hard lock will tail
            Ok(TailResult {
                tick_reached: *tick,
                did_timeout: batches.len() > 1,
                operations,
            })
        }

        async fn read_lock_id(&self) -> CoralResult<u64> {
            let mut counter = self.lock_counter.lock().expect("lock");
            *counter += 1;
            Ok(*counter)
        }

        async fn hold_read_lock(&self, lock_id: u64, soft: bool, _ttl: Duration) -> CoralResult<()> {
            self.locks_held.lock().expect("lock").insert(lock_id);
            if !soft {
                *self.hard_locks_taken.lock().expect("lock") += 1;
            }
            Ok(())
        }

        async fn cancel_read_lock(&self, lock_id: u64) -> CoralResult<()> {
            self.locks_held.lock().expect("lock").remove(&lock_id);
            Ok(())
        }

        async fn add_follower(&self, request: &AddFollowerRequest) -> CoralResult<()> {
            let expected = self.total_count().to_string();
            if request.checksum != expected {
                return Err(CoralError::new(
                    ErrorCode::FollowerRefused,
                    format!("checksum {} != {}", request.checksum, expected),
                ));
            }
            self.add_follower_calls
                .lock()
                .expect("lock")
                .push(request.clone());
            Ok(())
        }

        async fn remove_follower(&self, _follower_id: &str) -> CoralResult<()> {
            Ok(())
        }

        async fn cancel_barrier(&self, barrier_id: i64) -> CoralResult<()> {
            self.barriers_cancelled.lock().expect("lock").push(barrier_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockLocal {
        documents: Mutex<Vec<Value>>,
    }

    impl LocalShard for MockLocal {
        fn document_count(&self) -> CoralResult<u64> {
            Ok(self.documents.lock().expect("lock").len() as u64)
        }
        fn apply_dump(&self, documents: &[Value]) -> CoralResult<()> {
            self.documents
                .lock()
                .expect("lock")
                .extend(documents.iter().cloned());
            Ok(())
        }
        fn apply_operations(&self, operations: &[Value]) -> CoralResult<()> {
            self.documents
                .lock()
                .expect("lock")
                .extend(operations.iter().cloned());
            Ok(())
        }
    }

    struct StaticPlan {
        leader: String,
        servers: Vec<String>,
    }

    impl PlanView for StaticPlan {
        fn shard_plan(&self, _shard: &str) -> Option<(ServerId, Vec<ServerId>)> {
            Some((self.leader.clone(), self.servers.clone()))
        }
    }

    fn action(
        leader: &Arc<MockLeader>,
        local: &Arc<MockLocal>,
    ) -> SynchronizeShard {
        SynchronizeShard::new(
            Arc::clone(leader) as Arc<dyn LeaderClient>,
            Arc::clone(local) as Arc<dyn LocalShard>,
            Arc::new(StaticPlan {
                leader: "LEADER".into(),
                servers: vec!["LEADER".into(), "FOLLOWER".into()],
            }),
            SyncConfig {
                plan_poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
            "s100",
            "LEADER",
            "FOLLOWER",
        )
    }

    #[tokio::test]
    async fn test_shortcut_when_both_empty() {
        let leader = MockLeader::new(vec![], vec![]);
        let local = Arc::new(MockLocal::default());
        let outcome = action(&leader, &local).run().await.expect("sync");
        assert_eq!(outcome, SyncOutcome::Shortcut);

        let calls = leader.add_follower_calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].read_lock_id, 0, "shortcut carries lockJobId 0");
        assert!(
            leader.barriers_cancelled.lock().expect("lock").is_empty(),
            "no initial dump was issued"
        );
    }

    #[tokio::test]
    async fn test_full_sync_with_catchup_rounds() {
        // leader holds 3 documents; 1000 writes arrive during catch-up,
        // split over two soft-lock rounds plus a residue for the hard lock
        let writes: Vec<Value> = (0..1000).map(|i| json!({"op": i})).collect();
        let batches = vec![
            writes[0..400].to_vec(),
            writes[400..800].to_vec(),
            writes[800..].to_vec(),
        ];
        let leader = MockLeader::new(
            vec![json!({"d": 1}), json!({"d": 2}), json!({"d": 3})],
            batches,
        );
        let local = Arc::new(MockLocal::default());

        let outcome = action(&leader, &local).run().await.expect("sync");
        match outcome {
            SyncOutcome::Synced { catchup_rounds } => {
                assert!(catchup_rounds <= 18);
                assert_eq!(catchup_rounds, 2, "two rounds reported didTimeout");
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // follower count equals leader count at the checksum check
        assert_eq!(local.document_count().expect("count"), 1003);
        let calls = leader.add_follower_calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].checksum, "1003");
        assert!(calls[0].read_lock_id > 0, "final add runs under the hard lock");
        assert!(calls[0].syncer_id.is_some());

        // every read lock was released, the barrier was cancelled, and
        // exactly one hard lock was taken
        assert!(leader.locks_held.lock().expect("lock").is_empty());
        assert_eq!(*leader.hard_locks_taken.lock().expect("lock"), 1);
        assert_eq!(leader.barriers_cancelled.lock().expect("lock").as_slice(), &[77]);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_sync() {
        struct LossyLocal(MockLocal);
        impl LocalShard for LossyLocal {
            fn document_count(&self) -> CoralResult<u64> {
                self.0.document_count()
            }
            fn apply_dump(&self, _documents: &[Value]) -> CoralResult<()> {
                Ok(()) // drops the dump on the floor
            }
            fn apply_operations(&self, operations: &[Value]) -> CoralResult<()> {
                self.0.apply_operations(operations)
            }
        }

        let leader = MockLeader::new(vec![json!({"d": 1})], vec![]);
        let local = Arc::new(LossyLocal(MockLocal::default()));
        let sync = SynchronizeShard::new(
            Arc::clone(&leader) as Arc<dyn LeaderClient>,
            local as Arc<dyn LocalShard>,
            Arc::new(StaticPlan {
                leader: "LEADER".into(),
                servers: vec!["LEADER".into(), "FOLLOWER".into()],
            }),
            SyncConfig {
                plan_poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
            "s100",
            "LEADER",
            "FOLLOWER",
        );
        let err = sync.run().await.expect_err("count mismatch must fail");
        assert!(err.is(ErrorCode::FollowerRefused));
        assert!(
            leader.locks_held.lock().expect("lock").is_empty(),
            "locks are released on the failure path too"
        );
    }

    #[tokio::test]
    async fn test_plan_divergence_cancels() {
        struct WrongLeaderPlan;
        impl PlanView for WrongLeaderPlan {
            fn shard_plan(&self, _shard: &str) -> Option<(ServerId, Vec<ServerId>)> {
                Some(("SOMEONE_ELSE".into(), vec!["SOMEONE_ELSE".into()]))
            }
        }
        let leader = MockLeader::new(vec![], vec![]);
        let local = Arc::new(MockLocal::default());
        let sync = SynchronizeShard::new(
            Arc::clone(&leader) as Arc<dyn LeaderClient>,
            local as Arc<dyn LocalShard>,
            Arc::new(WrongLeaderPlan),
            SyncConfig {
                plan_wait: Duration::from_millis(20),
                plan_poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
            "s100",
            "LEADER",
            "FOLLOWER",
        );
        let err = sync.run().await.expect_err("diverged plan must cancel");
        assert!(err.is(ErrorCode::ShardSyncCancelled));
    }
}
