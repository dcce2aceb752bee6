//! CORAL Cluster - shard synchronization
//!
//! Makes a follower's shard identical to the leader's and registers the
//! follower as in-sync, losing no writes during the transition: plan
//! convergence wait, zero-document shortcut, initial dump under a WAL
//! barrier, soft-lock catch-up rounds, and a hard-lock finalization with a
//! document-count checksum.

mod client;
mod follower;
mod sync;

pub use client::{
    cancel_lock_outcome, AddFollowerRequest, DumpResult, HttpLeaderClient, LeaderClient,
    TailResult,
};
pub use follower::FollowerInfo;
pub use sync::{LocalShard, PlanView, SyncConfig, SyncOutcome, SynchronizeShard};
