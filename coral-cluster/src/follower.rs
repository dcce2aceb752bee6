//! Per-shard follower tracking.
//!
//! The leader maintains three sets: the current followers (which acknowledge
//! every write before the client does), the failover candidates (servers
//! eligible to become leader), and the local notion of who leads. Updates
//! are rare (membership change, leader switch), so a plain mutex suffices.

use coral_core::ServerId;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct FollowerState {
    /// Followers currently acknowledging writes, in registration order.
    followers: Vec<ServerId>,
    /// Servers that could take over leadership.
    failover_candidates: Vec<ServerId>,
    /// `None` means this server is the leader.
    leader: Option<ServerId>,
}

#[derive(Debug, Default)]
pub struct FollowerInfo {
    state: Mutex<FollowerState>,
}

impl FollowerInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a follower as in-sync. Returns false if it was already
    /// registered.
    pub fn add_follower(&self, id: &str) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if state.followers.iter().any(|f| f == id) {
            return false;
        }
        state.followers.push(id.to_string());
        if !state.failover_candidates.iter().any(|f| f == id) {
            state.failover_candidates.push(id.to_string());
        }
        tracing::info!(follower = id, "added in-sync follower");
        true
    }

    /// Remove a follower from the in-sync set (it missed a write or asked to
    /// leave).
    pub fn remove_follower(&self, id: &str) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let before = state.followers.len();
        state.followers.retain(|f| f != id);
        state.failover_candidates.retain(|f| f != id);
        let removed = state.followers.len() != before;
        if removed {
            tracing::info!(follower = id, "removed follower");
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.followers.iter().any(|f| f == id))
            .unwrap_or(false)
    }

    pub fn followers(&self) -> Vec<ServerId> {
        self.state
            .lock()
            .map(|state| state.followers.clone())
            .unwrap_or_default()
    }

    pub fn failover_candidates(&self) -> Vec<ServerId> {
        self.state
            .lock()
            .map(|state| state.failover_candidates.clone())
            .unwrap_or_default()
    }

    /// Record who leads this shard; `None` declares the local server leader.
    pub fn set_leader(&self, leader: Option<ServerId>) {
        if let Ok(mut state) = self.state.lock() {
            state.leader = leader;
        }
    }

    pub fn leader(&self) -> Option<ServerId> {
        self.state.lock().map(|state| state.leader.clone()).unwrap_or(None)
    }

    pub fn is_leader(&self) -> bool {
        self.leader().is_none()
    }

    /// Become leader: previous followers are cleared, failover candidates
    /// survive so the supervision can pick replacements.
    pub fn take_over_leadership(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.leader = None;
            state.followers.clear();
        }
    }

    /// Whether the in-sync replica count (leader included) satisfies the
    /// write concern.
    pub fn satisfies_write_concern(&self, write_concern: u32) -> bool {
        let followers = self
            .state
            .lock()
            .map(|state| state.followers.len())
            .unwrap_or(0);
        (followers as u32).saturating_add(1) >= write_concern
    }
}
