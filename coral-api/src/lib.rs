//! CORAL API - REST layer over the database core
//!
//! Collection management and the replication surface used by syncing
//! followers. Handlers translate [`coral_core::CoralError`] into the
//! structured error body at the edge; everything below returns results.

pub mod aql;
pub mod error;
pub mod routes;
pub mod state;

pub use aql::{CollectionDocumentSource, DatabaseBlockEnv};
pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::AppState;

#[cfg(test)]
mod tests {
    use super::*;
    use coral_test_utils::TestEngine;
    use std::sync::Arc;

    fn test_state() -> (TestEngine, Arc<AppState>) {
        let fixture = TestEngine::new();
        let state = AppState::new(Arc::clone(&fixture.database));
        (fixture, state)
    }

    #[test]
    fn test_router_builds() {
        let (_fixture, state) = test_state();
        let _router = router(state);
    }

    #[test]
    fn test_read_lock_expiry() {
        let (_fixture, state) = test_state();
        state.register_read_lock(1, "c".into(), true, std::time::Duration::from_secs(0));
        state.register_read_lock(2, "c".into(), false, std::time::Duration::from_secs(600));
        state.expire_read_locks();
        assert!(!state.read_locks.contains_key(&1), "expired lock is forcibly released");
        assert!(state.read_locks.contains_key(&2));
    }
}
