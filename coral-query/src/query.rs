//! Per-query state: warnings, cancellation, block allocation.

use crate::block::BlockManager;
use coral_core::{ErrorCode, QueryId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Warnings are bounded; beyond the cap they are counted but dropped.
const MAX_WARNINGS: usize = 10;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct QueryWarning {
    pub code: i32,
    pub message: String,
}

pub struct QueryContext {
    id: QueryId,
    killed: AtomicBool,
    warnings: Mutex<Vec<QueryWarning>>,
    block_manager: Arc<BlockManager>,
}

impl QueryContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: QueryId::new(coral_core::next_tick()),
            killed: AtomicBool::new(false),
            warnings: Mutex::new(Vec::new()),
            block_manager: BlockManager::new(),
        })
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn block_manager(&self) -> &Arc<BlockManager> {
        &self.block_manager
    }

    /// Cooperative cancellation, observed at executor boundaries.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub fn register_warning(&self, code: ErrorCode, message: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            if warnings.len() < MAX_WARNINGS {
                warnings.push(QueryWarning {
                    code: code.as_i32(),
                    message: message.to_string(),
                });
            }
        }
    }

    pub fn warnings(&self) -> Vec<QueryWarning> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_cap() {
        let ctx = QueryContext::new();
        for i in 0..20 {
            ctx.register_warning(ErrorCode::QueryDivisionByZero, &format!("warning {}", i));
        }
        assert_eq!(ctx.warnings().len(), MAX_WARNINGS);
    }

    #[test]
    fn test_kill_flag() {
        let ctx = QueryContext::new();
        assert!(!ctx.is_killed());
        ctx.kill();
        assert!(ctx.is_killed());
    }
}
