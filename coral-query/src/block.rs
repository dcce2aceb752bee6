//! Item blocks: the dense value matrices flowing through the pipeline.
//!
//! A block is rows x registers. Each row is either a data row or a shadow
//! row; a shadow row carries a non-negative depth and marks "end of subquery
//! input at depth d". Blocks are allocated from a per-query manager that
//! pools empty blocks.

use crate::registers::RegisterId;
use crate::value::AqlValue;
use std::sync::{Arc, Mutex};

/// Default number of rows requested per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

// ============================================================================
// ITEM BLOCK
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AqlItemBlock {
    values: Vec<AqlValue>,
    num_rows: usize,
    num_registers: usize,
    /// Shadow-row depth per row; `None` marks a data row.
    shadow_depths: Vec<Option<u32>>,
}

impl AqlItemBlock {
    pub fn new(num_rows: usize, num_registers: usize) -> Self {
        Self {
            values: vec![AqlValue::none(); num_rows * num_registers],
            num_rows,
            num_registers,
            shadow_depths: vec![None; num_rows],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_registers(&self) -> usize {
        self.num_registers
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    fn cell(&self, row: usize, register: RegisterId) -> usize {
        debug_assert!(row < self.num_rows);
        debug_assert!((register as usize) < self.num_registers);
        row * self.num_registers + register as usize
    }

    pub fn value(&self, row: usize, register: RegisterId) -> &AqlValue {
        &self.values[self.cell(row, register)]
    }

    pub fn set_value(&mut self, row: usize, register: RegisterId, value: AqlValue) {
        let cell = self.cell(row, register);
        self.values[cell] = value;
    }

    /// Bulk copy of the kept registers from `source_row` to `target_row`.
    pub fn copy_values_from_row(
        &mut self,
        target_row: usize,
        registers: &[RegisterId],
        source_row: usize,
    ) {
        for &register in registers {
            let value = self.value(source_row, register).clone();
            self.set_value(target_row, register, value);
        }
    }

    /// Clear the given registers in every row.
    pub fn clear_registers(&mut self, registers: &[RegisterId]) {
        for row in 0..self.num_rows {
            for &register in registers {
                self.set_value(row, register, AqlValue::none());
            }
        }
    }

    // --- shadow rows ---

    pub fn is_shadow_row(&self, row: usize) -> bool {
        self.shadow_depths.get(row).map(Option::is_some).unwrap_or(false)
    }

    pub fn shadow_depth(&self, row: usize) -> Option<u32> {
        self.shadow_depths.get(row).copied().flatten()
    }

    pub fn make_shadow_row(&mut self, row: usize, depth: u32) {
        self.shadow_depths[row] = Some(depth);
    }

    pub fn make_data_row(&mut self, row: usize) {
        self.shadow_depths[row] = None;
    }

    /// Shrink to the first `num_rows` rows.
    pub fn shrink(&mut self, num_rows: usize) {
        debug_assert!(num_rows <= self.num_rows);
        self.num_rows = num_rows;
        self.values.truncate(num_rows * self.num_registers);
        self.shadow_depths.truncate(num_rows);
    }

    fn reset(&mut self, num_rows: usize, num_registers: usize) {
        self.values.clear();
        self.values.resize(num_rows * num_registers, AqlValue::none());
        self.shadow_depths.clear();
        self.shadow_depths.resize(num_rows, None);
        self.num_rows = num_rows;
        self.num_registers = num_registers;
    }
}

// ============================================================================
// BLOCK MANAGER
// ============================================================================

/// Per-query allocator that pools empty blocks for reuse.
#[derive(Debug, Default)]
pub struct BlockManager {
    pool: Mutex<Vec<AqlItemBlock>>,
}

impl BlockManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_block(&self, num_rows: usize, num_registers: usize) -> AqlItemBlock {
        if let Ok(mut pool) = self.pool.lock() {
            if let Some(mut block) = pool.pop() {
                block.reset(num_rows, num_registers);
                return block;
            }
        }
        AqlItemBlock::new(num_rows, num_registers)
    }

    /// Return a block for reuse once no row references it.
    pub fn return_block(&self, block: AqlItemBlock) {
        if let Ok(mut pool) = self.pool.lock() {
            if pool.len() < 16 {
                pool.push(block);
            }
        }
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_cells_default_empty() {
        let block = AqlItemBlock::new(3, 2);
        assert!(block.value(2, 1).is_empty());
        assert!(!block.is_shadow_row(0));
    }

    #[test]
    fn test_set_and_copy_values() {
        let mut block = AqlItemBlock::new(2, 3);
        block.set_value(0, 0, AqlValue::from_json(json!("a")));
        block.set_value(0, 2, AqlValue::from_json(json!(7)));
        block.copy_values_from_row(1, &[0, 2], 0);
        assert_eq!(block.value(1, 0).as_json(), &json!("a"));
        assert_eq!(block.value(1, 2).as_json(), &json!(7));
        assert!(block.value(1, 1).is_empty());
    }

    #[test]
    fn test_shadow_row_marking() {
        let mut block = AqlItemBlock::new(2, 1);
        block.make_shadow_row(1, 0);
        assert!(block.is_shadow_row(1));
        assert_eq!(block.shadow_depth(1), Some(0));
        block.make_data_row(1);
        assert!(!block.is_shadow_row(1));
    }

    #[test]
    fn test_shrink() {
        let mut block = AqlItemBlock::new(5, 2);
        block.shrink(2);
        assert_eq!(block.num_rows(), 2);
    }

    #[test]
    fn test_manager_pools_blocks() {
        let manager = BlockManager::new();
        let block = manager.request_block(4, 2);
        manager.return_block(block);
        assert_eq!(manager.pooled(), 1);
        let reused = manager.request_block(8, 3);
        assert_eq!(manager.pooled(), 0);
        assert_eq!(reused.num_rows(), 8);
        assert_eq!(reused.num_registers(), 3);
        assert!(reused.value(7, 2).is_empty());
    }
}
