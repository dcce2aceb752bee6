//! Input, output, and shadow rows.
//!
//! An input row is a read-only `(block, index)` pair. An output row writes
//! each of its declared output registers at most once; after the last write
//! the kept registers of the source row are copied across automatically.
//! Consecutive output rows derived from the same input row (identity, not
//! equality) skip the per-value clone and bulk-copy from the previous output
//! row instead.

use crate::block::AqlItemBlock;
use crate::registers::RegisterId;
use crate::value::{AqlValue, AqlValueGuard};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// INPUT ROWS
// ============================================================================

#[derive(Debug, Clone)]
pub struct InputAqlItemRow {
    block: Arc<AqlItemBlock>,
    row: usize,
}

impl InputAqlItemRow {
    pub fn new(block: Arc<AqlItemBlock>, row: usize) -> Self {
        debug_assert!(!block.is_shadow_row(row));
        Self { block, row }
    }

    pub fn value(&self, register: RegisterId) -> &AqlValue {
        self.block.value(self.row, register)
    }

    pub fn num_registers(&self) -> usize {
        self.block.num_registers()
    }

    pub fn is_last_row_in_block(&self) -> bool {
        self.row + 1 == self.block.num_rows()
    }

    /// Identity (same block allocation, same index), used for same-source
    /// memoization.
    pub fn is_same_row(&self, other: &InputAqlItemRow) -> bool {
        Arc::ptr_eq(&self.block, &other.block) && self.row == other.row
    }

    fn identity(&self) -> (usize, usize) {
        (Arc::as_ptr(&self.block) as usize, self.row)
    }
}

#[derive(Debug, Clone)]
pub struct ShadowAqlItemRow {
    block: Arc<AqlItemBlock>,
    row: usize,
}

impl ShadowAqlItemRow {
    pub fn new(block: Arc<AqlItemBlock>, row: usize) -> Self {
        debug_assert!(block.is_shadow_row(row));
        Self { block, row }
    }

    pub fn value(&self, register: RegisterId) -> &AqlValue {
        self.block.value(self.row, register)
    }

    pub fn num_registers(&self) -> usize {
        self.block.num_registers()
    }

    pub fn depth(&self) -> u32 {
        self.block.shadow_depth(self.row).unwrap_or(0)
    }

    /// Depth-0 shadow rows are "relevant": they delimit the innermost
    /// subquery currently being consumed.
    pub fn is_relevant(&self) -> bool {
        self.depth() == 0
    }
}

/// Common surface of the two row kinds when used as a copy source.
pub trait SourceRow {
    fn source_value(&self, register: RegisterId) -> &AqlValue;
    fn source_registers(&self) -> usize;
    /// Identity for memoization; shadow rows return `None` and are always
    /// cloned.
    fn memo_identity(&self) -> Option<(usize, usize)>;
    /// Shadow depth to stamp on the written row, if any.
    fn shadow_depth(&self) -> Option<u32>;
}

impl SourceRow for InputAqlItemRow {
    fn source_value(&self, register: RegisterId) -> &AqlValue {
        self.value(register)
    }
    fn source_registers(&self) -> usize {
        self.num_registers()
    }
    fn memo_identity(&self) -> Option<(usize, usize)> {
        Some(self.identity())
    }
    fn shadow_depth(&self) -> Option<u32> {
        None
    }
}

impl SourceRow for ShadowAqlItemRow {
    fn source_value(&self, register: RegisterId) -> &AqlValue {
        self.value(register)
    }
    fn source_registers(&self) -> usize {
        self.num_registers()
    }
    fn memo_identity(&self) -> Option<(usize, usize)> {
        None
    }
    fn shadow_depth(&self) -> Option<u32> {
        Some(self.depth())
    }
}

// ============================================================================
// OUTPUT ROW
// ============================================================================

pub struct OutputAqlItemRow {
    block: Option<AqlItemBlock>,
    base_index: usize,
    last_base_index: usize,
    input_row_copied: bool,
    last_source: Option<(usize, usize)>,
    num_values_written: usize,
    output_registers: HashSet<RegisterId>,
    registers_to_keep: Vec<RegisterId>,
}

impl OutputAqlItemRow {
    pub fn new(
        block: AqlItemBlock,
        output_registers: HashSet<RegisterId>,
        registers_to_keep: Vec<RegisterId>,
    ) -> Self {
        Self {
            block: Some(block),
            base_index: 0,
            last_base_index: 0,
            input_row_copied: false,
            last_source: None,
            num_values_written: 0,
            output_registers,
            registers_to_keep,
        }
    }

    fn block(&mut self) -> &mut AqlItemBlock {
        self.block.as_mut().expect("output block was stolen")
    }

    fn block_ref(&self) -> &AqlItemBlock {
        self.block.as_ref().expect("output block was stolen")
    }

    pub fn is_output_register(&self, register: RegisterId) -> bool {
        self.output_registers.contains(&register)
    }

    fn num_registers_to_write(&self) -> usize {
        self.output_registers.len()
    }

    pub fn all_values_written(&self) -> bool {
        self.num_values_written == self.num_registers_to_write()
    }

    /// The current row is complete and may be advanced.
    pub fn produced(&self) -> bool {
        self.input_row_copied && self.all_values_written()
    }

    /// Clone `value` into an output register.
    pub fn clone_value_into<S: SourceRow>(
        &mut self,
        register: RegisterId,
        source: &S,
        value: &AqlValue,
    ) {
        let mut guard = AqlValueGuard::new(value.clone());
        self.move_value_into(register, source, &mut guard);
    }

    /// Move a guarded value into an output register. At most one move per
    /// cell; after the last declared register was written, the kept
    /// registers of `source` are copied across.
    pub fn move_value_into<S: SourceRow>(
        &mut self,
        register: RegisterId,
        source: &S,
        guard: &mut AqlValueGuard,
    ) {
        debug_assert!(self.is_output_register(register));
        debug_assert!(self.num_values_written < self.num_registers_to_write());
        let base = self.base_index;
        debug_assert!(self.block_ref().value(base, register).is_empty());

        let value = guard.steal();
        self.block().set_value(base, register, value);
        self.num_values_written += 1;
        // only once the count is up to date may the row be completed
        if self.all_values_written() {
            self.copy_row(source);
        }
    }

    fn copy_row<S: SourceRow>(&mut self, source: &S) {
        if self.input_row_copied {
            self.last_base_index = self.base_index;
            return;
        }
        self.do_copy_row(source, false);
    }

    fn do_copy_row<S: SourceRow>(&mut self, source: &S, ignore_missing: bool) {
        let source_identity = source.memo_identity();
        let must_clone = self.base_index == 0
            || source_identity.is_none()
            || self.last_source != source_identity;

        if must_clone {
            let base = self.base_index;
            let keep = self.registers_to_keep.clone();
            for register in keep {
                if ignore_missing && register as usize >= source.source_registers() {
                    continue;
                }
                let value = source.source_value(register);
                if !value.is_empty() {
                    let value = value.clone();
                    self.block().set_value(base, register, value);
                }
            }
            if let Some(depth) = source.shadow_depth() {
                self.block().make_shadow_row(base, depth);
            }
        } else {
            debug_assert!(self.base_index > 0);
            let base = self.base_index;
            let last = self.last_base_index;
            let keep = self.registers_to_keep.clone();
            self.block().copy_values_from_row(base, &keep, last);
        }

        self.input_row_copied = true;
        self.last_source = source_identity;
        self.last_base_index = self.base_index;
    }

    /// Copy the full source row without writing any output register; used by
    /// register-preserving executors (filter, limit, gather).
    pub fn copy_row_directly<S: SourceRow>(&mut self, source: &S) {
        debug_assert_eq!(self.num_registers_to_write(), 0);
        self.copy_row(source);
    }

    pub fn advance_row(&mut self) {
        debug_assert!(self.produced());
        self.base_index += 1;
        self.input_row_copied = false;
        self.num_values_written = 0;
    }

    // --- shadow rows ---

    /// Emit a depth-0 shadow row derived from a data row. Only allowed on
    /// blocks that write no other output, and the source must live in a
    /// different block than the output.
    pub fn create_shadow_row(&mut self, source: &InputAqlItemRow) {
        debug_assert!(!self.input_row_copied);
        debug_assert_eq!(self.num_registers_to_write(), 0);
        let base = self.base_index;
        self.block().make_shadow_row(base, 0);
        self.do_copy_row(source, true);
    }

    /// Forward a shadow row unchanged (same depth). Used by executors that
    /// are not shadow-row aware themselves.
    pub fn forward_shadow_row(&mut self, source: &ShadowAqlItemRow) {
        self.do_copy_row(source, false);
        self.num_values_written = self.num_registers_to_write();
        debug_assert!(self.produced());
    }

    /// Forward a shadow row one subquery level deeper.
    pub fn increase_shadow_row_depth(&mut self, source: &ShadowAqlItemRow) {
        self.do_copy_row(source, false);
        let base = self.base_index;
        let depth = source.depth() + 1;
        self.block().make_shadow_row(base, depth);
        self.num_values_written = self.num_registers_to_write();
        debug_assert!(self.produced());
    }

    /// Forward a shadow row one subquery level up; requires a non-relevant
    /// source.
    pub fn decrease_shadow_row_depth(&mut self, source: &ShadowAqlItemRow) {
        debug_assert!(!source.is_relevant());
        self.do_copy_row(source, false);
        let base = self.base_index;
        let depth = source.depth() - 1;
        self.block().make_shadow_row(base, depth);
        self.num_values_written = self.num_registers_to_write();
        debug_assert!(self.produced());
    }

    /// Consume a relevant shadow row, writing the aggregated subquery result
    /// and turning the row back into a data row.
    pub fn consume_shadow_row(
        &mut self,
        register: RegisterId,
        source: &ShadowAqlItemRow,
        guard: &mut AqlValueGuard,
    ) {
        debug_assert!(source.is_relevant());
        self.move_value_into(register, source, guard);
        debug_assert!(self.produced());
        let base = self.base_index;
        self.block().make_data_row(base);
    }

    // --- bookkeeping ---

    pub fn num_rows_written(&self) -> usize {
        if self.produced() {
            self.base_index + 1
        } else {
            self.base_index
        }
    }

    pub fn is_full(&self) -> bool {
        self.num_rows_written() >= self.block_ref().num_rows()
    }

    /// Transfer ownership of the produced block, shrunk to the written rows.
    /// Returns `None` when nothing was written.
    pub fn steal_block(&mut self) -> Option<AqlItemBlock> {
        let num_rows = self.num_rows_written();
        let mut block = self.block.take()?;
        if num_rows == 0 {
            return None;
        }
        block.shrink(num_rows);
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_block(rows: &[i64]) -> Arc<AqlItemBlock> {
        let mut block = AqlItemBlock::new(rows.len(), 1);
        for (i, v) in rows.iter().enumerate() {
            block.set_value(i, 0, AqlValue::from_json(json!(v)));
        }
        Arc::new(block)
    }

    fn output(rows: usize, registers: usize, outputs: &[RegisterId], keep: &[RegisterId]) -> OutputAqlItemRow {
        OutputAqlItemRow::new(
            AqlItemBlock::new(rows, registers),
            outputs.iter().copied().collect(),
            keep.to_vec(),
        )
    }

    #[test]
    fn test_write_once_then_copy_row() {
        let input = input_block(&[7]);
        let source = InputAqlItemRow::new(Arc::clone(&input), 0);
        let mut out = output(1, 2, &[1], &[0]);

        assert!(out.is_output_register(1));
        assert!(!out.is_output_register(0));
        out.clone_value_into(1, &source, &AqlValue::from_json(json!("result")));
        assert!(out.produced(), "writing the last register completes the row");

        let block = out.steal_block().expect("one row written");
        assert_eq!(block.value(0, 0).as_json(), &json!(7), "kept register copied");
        assert_eq!(block.value(0, 1).as_json(), &json!("result"));
    }

    #[test]
    fn test_same_source_memoization_bulk_copies() {
        let input = input_block(&[7]);
        let source = InputAqlItemRow::new(Arc::clone(&input), 0);
        let mut out = output(3, 2, &[1], &[0]);

        for i in 0..3 {
            out.clone_value_into(1, &source, &AqlValue::from_json(json!(i)));
            out.advance_row();
        }
        let block = out.steal_block().expect("rows written");
        assert_eq!(block.num_rows(), 3);
        for i in 0..3 {
            assert_eq!(block.value(i, 0).as_json(), &json!(7));
        }
    }

    #[test]
    fn test_advance_requires_produced() {
        let input = input_block(&[1]);
        let source = InputAqlItemRow::new(Arc::clone(&input), 0);
        let mut out = output(2, 1, &[], &[0]);
        out.copy_row_directly(&source);
        assert!(out.produced());
        out.advance_row();
        assert_eq!(out.num_rows_written(), 1);
    }

    #[test]
    fn test_steal_block_empty_returns_none() {
        let mut out = output(4, 1, &[0], &[]);
        assert!(out.steal_block().is_none());
    }

    #[test]
    fn test_create_shadow_row_from_other_block() {
        let input = input_block(&[42]);
        let source = InputAqlItemRow::new(Arc::clone(&input), 0);
        let mut out = output(2, 1, &[], &[0]);

        out.copy_row_directly(&source);
        out.advance_row();
        out.create_shadow_row(&source);
        assert!(out.produced());
        out.advance_row();

        let block = out.steal_block().expect("rows written");
        assert!(!block.is_shadow_row(0));
        assert!(block.is_shadow_row(1));
        assert_eq!(block.shadow_depth(1), Some(0));
        assert_eq!(block.value(1, 0).as_json(), &json!(42));
    }

    #[test]
    fn test_shadow_depth_adjustment() {
        let mut raw = AqlItemBlock::new(1, 1);
        raw.set_value(0, 0, AqlValue::from_json(json!("ctx")));
        raw.make_shadow_row(0, 0);
        let shadow_block = Arc::new(raw);
        let shadow = ShadowAqlItemRow::new(Arc::clone(&shadow_block), 0);

        let mut out = output(1, 1, &[], &[0]);
        out.increase_shadow_row_depth(&shadow);
        out.advance_row();
        let deeper = out.steal_block().expect("row written");
        assert_eq!(deeper.shadow_depth(0), Some(1));

        let deeper = Arc::new(deeper);
        let deep_shadow = ShadowAqlItemRow::new(Arc::clone(&deeper), 0);
        assert!(!deep_shadow.is_relevant());
        let mut out = output(1, 1, &[], &[0]);
        out.decrease_shadow_row_depth(&deep_shadow);
        out.advance_row();
        let restored = out.steal_block().expect("row written");
        assert_eq!(restored.shadow_depth(0), Some(0));
    }

    #[test]
    fn test_consume_shadow_row_writes_and_converts() {
        let mut raw = AqlItemBlock::new(1, 2);
        raw.make_shadow_row(0, 0);
        let shadow = ShadowAqlItemRow::new(Arc::new(raw), 0);

        let mut out = output(1, 2, &[1], &[0]);
        let mut guard = AqlValueGuard::new(AqlValue::from_json(json!([42, 34])));
        out.consume_shadow_row(1, &shadow, &mut guard);
        out.advance_row();

        let block = out.steal_block().expect("row written");
        assert!(!block.is_shadow_row(0), "consumed shadow row becomes a data row");
        assert_eq!(block.value(0, 1).as_json(), &json!([42, 34]));
    }
}
