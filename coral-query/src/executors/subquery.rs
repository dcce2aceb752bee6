//! Subquery boundary executors.
//!
//! Subquery-start emits, for every input data row, the row itself followed
//! by a depth-0 shadow row delimiting the subquery's input; shadow rows
//! passing through gain one level of depth. Subquery-end consumes data rows
//! up to the next relevant shadow row, aggregates them into one array value,
//! and emits a single data row per subquery run; deeper shadow rows lose one
//! level on the way out.

use crate::executor::{
    ExecutionState, Executor, ExecutorProperties, ExecutorStats, SingleRowFetcher,
};
use crate::registers::RegisterId;
use crate::row::{InputAqlItemRow, OutputAqlItemRow};
use crate::value::{AqlValue, AqlValueGuard};
use coral_core::CoralResult;
use serde_json::Value;

// ============================================================================
// SUBQUERY START
// ============================================================================

pub struct SubqueryStartExecutor {
    /// Data row already emitted whose shadow row is still pending.
    pending_shadow: Option<InputAqlItemRow>,
}

impl SubqueryStartExecutor {
    pub fn new() -> Self {
        Self {
            pending_shadow: None,
        }
    }
}

impl Default for SubqueryStartExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for SubqueryStartExecutor {
    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: true,
        allows_block_passthrough: false,
        input_size_restricts_output_size: false,
    };

    fn produce_rows(
        &mut self,
        fetcher: &mut SingleRowFetcher,
        output: &mut OutputAqlItemRow,
    ) -> CoralResult<(ExecutionState, ExecutorStats)> {
        let stats = ExecutorStats::default();
        loop {
            if output.is_full() {
                return Ok((ExecutionState::HasMore, stats));
            }
            if let Some(row) = self.pending_shadow.take() {
                output.create_shadow_row(&row);
                output.advance_row();
                continue;
            }
            let (state, row) = fetcher.fetch_row(usize::MAX)?;
            match row {
                Some(row) => {
                    output.copy_row_directly(&row);
                    output.advance_row();
                    self.pending_shadow = Some(row);
                    if state == ExecutionState::Waiting {
                        return Ok((ExecutionState::Waiting, stats));
                    }
                }
                None => match state {
                    ExecutionState::Waiting => return Ok((ExecutionState::Waiting, stats)),
                    _ => match fetcher.fetch_shadow_row()? {
                        (_, Some(shadow)) => {
                            output.increase_shadow_row_depth(&shadow);
                            output.advance_row();
                        }
                        (state, None) => return Ok((state, stats)),
                    },
                },
            }
        }
    }
}

// ============================================================================
// SUBQUERY END
// ============================================================================

pub struct SubqueryEndExecutor {
    input_register: RegisterId,
    output_register: RegisterId,
    accumulator: Vec<Value>,
}

impl SubqueryEndExecutor {
    pub fn new(input_register: RegisterId, output_register: RegisterId) -> Self {
        Self {
            input_register,
            output_register,
            accumulator: Vec::new(),
        }
    }
}

impl Executor for SubqueryEndExecutor {
    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: true,
        allows_block_passthrough: false,
        input_size_restricts_output_size: false,
    };

    fn produce_rows(
        &mut self,
        fetcher: &mut SingleRowFetcher,
        output: &mut OutputAqlItemRow,
    ) -> CoralResult<(ExecutionState, ExecutorStats)> {
        let stats = ExecutorStats::default();
        loop {
            if output.is_full() {
                return Ok((ExecutionState::HasMore, stats));
            }
            let (state, row) = fetcher.fetch_row(usize::MAX)?;
            match row {
                Some(row) => {
                    self.accumulator
                        .push(row.value(self.input_register).to_json());
                    if state == ExecutionState::Waiting {
                        return Ok((ExecutionState::Waiting, stats));
                    }
                }
                None => match state {
                    ExecutionState::Waiting => return Ok((ExecutionState::Waiting, stats)),
                    _ => match fetcher.fetch_shadow_row()? {
                        (_, Some(shadow)) if shadow.is_relevant() => {
                            let members = std::mem::take(&mut self.accumulator);
                            let mut guard =
                                AqlValueGuard::new(AqlValue::from_json(Value::Array(members)));
                            output.consume_shadow_row(self.output_register, &shadow, &mut guard);
                            output.advance_row();
                        }
                        (_, Some(shadow)) => {
                            output.decrease_shadow_row_depth(&shadow);
                            output.advance_row();
                        }
                        (state, None) => return Ok((state, stats)),
                    },
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{AqlItemBlock, BlockManager};
    use crate::executor::{ExecutionBlock, ExecutionBlockImpl, RegisterInfos, ValuesBlock};
    use crate::value::AqlValue;
    use serde_json::json;

    fn subquery_end_over(block: AqlItemBlock) -> (ExecutionState, Option<std::sync::Arc<AqlItemBlock>>) {
        let mut end = ExecutionBlockImpl::new(
            SubqueryEndExecutor::new(0, 1),
            Box::new(ValuesBlock::new(block)),
            RegisterInfos::with_output(2, 1),
            BlockManager::new(),
        );
        end.get_some(100).expect("get_some")
    }

    #[test]
    fn test_subquery_end_aggregates_up_to_shadow_row() {
        // input rows: 42, 34, <shadow depth 0>
        let mut block = AqlItemBlock::new(3, 1);
        block.set_value(0, 0, AqlValue::from_json(json!(42)));
        block.set_value(1, 0, AqlValue::from_json(json!(34)));
        block.make_shadow_row(2, 0);

        let (state, out) = subquery_end_over(block);
        assert_eq!(state, ExecutionState::Done);
        let out = out.expect("one aggregated row");
        assert_eq!(out.num_rows(), 1);
        assert!(!out.is_shadow_row(0));
        assert_eq!(out.value(0, 1).as_json(), &json!([42, 34]));
    }

    #[test]
    fn test_subquery_end_empty_input_yields_no_rows() {
        let (state, out) = subquery_end_over(AqlItemBlock::new(0, 1));
        assert_eq!(state, ExecutionState::Done);
        assert!(out.is_none());
    }

    #[test]
    fn test_subquery_end_empty_run_yields_empty_array() {
        // a shadow row with no preceding data rows: one row carrying []
        let mut block = AqlItemBlock::new(1, 1);
        block.make_shadow_row(0, 0);
        let (state, out) = subquery_end_over(block);
        assert_eq!(state, ExecutionState::Done);
        let out = out.expect("one row");
        assert_eq!(out.value(0, 1).as_json(), &json!([]));
    }

    #[test]
    fn test_subquery_end_decreases_deeper_shadows() {
        // run: [1, shadow0, shadow1] -- the depth-1 row delimits the outer
        // subquery and leaves with depth 0
        let mut block = AqlItemBlock::new(3, 1);
        block.set_value(0, 0, AqlValue::from_json(json!(1)));
        block.make_shadow_row(1, 0);
        block.make_shadow_row(2, 1);

        let (state, out) = subquery_end_over(block);
        assert_eq!(state, ExecutionState::Done);
        let out = out.expect("rows");
        assert_eq!(out.num_rows(), 2);
        assert!(!out.is_shadow_row(0));
        assert_eq!(out.value(0, 1).as_json(), &json!([1]));
        assert!(out.is_shadow_row(1));
        assert_eq!(out.shadow_depth(1), Some(0));
    }

    #[test]
    fn test_subquery_start_emits_row_and_shadow() {
        let mut input = AqlItemBlock::new(2, 1);
        input.set_value(0, 0, AqlValue::from_json(json!("a")));
        input.set_value(1, 0, AqlValue::from_json(json!("b")));

        let mut start = ExecutionBlockImpl::new(
            SubqueryStartExecutor::new(),
            Box::new(ValuesBlock::new(input)),
            RegisterInfos::passthrough(1),
            BlockManager::new(),
        );
        let (state, out) = start.get_some(100).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
        let out = out.expect("rows");
        assert_eq!(out.num_rows(), 4);
        assert!(!out.is_shadow_row(0));
        assert!(out.is_shadow_row(1));
        assert_eq!(out.shadow_depth(1), Some(0));
        assert_eq!(out.value(1, 0).as_json(), &json!("a"));
        assert!(!out.is_shadow_row(2));
        assert!(out.is_shadow_row(3));
        assert_eq!(out.value(3, 0).as_json(), &json!("b"));
    }

    #[test]
    fn test_start_end_round_trip() {
        // start then end reproduces one aggregated array per input row
        let mut input = AqlItemBlock::new(1, 1);
        input.set_value(0, 0, AqlValue::from_json(json!(5)));

        let start = ExecutionBlockImpl::new(
            SubqueryStartExecutor::new(),
            Box::new(ValuesBlock::new(input)),
            RegisterInfos::passthrough(1),
            BlockManager::new(),
        );
        let mut end = ExecutionBlockImpl::new(
            SubqueryEndExecutor::new(0, 1),
            Box::new(start),
            RegisterInfos::with_output(2, 1),
            BlockManager::new(),
        );
        let (state, out) = end.get_some(100).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
        let out = out.expect("rows");
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.value(0, 1).as_json(), &json!([5]));
    }
}
