//! Filter executor: keeps rows whose input register is truthy.

use super::{forward_shadow_row, ShadowStep};
use crate::executor::{
    ExecutionState, Executor, ExecutorProperties, ExecutorStats, SingleRowFetcher,
};
use crate::registers::RegisterId;
use crate::row::OutputAqlItemRow;
use coral_core::CoralResult;

pub struct FilterExecutor {
    input_register: RegisterId,
}

impl FilterExecutor {
    pub fn new(input_register: RegisterId) -> Self {
        Self { input_register }
    }
}

impl Executor for FilterExecutor {
    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: true,
        allows_block_passthrough: true,
        input_size_restricts_output_size: true,
    };

    fn produce_rows(
        &mut self,
        fetcher: &mut SingleRowFetcher,
        output: &mut OutputAqlItemRow,
    ) -> CoralResult<(ExecutionState, ExecutorStats)> {
        let mut stats = ExecutorStats::default();
        loop {
            if output.is_full() {
                return Ok((ExecutionState::HasMore, stats));
            }
            let (state, row) = fetcher.fetch_row(usize::MAX)?;
            match row {
                Some(row) => {
                    if row.value(self.input_register).is_truthy() {
                        output.copy_row_directly(&row);
                        output.advance_row();
                    } else {
                        stats.filtered += 1;
                    }
                    if state == ExecutionState::Waiting {
                        return Ok((ExecutionState::Waiting, stats));
                    }
                }
                None => match state {
                    ExecutionState::Waiting => return Ok((ExecutionState::Waiting, stats)),
                    _ => match forward_shadow_row(fetcher, output)? {
                        ShadowStep::Forwarded => {}
                        ShadowStep::Exhausted(state) => return Ok((state, stats)),
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

    fn run_filter(values: &[serde_json::Value]) -> Vec<serde_json::Value> {
        let mut block = AqlItemBlock::new(values.len(), 1);
        for (i, v) in values.iter().enumerate() {
            block.set_value(i, 0, AqlValue::from_json(v.clone()));
        }
        let mut filter = ExecutionBlockImpl::new(
            FilterExecutor::new(0),
            Box::new(ValuesBlock::new(block)),
            RegisterInfos::passthrough(1),
            BlockManager::new(),
        );
        let (state, out) = filter.get_some(100).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
        match out {
            None => vec![],
            Some(block) => (0..block.num_rows())
                .map(|i| block.value(i, 0).to_json())
                .collect(),
        }
    }

    #[test]
    fn test_filter_keeps_truthy_rows() {
        let out = run_filter(&[json!(1), json!(0), json!("x"), json!(null), json!(true)]);
        assert_eq!(out, vec![json!(1), json!("x"), json!(true)]);
    }

    #[test]
    fn test_filter_records_filtered_stat() {
        let mut block = AqlItemBlock::new(3, 1);
        block.set_value(0, 0, AqlValue::from_json(json!(0)));
        block.set_value(1, 0, AqlValue::from_json(json!(1)));
        block.set_value(2, 0, AqlValue::from_json(json!(false)));
        let mut filter = ExecutionBlockImpl::new(
            FilterExecutor::new(0),
            Box::new(ValuesBlock::new(block)),
            RegisterInfos::passthrough(1),
            BlockManager::new(),
        );
        filter.get_some(100).expect("get_some");
        assert_eq!(filter.collect_stats().filtered, 2);
    }

    #[test]
    fn test_filter_forwards_shadow_rows() {
        let mut block = AqlItemBlock::new(3, 1);
        block.set_value(0, 0, AqlValue::from_json(json!(0)));
        block.set_value(1, 0, AqlValue::from_json(json!(1)));
        block.set_value(2, 0, AqlValue::from_json(json!("ctx")));
        block.make_shadow_row(2, 0);

        let mut filter = ExecutionBlockImpl::new(
            FilterExecutor::new(0),
            Box::new(ValuesBlock::new(block)),
            RegisterInfos::passthrough(1),
            BlockManager::new(),
        );
        let (state, out) = filter.get_some(100).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
        let out = out.expect("rows");
        assert_eq!(out.num_rows(), 2);
        assert!(!out.is_shadow_row(0));
        assert!(out.is_shadow_row(1), "shadow row passes through the filter");
        assert_eq!(out.value(1, 0).as_json(), &json!("ctx"));
    }
}
