//! No-results executor: produced when a filter condition is provably false.

use crate::executor::{
    ExecutionState, Executor, ExecutorProperties, ExecutorStats, SingleRowFetcher,
};
use crate::row::OutputAqlItemRow;
use coral_core::CoralResult;

#[derive(Default)]
pub struct NoResultsExecutor;

impl Executor for NoResultsExecutor {
    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: true,
        allows_block_passthrough: false,
        input_size_restricts_output_size: false,
    };

    fn produce_rows(
        &mut self,
        _fetcher: &mut SingleRowFetcher,
        _output: &mut OutputAqlItemRow,
    ) -> CoralResult<(ExecutionState, ExecutorStats)> {
        Ok((ExecutionState::Done, ExecutorStats::default()))
    }

    fn skip_rows(
        &mut self,
        _fetcher: &mut SingleRowFetcher,
        _to_skip: usize,
    ) -> CoralResult<(ExecutionState, ExecutorStats, usize)> {
        Ok((ExecutionState::Done, ExecutorStats::default(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockManager;
    use crate::executor::tests::data_block;
    use crate::executor::{ExecutionBlock, ExecutionBlockImpl, RegisterInfos, ValuesBlock};

    #[test]
    fn test_no_results_is_immediately_done() {
        let mut block = ExecutionBlockImpl::new(
            NoResultsExecutor,
            Box::new(ValuesBlock::new(data_block(&[1, 2, 3]))),
            RegisterInfos::passthrough(1),
            BlockManager::new(),
        );
        let (state, out) = block.get_some(100).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
        assert!(out.is_none());
    }
}
