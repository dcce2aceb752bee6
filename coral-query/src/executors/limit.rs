//! Limit executor with offset and optional fullCount.

use super::{forward_shadow_row, ShadowStep};
use crate::executor::{
    ExecutionState, Executor, ExecutorProperties, ExecutorStats, SingleRowFetcher,
};
use crate::row::OutputAqlItemRow;
use coral_core::CoralResult;

pub struct LimitExecutor {
    offset: u64,
    limit: u64,
    full_count: bool,
    skipped: u64,
    returned: u64,
}

impl LimitExecutor {
    pub fn new(offset: u64, limit: u64, full_count: bool) -> Self {
        Self {
            offset,
            limit,
            full_count,
            skipped: 0,
            returned: 0,
        }
    }
}

impl Executor for LimitExecutor {
    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: true,
        allows_block_passthrough: false,
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
            if self.returned >= self.limit && !self.full_count {
                // bounded: nothing more to produce
                return Ok((ExecutionState::Done, stats));
            }
            let (state, row) = fetcher.fetch_row(usize::MAX)?;
            match row {
                Some(row) => {
                    if self.skipped < self.offset {
                        self.skipped += 1;
                        stats.full_count += 1;
                    } else if self.returned < self.limit {
                        self.returned += 1;
                        stats.full_count += 1;
                        output.copy_row_directly(&row);
                        output.advance_row();
                    } else {
                        // beyond the limit: consumed only for fullCount
                        stats.full_count += 1;
                    }
                    if state == ExecutionState::Waiting {
                        return Ok((ExecutionState::Waiting, stats));
                    }
                }
                None => match state {
                    ExecutionState::Waiting => return Ok((ExecutionState::Waiting, stats)),
                    _ => match forward_shadow_row(fetcher, output)? {
                        ShadowStep::Forwarded => {
                            // a new subquery run starts counting afresh
                            self.skipped = 0;
                            self.returned = 0;
                        }
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
    use crate::block::BlockManager;
    use crate::executor::tests::data_block;
    use crate::executor::{ExecutionBlock, ExecutionBlockImpl, RegisterInfos, ValuesBlock};
    use serde_json::json;

    fn run_limit(values: &[i64], offset: u64, limit: u64, full_count: bool) -> (Vec<serde_json::Value>, ExecutorStats) {
        let mut block = ExecutionBlockImpl::new(
            LimitExecutor::new(offset, limit, full_count),
            Box::new(ValuesBlock::new(data_block(values))),
            RegisterInfos::passthrough(1),
            BlockManager::new(),
        );
        let mut out = Vec::new();
        loop {
            let (state, produced) = block.get_some(100).expect("get_some");
            if let Some(produced) = produced {
                for i in 0..produced.num_rows() {
                    out.push(produced.value(i, 0).to_json());
                }
            }
            if state == ExecutionState::Done {
                break;
            }
        }
        (out, block.collect_stats())
    }

    #[test]
    fn test_offset_and_limit() {
        let (out, _) = run_limit(&[1, 2, 3, 4, 5], 1, 2, false);
        assert_eq!(out, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_full_count_consumes_the_rest() {
        let (out, stats) = run_limit(&[1, 2, 3, 4, 5], 1, 2, true);
        assert_eq!(out, vec![json!(2), json!(3)]);
        assert_eq!(stats.full_count, 5, "fullCount sees every upstream row");
    }

    #[test]
    fn test_limit_zero() {
        let (out, _) = run_limit(&[1, 2, 3], 0, 0, false);
        assert!(out.is_empty());
    }
}
