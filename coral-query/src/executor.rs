//! The pull-based executor framework.
//!
//! Execution blocks produce rows on demand: `get_some` returns up to
//! `at_most` rows plus a state, `skip_some` counts instead of materializing.
//! `Waiting` means "no progress made; retry later with the same arguments"
//! and may only be returned when an upstream fetch returned `Waiting` without
//! producing rows.

use crate::block::{AqlItemBlock, BlockManager, DEFAULT_BATCH_SIZE};
use crate::registers::RegisterId;
use crate::row::{InputAqlItemRow, OutputAqlItemRow, ShadowAqlItemRow};
use coral_core::CoralResult;
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// STATES, PROPERTIES, STATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Done,
    HasMore,
    Waiting,
}

/// Compile-time properties every executor declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorProperties {
    pub preserves_order: bool,
    pub allows_block_passthrough: bool,
    pub input_size_restricts_output_size: bool,
}

/// Runtime statistics accumulated along the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorStats {
    pub filtered: u64,
    pub scanned_full: u64,
    pub scanned_index: u64,
    pub full_count: u64,
}

impl ExecutorStats {
    pub fn merge(&mut self, other: ExecutorStats) {
        self.filtered += other.filtered;
        self.scanned_full += other.scanned_full;
        self.scanned_index += other.scanned_index;
        self.full_count += other.full_count;
    }
}

// ============================================================================
// EXECUTION BLOCK
// ============================================================================

/// A physical operator in the pipeline.
pub trait ExecutionBlock: Send {
    fn get_some(
        &mut self,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)>;

    fn skip_some(&mut self, at_most: usize) -> CoralResult<(ExecutionState, usize)> {
        // generic skip: materialize and discard
        let (state, block) = self.get_some(at_most)?;
        let skipped = block.map(|b| b.num_rows()).unwrap_or(0);
        Ok((state, skipped))
    }

    /// Stats gathered so far, drained.
    fn collect_stats(&mut self) -> ExecutorStats {
        ExecutorStats::default()
    }
}

/// A leaf block emitting one prepared block, then `Done`. Doubles as the
/// singleton leaf (one empty row) and as the test harness input.
pub struct ValuesBlock {
    block: Option<Arc<AqlItemBlock>>,
}

impl ValuesBlock {
    pub fn new(block: AqlItemBlock) -> Self {
        Self {
            block: Some(Arc::new(block)),
        }
    }

    /// The pipeline leaf: a single empty row with `registers` registers.
    pub fn singleton(registers: RegisterId) -> Self {
        Self::new(AqlItemBlock::new(1, registers as usize))
    }
}

impl ExecutionBlock for ValuesBlock {
    fn get_some(
        &mut self,
        _at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)> {
        match self.block.take() {
            Some(block) if !block.is_empty() => Ok((ExecutionState::Done, Some(block))),
            _ => Ok((ExecutionState::Done, None)),
        }
    }
}

// ============================================================================
// SINGLE ROW FETCHER
// ============================================================================

/// Cursor over the upstream block stream, delivering one row at a time. Data
/// rows and shadow rows are delivered through separate entry points: a data
/// fetch stops (local `Done`) at a shadow row; `fetch_shadow_row` then
/// advances past exactly one shadow row.
pub struct SingleRowFetcher {
    upstream: Box<dyn ExecutionBlock>,
    upstream_state: ExecutionState,
    current_block: Option<Arc<AqlItemBlock>>,
    row_index: usize,
    returned_shadow: bool,
}

impl SingleRowFetcher {
    pub fn new(upstream: Box<dyn ExecutionBlock>) -> Self {
        Self {
            upstream,
            upstream_state: ExecutionState::HasMore,
            current_block: None,
            row_index: 0,
            returned_shadow: false,
        }
    }

    pub fn upstream_stats(&mut self) -> ExecutorStats {
        self.upstream.collect_stats()
    }

    fn index_is_valid(&self) -> bool {
        self.current_block
            .as_ref()
            .map(|block| self.row_index < block.num_rows())
            .unwrap_or(false)
    }

    fn fetch_block_if_necessary(&mut self, at_most: usize) -> CoralResult<bool> {
        if self.index_is_valid() {
            return Ok(true);
        }
        if self.upstream_state == ExecutionState::Done {
            self.current_block = None;
            return Ok(true);
        }
        let at_most = at_most.min(DEFAULT_BATCH_SIZE).max(1);
        let (state, block) = self.upstream.get_some(at_most)?;
        self.upstream_state = state;
        if state == ExecutionState::Waiting {
            return Ok(false);
        }
        self.current_block = block;
        self.row_index = 0;
        Ok(true)
    }

    fn return_state(&self, for_shadow: bool) -> ExecutionState {
        if !self.index_is_valid() {
            return self.upstream_state;
        }
        let block = self.current_block.as_ref().expect("index valid");
        if !for_shadow && block.is_shadow_row(self.row_index) {
            // the next row is a shadow row: locally done
            return ExecutionState::Done;
        }
        ExecutionState::HasMore
    }

    /// Fetch the next data row.
    pub fn fetch_row(
        &mut self,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<InputAqlItemRow>)> {
        if !self.fetch_block_if_necessary(at_most)? {
            return Ok((ExecutionState::Waiting, None));
        }
        self.returned_shadow = false;

        let row = match &self.current_block {
            None => None,
            Some(block) => {
                if block.is_shadow_row(self.row_index) {
                    None
                } else {
                    let row = InputAqlItemRow::new(Arc::clone(block), self.row_index);
                    self.row_index += 1;
                    Some(row)
                }
            }
        };
        Ok((self.return_state(false), row))
    }

    /// Fetch the next row iff it is a shadow row, advancing past it.
    pub fn fetch_shadow_row(
        &mut self,
    ) -> CoralResult<(ExecutionState, Option<ShadowAqlItemRow>)> {
        if !self.fetch_block_if_necessary(1)? {
            return Ok((ExecutionState::Waiting, None));
        }

        let row = match &self.current_block {
            None => None,
            Some(block) => {
                if self.index_is_valid() && block.is_shadow_row(self.row_index) {
                    let next = ShadowAqlItemRow::new(Arc::clone(block), self.row_index);
                    if self.returned_shadow && next.is_relevant() {
                        // a relevant shadow row directly after a shadow row
                        // belongs to the next subquery run; the consumer must
                        // call fetch_row in between
                        return Ok((self.return_state(true), None));
                    }
                    self.row_index += 1;
                    self.returned_shadow = true;
                    Some(next)
                } else {
                    None
                }
            }
        };
        Ok((self.return_state(true), row))
    }

    /// Skip upstream rows without materializing.
    pub fn skip_rows(&mut self, at_most: usize) -> CoralResult<(ExecutionState, usize)> {
        debug_assert!(!self.index_is_valid());
        let (state, skipped) = self.upstream.skip_some(at_most)?;
        self.upstream_state = state;
        Ok((state, skipped))
    }
}

// ============================================================================
// EXECUTOR & GENERIC BLOCK
// ============================================================================

/// The executor of one pipeline stage. `produce_rows` writes into the output
/// until it is full, the input is exhausted, or the upstream is waiting.
pub trait Executor: Send {
    const PROPERTIES: ExecutorProperties;

    fn produce_rows(
        &mut self,
        fetcher: &mut SingleRowFetcher,
        output: &mut OutputAqlItemRow,
    ) -> CoralResult<(ExecutionState, ExecutorStats)>;

    fn skip_rows(
        &mut self,
        fetcher: &mut SingleRowFetcher,
        to_skip: usize,
    ) -> CoralResult<(ExecutionState, ExecutorStats, usize)> {
        // generic skip: fetch and discard data rows
        let mut skipped = 0;
        while skipped < to_skip {
            let (state, row) = fetcher.fetch_row(to_skip - skipped)?;
            if row.is_some() {
                skipped += 1;
            }
            match state {
                ExecutionState::HasMore => {}
                other => return Ok((other, ExecutorStats::default(), skipped)),
            }
        }
        Ok((ExecutionState::HasMore, ExecutorStats::default(), skipped))
    }
}

/// Register layout of one block: which registers the executor writes and
/// which are carried over from the input.
#[derive(Debug, Clone, Default)]
pub struct RegisterInfos {
    pub nr_output_registers: RegisterId,
    pub output_registers: HashSet<RegisterId>,
    pub registers_to_keep: Vec<RegisterId>,
}

impl RegisterInfos {
    pub fn passthrough(nr_registers: RegisterId) -> Self {
        Self {
            nr_output_registers: nr_registers,
            output_registers: HashSet::new(),
            registers_to_keep: (0..nr_registers).collect(),
        }
    }

    pub fn with_output(nr_registers: RegisterId, output: RegisterId) -> Self {
        Self {
            nr_output_registers: nr_registers,
            output_registers: [output].into_iter().collect(),
            registers_to_keep: (0..nr_registers).filter(|r| *r != output).collect(),
        }
    }
}

/// Generic driver wiring an executor to its fetcher and output allocation.
pub struct ExecutionBlockImpl<E: Executor> {
    executor: E,
    fetcher: SingleRowFetcher,
    infos: RegisterInfos,
    block_manager: Arc<BlockManager>,
    stats: ExecutorStats,
    done: bool,
}

impl<E: Executor> ExecutionBlockImpl<E> {
    pub fn new(
        executor: E,
        upstream: Box<dyn ExecutionBlock>,
        infos: RegisterInfos,
        block_manager: Arc<BlockManager>,
    ) -> Self {
        Self {
            executor,
            fetcher: SingleRowFetcher::new(upstream),
            infos,
            block_manager,
            stats: ExecutorStats::default(),
            done: false,
        }
    }

    pub fn properties() -> ExecutorProperties {
        E::PROPERTIES
    }
}

impl<E: Executor> ExecutionBlock for ExecutionBlockImpl<E> {
    fn get_some(
        &mut self,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)> {
        if self.done {
            return Ok((ExecutionState::Done, None));
        }
        let at_most = at_most.min(DEFAULT_BATCH_SIZE).max(1);
        let block = self
            .block_manager
            .request_block(at_most, self.infos.nr_output_registers as usize);
        let mut output = OutputAqlItemRow::new(
            block,
            self.infos.output_registers.clone(),
            self.infos.registers_to_keep.clone(),
        );
        let (state, stats) = self.executor.produce_rows(&mut self.fetcher, &mut output)?;
        self.stats.merge(stats);
        if state == ExecutionState::Done {
            self.done = true;
        }
        let produced = output.steal_block().map(Arc::new);
        debug_assert!(
            state != ExecutionState::Waiting || produced.is_none(),
            "WAITING must not carry rows"
        );
        Ok((state, produced))
    }

    fn skip_some(&mut self, at_most: usize) -> CoralResult<(ExecutionState, usize)> {
        if self.done {
            return Ok((ExecutionState::Done, 0));
        }
        let (state, stats, skipped) = self.executor.skip_rows(&mut self.fetcher, at_most)?;
        self.stats.merge(stats);
        if state == ExecutionState::Done {
            self.done = true;
        }
        Ok((state, skipped))
    }

    fn collect_stats(&mut self) -> ExecutorStats {
        let mut stats = std::mem::take(&mut self.stats);
        stats.merge(self.fetcher.upstream_stats());
        stats
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::value::AqlValue;
    use serde_json::json;

    pub(crate) fn data_block(values: &[i64]) -> AqlItemBlock {
        let mut block = AqlItemBlock::new(values.len(), 1);
        for (i, v) in values.iter().enumerate() {
            block.set_value(i, 0, AqlValue::from_json(json!(v)));
        }
        block
    }

    #[test]
    fn test_fetcher_delivers_rows_then_done() {
        let mut fetcher = SingleRowFetcher::new(Box::new(ValuesBlock::new(data_block(&[1, 2]))));
        let (state, row) = fetcher.fetch_row(10).expect("fetch");
        assert_eq!(state, ExecutionState::HasMore);
        assert_eq!(row.expect("row").value(0).as_json(), &json!(1));
        let (state, row) = fetcher.fetch_row(10).expect("fetch");
        assert_eq!(state, ExecutionState::Done);
        assert_eq!(row.expect("row").value(0).as_json(), &json!(2));
        let (state, row) = fetcher.fetch_row(10).expect("fetch");
        assert_eq!(state, ExecutionState::Done);
        assert!(row.is_none());
    }

    #[test]
    fn test_fetcher_stops_at_shadow_row() {
        let mut block = data_block(&[42, 34, 0]);
        block.make_shadow_row(2, 0);
        let mut fetcher = SingleRowFetcher::new(Box::new(ValuesBlock::new(block)));

        let (_, row) = fetcher.fetch_row(10).expect("fetch");
        assert!(row.is_some());
        let (state, row) = fetcher.fetch_row(10).expect("fetch");
        assert!(row.is_some());
        assert_eq!(state, ExecutionState::Done, "next row is a shadow row");

        // a further data fetch yields nothing
        let (state, row) = fetcher.fetch_row(10).expect("fetch");
        assert_eq!(state, ExecutionState::Done);
        assert!(row.is_none());

        // the shadow entry point advances past exactly one shadow row
        let (state, shadow) = fetcher.fetch_shadow_row().expect("fetch shadow");
        assert_eq!(state, ExecutionState::Done);
        let shadow = shadow.expect("shadow row");
        assert!(shadow.is_relevant());
    }

    #[test]
    fn test_fetcher_requires_data_fetch_between_relevant_shadows() {
        let mut block = AqlItemBlock::new(2, 1);
        block.make_shadow_row(0, 0);
        block.make_shadow_row(1, 0);
        let mut fetcher = SingleRowFetcher::new(Box::new(ValuesBlock::new(block)));

        let (_, shadow) = fetcher.fetch_shadow_row().expect("fetch shadow");
        assert!(shadow.is_some());
        let (_, shadow) = fetcher.fetch_shadow_row().expect("fetch shadow");
        assert!(
            shadow.is_none(),
            "consecutive relevant shadow rows require a data fetch in between"
        );
        let (_, row) = fetcher.fetch_row(10).expect("fetch");
        assert!(row.is_none());
        let (_, shadow) = fetcher.fetch_shadow_row().expect("fetch shadow");
        assert!(shadow.is_some());
    }
}
