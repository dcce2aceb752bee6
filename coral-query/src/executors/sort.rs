//! Sort executor: materializes its input, sorts by the sort registers, then
//! emits.

use crate::executor::{
    ExecutionState, Executor, ExecutorProperties, ExecutorStats, SingleRowFetcher,
};
use crate::registers::RegisterId;
use crate::row::{InputAqlItemRow, OutputAqlItemRow};
use crate::value::compare_values;
use coral_core::CoralResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One element of a sort specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortElement {
    pub register: RegisterId,
    pub ascending: bool,
}

pub(crate) fn compare_rows(
    elements: &[SortElement],
    a: &InputAqlItemRow,
    b: &InputAqlItemRow,
) -> Ordering {
    for element in elements {
        let ordering = compare_values(
            a.value(element.register).as_json(),
            b.value(element.register).as_json(),
        );
        let ordering = if element.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub struct SortExecutor {
    elements: Vec<SortElement>,
    buffer: Vec<InputAqlItemRow>,
    input_exhausted: bool,
    cursor: usize,
}

impl SortExecutor {
    pub fn new(elements: Vec<SortElement>) -> Self {
        Self {
            elements,
            buffer: Vec::new(),
            input_exhausted: false,
            cursor: 0,
        }
    }
}

impl Executor for SortExecutor {
    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: false,
        allows_block_passthrough: false,
        input_size_restricts_output_size: true,
    };

    fn produce_rows(
        &mut self,
        fetcher: &mut SingleRowFetcher,
        output: &mut OutputAqlItemRow,
    ) -> CoralResult<(ExecutionState, ExecutorStats)> {
        let stats = ExecutorStats::default();

        // phase 1: collect everything
        while !self.input_exhausted {
            let (state, row) = fetcher.fetch_row(usize::MAX)?;
            if let Some(row) = row {
                self.buffer.push(row);
            }
            match state {
                ExecutionState::Waiting => return Ok((ExecutionState::Waiting, stats)),
                ExecutionState::Done => {
                    self.input_exhausted = true;
                    let elements = self.elements.clone();
                    self.buffer.sort_by(|a, b| compare_rows(&elements, a, b));
                }
                ExecutionState::HasMore => {}
            }
        }

        // phase 2: emit in order
        while self.cursor < self.buffer.len() {
            if output.is_full() {
                return Ok((ExecutionState::HasMore, stats));
            }
            output.copy_row_directly(&self.buffer[self.cursor]);
            output.advance_row();
            self.cursor += 1;
        }
        Ok((ExecutionState::Done, stats))
    }
}
