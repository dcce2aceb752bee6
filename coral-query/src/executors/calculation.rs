//! Calculation executor: evaluates an expression per row into an output
//! register.

use super::{forward_shadow_row, ShadowStep};
use crate::executor::{
    ExecutionState, Executor, ExecutorProperties, ExecutorStats, SingleRowFetcher,
};
use crate::expression::{Expression, ExpressionContext};
use crate::query::QueryContext;
use crate::registers::{RegisterId, VariableId};
use crate::row::{InputAqlItemRow, OutputAqlItemRow};
use crate::value::{AqlValue, AqlValueGuard};
use coral_core::{CoralResult, ErrorCode};
use std::collections::HashMap;
use std::sync::Arc;

/// Expression context over one input row: free variables resolve through the
/// register mapping, warnings go to the query.
pub struct RowExpressionContext<'a> {
    row: &'a InputAqlItemRow,
    variable_registers: &'a HashMap<VariableId, RegisterId>,
    query: &'a QueryContext,
}

impl ExpressionContext for RowExpressionContext<'_> {
    fn variable_value(&self, id: VariableId) -> CoralResult<AqlValue> {
        match self.variable_registers.get(&id) {
            Some(register) => Ok(self.row.value(*register).clone()),
            None => Ok(AqlValue::null()),
        }
    }

    fn register_warning(&self, code: ErrorCode, message: &str) {
        self.query.register_warning(code, message);
    }
}

pub struct CalculationExecutor {
    expression: Arc<Expression>,
    variable_registers: HashMap<VariableId, RegisterId>,
    output_register: RegisterId,
    query: Arc<QueryContext>,
}

impl CalculationExecutor {
    pub fn new(
        expression: Arc<Expression>,
        variable_registers: HashMap<VariableId, RegisterId>,
        output_register: RegisterId,
        query: Arc<QueryContext>,
    ) -> Self {
        Self {
            expression,
            variable_registers,
            output_register,
            query,
        }
    }
}

impl Executor for CalculationExecutor {
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
        let stats = ExecutorStats::default();
        loop {
            if output.is_full() {
                return Ok((ExecutionState::HasMore, stats));
            }
            if self.query.is_killed() {
                return Err(ErrorCode::QueryKilled.into());
            }
            let (state, row) = fetcher.fetch_row(usize::MAX)?;
            match row {
                Some(row) => {
                    let ctx = RowExpressionContext {
                        row: &row,
                        variable_registers: &self.variable_registers,
                        query: &self.query,
                    };
                    let value = self.expression.execute(&ctx)?;
                    let mut guard = AqlValueGuard::new(value);
                    output.move_value_into(self.output_register, &row, &mut guard);
                    output.advance_row();
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
