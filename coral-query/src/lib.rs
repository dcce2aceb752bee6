//! CORAL Query - the AQL execution pipeline
//!
//! A logical execution plan (a DAG of typed nodes) is instantiated into a
//! tree of execution blocks that produce rows on demand. Rows flow through
//! item blocks (dense value matrices with shadow-row markers for correlated
//! subqueries); expressions are classified once and evaluated against rows;
//! scatter/distribute/gather/remote operators span the cluster boundary.

pub mod ast;
pub mod block;
pub mod cluster;
pub mod executor;
pub mod executors;
pub mod expression;
pub mod functions;
pub mod plan;
pub mod query;
pub mod registers;
pub mod row;
pub mod value;

pub use block::{AqlItemBlock, BlockManager};
pub use executor::{ExecutionBlock, ExecutionState, Executor, ExecutorProperties, ExecutorStats, SingleRowFetcher};
pub use expression::{Expression, ExpressionContext, ExpressionType};
pub use plan::{ExecutionPlan, PlanNode};
pub use query::QueryContext;
pub use registers::{RegisterId, RegisterPlan, VariableId, MAX_REGISTER_ID};
pub use row::{InputAqlItemRow, OutputAqlItemRow, ShadowAqlItemRow};
pub use value::{AqlValue, AqlValueGuard};
