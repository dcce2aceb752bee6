//! The single-stream executors.

mod calculation;
mod enumerate;
mod filter;
mod limit;
mod no_results;
mod sort;
mod subquery;

pub use calculation::CalculationExecutor;
pub use enumerate::{DocumentSource, EnumerateCollectionExecutor, VecDocumentSource};
pub use filter::FilterExecutor;
pub use limit::LimitExecutor;
pub use no_results::NoResultsExecutor;
pub use sort::{SortElement, SortExecutor};
pub use subquery::{SubqueryEndExecutor, SubqueryStartExecutor};

use crate::executor::{ExecutionState, SingleRowFetcher};
use crate::row::OutputAqlItemRow;
use coral_core::CoralResult;

/// Outcome of trying to forward one shadow row.
pub(crate) enum ShadowStep {
    /// A shadow row was copied to the output.
    Forwarded,
    /// No shadow row is pending; the stream is in the given state.
    Exhausted(ExecutionState),
}

/// Forward a single pending shadow row unchanged. Executors that are not
/// shadow-aware call this whenever a data fetch reports local `Done`.
pub(crate) fn forward_shadow_row(
    fetcher: &mut SingleRowFetcher,
    output: &mut OutputAqlItemRow,
) -> CoralResult<ShadowStep> {
    match fetcher.fetch_shadow_row()? {
        (_, Some(shadow)) => {
            output.forward_shadow_row(&shadow);
            output.advance_row();
            Ok(ShadowStep::Forwarded)
        }
        (state, None) => Ok(ShadowStep::Exhausted(state)),
    }
}
