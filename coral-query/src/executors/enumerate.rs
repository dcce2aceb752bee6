//! Enumerate-collection executor.
//!
//! For every input row (usually the singleton row), every document of the
//! collection is emitted into the output register. The storage engine is
//! reached through the [`DocumentSource`] seam so the pipeline stays free of
//! engine dependencies.

use super::{forward_shadow_row, ShadowStep};
use crate::executor::{
    ExecutionState, Executor, ExecutorProperties, ExecutorStats, SingleRowFetcher,
};
use crate::registers::RegisterId;
use crate::row::{InputAqlItemRow, OutputAqlItemRow};
use crate::value::{AqlValue, AqlValueGuard};
use coral_core::CoralResult;
use serde_json::Value;
use std::sync::Arc;

/// Provider of a collection's documents for full scans.
pub trait DocumentSource: Send + Sync {
    fn load(&self) -> CoralResult<Vec<Value>>;
}

/// In-memory source for tests and coordinator-less execution.
pub struct VecDocumentSource(pub Vec<Value>);

impl DocumentSource for VecDocumentSource {
    fn load(&self) -> CoralResult<Vec<Value>> {
        Ok(self.0.clone())
    }
}

pub struct EnumerateCollectionExecutor {
    source: Arc<dyn DocumentSource>,
    output_register: RegisterId,
    documents: Option<Arc<Vec<Value>>>,
    current_input: Option<InputAqlItemRow>,
    position: usize,
}

impl EnumerateCollectionExecutor {
    pub fn new(source: Arc<dyn DocumentSource>, output_register: RegisterId) -> Self {
        Self {
            source,
            output_register,
            documents: None,
            current_input: None,
            position: 0,
        }
    }

    fn documents(&mut self) -> CoralResult<Arc<Vec<Value>>> {
        if self.documents.is_none() {
            self.documents = Some(Arc::new(self.source.load()?));
        }
        Ok(Arc::clone(self.documents.as_ref().expect("just set")))
    }
}

impl Executor for EnumerateCollectionExecutor {
    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: false,
        allows_block_passthrough: false,
        input_size_restricts_output_size: false,
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

            if self.current_input.is_none() {
                let (state, row) = fetcher.fetch_row(usize::MAX)?;
                match row {
                    Some(row) => {
                        self.current_input = Some(row);
                        self.position = 0;
                    }
                    None => match state {
                        ExecutionState::Waiting => return Ok((ExecutionState::Waiting, stats)),
                        _ => match forward_shadow_row(fetcher, output)? {
                            ShadowStep::Forwarded => continue,
                            ShadowStep::Exhausted(state) => return Ok((state, stats)),
                        },
                    },
                }
            }

            let documents = self.documents()?;
            let input = self.current_input.clone().expect("input row present");
            while self.position < documents.len() {
                if output.is_full() {
                    return Ok((ExecutionState::HasMore, stats));
                }
                let doc = documents[self.position].clone();
                self.position += 1;
                stats.scanned_full += 1;
                let mut guard = AqlValueGuard::new(AqlValue::from_json(doc));
                output.move_value_into(self.output_register, &input, &mut guard);
                output.advance_row();
            }
            self.current_input = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockManager;
    use crate::executor::{ExecutionBlock, ExecutionBlockImpl, RegisterInfos, ValuesBlock};
    use serde_json::json;

    #[test]
    fn test_enumerate_emits_each_document() {
        let source = Arc::new(VecDocumentSource(vec![
            json!({"x": 1}),
            json!({"x": 2}),
            json!({"x": 3}),
        ]));
        let mut block = ExecutionBlockImpl::new(
            EnumerateCollectionExecutor::new(source, 0),
            Box::new(ValuesBlock::singleton(0)),
            RegisterInfos::with_output(1, 0),
            BlockManager::new(),
        );
        let mut out = Vec::new();
        loop {
            let (state, produced) = block.get_some(2).expect("get_some");
            if let Some(produced) = produced {
                for i in 0..produced.num_rows() {
                    out.push(produced.value(i, 0).to_json());
                }
            }
            if state == ExecutionState::Done {
                break;
            }
        }
        assert_eq!(out, vec![json!({"x": 1}), json!({"x": 2}), json!({"x": 3})]);
        assert_eq!(block.collect_stats().scanned_full, 3);
    }

    #[test]
    fn test_enumerate_empty_collection() {
        let source = Arc::new(VecDocumentSource(vec![]));
        let mut block = ExecutionBlockImpl::new(
            EnumerateCollectionExecutor::new(source, 0),
            Box::new(ValuesBlock::singleton(0)),
            RegisterInfos::with_output(1, 0),
            BlockManager::new(),
        );
        let (state, produced) = block.get_some(10).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
        assert!(produced.is_none());
    }
}
