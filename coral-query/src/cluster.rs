//! Cluster operators: scatter, distribute, gather, and the remote block
//! bridge.
//!
//! Scatter and distribute are server-side producers driven per client
//! through [`BlocksWithClients`]; gather merges multiple upstream streams on
//! the consumer side; a remote block is the client half of an execution
//! block pair split across the network.

use crate::block::{AqlItemBlock, BlockManager, DEFAULT_BATCH_SIZE};
use crate::executor::{ExecutionBlock, ExecutionState, ExecutorStats, SingleRowFetcher};
use crate::executors::SortElement;
use crate::registers::RegisterId;
use crate::row::InputAqlItemRow;
use crate::value::{compare_values, AqlValue};
use coral_core::{CoralError, CoralResult, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

// ============================================================================
// GATHER SPECIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    Minelement,
    Heap,
    Unset,
}

impl Default for SortMode {
    fn default() -> Self {
        SortMode::Unset
    }
}

// keep the historical name visible at the API level
#[allow(non_upper_case_globals)]
impl SortMode {
    pub const MinElement: SortMode = SortMode::Minelement;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parallelism {
    Parallel,
    Serial,
    Undefined,
}

impl Default for Parallelism {
    fn default() -> Self {
        Parallelism::Undefined
    }
}

/// The gather node's wire attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherSpec {
    #[serde(default)]
    pub sortmode: SortMode,
    /// `constrainedSortLimit`: cap for top-N gathering; 0 means unbounded.
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub parallelism: Parallelism,
}

/// Build the right gather block for a spec. Parallel gather is only
/// available on the coordinator; elsewhere it is downgraded to serial.
pub fn create_gather_block(
    spec: &GatherSpec,
    elements: Vec<SortElement>,
    upstreams: Vec<Box<dyn ExecutionBlock>>,
    is_coordinator: bool,
    manager: Arc<BlockManager>,
    num_registers: RegisterId,
) -> CoralResult<Box<dyn ExecutionBlock>> {
    if elements.is_empty() {
        let mut parallel = spec.parallelism == Parallelism::Parallel;
        if parallel && !is_coordinator {
            tracing::debug!("parallel gather downgraded to serial on non-coordinator");
            parallel = false;
        }
        return Ok(Box::new(UnsortedGatherBlock::new(
            upstreams, parallel, manager, num_registers,
        )));
    }
    let strategy = match spec.sortmode {
        SortMode::Heap => SortMode::Heap,
        _ => SortMode::Minelement,
    };
    let limit = if spec.limit == 0 {
        None
    } else {
        Some(spec.limit as usize)
    };
    Ok(Box::new(SortingGatherBlock::new(
        upstreams,
        elements,
        strategy,
        limit,
        manager,
        num_registers,
    )))
}

// ============================================================================
// UNSORTED GATHER
// ============================================================================

/// Merges upstream streams without ordering. Serial mode drains one upstream
/// after the other; parallel mode interleaves greedily.
pub struct UnsortedGatherBlock {
    upstreams: Vec<Box<dyn ExecutionBlock>>,
    states: Vec<ExecutionState>,
    parallel: bool,
    current: usize,
    stats: ExecutorStats,
}

impl UnsortedGatherBlock {
    pub fn new(
        upstreams: Vec<Box<dyn ExecutionBlock>>,
        parallel: bool,
        _manager: Arc<BlockManager>,
        _num_registers: RegisterId,
    ) -> Self {
        let states = vec![ExecutionState::HasMore; upstreams.len()];
        Self {
            upstreams,
            states,
            parallel,
            current: 0,
            stats: ExecutorStats::default(),
        }
    }

    fn all_done(&self) -> bool {
        self.states.iter().all(|s| *s == ExecutionState::Done)
    }
}

impl ExecutionBlock for UnsortedGatherBlock {
    fn get_some(
        &mut self,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)> {
        // a gather over zero client streams is DONE immediately
        if self.upstreams.is_empty() || self.all_done() {
            return Ok((ExecutionState::Done, None));
        }
        let total = self.upstreams.len();
        for attempt in 0..total {
            let index = if self.parallel {
                // greedy interleave: rotate the start position
                (self.current + attempt) % total
            } else {
                // serial: stick with the first unfinished upstream
                match self.states.iter().position(|s| *s != ExecutionState::Done) {
                    Some(index) => index,
                    None => return Ok((ExecutionState::Done, None)),
                }
            };
            if self.states[index] == ExecutionState::Done {
                continue;
            }
            let (state, block) = self.upstreams[index].get_some(at_most)?;
            self.states[index] = state;
            if state == ExecutionState::Waiting {
                return Ok((ExecutionState::Waiting, None));
            }
            if self.parallel {
                self.current = (index + 1) % total;
            }
            if let Some(block) = block {
                let overall = if self.all_done() {
                    ExecutionState::Done
                } else {
                    ExecutionState::HasMore
                };
                return Ok((overall, Some(block)));
            }
            if self.all_done() {
                return Ok((ExecutionState::Done, None));
            }
        }
        Ok((ExecutionState::HasMore, None))
    }

    fn collect_stats(&mut self) -> ExecutorStats {
        let mut stats = std::mem::take(&mut self.stats);
        for upstream in &mut self.upstreams {
            stats.merge(upstream.collect_stats());
        }
        stats
    }
}

// ============================================================================
// SORTING GATHER
// ============================================================================

struct HeapEntry {
    row: InputAqlItemRow,
    source: usize,
    elements: Arc<Vec<SortElement>>,
}

impl HeapEntry {
    fn compare(&self, other: &Self) -> Ordering {
        for element in self.elements.iter() {
            let ordering = compare_values(
                self.row.value(element.register).as_json(),
                other.row.value(element.register).as_json(),
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
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so that pop() yields the minimum
        self.compare(other).reverse()
    }
}

/// Merges upstream streams by a sort specification, via repeated min-element
/// selection or a binary heap over the stream heads. An optional constrained
/// sort limit caps the output for top-N gathering.
pub struct SortingGatherBlock {
    fetchers: Vec<SingleRowFetcher>,
    heads: Vec<Option<InputAqlItemRow>>,
    exhausted: Vec<bool>,
    elements: Arc<Vec<SortElement>>,
    strategy: SortMode,
    heap: BinaryHeap<HeapEntry>,
    heap_primed: bool,
    /// Sources whose next heap entry is still owed (upstream was waiting).
    pending_refill: Vec<usize>,
    limit: Option<usize>,
    emitted: usize,
    manager: Arc<BlockManager>,
    num_registers: RegisterId,
}

impl SortingGatherBlock {
    pub fn new(
        upstreams: Vec<Box<dyn ExecutionBlock>>,
        elements: Vec<SortElement>,
        strategy: SortMode,
        limit: Option<usize>,
        manager: Arc<BlockManager>,
        num_registers: RegisterId,
    ) -> Self {
        let count = upstreams.len();
        Self {
            fetchers: upstreams.into_iter().map(SingleRowFetcher::new).collect(),
            heads: (0..count).map(|_| None).collect(),
            exhausted: vec![false; count],
            elements: Arc::new(elements),
            strategy,
            heap: BinaryHeap::new(),
            heap_primed: false,
            pending_refill: Vec::new(),
            limit,
            emitted: 0,
            manager,
            num_registers,
        }
    }

    /// Pull one row for `source`, marking exhaustion. `Ok(false)` = waiting.
    fn refill(&mut self, source: usize) -> CoralResult<bool> {
        if self.exhausted[source] || self.heads[source].is_some() {
            return Ok(true);
        }
        loop {
            let (state, row) = self.fetchers[source].fetch_row(DEFAULT_BATCH_SIZE)?;
            match (state, row) {
                (ExecutionState::Waiting, _) => return Ok(false),
                (state, Some(row)) => {
                    self.heads[source] = Some(row);
                    if state == ExecutionState::Done {
                        self.exhausted[source] = true;
                    }
                    return Ok(true);
                }
                (ExecutionState::Done, None) => {
                    self.exhausted[source] = true;
                    return Ok(true);
                }
                (ExecutionState::HasMore, None) => {}
            }
        }
    }

    fn take_min(&mut self) -> CoralResult<Option<(usize, InputAqlItemRow)>> {
        match self.strategy {
            SortMode::Heap => Ok(self.heap.pop().map(|entry| (entry.source, entry.row))),
            _ => {
                // repeated min over the heads
                let mut best: Option<usize> = None;
                for (source, head) in self.heads.iter().enumerate() {
                    let Some(row) = head else { continue };
                    match best {
                        None => best = Some(source),
                        Some(current) => {
                            let current_row = self.heads[current].as_ref().expect("head present");
                            let entry = HeapEntry {
                                row: row.clone(),
                                source,
                                elements: Arc::clone(&self.elements),
                            };
                            let current_entry = HeapEntry {
                                row: current_row.clone(),
                                source: current,
                                elements: Arc::clone(&self.elements),
                            };
                            if entry.compare(&current_entry) == Ordering::Less {
                                best = Some(source);
                            }
                        }
                    }
                }
                Ok(best.map(|source| {
                    let row = self.heads[source].take().expect("head present");
                    (source, row)
                }))
            }
        }
    }

    fn push_refilled(&mut self, source: usize) -> CoralResult<bool> {
        if !self.refill(source)? {
            self.pending_refill.push(source);
            return Ok(false);
        }
        if self.strategy == SortMode::Heap {
            if let Some(row) = self.heads[source].take() {
                self.heap.push(HeapEntry {
                    row,
                    source,
                    elements: Arc::clone(&self.elements),
                });
            }
        }
        Ok(true)
    }
}

impl ExecutionBlock for SortingGatherBlock {
    fn get_some(
        &mut self,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)> {
        if self.fetchers.is_empty() {
            return Ok((ExecutionState::Done, None));
        }
        if let Some(limit) = self.limit {
            if self.emitted >= limit {
                return Ok((ExecutionState::Done, None));
            }
        }
        // prime the heads / the heap, and catch up sources whose refill was
        // interrupted by a waiting upstream
        if self.strategy == SortMode::Heap {
            if !self.heap_primed {
                self.heap_primed = true;
                self.pending_refill = (0..self.fetchers.len()).collect();
            }
            let pending = std::mem::take(&mut self.pending_refill);
            for (position, source) in pending.iter().enumerate() {
                if !self.push_refilled(*source)? {
                    // push_refilled re-queued `source`; keep the untried rest
                    self.pending_refill.extend_from_slice(&pending[position + 1..]);
                    return Ok((ExecutionState::Waiting, None));
                }
            }
        } else {
            for source in 0..self.fetchers.len() {
                if !self.refill(source)? {
                    return Ok((ExecutionState::Waiting, None));
                }
            }
        }

        let at_most = at_most.min(DEFAULT_BATCH_SIZE).max(1);
        let mut block = self
            .manager
            .request_block(at_most, self.num_registers as usize);
        let mut written = 0usize;

        while written < at_most {
            if let Some(limit) = self.limit {
                if self.emitted >= limit {
                    break;
                }
            }
            let Some((source, row)) = self.take_min()? else {
                break;
            };
            for register in 0..self.num_registers {
                block.set_value(written, register, row.value(register).clone());
            }
            written += 1;
            self.emitted += 1;
            if !self.push_refilled(source)? {
                // upstream is waiting; emit what we have and resume later
                break;
            }
        }

        let finished = self.limit.map(|l| self.emitted >= l).unwrap_or(false)
            || (self.heap.is_empty()
                && self.heads.iter().all(Option::is_none)
                && self.exhausted.iter().all(|e| *e));
        let state = if finished {
            ExecutionState::Done
        } else {
            ExecutionState::HasMore
        };
        if written == 0 {
            return Ok((state, None));
        }
        block.shrink(written);
        Ok((state, Some(Arc::new(block))))
    }
}

// ============================================================================
// SCATTER
// ============================================================================

/// Server-side block pulled by multiple remote clients, addressed by their
/// distribute id.
pub trait BlocksWithClients: Send {
    fn get_some_for_client(
        &mut self,
        client: &str,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)>;
}

/// Sends each input block to every client.
pub struct ScatterBlock {
    upstream: Box<dyn ExecutionBlock>,
    clients: Vec<String>,
    upstream_state: ExecutionState,
    /// Blocks fetched so far; index 0 is global block number `base`.
    buffer: VecDeque<Arc<AqlItemBlock>>,
    base: usize,
    positions: HashMap<String, usize>,
}

impl ScatterBlock {
    pub fn new(upstream: Box<dyn ExecutionBlock>, clients: Vec<String>) -> Self {
        let positions = clients.iter().map(|c| (c.clone(), 0usize)).collect();
        Self {
            upstream,
            clients,
            upstream_state: ExecutionState::HasMore,
            buffer: VecDeque::new(),
            base: 0,
            positions,
        }
    }

    fn check_client(&self, client: &str) -> CoralResult<()> {
        if self.clients.iter().any(|c| c == client) {
            Ok(())
        } else {
            Err(CoralError::bad_parameter(format!(
                "unknown scatter client '{}'",
                client
            )))
        }
    }

    fn garbage_collect(&mut self) {
        let min = self.positions.values().min().copied().unwrap_or(0);
        while self.base < min && !self.buffer.is_empty() {
            self.buffer.pop_front();
            self.base += 1;
        }
    }
}

impl BlocksWithClients for ScatterBlock {
    fn get_some_for_client(
        &mut self,
        client: &str,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)> {
        self.check_client(client)?;
        let position = *self.positions.get(client).unwrap_or(&0);

        if position >= self.base + self.buffer.len() {
            if self.upstream_state == ExecutionState::Done {
                return Ok((ExecutionState::Done, None));
            }
            let (state, block) = self.upstream.get_some(at_most)?;
            self.upstream_state = state;
            if state == ExecutionState::Waiting {
                return Ok((ExecutionState::Waiting, None));
            }
            if let Some(block) = block {
                self.buffer.push_back(block);
            }
        }

        let block = self
            .buffer
            .get(position - self.base)
            .cloned();
        let state = match block {
            Some(_) => {
                self.positions.insert(client.to_string(), position + 1);
                self.garbage_collect();
                if self.upstream_state == ExecutionState::Done
                    && position + 1 >= self.base + self.buffer.len()
                {
                    ExecutionState::Done
                } else {
                    ExecutionState::HasMore
                }
            }
            None => self.upstream_state,
        };
        Ok((state, block))
    }
}

// ============================================================================
// DISTRIBUTE
// ============================================================================

/// Routes each input row to exactly one client, chosen by a hash of the
/// shard-key variable (with an optional alternative variable as fallback).
pub struct DistributeBlock {
    upstream: Box<dyn ExecutionBlock>,
    clients: Vec<String>,
    register: RegisterId,
    alternative_register: Option<RegisterId>,
    create_keys: bool,
    allow_key_conversion_to_object: bool,
    allow_specified_keys: bool,
    upstream_state: ExecutionState,
    queues: HashMap<String, VecDeque<(Arc<AqlItemBlock>, usize, Option<Value>)>>,
    num_registers: RegisterId,
    manager: Arc<BlockManager>,
}

impl DistributeBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        upstream: Box<dyn ExecutionBlock>,
        clients: Vec<String>,
        register: RegisterId,
        alternative_register: Option<RegisterId>,
        create_keys: bool,
        allow_key_conversion_to_object: bool,
        allow_specified_keys: bool,
        num_registers: RegisterId,
        manager: Arc<BlockManager>,
    ) -> Self {
        let queues = clients.iter().map(|c| (c.clone(), VecDeque::new())).collect();
        Self {
            upstream,
            clients,
            register,
            alternative_register,
            create_keys,
            allow_key_conversion_to_object,
            allow_specified_keys,
            upstream_state: ExecutionState::HasMore,
            queues,
            num_registers,
            manager,
        }
    }

    fn hash_to_client(&self, key: &str) -> usize {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in key.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.clients.len() as u64) as usize
    }

    /// Determine the routing key for a row value, rewriting it when a bare
    /// string key must become `{_key: ...}` or a key must be generated.
    fn route(&self, value: &AqlValue) -> CoralResult<(String, Option<Value>)> {
        match value.as_json() {
            Value::Object(map) => match map.get(coral_core::KEY_STRING) {
                Some(Value::String(key)) => {
                    if !self.allow_specified_keys && !self.create_keys {
                        // strict mode forbids user-supplied keys here
                        return Err(CoralError::from_code(ErrorCode::DocumentKeyBad));
                    }
                    Ok((key.clone(), None))
                }
                None if self.create_keys => {
                    let key = coral_core::next_tick().to_string();
                    let mut rewritten = map.clone();
                    rewritten.insert(coral_core::KEY_STRING.to_string(), Value::String(key.clone()));
                    Ok((key, Some(Value::Object(rewritten))))
                }
                _ => Err(CoralError::from_code(ErrorCode::DocumentKeyBad)),
            },
            Value::String(key) if self.allow_key_conversion_to_object => {
                let rewritten = serde_json::json!({ coral_core::KEY_STRING: key });
                Ok((key.clone(), Some(rewritten)))
            }
            _ => Err(CoralError::from_code(ErrorCode::DocumentHandleBad)),
        }
    }

    fn pump(&mut self, at_most: usize) -> CoralResult<ExecutionState> {
        let (state, block) = self.upstream.get_some(at_most)?;
        self.upstream_state = state;
        if let Some(block) = block {
            for row in 0..block.num_rows() {
                if block.is_shadow_row(row) {
                    continue;
                }
                let mut value = block.value(row, self.register).clone();
                if value.is_empty() || value.as_json().is_null() {
                    if let Some(alternative) = self.alternative_register {
                        value = block.value(row, alternative).clone();
                    }
                }
                let (key, rewritten) = self.route(&value)?;
                let client = self.clients[self.hash_to_client(&key)].clone();
                if let Some(queue) = self.queues.get_mut(&client) {
                    queue.push_back((Arc::clone(&block), row, rewritten));
                }
            }
        }
        Ok(state)
    }
}

impl BlocksWithClients for DistributeBlock {
    fn get_some_for_client(
        &mut self,
        client: &str,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)> {
        if !self.clients.iter().any(|c| c == client) {
            return Err(CoralError::bad_parameter(format!(
                "unknown distribute client '{}'",
                client
            )));
        }
        while self
            .queues
            .get(client)
            .map(VecDeque::is_empty)
            .unwrap_or(true)
            && self.upstream_state != ExecutionState::Done
        {
            if self.pump(at_most)? == ExecutionState::Waiting {
                return Ok((ExecutionState::Waiting, None));
            }
        }

        let queue = self.queues.get_mut(client).expect("client verified");
        if queue.is_empty() {
            return Ok((ExecutionState::Done, None));
        }
        let take = queue.len().min(at_most.max(1));
        let mut out = self.manager.request_block(take, self.num_registers as usize);
        for written in 0..take {
            let (block, row, rewritten) = queue.pop_front().expect("queue non-empty");
            for register in 0..self.num_registers {
                out.set_value(written, register, block.value(row, register).clone());
            }
            if let Some(rewritten) = rewritten {
                out.set_value(written, self.register, AqlValue::from_json(rewritten));
            }
        }
        let state = if self.upstream_state == ExecutionState::Done
            && self.queues.get(client).map(VecDeque::is_empty).unwrap_or(true)
        {
            ExecutionState::Done
        } else {
            ExecutionState::HasMore
        };
        Ok((state, Some(Arc::new(out))))
    }
}

// ============================================================================
// REMOTE BLOCK & WIRE FORMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum BlockOperation {
    GetSome {
        at_most: usize,
    },
    SkipSome {
        at_most: usize,
    },
    InitializeCursor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        row: Option<SerializedRow>,
    },
    Shutdown {
        error_code: i32,
    },
}

/// Request against a remote execution block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBlockRequest {
    pub query_id: u64,
    /// Empty for non-distribute consumers.
    #[serde(default)]
    pub distribute_id: String,
    #[serde(flatten)]
    pub operation: BlockOperation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRow {
    pub values: Vec<Option<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_depth: Option<u32>,
}

/// Row-major transport form of an item block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedBlock {
    pub num_registers: u16,
    pub rows: Vec<SerializedRow>,
}

impl SerializedBlock {
    pub fn from_block(block: &AqlItemBlock) -> Self {
        let rows = (0..block.num_rows())
            .map(|row| SerializedRow {
                values: (0..block.num_registers() as u16)
                    .map(|register| {
                        let value = block.value(row, register);
                        if value.is_empty() {
                            None
                        } else {
                            Some(value.to_json())
                        }
                    })
                    .collect(),
                shadow_depth: block.shadow_depth(row),
            })
            .collect();
        Self {
            num_registers: block.num_registers() as u16,
            rows,
        }
    }

    pub fn to_block(&self) -> AqlItemBlock {
        let mut block = AqlItemBlock::new(self.rows.len(), self.num_registers as usize);
        for (row, serialized) in self.rows.iter().enumerate() {
            for (register, value) in serialized.values.iter().enumerate() {
                if let Some(value) = value {
                    block.set_value(row, register as u16, AqlValue::from_json(value.clone()));
                }
            }
            if let Some(depth) = serialized.shadow_depth {
                block.make_shadow_row(row, depth);
            }
        }
        block
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBlockResponse {
    pub state: ExecutionState,
    pub stats: ExecutorStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<SerializedBlock>,
    #[serde(default)]
    pub skipped: usize,
}

/// Transport seam of the remote block; implemented over the cluster's
/// network layer, or in-process for tests.
pub trait RemoteConnection: Send {
    fn execute(&mut self, request: &ExecutionBlockRequest) -> CoralResult<ExecutionBlockResponse>;
}

/// Client side of a remote execution block pair.
pub struct RemoteBlock {
    connection: Box<dyn RemoteConnection>,
    query_id: u64,
    distribute_id: String,
    stats: ExecutorStats,
}

impl RemoteBlock {
    pub fn new(connection: Box<dyn RemoteConnection>, query_id: u64, distribute_id: String) -> Self {
        Self {
            connection,
            query_id,
            distribute_id,
            stats: ExecutorStats::default(),
        }
    }
}

impl ExecutionBlock for RemoteBlock {
    fn get_some(
        &mut self,
        at_most: usize,
    ) -> CoralResult<(ExecutionState, Option<Arc<AqlItemBlock>>)> {
        let response = self.connection.execute(&ExecutionBlockRequest {
            query_id: self.query_id,
            distribute_id: self.distribute_id.clone(),
            operation: BlockOperation::GetSome { at_most },
        })?;
        self.stats.merge(response.stats);
        let block = response.block.map(|b| Arc::new(b.to_block()));
        Ok((response.state, block))
    }

    fn skip_some(&mut self, at_most: usize) -> CoralResult<(ExecutionState, usize)> {
        let response = self.connection.execute(&ExecutionBlockRequest {
            query_id: self.query_id,
            distribute_id: self.distribute_id.clone(),
            operation: BlockOperation::SkipSome { at_most },
        })?;
        self.stats.merge(response.stats);
        Ok((response.state, response.skipped))
    }

    fn collect_stats(&mut self) -> ExecutorStats {
        std::mem::take(&mut self.stats)
    }
}

// ============================================================================
// SERVER SIDE OF THE WIRE
// ============================================================================

enum ServedBlock {
    Plain(Box<dyn ExecutionBlock>),
    Clients(Box<dyn BlocksWithClients>),
}

/// Registry of server-side blocks addressed by (query id, distribute id).
#[derive(Default)]
pub struct BlockServer {
    served: HashMap<u64, ServedBlock>,
}

impl BlockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, query_id: u64, block: Box<dyn ExecutionBlock>) {
        self.served.insert(query_id, ServedBlock::Plain(block));
    }

    pub fn register_with_clients(&mut self, query_id: u64, block: Box<dyn BlocksWithClients>) {
        self.served.insert(query_id, ServedBlock::Clients(block));
    }

    pub fn unregister(&mut self, query_id: u64) {
        self.served.remove(&query_id);
    }

    pub fn handle(&mut self, request: &ExecutionBlockRequest) -> CoralResult<ExecutionBlockResponse> {
        let served = self.served.get_mut(&request.query_id).ok_or_else(|| {
            CoralError::bad_parameter(format!("unknown query id {}", request.query_id))
        })?;
        match &request.operation {
            BlockOperation::GetSome { at_most } => {
                let (state, block) = match served {
                    ServedBlock::Plain(block) => block.get_some(*at_most)?,
                    ServedBlock::Clients(block) => {
                        block.get_some_for_client(&request.distribute_id, *at_most)?
                    }
                };
                let stats = match served {
                    ServedBlock::Plain(block) => block.collect_stats(),
                    ServedBlock::Clients(_) => ExecutorStats::default(),
                };
                Ok(ExecutionBlockResponse {
                    state,
                    stats,
                    block: block.map(|b| SerializedBlock::from_block(&b)),
                    skipped: 0,
                })
            }
            BlockOperation::SkipSome { at_most } => {
                let (state, skipped) = match served {
                    ServedBlock::Plain(block) => block.skip_some(*at_most)?,
                    ServedBlock::Clients(block) => {
                        let (state, block) =
                            block.get_some_for_client(&request.distribute_id, *at_most)?;
                        (state, block.map(|b| b.num_rows()).unwrap_or(0))
                    }
                };
                Ok(ExecutionBlockResponse {
                    state,
                    stats: ExecutorStats::default(),
                    block: None,
                    skipped,
                })
            }
            BlockOperation::InitializeCursor { .. } => Ok(ExecutionBlockResponse {
                state: ExecutionState::HasMore,
                stats: ExecutorStats::default(),
                block: None,
                skipped: 0,
            }),
            BlockOperation::Shutdown { error_code } => {
                tracing::debug!(
                    query_id = request.query_id,
                    error_code,
                    "shutting down served block"
                );
                self.served.remove(&request.query_id);
                Ok(ExecutionBlockResponse {
                    state: ExecutionState::Done,
                    stats: ExecutorStats::default(),
                    block: None,
                    skipped: 0,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ValuesBlock;
    use serde_json::json;

    fn stream(values: &[i64]) -> Box<dyn ExecutionBlock> {
        let mut block = AqlItemBlock::new(values.len(), 1);
        for (i, v) in values.iter().enumerate() {
            block.set_value(i, 0, AqlValue::from_json(json!(v)));
        }
        Box::new(ValuesBlock::new(block))
    }

    fn drain(block: &mut dyn ExecutionBlock) -> Vec<i64> {
        let mut out = Vec::new();
        loop {
            let (state, produced) = block.get_some(3).expect("get_some");
            if let Some(produced) = produced {
                for i in 0..produced.num_rows() {
                    out.push(produced.value(i, 0).as_json().as_i64().expect("int"));
                }
            }
            if state == ExecutionState::Done {
                return out;
            }
        }
    }

    fn sorting_gather(
        streams: Vec<Box<dyn ExecutionBlock>>,
        strategy: SortMode,
        limit: Option<usize>,
    ) -> SortingGatherBlock {
        SortingGatherBlock::new(
            streams,
            vec![SortElement {
                register: 0,
                ascending: true,
            }],
            strategy,
            limit,
            BlockManager::new(),
            1,
        )
    }

    #[test]
    fn test_sorting_gather_min_element() {
        let mut gather = sorting_gather(
            vec![stream(&[1, 4, 7]), stream(&[2, 3, 8])],
            SortMode::MinElement,
            None,
        );
        assert_eq!(drain(&mut gather), vec![1, 2, 3, 4, 7, 8]);
    }

    #[test]
    fn test_sorting_gather_heap() {
        let mut gather = sorting_gather(
            vec![stream(&[1, 4, 7]), stream(&[2, 3, 8]), stream(&[0, 9])],
            SortMode::Heap,
            None,
        );
        assert_eq!(drain(&mut gather), vec![0, 1, 2, 3, 4, 7, 8, 9]);
    }

    #[test]
    fn test_sorting_gather_constrained_limit() {
        let mut gather = sorting_gather(
            vec![stream(&[1, 4, 7]), stream(&[2, 3, 8])],
            SortMode::MinElement,
            Some(3),
        );
        assert_eq!(drain(&mut gather), vec![1, 2, 3]);
        let (state, block) = gather.get_some(10).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
        assert!(block.is_none());
    }

    #[test]
    fn test_gather_zero_streams_is_done() {
        let mut unsorted = UnsortedGatherBlock::new(vec![], false, BlockManager::new(), 1);
        let (state, block) = unsorted.get_some(10).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
        assert!(block.is_none());

        let mut sorting = sorting_gather(vec![], SortMode::Heap, None);
        let (state, _) = sorting.get_some(10).expect("get_some");
        assert_eq!(state, ExecutionState::Done);
    }

    #[test]
    fn test_unsorted_gather_emits_union() {
        let mut gather = UnsortedGatherBlock::new(
            vec![stream(&[1, 2]), stream(&[3]), stream(&[4, 5])],
            false,
            BlockManager::new(),
            1,
        );
        let mut out = drain(&mut gather);
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3, 4, 5], "multiset equals the union of inputs");
    }

    #[test]
    fn test_scatter_sends_every_row_to_every_client() {
        let clients = vec!["c1".to_string(), "c2".to_string()];
        let mut scatter = ScatterBlock::new(stream(&[1, 2, 3]), clients);
        for client in ["c1", "c2"] {
            let mut got = Vec::new();
            loop {
                let (state, block) = scatter.get_some_for_client(client, 10).expect("get");
                if let Some(block) = block {
                    for i in 0..block.num_rows() {
                        got.push(block.value(i, 0).as_json().as_i64().expect("int"));
                    }
                }
                if state == ExecutionState::Done {
                    break;
                }
            }
            assert_eq!(got, vec![1, 2, 3], "client {} sees every row", client);
        }
    }

    #[test]
    fn test_scatter_rejects_unknown_client() {
        let mut scatter = ScatterBlock::new(stream(&[1]), vec!["c1".to_string()]);
        assert!(scatter.get_some_for_client("nope", 10).is_err());
    }

    fn distribute_over(values: Vec<Value>, clients: &[&str]) -> DistributeBlock {
        let mut block = AqlItemBlock::new(values.len(), 1);
        for (i, v) in values.into_iter().enumerate() {
            block.set_value(i, 0, AqlValue::from_json(v));
        }
        DistributeBlock::new(
            Box::new(ValuesBlock::new(block)),
            clients.iter().map(|c| c.to_string()).collect(),
            0,
            None,
            true,
            true,
            true,
            1,
            BlockManager::new(),
        )
    }

    fn drain_client(block: &mut DistributeBlock, client: &str) -> Vec<Value> {
        let mut out = Vec::new();
        loop {
            let (state, produced) = block.get_some_for_client(client, 10).expect("get");
            if let Some(produced) = produced {
                for i in 0..produced.num_rows() {
                    out.push(produced.value(i, 0).to_json());
                }
            }
            if state == ExecutionState::Done {
                return out;
            }
        }
    }

    #[test]
    fn test_distribute_routes_each_row_once() {
        let values: Vec<Value> = (0..20).map(|i| json!({"_key": format!("k{}", i)})).collect();
        let mut distribute = distribute_over(values, &["c1", "c2", "c3"]);
        let mut total = 0;
        for client in ["c1", "c2", "c3"] {
            total += drain_client(&mut distribute, client).len();
        }
        assert_eq!(total, 20, "every row lands on exactly one client");
    }

    #[test]
    fn test_distribute_routing_is_deterministic() {
        let values: Vec<Value> = vec![json!({"_key": "stable"})];
        let mut first = distribute_over(values.clone(), &["c1", "c2"]);
        let mut second = distribute_over(values, &["c1", "c2"]);
        let first_counts: Vec<usize> = ["c1", "c2"]
            .iter()
            .map(|c| drain_client(&mut first, c).len())
            .collect();
        let second_counts: Vec<usize> = ["c1", "c2"]
            .iter()
            .map(|c| drain_client(&mut second, c).len())
            .collect();
        assert_eq!(first_counts, second_counts);
    }

    #[test]
    fn test_distribute_converts_bare_string_keys() {
        let mut distribute = distribute_over(vec![json!("mykey")], &["c1"]);
        let rows = drain_client(&mut distribute, "c1");
        assert_eq!(rows, vec![json!({"_key": "mykey"})]);
    }

    #[test]
    fn test_distribute_generates_missing_keys() {
        let mut distribute = distribute_over(vec![json!({"x": 1})], &["c1"]);
        let rows = drain_client(&mut distribute, "c1");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get("_key").map(|k| k.is_string()).unwrap_or(false));
        assert_eq!(rows[0]["x"], json!(1));
    }

    #[test]
    fn test_remote_block_round_trip() {
        struct LoopbackConnection {
            server: BlockServer,
        }
        impl RemoteConnection for LoopbackConnection {
            fn execute(
                &mut self,
                request: &ExecutionBlockRequest,
            ) -> CoralResult<ExecutionBlockResponse> {
                // serialize both ways to exercise the wire forms
                let encoded = serde_json::to_value(request).expect("encode request");
                let decoded: ExecutionBlockRequest =
                    serde_json::from_value(encoded).expect("decode request");
                let response = self.server.handle(&decoded)?;
                let encoded = serde_json::to_value(&response).expect("encode response");
                Ok(serde_json::from_value(encoded).expect("decode response"))
            }
        }

        let mut server = BlockServer::new();
        server.register(7, stream(&[10, 20, 30]));
        let mut remote = RemoteBlock::new(
            Box::new(LoopbackConnection { server }),
            7,
            String::new(),
        );
        assert_eq!(drain(&mut remote), vec![10, 20, 30]);
    }

    #[test]
    fn test_serialized_block_preserves_shadow_rows() {
        let mut block = AqlItemBlock::new(2, 2);
        block.set_value(0, 0, AqlValue::from_json(json!(1)));
        block.make_shadow_row(1, 2);
        let round_tripped = SerializedBlock::from_block(&block).to_block();
        assert_eq!(round_tripped.value(0, 0).as_json(), &json!(1));
        assert!(round_tripped.value(0, 1).is_empty(), "empty registers survive");
        assert_eq!(round_tripped.shadow_depth(1), Some(2));
    }
}
