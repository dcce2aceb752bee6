//! Logical execution plans.
//!
//! A plan is an arena of typed nodes referencing each other by id (the DAG
//! never holds pointers). Plans serialize to JSON for distribution and are
//! reconstructed on the remote peer; serialize -> reconstruct -> serialize is
//! the identity on the JSON form.

use crate::ast::AstNode;
use crate::block::BlockManager;
use crate::cluster::{GatherSpec, Parallelism, SortMode};
use crate::executor::{ExecutionBlock, ExecutionBlockImpl, RegisterInfos, ValuesBlock};
use crate::executors::{
    CalculationExecutor, DocumentSource, EnumerateCollectionExecutor, FilterExecutor,
    LimitExecutor, NoResultsExecutor, SortElement, SortExecutor, SubqueryEndExecutor,
    SubqueryStartExecutor,
};
use crate::expression::Expression;
use crate::query::QueryContext;
use crate::registers::{RegisterId, RegisterPlan, Variable, VariableId};
use coral_core::{CoralError, CoralResult, ErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type ExecutionNodeId = u64;

// ============================================================================
// NODE BODIES
// ============================================================================

/// Sort specification element at the plan level (by variable; registers are
/// resolved at block creation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortVariableElement {
    pub variable: VariableId,
    pub ascending: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

/// Options of a data-modification node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModificationOptions {
    pub wait_for_sync: bool,
    pub ignore_revs: bool,
    pub ignore_errors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModificationKind {
    Insert,
    Update,
    Replace,
    Remove,
    Upsert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeBody {
    /// The leaf of every plan: one empty row.
    SingletonNode,
    EnumerateCollectionNode {
        collection: String,
        #[serde(rename = "outVariable")]
        out_variable: Variable,
    },
    IndexNode {
        collection: String,
        #[serde(rename = "indexId")]
        index_id: u64,
        #[serde(rename = "outVariable")]
        out_variable: Variable,
    },
    FilterNode {
        #[serde(rename = "inVariable")]
        in_variable: VariableId,
    },
    CalculationNode {
        expression: AstNode,
        #[serde(rename = "outVariable")]
        out_variable: Variable,
    },
    SortNode {
        elements: Vec<SortVariableElement>,
    },
    LimitNode {
        offset: u64,
        limit: u64,
        #[serde(rename = "fullCount")]
        full_count: bool,
    },
    NoResultsNode,
    SubqueryStartNode,
    SubqueryEndNode {
        #[serde(rename = "inVariable")]
        in_variable: VariableId,
        #[serde(rename = "outVariable")]
        out_variable: Variable,
    },
    ModificationNode {
        kind: ModificationKind,
        collection: String,
        #[serde(rename = "inVariable")]
        in_variable: VariableId,
        options: ModificationOptions,
    },
    ScatterNode {
        clients: Vec<String>,
    },
    DistributeNode {
        clients: Vec<String>,
        collection: String,
        variable: VariableId,
        #[serde(rename = "alternativeVariable")]
        alternative_variable: VariableId,
        #[serde(rename = "createKeys")]
        create_keys: bool,
        #[serde(rename = "allowKeyConversionToObject")]
        allow_key_conversion_to_object: bool,
    },
    GatherNode {
        #[serde(flatten)]
        spec: GatherSpec,
        elements: Vec<SortVariableElement>,
    },
    RemoteNode {
        server: String,
        #[serde(rename = "queryId")]
        query_id: String,
        #[serde(rename = "ownName")]
        distribute_id: String,
    },
}

impl NodeBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeBody::SingletonNode => "SingletonNode",
            NodeBody::EnumerateCollectionNode { .. } => "EnumerateCollectionNode",
            NodeBody::IndexNode { .. } => "IndexNode",
            NodeBody::FilterNode { .. } => "FilterNode",
            NodeBody::CalculationNode { .. } => "CalculationNode",
            NodeBody::SortNode { .. } => "SortNode",
            NodeBody::LimitNode { .. } => "LimitNode",
            NodeBody::NoResultsNode => "NoResultsNode",
            NodeBody::SubqueryStartNode => "SubqueryStartNode",
            NodeBody::SubqueryEndNode { .. } => "SubqueryEndNode",
            NodeBody::ModificationNode { .. } => "ModificationNode",
            NodeBody::ScatterNode { .. } => "ScatterNode",
            NodeBody::DistributeNode { .. } => "DistributeNode",
            NodeBody::GatherNode { .. } => "GatherNode",
            NodeBody::RemoteNode { .. } => "RemoteNode",
        }
    }

    pub fn is_modification(&self) -> bool {
        matches!(self, NodeBody::ModificationNode { .. })
    }

    /// Variables this node reads.
    pub fn variables_used_here(&self) -> Vec<VariableId> {
        match self {
            NodeBody::FilterNode { in_variable } => vec![*in_variable],
            NodeBody::CalculationNode { expression, .. } => {
                let mut out = Vec::new();
                expression.collect_variables(&mut out);
                out
            }
            NodeBody::SortNode { elements } | NodeBody::GatherNode { elements, .. } => {
                elements.iter().map(|e| e.variable).collect()
            }
            NodeBody::SubqueryEndNode { in_variable, .. } => vec![*in_variable],
            NodeBody::ModificationNode { in_variable, .. } => vec![*in_variable],
            NodeBody::DistributeNode {
                variable,
                alternative_variable,
                ..
            } => {
                if variable == alternative_variable {
                    vec![*variable]
                } else {
                    vec![*variable, *alternative_variable]
                }
            }
            _ => vec![],
        }
    }

    /// Variables this node introduces.
    pub fn variables_set_here(&self) -> Vec<Variable> {
        match self {
            NodeBody::EnumerateCollectionNode { out_variable, .. }
            | NodeBody::IndexNode { out_variable, .. }
            | NodeBody::CalculationNode { out_variable, .. }
            | NodeBody::SubqueryEndNode { out_variable, .. } => vec![out_variable.clone()],
            _ => vec![],
        }
    }
}

// ============================================================================
// PLAN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: ExecutionNodeId,
    #[serde(default)]
    pub dependencies: Vec<ExecutionNodeId>,
    #[serde(flatten)]
    pub body: NodeBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub nodes: Vec<PlanNode>,
    pub root: ExecutionNodeId,
}

/// Cost estimate of a node subtree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub estimated_cost: f64,
    pub estimated_nr_items: u64,
}

impl ExecutionPlan {
    pub fn new(nodes: Vec<PlanNode>, root: ExecutionNodeId) -> Self {
        Self { nodes, root }
    }

    pub fn node(&self, id: ExecutionNodeId) -> CoralResult<&PlanNode> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| CoralError::internal(format!("plan node {} missing", id)))
    }

    pub fn to_json(&self) -> CoralResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| CoralError::internal(e.to_string()))
    }

    /// Reconstruct a plan from its transport form. The misspelled legacy
    /// gather attribute `parellelism` is accepted; its use is logged.
    pub fn from_json(mut value: serde_json::Value) -> CoralResult<Self> {
        if let Some(nodes) = value.get_mut("nodes").and_then(|n| n.as_array_mut()) {
            for node in nodes {
                let Some(map) = node.as_object_mut() else {
                    continue;
                };
                if let Some(legacy) = map.remove("parellelism") {
                    tracing::warn!(
                        "accepting legacy 'parellelism' attribute in gather node"
                    );
                    map.entry("parallelism".to_string()).or_insert(legacy);
                }
            }
        }
        serde_json::from_value(value)
            .map_err(|e| CoralError::bad_parameter(format!("invalid execution plan: {}", e)))
    }

    /// Estimate cost bottom-up; `counts` supplies per-collection document
    /// counts.
    pub fn estimate_cost(
        &self,
        id: ExecutionNodeId,
        counts: &HashMap<String, u64>,
    ) -> CoralResult<CostEstimate> {
        let node = self.node(id)?;
        let mut base = CostEstimate {
            estimated_cost: 0.0,
            estimated_nr_items: 0,
        };
        for dep in &node.dependencies {
            let dep_estimate = self.estimate_cost(*dep, counts)?;
            base.estimated_cost += dep_estimate.estimated_cost;
            base.estimated_nr_items += dep_estimate.estimated_nr_items;
        }
        let estimate = match &node.body {
            NodeBody::SingletonNode => CostEstimate {
                estimated_cost: base.estimated_cost + 1.0,
                estimated_nr_items: 1,
            },
            NodeBody::EnumerateCollectionNode { collection, .. }
            | NodeBody::IndexNode { collection, .. } => {
                let count = counts.get(collection).copied().unwrap_or(0);
                let items = base.estimated_nr_items.max(1) * count;
                CostEstimate {
                    estimated_cost: base.estimated_cost + items as f64,
                    estimated_nr_items: items,
                }
            }
            NodeBody::LimitNode { offset, limit, .. } => {
                let items = base.estimated_nr_items.min(offset + limit).saturating_sub(*offset);
                CostEstimate {
                    estimated_cost: base.estimated_cost + items as f64,
                    estimated_nr_items: items,
                }
            }
            NodeBody::NoResultsNode => CostEstimate {
                estimated_cost: base.estimated_cost,
                estimated_nr_items: 0,
            },
            NodeBody::ScatterNode { clients } => CostEstimate {
                estimated_cost: base.estimated_cost
                    + base.estimated_nr_items as f64 * clients.len() as f64,
                estimated_nr_items: base.estimated_nr_items,
            },
            // distribute, gather, remote, filter, sort, calc: one pass over
            // the items
            _ => CostEstimate {
                estimated_cost: base.estimated_cost + base.estimated_nr_items as f64,
                estimated_nr_items: base.estimated_nr_items,
            },
        };
        Ok(estimate)
    }

    /// A gather node is parallelizable iff no descendant is a modification,
    /// scatter, distribute, or another gather.
    pub fn is_parallelizable(&self, gather_id: ExecutionNodeId) -> CoralResult<bool> {
        let node = self.node(gather_id)?;
        for dep in &node.dependencies {
            if !self.subtree_parallelizable(*dep)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn subtree_parallelizable(&self, id: ExecutionNodeId) -> CoralResult<bool> {
        let node = self.node(id)?;
        if node.body.is_modification()
            || matches!(
                node.body,
                NodeBody::ScatterNode { .. }
                    | NodeBody::DistributeNode { .. }
                    | NodeBody::GatherNode { .. }
            )
        {
            return Ok(false);
        }
        for dep in &node.dependencies {
            if !self.subtree_parallelizable(*dep)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ========================================================================
    // REGISTER PLANNING
    // ========================================================================

    /// Compute the register plan by walking from the leaves to the root.
    pub fn build_register_plan(&self) -> CoralResult<RegisterPlan> {
        let mut register_plan = RegisterPlan::new();
        let order = self.walk_order(self.root)?;
        let reusable = HashSet::new();
        for id in order {
            let node = self.node(id)?;
            if matches!(
                node.body,
                NodeBody::EnumerateCollectionNode { .. } | NodeBody::IndexNode { .. }
            ) {
                register_plan.increase_depth();
            }
            for variable in node.body.variables_set_here() {
                register_plan.register_variable(variable.id, &reusable)?;
            }
        }
        Ok(register_plan)
    }

    /// Dependency-first traversal order ending at `root`.
    fn walk_order(&self, root: ExecutionNodeId) -> CoralResult<Vec<ExecutionNodeId>> {
        let mut order = Vec::new();
        let mut stack = vec![(root, false)];
        let mut seen = HashSet::new();
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.push((id, true));
            let node = self.node(id)?;
            for dep in &node.dependencies {
                stack.push((*dep, false));
            }
        }
        Ok(order)
    }

    // ========================================================================
    // BLOCK INSTANTIATION
    // ========================================================================

    /// Instantiate the subtree rooted at `id` into execution blocks.
    pub fn instantiate(
        &self,
        id: ExecutionNodeId,
        env: &dyn BlockEnv,
        ctx: &Arc<QueryContext>,
        register_plan: &RegisterPlan,
    ) -> CoralResult<Box<dyn ExecutionBlock>> {
        let node = self.node(id)?;
        let manager: Arc<BlockManager> = Arc::clone(ctx.block_manager());

        let register_for = |variable: VariableId| -> CoralResult<RegisterId> {
            register_plan.register_for(variable).ok_or_else(|| {
                CoralError::internal(format!("variable {} has no register", variable))
            })
        };
        let total_registers = register_plan.registers_at(register_plan.current_depth());

        // single upstream, built on demand
        let upstream = |env: &dyn BlockEnv| -> CoralResult<Box<dyn ExecutionBlock>> {
            match node.dependencies.as_slice() {
                [dep] => self.instantiate(*dep, env, ctx, register_plan),
                _ => Err(CoralError::internal(format!(
                    "{} expects exactly one dependency",
                    node.body.type_name()
                ))),
            }
        };

        match &node.body {
            NodeBody::SingletonNode => Ok(Box::new(ValuesBlock::singleton(total_registers))),
            NodeBody::EnumerateCollectionNode {
                collection,
                out_variable,
            } => {
                let source = env.document_source(collection)?;
                let output = register_for(out_variable.id)?;
                Ok(Box::new(ExecutionBlockImpl::new(
                    EnumerateCollectionExecutor::new(source, output),
                    upstream(env)?,
                    RegisterInfos::with_output(total_registers, output),
                    manager,
                )))
            }
            NodeBody::IndexNode {
                collection,
                out_variable,
                ..
            } => {
                // index scans are served by the same source seam; ordering
                // and filtering happen in the surrounding nodes
                let source = env.document_source(collection)?;
                let output = register_for(out_variable.id)?;
                Ok(Box::new(ExecutionBlockImpl::new(
                    EnumerateCollectionExecutor::new(source, output),
                    upstream(env)?,
                    RegisterInfos::with_output(total_registers, output),
                    manager,
                )))
            }
            NodeBody::FilterNode { in_variable } => {
                let register = register_for(*in_variable)?;
                Ok(Box::new(ExecutionBlockImpl::new(
                    FilterExecutor::new(register),
                    upstream(env)?,
                    RegisterInfos::passthrough(total_registers),
                    manager,
                )))
            }
            NodeBody::CalculationNode {
                expression,
                out_variable,
            } => {
                let output = register_for(out_variable.id)?;
                let mut used = Vec::new();
                expression.collect_variables(&mut used);
                let mut variable_registers = HashMap::new();
                for variable in used {
                    variable_registers.insert(variable, register_for(variable)?);
                }
                Ok(Box::new(ExecutionBlockImpl::new(
                    CalculationExecutor::new(
                        Arc::new(Expression::new(expression.clone())),
                        variable_registers,
                        output,
                        Arc::clone(ctx),
                    ),
                    upstream(env)?,
                    RegisterInfos::with_output(total_registers, output),
                    manager,
                )))
            }
            NodeBody::SortNode { elements } => {
                let elements = self.sort_elements(elements, register_plan)?;
                Ok(Box::new(ExecutionBlockImpl::new(
                    SortExecutor::new(elements),
                    upstream(env)?,
                    RegisterInfos::passthrough(total_registers),
                    manager,
                )))
            }
            NodeBody::LimitNode {
                offset,
                limit,
                full_count,
            } => Ok(Box::new(ExecutionBlockImpl::new(
                LimitExecutor::new(*offset, *limit, *full_count),
                upstream(env)?,
                RegisterInfos::passthrough(total_registers),
                manager,
            ))),
            NodeBody::NoResultsNode => Ok(Box::new(ExecutionBlockImpl::new(
                NoResultsExecutor,
                upstream(env)?,
                RegisterInfos::passthrough(total_registers),
                manager,
            ))),
            NodeBody::SubqueryStartNode => Ok(Box::new(ExecutionBlockImpl::new(
                SubqueryStartExecutor::new(),
                upstream(env)?,
                RegisterInfos::passthrough(total_registers),
                manager,
            ))),
            NodeBody::SubqueryEndNode {
                in_variable,
                out_variable,
            } => {
                let input = register_for(*in_variable)?;
                let output = register_for(out_variable.id)?;
                Ok(Box::new(ExecutionBlockImpl::new(
                    SubqueryEndExecutor::new(input, output),
                    upstream(env)?,
                    RegisterInfos::with_output(total_registers, output),
                    manager,
                )))
            }
            NodeBody::GatherNode { spec, elements } => {
                let mut upstreams = Vec::with_capacity(node.dependencies.len());
                for dep in &node.dependencies {
                    upstreams.push(self.instantiate(*dep, env, ctx, register_plan)?);
                }
                let elements = self.sort_elements(elements, register_plan)?;
                crate::cluster::create_gather_block(
                    spec,
                    elements,
                    upstreams,
                    env.is_coordinator(),
                    manager,
                    total_registers,
                )
            }
            NodeBody::RemoteNode {
                server,
                query_id,
                distribute_id,
            } => env.remote_block(server, query_id, distribute_id),
            NodeBody::ModificationNode { kind, collection, .. } => {
                env.modification_block(*kind, collection)
            }
            NodeBody::ScatterNode { .. } | NodeBody::DistributeNode { .. } => {
                // scatter/distribute are driven per client through the
                // cluster consumer interface, not as plain upstream blocks
                Err(CoralError::internal(format!(
                    "{} cannot be instantiated as a plain block",
                    node.body.type_name()
                )))
            }
        }
    }

    fn sort_elements(
        &self,
        elements: &[SortVariableElement],
        register_plan: &RegisterPlan,
    ) -> CoralResult<Vec<SortElement>> {
        elements
            .iter()
            .map(|element| {
                register_plan
                    .register_for(element.variable)
                    .map(|register| SortElement {
                        register,
                        ascending: element.ascending,
                    })
                    .ok_or_else(|| {
                        CoralError::internal(format!(
                            "sort variable {} has no register",
                            element.variable
                        ))
                    })
            })
            .collect()
    }
}

// ============================================================================
// ENVIRONMENT SEAM
// ============================================================================

/// What block instantiation needs from the hosting server.
pub trait BlockEnv {
    fn document_source(&self, collection: &str) -> CoralResult<Arc<dyn DocumentSource>>;

    fn remote_block(
        &self,
        _server: &str,
        _query_id: &str,
        _distribute_id: &str,
    ) -> CoralResult<Box<dyn ExecutionBlock>> {
        Err(CoralError::internal("no cluster runtime attached"))
    }

    fn modification_block(
        &self,
        _kind: ModificationKind,
        _collection: &str,
    ) -> CoralResult<Box<dyn ExecutionBlock>> {
        Err(CoralError::internal("no modification runtime attached"))
    }

    fn is_coordinator(&self) -> bool {
        true
    }
}

/// Map-backed environment for tests and single-server execution.
#[derive(Default)]
pub struct SimpleBlockEnv {
    pub sources: HashMap<String, Arc<dyn DocumentSource>>,
    pub coordinator: bool,
}

impl BlockEnv for SimpleBlockEnv {
    fn document_source(&self, collection: &str) -> CoralResult<Arc<dyn DocumentSource>> {
        self.sources.get(collection).cloned().ok_or_else(|| {
            CoralError::new(
                ErrorCode::CollectionNotFound,
                format!("collection or view not found: {}", collection),
            )
        })
    }

    fn is_coordinator(&self) -> bool {
        self.coordinator
    }
}
