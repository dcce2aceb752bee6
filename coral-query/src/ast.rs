//! Expression AST.
//!
//! The nodes are the transport form of expressions inside serialized plans,
//! so everything here derives serde. Shapes the evaluator cares about
//! (sorted array literals, range bounds) are explicit in the node.

use crate::registers::VariableId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Binary search is used for `IN` when the right-hand array literal is
/// flagged sorted and has at least this many members.
pub const SORTED_IN_THRESHOLD: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOp {
    Plus,
    Minus,
    Times,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::In
                | BinaryOp::NotIn
        )
    }
}

/// N-ary logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogicalOp {
    And,
    Or,
}

/// Quantifiers for array comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Quantifier {
    All,
    Any,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AstNode {
    /// A pure constant.
    Constant { value: Value },
    /// Reference to a variable.
    Reference { variable: VariableId },
    /// `object.attribute`
    AttributeAccess {
        object: Box<AstNode>,
        attribute: String,
    },
    /// `object[index]`
    IndexedAccess {
        object: Box<AstNode>,
        index: Box<AstNode>,
    },
    /// `[a, b, c]`; `sorted` is set by the optimizer when members are known
    /// to be in value order.
    ArrayLiteral { members: Vec<AstNode>, sorted: bool },
    /// `{k: v, ...}`
    ObjectLiteral { members: Vec<(String, AstNode)> },
    UnaryMinus { operand: Box<AstNode> },
    UnaryNot { operand: Box<AstNode> },
    BinaryOp {
        op: BinaryOp,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },
    /// Array comparison with a quantifier: `lhs ALL == rhs` etc.
    ArrayComparison {
        op: BinaryOp,
        quantifier: Quantifier,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },
    /// N-ary logical operator with short-circuit evaluation.
    NaryOp {
        op: LogicalOp,
        operands: Vec<AstNode>,
    },
    /// `condition ? then : else`
    Ternary {
        condition: Box<AstNode>,
        then_branch: Box<AstNode>,
        else_branch: Box<AstNode>,
    },
    /// `low .. high` (inclusive integer range)
    Range {
        low: Box<AstNode>,
        high: Box<AstNode>,
    },
    /// Built-in or user-defined function call.
    FunctionCall { name: String, args: Vec<AstNode> },
    /// `array[* FILTER ... LIMIT o, l RETURN projection]`
    Expansion {
        variable: VariableId,
        array: Box<AstNode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<Box<AstNode>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        projection: Option<Box<AstNode>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<(usize, usize)>,
    },
}

impl AstNode {
    pub fn constant(value: Value) -> Self {
        AstNode::Constant { value }
    }

    pub fn reference(variable: VariableId) -> Self {
        AstNode::Reference { variable }
    }

    /// Whether the subtree contains no variable references or function
    /// calls, i.e. evaluates to the same value forever.
    pub fn is_constant(&self) -> bool {
        match self {
            AstNode::Constant { .. } => true,
            AstNode::Reference { .. } | AstNode::FunctionCall { .. } => false,
            AstNode::AttributeAccess { object, .. } => object.is_constant(),
            AstNode::IndexedAccess { object, index } => object.is_constant() && index.is_constant(),
            AstNode::ArrayLiteral { members, .. } => members.iter().all(AstNode::is_constant),
            AstNode::ObjectLiteral { members } => members.iter().all(|(_, v)| v.is_constant()),
            AstNode::UnaryMinus { operand } | AstNode::UnaryNot { operand } => operand.is_constant(),
            AstNode::BinaryOp { lhs, rhs, .. } | AstNode::ArrayComparison { lhs, rhs, .. } => {
                lhs.is_constant() && rhs.is_constant()
            }
            AstNode::NaryOp { operands, .. } => operands.iter().all(AstNode::is_constant),
            AstNode::Ternary {
                condition,
                then_branch,
                else_branch,
            } => condition.is_constant() && then_branch.is_constant() && else_branch.is_constant(),
            AstNode::Range { low, high } => low.is_constant() && high.is_constant(),
            AstNode::Expansion { .. } => false,
        }
    }

    /// A chain of attribute accesses rooted at a variable reference, e.g.
    /// `doc.a.b`; returns (root variable, path).
    pub fn as_attribute_access_chain(&self) -> Option<(VariableId, Vec<String>)> {
        let mut path = Vec::new();
        let mut current = self;
        loop {
            match current {
                AstNode::AttributeAccess { object, attribute } => {
                    path.push(attribute.clone());
                    current = object;
                }
                AstNode::Reference { variable } => {
                    path.reverse();
                    return Some((*variable, path));
                }
                _ => return None,
            }
        }
    }

    /// Collect all referenced variables.
    pub fn collect_variables(&self, out: &mut Vec<VariableId>) {
        match self {
            AstNode::Constant { .. } => {}
            AstNode::Reference { variable } => out.push(*variable),
            AstNode::AttributeAccess { object, .. } => object.collect_variables(out),
            AstNode::IndexedAccess { object, index } => {
                object.collect_variables(out);
                index.collect_variables(out);
            }
            AstNode::ArrayLiteral { members, .. } => {
                members.iter().for_each(|m| m.collect_variables(out))
            }
            AstNode::ObjectLiteral { members } => {
                members.iter().for_each(|(_, v)| v.collect_variables(out))
            }
            AstNode::UnaryMinus { operand } | AstNode::UnaryNot { operand } => {
                operand.collect_variables(out)
            }
            AstNode::BinaryOp { lhs, rhs, .. } | AstNode::ArrayComparison { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            AstNode::NaryOp { operands, .. } => {
                operands.iter().for_each(|o| o.collect_variables(out))
            }
            AstNode::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_variables(out);
                then_branch.collect_variables(out);
                else_branch.collect_variables(out);
            }
            AstNode::Range { low, high } => {
                low.collect_variables(out);
                high.collect_variables(out);
            }
            AstNode::FunctionCall { args, .. } => {
                args.iter().for_each(|a| a.collect_variables(out))
            }
            AstNode::Expansion {
                variable,
                array,
                filter,
                projection,
                ..
            } => {
                array.collect_variables(out);
                if let Some(filter) = filter {
                    filter.collect_variables(out);
                }
                if let Some(projection) = projection {
                    projection.collect_variables(out);
                }
                // the expansion variable is bound locally, not free
                out.retain(|v| v != variable);
            }
        }
    }

    /// Replace every reference to `from` with a reference to `to`.
    pub fn substitute_variable(&mut self, from: VariableId, to: VariableId) {
        match self {
            AstNode::Reference { variable } if *variable == from => *variable = to,
            AstNode::Reference { .. } | AstNode::Constant { .. } => {}
            AstNode::AttributeAccess { object, .. } => object.substitute_variable(from, to),
            AstNode::IndexedAccess { object, index } => {
                object.substitute_variable(from, to);
                index.substitute_variable(from, to);
            }
            AstNode::ArrayLiteral { members, .. } => members
                .iter_mut()
                .for_each(|m| m.substitute_variable(from, to)),
            AstNode::ObjectLiteral { members } => members
                .iter_mut()
                .for_each(|(_, v)| v.substitute_variable(from, to)),
            AstNode::UnaryMinus { operand } | AstNode::UnaryNot { operand } => {
                operand.substitute_variable(from, to)
            }
            AstNode::BinaryOp { lhs, rhs, .. } | AstNode::ArrayComparison { lhs, rhs, .. } => {
                lhs.substitute_variable(from, to);
                rhs.substitute_variable(from, to);
            }
            AstNode::NaryOp { operands, .. } => operands
                .iter_mut()
                .for_each(|o| o.substitute_variable(from, to)),
            AstNode::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.substitute_variable(from, to);
                then_branch.substitute_variable(from, to);
                else_branch.substitute_variable(from, to);
            }
            AstNode::Range { low, high } => {
                low.substitute_variable(from, to);
                high.substitute_variable(from, to);
            }
            AstNode::FunctionCall { args, .. } => args
                .iter_mut()
                .for_each(|a| a.substitute_variable(from, to)),
            AstNode::Expansion {
                array,
                filter,
                projection,
                ..
            } => {
                array.substitute_variable(from, to);
                if let Some(filter) = filter {
                    filter.substitute_variable(from, to);
                }
                if let Some(projection) = projection {
                    projection.substitute_variable(from, to);
                }
            }
        }
    }
}
