//! Expression classification and evaluation.
//!
//! An expression is classified on first use: pure constants become `Json`
//! (materialized once and cached), attribute chains rooted at a variable
//! become `AttributeAccess` (fast-path lookup bypassing the generic walk),
//! everything else is `Simple` and evaluated by the AST walker. Substituting
//! a variable reverts the type to `Unprocessed` for reclassification.

use crate::ast::{AstNode, BinaryOp, LogicalOp, Quantifier, SORTED_IN_THRESHOLD};
use crate::functions;
use crate::registers::VariableId;
use crate::value::{compare_values, AqlValue};
use coral_core::{CoralError, CoralResult, ErrorCode};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Mutex;

// ============================================================================
// CONTEXT
// ============================================================================

/// What an expression needs from its surroundings: variable bindings and a
/// sink for query warnings.
pub trait ExpressionContext {
    fn variable_value(&self, id: VariableId) -> CoralResult<AqlValue>;
    fn register_warning(&self, code: ErrorCode, message: &str);
}

// ============================================================================
// EXPRESSION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionType {
    Unprocessed,
    /// Pure constant; the value is materialized once and cached.
    Json,
    /// Attribute chain rooted at a variable; evaluated by direct lookup.
    AttributeAccess,
    /// Generic AST walk.
    Simple,
}

#[derive(Debug)]
struct ExpressionState {
    kind: ExpressionType,
    cached: Option<AqlValue>,
    access: Option<(VariableId, Vec<String>)>,
}

#[derive(Debug)]
pub struct Expression {
    node: AstNode,
    state: Mutex<ExpressionState>,
}

impl Expression {
    pub fn new(node: AstNode) -> Self {
        Self {
            node,
            state: Mutex::new(ExpressionState {
                kind: ExpressionType::Unprocessed,
                cached: None,
                access: None,
            }),
        }
    }

    pub fn node(&self) -> &AstNode {
        &self.node
    }

    /// The current classification (classifying on demand).
    pub fn kind(&self) -> ExpressionType {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.kind == ExpressionType::Unprocessed {
            self.classify(&mut state);
        }
        state.kind
    }

    fn classify(&self, state: &mut ExpressionState) {
        if self.node.is_constant() {
            state.kind = ExpressionType::Json;
        } else if let Some(access) = self.node.as_attribute_access_chain() {
            state.kind = ExpressionType::AttributeAccess;
            state.access = Some(access);
        } else {
            state.kind = ExpressionType::Simple;
        }
    }

    /// Evaluate against a context.
    pub fn execute(&self, ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.kind == ExpressionType::Unprocessed {
            self.classify(&mut state);
        }
        match state.kind {
            ExpressionType::Json => {
                if state.cached.is_none() {
                    let value = Evaluator::new(ctx).eval(&self.node)?;
                    state.cached = Some(value);
                }
                Ok(state.cached.clone().unwrap_or_default())
            }
            ExpressionType::AttributeAccess => {
                let (variable, path) = state
                    .access
                    .clone()
                    .ok_or_else(|| CoralError::internal("attribute access lost its path"))?;
                drop(state);
                let root = ctx.variable_value(variable)?;
                let mut current = root.as_json();
                for attribute in &path {
                    match current.get(attribute) {
                        Some(next) => current = next,
                        None => return Ok(AqlValue::null()),
                    }
                }
                Ok(AqlValue::from_json(current.clone()))
            }
            _ => {
                drop(state);
                Evaluator::new(ctx).eval(&self.node)
            }
        }
    }

    /// Replace a variable reference; the classification reverts to
    /// `Unprocessed` and is redone on next use.
    pub fn substitute_variable(&mut self, from: VariableId, to: VariableId) {
        self.node.substitute_variable(from, to);
        let state = self.state.get_mut();
        let state = match state {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.kind = ExpressionType::Unprocessed;
        state.cached = None;
        state.access = None;
    }
}

// ============================================================================
// EVALUATOR
// ============================================================================

struct Evaluator<'a> {
    ctx: &'a dyn ExpressionContext,
    /// Locally bound variables (expansion iteration).
    overrides: Vec<(VariableId, AqlValue)>,
}

impl<'a> Evaluator<'a> {
    fn new(ctx: &'a dyn ExpressionContext) -> Self {
        Self {
            ctx,
            overrides: Vec::new(),
        }
    }

    fn variable(&self, id: VariableId) -> CoralResult<AqlValue> {
        for (bound, value) in self.overrides.iter().rev() {
            if *bound == id {
                return Ok(value.clone());
            }
        }
        self.ctx.variable_value(id)
    }

    fn eval(&mut self, node: &AstNode) -> CoralResult<AqlValue> {
        match node {
            AstNode::Constant { value } => Ok(AqlValue::from_json(value.clone())),
            AstNode::Reference { variable } => self.variable(*variable),
            AstNode::AttributeAccess { object, attribute } => {
                let object = self.eval(object)?;
                Ok(object
                    .as_json()
                    .get(attribute)
                    .map(|v| AqlValue::from_json(v.clone()))
                    .unwrap_or_else(AqlValue::null))
            }
            AstNode::IndexedAccess { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                Ok(indexed_access(object.as_json(), index.as_json()))
            }
            AstNode::ArrayLiteral { members, .. } => {
                let mut out = Vec::with_capacity(members.len());
                for member in members {
                    out.push(self.eval(member)?.to_json());
                }
                Ok(AqlValue::from_json(Value::Array(out)))
            }
            AstNode::ObjectLiteral { members } => {
                let mut out = serde_json::Map::with_capacity(members.len());
                for (key, member) in members {
                    out.insert(key.clone(), self.eval(member)?.to_json());
                }
                Ok(AqlValue::from_json(Value::Object(out)))
            }
            AstNode::UnaryNot { operand } => {
                let operand = self.eval(operand)?;
                Ok(AqlValue::from_json(json!(!operand.is_truthy())))
            }
            AstNode::UnaryMinus { operand } => {
                let operand = self.eval(operand)?;
                match self.to_number(operand.as_json()) {
                    Some(n) => Ok(clamped_number(-n)),
                    None => {
                        self.warn_invalid_operand();
                        Ok(AqlValue::null())
                    }
                }
            }
            AstNode::BinaryOp { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            AstNode::ArrayComparison {
                op,
                quantifier,
                lhs,
                rhs,
            } => self.eval_array_comparison(*op, *quantifier, lhs, rhs),
            AstNode::NaryOp { op, operands } => self.eval_nary(*op, operands),
            AstNode::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then_branch)
                } else {
                    self.eval(else_branch)
                }
            }
            AstNode::Range { low, high } => {
                let low = self.eval(low)?;
                let high = self.eval(high)?;
                Ok(self.materialize_range(low.as_json(), high.as_json()))
            }
            AstNode::FunctionCall { name, args } => {
                let function = functions::lookup(name)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg)?);
                }
                function(&evaluated, self.ctx)
            }
            AstNode::Expansion {
                variable,
                array,
                filter,
                projection,
                limit,
            } => self.eval_expansion(*variable, array, filter.as_deref(), projection.as_deref(), *limit),
        }
    }

    // --- numeric conversion ---

    /// AQL numeric conversion: null -> 0, booleans -> 0/1, parseable strings
    /// parse, singleton arrays recurse; everything else is not a number.
    fn to_number(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Null => Some(0.0),
            Value::Bool(b) => Some(*b as u8 as f64),
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Some(0.0)
                } else {
                    trimmed.parse::<f64>().ok()
                }
            }
            Value::Array(members) => match members.len() {
                0 => Some(0.0),
                1 => self.to_number(&members[0]),
                _ => None,
            },
            Value::Object(_) => None,
        }
    }

    fn warn_invalid_operand(&self) {
        self.ctx.register_warning(
            ErrorCode::QueryNumberOutOfRange,
            "invalid arithmetic operand",
        );
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &AstNode, rhs: &AstNode) -> CoralResult<AqlValue> {
        match op {
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Times | BinaryOp::Div | BinaryOp::Mod => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                let (Some(l), Some(r)) = (
                    self.to_number(left.as_json()),
                    self.to_number(right.as_json()),
                ) else {
                    self.warn_invalid_operand();
                    return Ok(AqlValue::null());
                };
                if (op == BinaryOp::Div || op == BinaryOp::Mod) && r == 0.0 {
                    // division by zero registers a warning and yields null;
                    // it never throws
                    self.ctx
                        .register_warning(ErrorCode::QueryDivisionByZero, "division by zero");
                    return Ok(AqlValue::null());
                }
                let result = match op {
                    BinaryOp::Plus => l + r,
                    BinaryOp::Minus => l - r,
                    BinaryOp::Times => l * r,
                    BinaryOp::Div => l / r,
                    _ => l % r,
                };
                Ok(clamped_number(result))
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                let ordering = compare_values(left.as_json(), right.as_json());
                let out = match op {
                    BinaryOp::Eq => ordering == Ordering::Equal,
                    BinaryOp::Ne => ordering != Ordering::Equal,
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Ok(AqlValue::from_json(json!(out)))
            }
            BinaryOp::In | BinaryOp::NotIn => {
                let contained = self.eval_in(lhs, rhs)?;
                let out = if op == BinaryOp::In { contained } else { !contained };
                Ok(AqlValue::from_json(json!(out)))
            }
        }
    }

    fn eval_in(&mut self, lhs: &AstNode, rhs: &AstNode) -> CoralResult<bool> {
        let needle = self.eval(lhs)?;

        // O(1) containment for ranges when the left side losslessly
        // converts to an integer
        if let AstNode::Range { low, high } = rhs {
            let low = self.eval(low)?;
            let high = self.eval(high)?;
            let (Some(low), Some(high)) = (as_int(low.as_json()), as_int(high.as_json())) else {
                return Ok(false);
            };
            let Some(candidate) = as_int(needle.as_json()) else {
                return Ok(false);
            };
            let (low, high) = if low <= high { (low, high) } else { (high, low) };
            return Ok(candidate >= low && candidate <= high);
        }

        let haystack = self.eval(rhs)?;
        let Value::Array(members) = haystack.as_json() else {
            return Ok(false);
        };

        // binary search only when the literal is flagged sorted and large
        // enough for it to pay off
        let use_binary_search = matches!(
            rhs,
            AstNode::ArrayLiteral { sorted: true, members } if members.len() >= SORTED_IN_THRESHOLD
        );
        if use_binary_search {
            return Ok(members
                .binary_search_by(|member| compare_values(member, needle.as_json()))
                .is_ok());
        }
        Ok(members
            .iter()
            .any(|member| compare_values(member, needle.as_json()) == Ordering::Equal))
    }

    fn eval_array_comparison(
        &mut self,
        op: BinaryOp,
        quantifier: Quantifier,
        lhs: &AstNode,
        rhs: &AstNode,
    ) -> CoralResult<AqlValue> {
        debug_assert!(op.is_comparison());
        let left = self.eval(lhs)?;
        let Value::Array(members) = left.as_json() else {
            return Ok(AqlValue::from_json(json!(false)));
        };

        // empty input: ALL and NONE hold vacuously, ANY does not
        let mut matches = 0usize;
        let total = members.len();
        for (seen, member) in members.iter().enumerate() {
            let holds = self.member_comparison(op, member, rhs)?;
            if holds {
                matches += 1;
            }
            let remaining = total - seen - 1;
            // short-circuit as soon as the remaining members cannot change
            // the outcome
            match quantifier {
                Quantifier::All if !holds => return Ok(AqlValue::from_json(json!(false))),
                Quantifier::None if holds => return Ok(AqlValue::from_json(json!(false))),
                Quantifier::Any if holds => return Ok(AqlValue::from_json(json!(true))),
                Quantifier::Any if matches == 0 && remaining == 0 => {
                    return Ok(AqlValue::from_json(json!(false)))
                }
                _ => {}
            }
        }
        let out = match quantifier {
            Quantifier::All | Quantifier::None => true,
            Quantifier::Any => matches > 0,
        };
        Ok(AqlValue::from_json(json!(out)))
    }

    fn member_comparison(
        &mut self,
        op: BinaryOp,
        member: &Value,
        rhs: &AstNode,
    ) -> CoralResult<bool> {
        let lhs = AstNode::Constant {
            value: member.clone(),
        };
        let result = self.eval_binary(op, &lhs, rhs)?;
        Ok(result.is_truthy())
    }

    fn eval_nary(&mut self, op: LogicalOp, operands: &[AstNode]) -> CoralResult<AqlValue> {
        let mut last = AqlValue::null();
        for operand in operands {
            last = self.eval(operand)?;
            match op {
                LogicalOp::And if !last.is_truthy() => return Ok(last),
                LogicalOp::Or if last.is_truthy() => return Ok(last),
                _ => {}
            }
        }
        Ok(last)
    }

    fn materialize_range(&self, low: &Value, high: &Value) -> AqlValue {
        let (Some(low), Some(high)) = (as_int(low), as_int(high)) else {
            return AqlValue::null();
        };
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let members: Vec<Value> = (low..=high).map(|i| json!(i)).collect();
        AqlValue::from_json(Value::Array(members))
    }

    fn eval_expansion(
        &mut self,
        variable: VariableId,
        array: &AstNode,
        filter: Option<&AstNode>,
        projection: Option<&AstNode>,
        limit: Option<(usize, usize)>,
    ) -> CoralResult<AqlValue> {
        let input = self.eval(array)?;
        let Value::Array(members) = input.as_json() else {
            return Ok(AqlValue::from_json(json!([])));
        };

        let mut out = Vec::new();
        let (offset, count) = limit.unwrap_or((0, usize::MAX));
        let mut skipped = 0usize;
        for member in members {
            self.overrides
                .push((variable, AqlValue::from_json(member.clone())));
            let result = (|| -> CoralResult<Option<Value>> {
                if let Some(filter) = filter {
                    if !self.eval(filter)?.is_truthy() {
                        return Ok(None);
                    }
                }
                let projected = match projection {
                    Some(projection) => self.eval(projection)?.to_json(),
                    None => member.clone(),
                };
                Ok(Some(projected))
            })();
            self.overrides.pop();
            if let Some(projected) = result? {
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                out.push(projected);
                if out.len() >= count {
                    break;
                }
            }
        }
        Ok(AqlValue::from_json(Value::Array(out)))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// NaN and infinities are clamped to null on arithmetic output.
fn clamped_number(value: f64) -> AqlValue {
    if value.is_finite() {
        AqlValue::from_json(json!(value))
    } else {
        AqlValue::null()
    }
}

/// Lossless integer conversion.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9e18).map(|f| f as i64)
            }
        }
        _ => None,
    }
}

fn indexed_access(object: &Value, index: &Value) -> AqlValue {
    match (object, index) {
        (Value::Array(members), Value::Number(n)) => {
            let Some(i) = n.as_i64() else {
                return AqlValue::null();
            };
            let len = members.len() as i64;
            let i = if i < 0 { len + i } else { i };
            if i >= 0 && i < len {
                AqlValue::from_json(members[i as usize].clone())
            } else {
                AqlValue::null()
            }
        }
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .map(|v| AqlValue::from_json(v.clone()))
            .unwrap_or_else(AqlValue::null),
        _ => AqlValue::null(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Context with no variables that records warnings.
    #[derive(Default)]
    pub(crate) struct NullContext {
        pub warnings: StdMutex<Vec<(ErrorCode, String)>>,
    }

    impl ExpressionContext for NullContext {
        fn variable_value(&self, _id: VariableId) -> CoralResult<AqlValue> {
            Ok(AqlValue::null())
        }
        fn register_warning(&self, code: ErrorCode, message: &str) {
            if let Ok(mut warnings) = self.warnings.lock() {
                warnings.push((code, message.to_string()));
            }
        }
    }

    struct VarContext {
        values: Vec<(VariableId, Value)>,
    }

    impl ExpressionContext for VarContext {
        fn variable_value(&self, id: VariableId) -> CoralResult<AqlValue> {
            Ok(self
                .values
                .iter()
                .find(|(v, _)| *v == id)
                .map(|(_, value)| AqlValue::from_json(value.clone()))
                .unwrap_or_else(AqlValue::null))
        }
        fn register_warning(&self, _code: ErrorCode, _message: &str) {}
    }

    fn eval(node: AstNode) -> AqlValue {
        Expression::new(node)
            .execute(&NullContext::default())
            .expect("eval")
    }

    fn binary(op: BinaryOp, lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::BinaryOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    #[test]
    fn test_constant_classified_json_and_cached() {
        let expr = Expression::new(binary(
            BinaryOp::Plus,
            AstNode::constant(json!(1)),
            AstNode::constant(json!(2)),
        ));
        assert_eq!(expr.kind(), ExpressionType::Json);
        let ctx = NullContext::default();
        assert_eq!(expr.execute(&ctx).expect("eval").as_json(), &json!(3.0));
        // cached value is reused
        assert_eq!(expr.execute(&ctx).expect("eval").as_json(), &json!(3.0));
    }

    #[test]
    fn test_attribute_access_fast_path() {
        let expr = Expression::new(AstNode::AttributeAccess {
            object: Box::new(AstNode::reference(1)),
            attribute: "name".into(),
        });
        assert_eq!(expr.kind(), ExpressionType::AttributeAccess);
        let ctx = VarContext {
            values: vec![(1, json!({"name": "coral"}))],
        };
        assert_eq!(expr.execute(&ctx).expect("eval").as_json(), &json!("coral"));
    }

    #[test]
    fn test_substitution_invalidates_classification() {
        let mut expr = Expression::new(AstNode::AttributeAccess {
            object: Box::new(AstNode::reference(1)),
            attribute: "x".into(),
        });
        assert_eq!(expr.kind(), ExpressionType::AttributeAccess);
        expr.substitute_variable(1, 2);
        let ctx = VarContext {
            values: vec![(2, json!({"x": 9}))],
        };
        assert_eq!(expr.execute(&ctx).expect("eval").as_json(), &json!(9));
    }

    #[test]
    fn test_division_by_zero_warns_and_yields_null() {
        let ctx = NullContext::default();
        let expr = Expression::new(binary(
            BinaryOp::Div,
            AstNode::reference(1), // force Simple so nothing is cached
            AstNode::constant(json!(0)),
        ));
        let result = expr.execute(&ctx).expect("eval");
        assert!(result.as_json().is_null());
        let warnings = ctx.warnings.lock().expect("warnings");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, ErrorCode::QueryDivisionByZero);
    }

    #[test]
    fn test_nan_clamped_to_null() {
        let ctx = NullContext::default();
        // 1e308 * 1e308 overflows to infinity
        let expr = Expression::new(binary(
            BinaryOp::Times,
            AstNode::reference(1),
            AstNode::constant(json!(1e308)),
        ));
        let ctx2 = VarContext {
            values: vec![(1, json!(1e308))],
        };
        assert!(expr.execute(&ctx2).expect("eval").as_json().is_null());
        drop(ctx);
    }

    #[test]
    fn test_in_over_empty_array_is_false() {
        let result = eval(binary(
            BinaryOp::In,
            AstNode::constant(json!(1)),
            AstNode::ArrayLiteral {
                members: vec![],
                sorted: false,
            },
        ));
        assert_eq!(result.as_json(), &json!(false));
    }

    #[test]
    fn test_in_binary_search_on_sorted_literal() {
        let members: Vec<AstNode> = (0..20).map(|i| AstNode::constant(json!(i * 2))).collect();
        let array = AstNode::ArrayLiteral {
            members,
            sorted: true,
        };
        let found = eval(binary(BinaryOp::In, AstNode::constant(json!(18)), array.clone()));
        assert_eq!(found.as_json(), &json!(true));
        let missing = eval(binary(BinaryOp::In, AstNode::constant(json!(17)), array));
        assert_eq!(missing.as_json(), &json!(false));
    }

    #[test]
    fn test_in_range_containment() {
        let range = AstNode::Range {
            low: Box::new(AstNode::constant(json!(1))),
            high: Box::new(AstNode::constant(json!(1000))),
        };
        let hit = eval(binary(BinaryOp::In, AstNode::constant(json!(500)), range.clone()));
        assert_eq!(hit.as_json(), &json!(true));
        // a fractional left side does not losslessly convert
        let miss = eval(binary(BinaryOp::In, AstNode::constant(json!(2.5)), range));
        assert_eq!(miss.as_json(), &json!(false));
    }

    #[test]
    fn test_quantifiers_on_empty_array() {
        for (quantifier, expected) in [
            (Quantifier::All, true),
            (Quantifier::None, true),
            (Quantifier::Any, false),
        ] {
            let node = AstNode::ArrayComparison {
                op: BinaryOp::Eq,
                quantifier,
                lhs: Box::new(AstNode::ArrayLiteral {
                    members: vec![],
                    sorted: false,
                }),
                rhs: Box::new(AstNode::constant(json!(1))),
            };
            assert_eq!(
                eval(node).as_json(),
                &json!(expected),
                "{:?} over empty array",
                quantifier
            );
        }
    }

    #[test]
    fn test_quantifier_short_circuit_semantics() {
        let lhs = AstNode::ArrayLiteral {
            members: vec![
                AstNode::constant(json!(1)),
                AstNode::constant(json!(1)),
                AstNode::constant(json!(2)),
            ],
            sorted: false,
        };
        let all = AstNode::ArrayComparison {
            op: BinaryOp::Eq,
            quantifier: Quantifier::All,
            lhs: Box::new(lhs.clone()),
            rhs: Box::new(AstNode::constant(json!(1))),
        };
        assert_eq!(eval(all).as_json(), &json!(false));
        let any = AstNode::ArrayComparison {
            op: BinaryOp::Eq,
            quantifier: Quantifier::Any,
            lhs: Box::new(lhs.clone()),
            rhs: Box::new(AstNode::constant(json!(2))),
        };
        assert_eq!(eval(any).as_json(), &json!(true));
        let none = AstNode::ArrayComparison {
            op: BinaryOp::Eq,
            quantifier: Quantifier::None,
            lhs: Box::new(lhs),
            rhs: Box::new(AstNode::constant(json!(3))),
        };
        assert_eq!(eval(none).as_json(), &json!(true));
    }

    #[test]
    fn test_nary_logical_returns_operand_values() {
        let and = AstNode::NaryOp {
            op: LogicalOp::And,
            operands: vec![
                AstNode::constant(json!(1)),
                AstNode::constant(json!(0)),
                AstNode::constant(json!("never")),
            ],
        };
        assert_eq!(eval(and).as_json(), &json!(0));
        let or = AstNode::NaryOp {
            op: LogicalOp::Or,
            operands: vec![AstNode::constant(json!(null)), AstNode::constant(json!("x"))],
        };
        assert_eq!(eval(or).as_json(), &json!("x"));
    }

    #[test]
    fn test_expansion_filter_projection_limit() {
        let node = AstNode::Expansion {
            variable: 7,
            array: Box::new(AstNode::constant(json!([1, 2, 3, 4, 5, 6]))),
            filter: Some(Box::new(binary(
                BinaryOp::Gt,
                AstNode::reference(7),
                AstNode::constant(json!(1)),
            ))),
            projection: Some(Box::new(binary(
                BinaryOp::Times,
                AstNode::reference(7),
                AstNode::constant(json!(10)),
            ))),
            limit: Some((1, 2)),
        };
        assert_eq!(eval(node).as_json(), &json!([30.0, 40.0]));
    }

    #[test]
    fn test_indexed_access_negative_index() {
        let node = AstNode::IndexedAccess {
            object: Box::new(AstNode::constant(json!(["a", "b", "c"]))),
            index: Box::new(AstNode::constant(json!(-1))),
        };
        assert_eq!(eval(node).as_json(), &json!("c"));
    }

    #[test]
    fn test_comparison_uses_value_order() {
        // numbers sort before strings in the value order
        let lt = eval(binary(
            BinaryOp::Lt,
            AstNode::constant(json!(999)),
            AstNode::constant(json!("abc")),
        ));
        assert_eq!(lt.as_json(), &json!(true));
    }
}
