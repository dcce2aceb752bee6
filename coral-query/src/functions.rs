//! Built-in function registry for FCALL nodes.

use crate::expression::ExpressionContext;
use crate::value::{compare_values, AqlValue};
use coral_core::{CoralError, CoralResult, ErrorCode};
use serde_json::{json, Value};

pub type BuiltinFunction =
    fn(&[AqlValue], &dyn ExpressionContext) -> CoralResult<AqlValue>;

/// Resolve a function by its (case-insensitive) name.
pub fn lookup(name: &str) -> CoralResult<BuiltinFunction> {
    let function: BuiltinFunction = match name.to_uppercase().as_str() {
        "LENGTH" | "COUNT" => length,
        "CONCAT" => concat,
        "UPPER" => upper,
        "LOWER" => lower,
        "ABS" => abs,
        "FLOOR" => floor,
        "CEIL" => ceil,
        "MIN" => min,
        "MAX" => max,
        "SUM" => sum,
        "AVERAGE" | "AVG" => average,
        "CONTAINS" => contains,
        "NOT_NULL" => not_null,
        "FIRST" => first,
        "LAST" => last,
        "UNION" => union,
        _ => {
            return Err(CoralError::new(
                ErrorCode::QueryFunctionNameUnknown,
                format!("usage of unknown function '{}'", name),
            ))
        }
    };
    Ok(function)
}

fn arg<'a>(args: &'a [AqlValue], index: usize) -> &'a Value {
    args.get(index).map(AqlValue::as_json).unwrap_or(&Value::Null)
}

fn number(value: f64) -> AqlValue {
    if value.is_finite() {
        AqlValue::from_json(json!(value))
    } else {
        AqlValue::null()
    }
}

fn length(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    let out = match arg(args, 0) {
        Value::Null => 0,
        Value::Bool(b) => *b as u64,
        Value::Number(_) => 1,
        Value::String(s) => s.chars().count() as u64,
        Value::Array(a) => a.len() as u64,
        Value::Object(o) => o.len() as u64,
    };
    Ok(AqlValue::from_json(json!(out)))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn concat(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    let mut out = String::new();
    for value in args {
        match value.as_json() {
            Value::Array(members) => {
                for member in members {
                    out.push_str(&stringify(member));
                }
            }
            other => out.push_str(&stringify(other)),
        }
    }
    Ok(AqlValue::from_json(Value::String(out)))
}

fn upper(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    Ok(AqlValue::from_json(json!(stringify(arg(args, 0)).to_uppercase())))
}

fn lower(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    Ok(AqlValue::from_json(json!(stringify(arg(args, 0)).to_lowercase())))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn abs(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    Ok(numeric(arg(args, 0)).map(|n| number(n.abs())).unwrap_or_else(AqlValue::null))
}

fn floor(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    Ok(numeric(arg(args, 0)).map(|n| number(n.floor())).unwrap_or_else(AqlValue::null))
}

fn ceil(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    Ok(numeric(arg(args, 0)).map(|n| number(n.ceil())).unwrap_or_else(AqlValue::null))
}

fn fold_array(
    args: &[AqlValue],
    pick: impl Fn(&Value, &Value) -> bool,
) -> AqlValue {
    let Value::Array(members) = arg(args, 0) else {
        return AqlValue::null();
    };
    let mut best: Option<&Value> = None;
    for member in members {
        if member.is_null() {
            continue;
        }
        match best {
            None => best = Some(member),
            Some(current) if pick(member, current) => best = Some(member),
            _ => {}
        }
    }
    best.map(|v| AqlValue::from_json(v.clone())).unwrap_or_else(AqlValue::null)
}

fn min(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    Ok(fold_array(args, |candidate, best| {
        compare_values(candidate, best) == std::cmp::Ordering::Less
    }))
}

fn max(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    Ok(fold_array(args, |candidate, best| {
        compare_values(candidate, best) == std::cmp::Ordering::Greater
    }))
}

fn sum(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    let Value::Array(members) = arg(args, 0) else {
        return Ok(AqlValue::null());
    };
    let mut total = 0.0;
    for member in members {
        match numeric(member) {
            Some(n) => total += n,
            None if member.is_null() => {}
            None => return Ok(AqlValue::null()),
        }
    }
    Ok(number(total))
}

fn average(args: &[AqlValue], ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    let Value::Array(members) = arg(args, 0) else {
        return Ok(AqlValue::null());
    };
    let count = members.iter().filter(|m| !m.is_null()).count();
    if count == 0 {
        return Ok(AqlValue::null());
    }
    match sum(args, ctx)?.as_json() {
        Value::Number(n) => Ok(number(n.as_f64().unwrap_or(0.0) / count as f64)),
        _ => Ok(AqlValue::null()),
    }
}

fn contains(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    let haystack = stringify(arg(args, 0));
    let needle = stringify(arg(args, 1));
    Ok(AqlValue::from_json(json!(haystack.contains(&needle))))
}

fn not_null(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    for value in args {
        if !value.as_json().is_null() && !value.is_empty() {
            return Ok(value.clone());
        }
    }
    Ok(AqlValue::null())
}

fn first(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    match arg(args, 0) {
        Value::Array(members) => Ok(members
            .first()
            .map(|v| AqlValue::from_json(v.clone()))
            .unwrap_or_else(AqlValue::null)),
        _ => Ok(AqlValue::null()),
    }
}

fn last(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    match arg(args, 0) {
        Value::Array(members) => Ok(members
            .last()
            .map(|v| AqlValue::from_json(v.clone()))
            .unwrap_or_else(AqlValue::null)),
        _ => Ok(AqlValue::null()),
    }
}

fn union(args: &[AqlValue], _ctx: &dyn ExpressionContext) -> CoralResult<AqlValue> {
    let mut out = Vec::new();
    for value in args {
        if let Value::Array(members) = value.as_json() {
            out.extend(members.iter().cloned());
        }
    }
    Ok(AqlValue::from_json(Value::Array(out)))
}
