//! Runtime values of the query pipeline.
//!
//! An [`AqlValue`] is an immutable, cheaply clonable handle to a JSON value
//! (or empty, for an unwritten register). The total order over values is
//! null < bool < number < string < array < object; equality is structural;
//! ordering of strings follows UTF-8 code points.

use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

// ============================================================================
// VALUE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AqlValue(Option<Arc<Value>>);

impl AqlValue {
    /// The empty value of an unwritten register.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn from_json(value: Value) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn null() -> Self {
        Self::from_json(Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the JSON value; empty registers read as null.
    pub fn as_json(&self) -> &Value {
        self.0.as_deref().unwrap_or(&Value::Null)
    }

    /// Materialize an owned JSON value.
    pub fn to_json(&self) -> Value {
        self.as_json().clone()
    }

    /// Truthiness: null, false, 0, "" and empty registers are false;
    /// everything else (including empty arrays and objects) is true.
    pub fn is_truthy(&self) -> bool {
        match self.as_json() {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Shares the same underlying allocation as `other`.
    pub fn ptr_eq(&self, other: &AqlValue) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl PartialEq for AqlValue {
    fn eq(&self, other: &Self) -> bool {
        compare_values(self.as_json(), other.as_json()) == Ordering::Equal
    }
}

impl Eq for AqlValue {}

impl PartialOrd for AqlValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AqlValue {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(self.as_json(), other.as_json())
    }
}

// ============================================================================
// ORDERING
// ============================================================================

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values following the AQL value order.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        // structural comparison without normalization; ordering follows
        // UTF-8 code points
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let c = compare_values(ex, ey);
                if c != Ordering::Equal {
                    return c;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut keys_x: Vec<&String> = x.keys().collect();
            let mut keys_y: Vec<&String> = y.keys().collect();
            keys_x.sort();
            keys_y.sort();
            for (kx, ky) in keys_x.iter().zip(keys_y.iter()) {
                let c = kx.cmp(ky);
                if c != Ordering::Equal {
                    return c;
                }
                let c = compare_values(&x[*kx], &y[*ky]);
                if c != Ordering::Equal {
                    return c;
                }
            }
            keys_x.len().cmp(&keys_y.len())
        }
        _ => Ordering::Equal,
    }
}

// ============================================================================
// OWNERSHIP GUARD
// ============================================================================

/// Guarded ownership of a value on its way into an output row. The guard is
/// consumed by exactly one `steal`; moving a value without a guard is not
/// offered by the API.
#[derive(Debug)]
pub struct AqlValueGuard {
    value: Option<AqlValue>,
}

impl AqlValueGuard {
    pub fn new(value: AqlValue) -> Self {
        Self { value: Some(value) }
    }

    pub fn value(&self) -> &AqlValue {
        self.value.as_ref().unwrap_or(&EMPTY)
    }

    /// Take ownership; the guard becomes inert.
    pub fn steal(&mut self) -> AqlValue {
        self.value.take().unwrap_or_default()
    }

    pub fn is_stolen(&self) -> bool {
        self.value.is_none()
    }
}

static EMPTY: AqlValue = AqlValue(None);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_type_order() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-7),
            json!(0),
            json!(1.5),
            json!(""),
            json!("a"),
            json!("b"),
            json!([]),
            json!([1]),
            json!({}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                compare_values(&pair[0], &pair[1]),
                Ordering::Less,
                "{} must sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_array_comparison_elementwise_then_length() {
        assert_eq!(compare_values(&json!([1, 2]), &json!([1, 3])), Ordering::Less);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1, 2, 0])), Ordering::Less);
        assert_eq!(compare_values(&json!([2]), &json!([1, 9])), Ordering::Greater);
    }

    #[test]
    fn test_object_comparison_sorted_keys() {
        assert_eq!(
            compare_values(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})),
            Ordering::Equal
        );
        assert_eq!(compare_values(&json!({"a": 1}), &json!({"a": 2})), Ordering::Less);
        assert_eq!(compare_values(&json!({"a": 1}), &json!({"b": 0})), Ordering::Less);
    }

    #[test]
    fn test_truthiness() {
        assert!(!AqlValue::none().is_truthy());
        assert!(!AqlValue::from_json(json!(null)).is_truthy());
        assert!(!AqlValue::from_json(json!(0)).is_truthy());
        assert!(!AqlValue::from_json(json!("")).is_truthy());
        assert!(AqlValue::from_json(json!([])).is_truthy());
        assert!(AqlValue::from_json(json!({})).is_truthy());
        assert!(AqlValue::from_json(json!("x")).is_truthy());
    }

    #[test]
    fn test_guard_single_steal() {
        let mut guard = AqlValueGuard::new(AqlValue::from_json(json!(7)));
        assert!(!guard.is_stolen());
        let value = guard.steal();
        assert_eq!(value.as_json(), &json!(7));
        assert!(guard.is_stolen());
        assert!(guard.steal().is_empty(), "a second steal yields nothing");
    }

    #[test]
    fn test_ptr_eq_shares_allocation() {
        let a = AqlValue::from_json(json!([1, 2, 3]));
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        let c = AqlValue::from_json(json!([1, 2, 3]));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a, c, "structurally equal nevertheless");
    }

    fn scalar(pick: u8, n: i64, s: String) -> Value {
        match pick % 4 {
            0 => Value::Null,
            1 => json!(n % 2 == 0),
            2 => json!(n),
            _ => json!(s),
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_compare_is_antisymmetric(
            pa in any::<u8>(), na in any::<i64>(), sa in ".{0,8}",
            pb in any::<u8>(), nb in any::<i64>(), sb in ".{0,8}",
        ) {
            let a = scalar(pa, na, sa);
            let b = scalar(pb, nb, sb);
            prop_assert_eq!(compare_values(&a, &b), compare_values(&b, &a).reverse());
        }

        #[test]
        fn prop_compare_is_transitive_on_numbers(
            a in -1e9f64..1e9, b in -1e9f64..1e9, c in -1e9f64..1e9,
        ) {
            let mut values = [json!(a), json!(b), json!(c)];
            values.sort_by(|x, y| compare_values(x, y));
            prop_assert!(compare_values(&values[0], &values[2]) != Ordering::Greater);
        }
    }
}
