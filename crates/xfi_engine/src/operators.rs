//! Builtin comparison operators.
//!
//! Plugins may shadow any of these by registering an operator under the
//! same name; the engine attaches operators last-write-wins.

use std::sync::Arc;

use serde_json::Value;

use xfi_plugin::{FnOperator, OperatorProvider};

fn numeric(a: &Value, b: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn contains(fact_value: &Value, expected: &Value) -> bool {
    match fact_value {
        Value::Array(items) => items.contains(expected),
        Value::String(haystack) => expected
            .as_str()
            .is_some_and(|needle| haystack.contains(needle)),
        _ => false,
    }
}

fn is_in(fact_value: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(items) => items.contains(fact_value),
        _ => false,
    }
}

/// The default operator set attached to every engine.
pub fn builtin_operators() -> Vec<Arc<dyn OperatorProvider>> {
    vec![
        Arc::new(FnOperator::new("equal", |a, b| a == b)),
        Arc::new(FnOperator::new("notEqual", |a, b| a != b)),
        Arc::new(FnOperator::new("lessThan", |a, b| numeric(a, b, |a, b| a < b))),
        Arc::new(FnOperator::new("lessThanInclusive", |a, b| {
            numeric(a, b, |a, b| a <= b)
        })),
        Arc::new(FnOperator::new("greaterThan", |a, b| {
            numeric(a, b, |a, b| a > b)
        })),
        Arc::new(FnOperator::new("greaterThanInclusive", |a, b| {
            numeric(a, b, |a, b| a >= b)
        })),
        Arc::new(FnOperator::new("in", is_in)),
        Arc::new(FnOperator::new("notIn", |a, b| !is_in(a, b))),
        Arc::new(FnOperator::new("contains", contains)),
        Arc::new(FnOperator::new("doesNotContain", |a, b| !contains(a, b))),
    ]
}
