//! Operator contract.

use serde_json::Value;

/// A named pure function comparing a fact value to an expected value.
///
/// Operators must have no side effects; the engine may call them any number
/// of times in any order across worker threads.
pub trait OperatorProvider: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, fact_value: &Value, expected: &Value) -> bool;
}

/// Closure-backed operator, used by builtin plugins and tests.
pub struct FnOperator {
    name: String,
    function: Box<dyn Fn(&Value, &Value) -> bool + Send + Sync>,
}

impl FnOperator {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            function: Box::new(function),
        }
    }
}

impl OperatorProvider for FnOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, fact_value: &Value, expected: &Value) -> bool {
        (self.function)(fact_value, expected)
    }
}
