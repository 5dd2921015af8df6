//! Fact contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while resolving a fact value.
#[derive(Debug, Clone, Error)]
pub enum FactError {
    /// The fact function itself failed. The engine converts this into a
    /// null fact value and continues the run.
    #[error("Fact '{fact}' failed: {message}")]
    ExecutionFailed { fact: String, message: String },

    /// Two facts requested each other, directly or transitively.
    #[error("Fact dependency cycle: {chain}")]
    CycleDetected { chain: String },
}

impl FactError {
    pub fn execution(fact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            fact: fact.into(),
            message: message.into(),
        }
    }
}

/// How often a fact is evaluated and how its results are shared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactScope {
    /// Evaluated exactly once per run, before any file; the result is
    /// attached as static data.
    Global,
    /// Registered once, invoked lazily with varying params; memoization is
    /// scoped to the run, keyed by canonical params.
    GlobalFunction,
    /// Invoked per file; memoization is scoped to the file's almanac.
    #[default]
    IterativeFunction,
}

/// The view of the evaluation context a fact sees while executing.
///
/// Implemented by the engine's per-file almanac. A fact may request other
/// facts through it; `path` is a JSON pointer applied to the resolved value
/// before it is returned.
pub trait FactValueSource {
    fn fact_value(
        &self,
        name: &str,
        params: Option<&Value>,
        path: Option<&str>,
    ) -> Result<Value, FactError>;

    /// Publishes an ad-hoc value under a fact name for the remainder of
    /// this almanac's lifetime.
    fn add_runtime_fact(&self, name: &str, value: Value);
}

/// A named, possibly memoized function from `(params, almanac)` to a JSON
/// value, produced by a plugin.
pub trait FactProvider: Send + Sync {
    fn name(&self) -> &str;

    fn scope(&self) -> FactScope {
        FactScope::IterativeFunction
    }

    /// Scheduling priority; higher runs first when a rule needs several
    /// facts. Never affects outcomes.
    fn priority(&self) -> i64 {
        1
    }

    fn evaluate(&self, params: &Value, almanac: &dyn FactValueSource)
    -> Result<Value, FactError>;
}

/// Closure-backed fact, used by builtin plugins and tests.
pub struct FnFact {
    name: String,
    scope: FactScope,
    priority: i64,
    #[allow(clippy::type_complexity)]
    function: Box<dyn Fn(&Value, &dyn FactValueSource) -> Result<Value, FactError> + Send + Sync>,
}

impl FnFact {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Value, &dyn FactValueSource) -> Result<Value, FactError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            scope: FactScope::default(),
            priority: 1,
            function: Box::new(function),
        }
    }

    pub fn with_scope(mut self, scope: FactScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

impl FactProvider for FnFact {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> FactScope {
        self.scope
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn evaluate(
        &self,
        params: &Value,
        almanac: &dyn FactValueSource,
    ) -> Result<Value, FactError> {
        (self.function)(params, almanac)
    }
}
