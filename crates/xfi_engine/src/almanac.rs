//! Per-file fact runtime.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error};

use xfi_plugin::{FactError, FactProvider, FactScope, FactValueSource};

use crate::metrics::FactMetricsStore;

/// Canonical, order-independent rendering of fact params.
///
/// Object keys are sorted recursively, so two structurally equal values
/// always canonicalize identically. Total over all of JSON.
pub fn canonical_params(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[key.as_str()], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Run-scoped memoization for `global-function` facts, shared across every
/// file's almanac. Keyed by `(fact, canonical(params))`.
#[derive(Default)]
pub struct GlobalFactCache {
    inner: Mutex<HashMap<String, Value>>,
}

impl GlobalFactCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    fn insert(&self, key: String, value: Value) {
        self.inner.lock().insert(key, value);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Per-file evaluation context.
///
/// Resolution order: runtime facts, static facts, then provider dispatch
/// with memoization. Unknown facts resolve to null rather than erroring.
/// A fact execution failure is logged and yields null; only a dependency
/// cycle propagates, where it becomes a rule-level engine error.
pub struct FileAlmanac<'a> {
    facts: &'a HashMap<String, Arc<dyn FactProvider>>,
    static_facts: &'a HashMap<String, Value>,
    global_cache: &'a GlobalFactCache,
    metrics: &'a FactMetricsStore,
    runtime: RefCell<HashMap<String, Value>>,
    memo: RefCell<HashMap<String, Value>>,
    in_flight: RefCell<Vec<String>>,
}

impl<'a> FileAlmanac<'a> {
    pub fn new(
        facts: &'a HashMap<String, Arc<dyn FactProvider>>,
        static_facts: &'a HashMap<String, Value>,
        global_cache: &'a GlobalFactCache,
        metrics: &'a FactMetricsStore,
    ) -> Self {
        Self {
            facts,
            static_facts,
            global_cache,
            metrics,
            runtime: RefCell::new(HashMap::new()),
            memo: RefCell::new(HashMap::new()),
            in_flight: RefCell::new(Vec::new()),
        }
    }

    fn resolve(&self, name: &str, params: Option<&Value>) -> Result<Value, FactError> {
        if let Some(value) = self.runtime.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.static_facts.get(name) {
            return Ok(value.clone());
        }

        let Some(provider) = self.facts.get(name) else {
            debug!("Undefined fact '{}', resolving to null", name);
            return Ok(Value::Null);
        };

        let params_value = params.cloned().unwrap_or(Value::Null);
        let key = format!("{name}({})", canonical_params(&params_value));

        if self.in_flight.borrow().iter().any(|entry| entry == &key) {
            let chain = self.in_flight.borrow().join(" -> ");
            return Err(FactError::CycleDetected {
                chain: format!("{chain} -> {key}"),
            });
        }

        match provider.scope() {
            // Global facts are normally precomputed into the static set;
            // reaching here means lazy fallback, memoized for the run.
            FactScope::Global | FactScope::GlobalFunction => {
                if let Some(value) = self.global_cache.get(&key) {
                    return Ok(value);
                }
                let value = self.execute(name, provider, &params_value, &key)?;
                self.global_cache.insert(key, value.clone());
                Ok(value)
            }
            FactScope::IterativeFunction => {
                if let Some(value) = self.memo.borrow().get(&key) {
                    return Ok(value.clone());
                }
                let value = self.execute(name, provider, &params_value, &key)?;
                self.memo.borrow_mut().insert(key, value.clone());
                Ok(value)
            }
        }
    }

    fn execute(
        &self,
        name: &str,
        provider: &Arc<dyn FactProvider>,
        params: &Value,
        key: &str,
    ) -> Result<Value, FactError> {
        self.in_flight.borrow_mut().push(key.to_string());
        let start = Instant::now();
        let result = provider.evaluate(params, self);
        self.metrics.record(name, start.elapsed());
        self.in_flight.borrow_mut().pop();

        match result {
            Ok(value) => Ok(value),
            Err(cycle @ FactError::CycleDetected { .. }) => Err(cycle),
            Err(e) => {
                error!("Fact '{}' failed: {}, resolving to null", name, e);
                Ok(Value::Null)
            }
        }
    }
}

/// Accepts both JSON pointers (`/v`) and the dotted form rules commonly
/// author (`$.v`, `$.a.b`).
fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    let trimmed = path.trim_start_matches('$').trim_start_matches('.');
    format!("/{}", trimmed.replace('.', "/"))
}

impl FactValueSource for FileAlmanac<'_> {
    fn fact_value(
        &self,
        name: &str,
        params: Option<&Value>,
        path: Option<&str>,
    ) -> Result<Value, FactError> {
        let value = self.resolve(name, params)?;
        match path {
            Some(path) => Ok(value
                .pointer(&normalize_path(path))
                .cloned()
                .unwrap_or(Value::Null)),
            None => Ok(value),
        }
    }

    fn add_runtime_fact(&self, name: &str, value: Value) {
        self.runtime.borrow_mut().insert(name.to_string(), value);
    }
}
