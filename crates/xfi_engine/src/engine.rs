//! Engine setup and per-file rule evaluation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use xfi_plugin::{FactError, FactProvider, FactScope, FactValueSource, OperatorProvider};
use xfi_types::{Condition, ConditionTree, Exemption, FileData, Rule, RuleError, Severity};

use crate::almanac::{FileAlmanac, GlobalFactCache};
use crate::exemptions::is_exempt;
use crate::metrics::FactMetricsStore;
use crate::operators::builtin_operators;

/// One rule firing (or failing to evaluate) for one file.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    /// Name of the rule that produced this outcome, whether it matched or
    /// errored. Telemetry uses it to look up the stored condition tree.
    pub rule_name: String,
    pub error: RuleError,
}

struct CompiledRule {
    rule: Rule,
    /// True when any leaf references a repo-scoped fact; such rules run
    /// only against the `REPO_GLOBAL_CHECK` pseudo-file.
    global: bool,
}

/// Builds an `Engine` from registry views and resolved configuration.
pub struct EngineBuilder {
    repo_url: String,
    operators: HashMap<String, Arc<dyn OperatorProvider>>,
    facts: HashMap<String, Arc<dyn FactProvider>>,
    static_facts: HashMap<String, Value>,
    rules: Vec<Rule>,
    exemptions: Vec<Exemption>,
    metrics: Arc<FactMetricsStore>,
}

impl EngineBuilder {
    /// Starts a builder with the builtin operator set preloaded.
    pub fn new(repo_url: impl Into<String>) -> Self {
        let mut operators = HashMap::new();
        for operator in builtin_operators() {
            operators.insert(operator.name().to_string(), operator);
        }
        Self {
            repo_url: repo_url.into(),
            operators,
            facts: HashMap::new(),
            static_facts: HashMap::new(),
            rules: Vec::new(),
            exemptions: Vec::new(),
            metrics: Arc::new(FactMetricsStore::new()),
        }
    }

    /// Shares an externally owned metrics store with the engine.
    pub fn with_metrics(mut self, metrics: Arc<FactMetricsStore>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attaches an operator by name. Last write wins.
    pub fn add_operator(&mut self, operator: Arc<dyn OperatorProvider>) {
        let name = operator.name().to_string();
        if self.operators.insert(name.clone(), operator).is_some() {
            warn!("Operator '{}' replaced by a later registration", name);
        }
    }

    pub fn add_operators(&mut self, operators: impl IntoIterator<Item = Arc<dyn OperatorProvider>>) {
        for operator in operators {
            self.add_operator(operator);
        }
    }

    /// Attaches a fact by name. Last write wins.
    pub fn add_fact(&mut self, fact: Arc<dyn FactProvider>) {
        let name = fact.name().to_string();
        if self.facts.insert(name.clone(), fact).is_some() {
            warn!("Fact '{}' replaced by a later registration", name);
        }
    }

    pub fn add_facts(&mut self, facts: impl IntoIterator<Item = Arc<dyn FactProvider>>) {
        for fact in facts {
            self.add_fact(fact);
        }
    }

    /// Attaches a precomputed value resolvable as a fact.
    pub fn add_static_fact(&mut self, name: impl Into<String>, value: Value) {
        self.static_facts.insert(name.into(), value);
    }

    /// Attaches a rule. Duplicate names keep the first attachment.
    pub fn add_rule(&mut self, rule: Rule) {
        if self.rules.iter().any(|existing| existing.name == rule.name) {
            warn!("Rule '{}' already attached, skipping duplicate", rule.name);
            return;
        }
        self.rules.push(rule);
    }

    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = Rule>) {
        for rule in rules {
            self.add_rule(rule);
        }
    }

    pub fn set_exemptions(&mut self, exemptions: Vec<Exemption>) {
        self.exemptions = exemptions;
    }

    /// Precomputes `global` facts, applies exemption rewriting, classifies
    /// rules, and freezes everything into an `Engine`.
    pub fn build(mut self) -> Engine {
        let global_cache = GlobalFactCache::new();

        // Global facts run exactly once, before any file. A failing global
        // fact is attached as an empty result set so dependent rules still
        // evaluate.
        let global_names: Vec<String> = self
            .facts
            .values()
            .filter(|fact| fact.scope() == FactScope::Global)
            .map(|fact| fact.name().to_string())
            .collect();
        for name in global_names {
            let provider = Arc::clone(&self.facts[&name]);
            let almanac = FileAlmanac::new(
                &self.facts,
                &self.static_facts,
                &global_cache,
                &self.metrics,
            );
            let start = Instant::now();
            let result = provider.evaluate(&Value::Null, &almanac);
            self.metrics.record(&name, start.elapsed());

            let value = match result {
                Ok(value) => value,
                Err(e) => {
                    error!("Global fact '{}' failed: {}", name, e);
                    serde_json::json!({ "result": [] })
                }
            };
            debug!("Precomputed global fact '{}'", name);
            self.static_facts.insert(name, value);
        }

        let mut compiled = Vec::with_capacity(self.rules.len());
        let mut rule_conditions = HashMap::with_capacity(self.rules.len());
        for mut rule in self.rules {
            if is_exempt(&self.exemptions, &self.repo_url, &rule.name) {
                info!(
                    "Rule '{}' is exempt for '{}', rewriting event type",
                    rule.name, self.repo_url
                );
                rule.event.event_type = Severity::Exempt;
            }

            // The side table keeps each rule's conditions addressable by
            // name after attachment; the evaluator and telemetry both read
            // from here, never from engine internals.
            rule_conditions.insert(rule.name.clone(), rule.conditions.clone());

            let global = rule.conditions.leaves().iter().any(|leaf| {
                self.facts
                    .get(&leaf.fact)
                    .is_some_and(|fact| fact.scope() != FactScope::IterativeFunction)
            });
            compiled.push(CompiledRule { rule, global });
        }

        Engine {
            operators: self.operators,
            facts: self.facts,
            static_facts: self.static_facts,
            rules: compiled,
            rule_conditions,
            global_cache,
            metrics: self.metrics,
        }
    }
}

/// The configured rule engine for one run. Immutable and `Sync`; each
/// worker thread evaluates files against a shared reference.
pub struct Engine {
    operators: HashMap<String, Arc<dyn OperatorProvider>>,
    facts: HashMap<String, Arc<dyn FactProvider>>,
    static_facts: HashMap<String, Value>,
    rules: Vec<CompiledRule>,
    rule_conditions: HashMap<String, ConditionTree>,
    global_cache: GlobalFactCache,
    metrics: Arc<FactMetricsStore>,
}

impl Engine {
    pub fn metrics(&self) -> &Arc<FactMetricsStore> {
        &self.metrics
    }

    /// The condition tree a rule was attached with.
    pub fn conditions_for(&self, rule_name: &str) -> Option<&ConditionTree> {
        self.rule_conditions.get(rule_name)
    }

    /// Attached rule names, in attachment order.
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|c| c.rule.name.as_str()).collect()
    }

    /// A precomputed static fact value, if attached.
    pub fn static_fact(&self, name: &str) -> Option<&Value> {
        self.static_facts.get(name)
    }

    /// Evaluates every applicable rule against one file, in attachment
    /// order. A rule evaluation failure is isolated into a synthetic
    /// `engine-error` finding and evaluation continues.
    pub fn evaluate_file(&self, file: &FileData) -> Vec<RuleOutcome> {
        let almanac = FileAlmanac::new(
            &self.facts,
            &self.static_facts,
            &self.global_cache,
            &self.metrics,
        );
        almanac.add_runtime_fact(
            "fileData",
            serde_json::to_value(file).unwrap_or(Value::Null),
        );

        let global_pass = file.is_repo_global_check();
        let mut outcomes = Vec::new();

        for compiled in &self.rules {
            if compiled.global != global_pass {
                continue;
            }

            match self.evaluate_rule(&compiled.rule, &almanac) {
                Ok(true) => {
                    let details = self.substitute_event_params(&compiled.rule, &almanac);
                    debug!(
                        "Rule '{}' matched {} at level {}",
                        compiled.rule.name, file.file_path, compiled.rule.event.event_type
                    );
                    outcomes.push(RuleOutcome {
                        rule_name: compiled.rule.name.clone(),
                        error: RuleError {
                            rule_failure: compiled.rule.name.clone(),
                            level: compiled.rule.event.event_type,
                            details,
                        },
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "Rule '{}' failed on {}: {}",
                        compiled.rule.name, file.file_path, e
                    );
                    let mut details = serde_json::Map::new();
                    details.insert("message".to_string(), Value::String(e.to_string()));
                    details.insert(
                        "rule".to_string(),
                        Value::String(compiled.rule.name.clone()),
                    );
                    outcomes.push(RuleOutcome {
                        rule_name: compiled.rule.name.clone(),
                        error: RuleError {
                            rule_failure: "engine-error".to_string(),
                            level: Severity::Error,
                            details,
                        },
                    });
                }
            }
        }

        outcomes
    }

    fn evaluate_rule(&self, rule: &Rule, almanac: &FileAlmanac<'_>) -> Result<bool, FactError> {
        self.prefetch_prioritized_facts(rule, almanac)?;
        self.evaluate_tree(&rule.conditions, almanac)
    }

    /// Warms the memo for leaves with an explicit or fact-declared priority
    /// above the default, highest first. Scheduling only; outcomes are
    /// unaffected because every leaf re-resolves through the memo.
    fn prefetch_prioritized_facts(
        &self,
        rule: &Rule,
        almanac: &FileAlmanac<'_>,
    ) -> Result<(), FactError> {
        let mut prioritized: Vec<(i64, &Condition)> = rule
            .conditions
            .leaves()
            .into_iter()
            .filter_map(|leaf| {
                let effective = leaf.priority.unwrap_or_else(|| {
                    self.facts
                        .get(&leaf.fact)
                        .map(|fact| fact.priority())
                        .unwrap_or(1)
                });
                (effective > 1).then_some((effective, leaf))
            })
            .collect();
        if prioritized.is_empty() {
            return Ok(());
        }

        prioritized.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
        for (_, leaf) in prioritized {
            almanac.fact_value(&leaf.fact, leaf.params.as_ref(), None)?;
        }
        Ok(())
    }

    fn evaluate_tree(
        &self,
        tree: &ConditionTree,
        almanac: &FileAlmanac<'_>,
    ) -> Result<bool, FactError> {
        match tree {
            ConditionTree::All { all } => {
                for child in all {
                    if !self.evaluate_tree(child, almanac)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConditionTree::Any { any } => {
                for child in any {
                    if self.evaluate_tree(child, almanac)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ConditionTree::Leaf(condition) => self.evaluate_leaf(condition, almanac),
        }
    }

    fn evaluate_leaf(
        &self,
        condition: &Condition,
        almanac: &FileAlmanac<'_>,
    ) -> Result<bool, FactError> {
        let fact_value = almanac.fact_value(
            &condition.fact,
            condition.params.as_ref(),
            condition.path.as_deref(),
        )?;

        let Some(operator) = self.operators.get(&condition.operator) else {
            warn!(
                "Unknown operator '{}', condition evaluates to false",
                condition.operator
            );
            return Ok(false);
        };

        Ok(operator.apply(&fact_value, &condition.value))
    }

    /// Replaces `$factName` string placeholders in event params with the
    /// fact's current value from this file's almanac.
    fn substitute_event_params(
        &self,
        rule: &Rule,
        almanac: &FileAlmanac<'_>,
    ) -> serde_json::Map<String, Value> {
        rule.event
            .params
            .iter()
            .map(|(key, value)| {
                let substituted = match value.as_str() {
                    Some(placeholder) if placeholder.len() > 1 && placeholder.starts_with('$') => {
                        almanac
                            .fact_value(&placeholder[1..], None, None)
                            .unwrap_or(Value::Null)
                    }
                    _ => value.clone(),
                };
                (key.clone(), substituted)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use xfi_plugin::{FnFact, FnOperator};

    fn rule_from_json(value: Value) -> Rule {
        serde_json::from_value(value).unwrap()
    }

    fn warning_rule(name: &str, conditions: Value) -> Rule {
        rule_from_json(json!({
            "name": name,
            "conditions": conditions,
            "event": { "type": "warning", "params": { "message": "matched" } }
        }))
    }

    fn file(path: &str, content: &str) -> FileData {
        FileData::new(path.rsplit('/').next().unwrap_or(path), path, content)
    }

    fn content_fact() -> Arc<dyn FactProvider> {
        Arc::new(FnFact::new("fileContent", |_, almanac| {
            almanac.fact_value("fileData", None, Some("/fileContent"))
        }))
    }

    #[test]
    fn test_operator_dispatch_with_path() {
        let mut builder = EngineBuilder::new("git@x:owner/repo");
        builder.add_fact(Arc::new(FnFact::new("x", |_, _| Ok(json!({ "v": 7 })))));
        builder.add_rule(warning_rule(
            "gt",
            json!({ "all": [
                { "fact": "x", "operator": "greaterThan", "value": 5, "path": "$.v" }
            ]}),
        ));
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", ""));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].error.level, Severity::Warning);
    }

    #[test]
    fn test_exempt_rewrite() {
        let repo = "git@x:owner/repo";
        let mut builder = EngineBuilder::new(repo);
        builder.add_rule(warning_rule("R1", json!({ "all": [] })));
        builder.set_exemptions(vec![Exemption {
            repo_url: repo.to_string(),
            rule_name: "R1".to_string(),
            pattern: None,
            expiration_date: None,
            reason: None,
        }]);
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", ""));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].error.level, Severity::Exempt);
    }

    #[test]
    fn test_fact_memoized_across_leaves() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_inner = Arc::clone(&counter);

        let mut builder = EngineBuilder::new("repo");
        builder.add_fact(Arc::new(FnFact::new("count", move |_, _| {
            counter_inner.fetch_add(1, Ordering::SeqCst);
            Ok(json!(1))
        })));
        builder.add_rule(warning_rule(
            "double-read",
            json!({ "all": [
                { "fact": "count", "operator": "equal", "value": 1 },
                { "fact": "count", "operator": "lessThanInclusive", "value": 1 }
            ]}),
        ));
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", ""));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_fact_precompute_failure_attaches_empty_result() {
        let mut builder = EngineBuilder::new("repo");
        builder.add_fact(Arc::new(
            FnFact::new("repoScan", |_, _| {
                Err(FactError::execution("repoScan", "scanner crashed"))
            })
            .with_scope(FactScope::Global),
        ));
        builder.add_rule(warning_rule(
            "global-scan",
            json!({ "all": [
                { "fact": "repoScan", "operator": "equal", "value": { "result": [] }, "priority": 1 }
            ]}),
        ));
        let engine = builder.build();

        assert_eq!(
            engine.static_fact("repoScan"),
            Some(&json!({ "result": [] }))
        );

        // The rule references a global fact, so it runs on the pseudo-file.
        let outcomes = engine.evaluate_file(&FileData::repo_global_check());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].rule_name, "global-scan");
    }

    #[test]
    fn test_global_rules_partitioned_from_file_rules() {
        let mut builder = EngineBuilder::new("repo");
        builder.add_fact(Arc::new(
            FnFact::new("repoWide", |_, _| Ok(json!(true))).with_scope(FactScope::GlobalFunction),
        ));
        builder.add_fact(content_fact());
        builder.add_rule(warning_rule(
            "global-rule",
            json!({ "all": [ { "fact": "repoWide", "operator": "equal", "value": true } ] }),
        ));
        builder.add_rule(warning_rule(
            "file-rule",
            json!({ "all": [ { "fact": "fileContent", "operator": "contains", "value": "TODO" } ] }),
        ));
        let engine = builder.build();

        let file_outcomes = engine.evaluate_file(&file("src/a.ts", "a TODO here"));
        assert_eq!(file_outcomes.len(), 1);
        assert_eq!(file_outcomes[0].rule_name, "file-rule");

        let global_outcomes = engine.evaluate_file(&FileData::repo_global_check());
        assert_eq!(global_outcomes.len(), 1);
        assert_eq!(global_outcomes[0].rule_name, "global-rule");
    }

    #[test]
    fn test_vacuous_all_and_any() {
        let mut builder = EngineBuilder::new("repo");
        builder.add_rule(warning_rule("always", json!({ "all": [] })));
        builder.add_rule(warning_rule("never", json!({ "any": [] })));
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", ""));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].rule_name, "always");
    }

    #[test]
    fn test_any_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = Arc::clone(&calls);

        let mut builder = EngineBuilder::new("repo");
        builder.add_fact(Arc::new(FnFact::new("tracked", move |_, _| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            Ok(json!(0))
        })));
        builder.add_rule(warning_rule(
            "short-circuit",
            json!({ "any": [
                { "fact": "fileData", "operator": "notEqual", "value": null, "path": "/filePath" },
                { "fact": "tracked", "operator": "equal", "value": 0 }
            ]}),
        ));
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", ""));
        assert_eq!(outcomes.len(), 1);
        // The first disjunct was true, so the tracked fact never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_operator_is_false() {
        let mut builder = EngineBuilder::new("repo");
        builder.add_rule(warning_rule(
            "mystery",
            json!({ "all": [ { "fact": "fileData", "operator": "quantumEntangled", "value": 1 } ] }),
        ));
        let engine = builder.build();

        assert!(engine.evaluate_file(&file("src/a.ts", "")).is_empty());
    }

    #[test]
    fn test_cycle_becomes_engine_error_finding() {
        let mut builder = EngineBuilder::new("repo");
        builder.add_fact(Arc::new(FnFact::new("a", |_, almanac| {
            almanac.fact_value("b", None, None)
        })));
        builder.add_fact(Arc::new(FnFact::new("b", |_, almanac| {
            almanac.fact_value("a", None, None)
        })));
        builder.add_rule(warning_rule(
            "cyclic",
            json!({ "all": [ { "fact": "a", "operator": "equal", "value": 1 } ] }),
        ));
        builder.add_rule(warning_rule("after", json!({ "all": [] })));
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", ""));
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].error.rule_failure, "engine-error");
        assert_eq!(outcomes[0].error.level, Severity::Error);
        assert_eq!(outcomes[0].rule_name, "cyclic");
        // Evaluation continued with the next rule.
        assert_eq!(outcomes[1].rule_name, "after");
    }

    #[test]
    fn test_event_param_substitution() {
        let mut builder = EngineBuilder::new("repo");
        builder.add_fact(content_fact());
        builder.add_rule(rule_from_json(json!({
            "name": "echoes-content",
            "conditions": { "all": [
                { "fact": "fileContent", "operator": "contains", "value": "TODO" }
            ]},
            "event": { "type": "error", "params": {
                "offender": "$fileContent",
                "plain": "unchanged",
                "missing": "$ghost"
            }}
        })));
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", "a TODO"));
        assert_eq!(outcomes.len(), 1);
        let details = &outcomes[0].error.details;
        assert_eq!(details["offender"], json!("a TODO"));
        assert_eq!(details["plain"], json!("unchanged"));
        assert_eq!(details["missing"], Value::Null);
    }

    #[test]
    fn test_operator_last_write_wins() {
        let mut builder = EngineBuilder::new("repo");
        // Shadow the builtin: "equal" now always fails.
        builder.add_operator(Arc::new(FnOperator::new("equal", |_, _| false)));
        builder.add_rule(warning_rule(
            "shadowed",
            json!({ "all": [ { "fact": "fileData", "operator": "equal", "value": null } ] }),
        ));
        let engine = builder.build();

        assert!(engine.evaluate_file(&file("src/a.ts", "")).is_empty());
    }

    #[test]
    fn test_duplicate_rule_attachment_keeps_first() {
        let mut builder = EngineBuilder::new("repo");
        builder.add_rule(warning_rule("same", json!({ "all": [] })));
        builder.add_rule(rule_from_json(json!({
            "name": "same",
            "conditions": { "any": [] },
            "event": { "type": "fatality", "params": {} }
        })));
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", ""));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].error.level, Severity::Warning);
    }

    #[test]
    fn test_conditions_side_table() {
        let mut builder = EngineBuilder::new("repo");
        builder.add_rule(warning_rule(
            "tracked",
            json!({ "all": [ { "fact": "f", "operator": "equal", "value": 3 } ] }),
        ));
        let engine = builder.build();

        let conditions = engine.conditions_for("tracked").unwrap();
        let first = conditions.first_leaf().unwrap();
        assert_eq!(first.fact, "f");
        assert_eq!(first.value, json!(3));
        assert!(engine.conditions_for("ghost").is_none());
    }

    #[test]
    fn test_prioritized_fact_prefetched_first() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        let order_b = Arc::clone(&order);
        let mut builder = EngineBuilder::new("repo");
        builder.add_fact(Arc::new(FnFact::new("cheap", move |_, _| {
            order_a.lock().push("cheap");
            Ok(json!(1))
        })));
        builder.add_fact(Arc::new(
            FnFact::new("expensive", move |_, _| {
                order_b.lock().push("expensive");
                Ok(json!(1))
            })
            .with_priority(10),
        ));
        builder.add_rule(warning_rule(
            "both",
            json!({ "all": [
                { "fact": "cheap", "operator": "equal", "value": 1 },
                { "fact": "expensive", "operator": "equal", "value": 1 }
            ]}),
        ));
        let engine = builder.build();

        let outcomes = engine.evaluate_file(&file("src/a.ts", ""));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(*order.lock(), vec!["expensive", "cheap"]);
    }
}
