//! Rule and condition tree definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a finding.
///
/// `Exempt` is never authored directly; it is produced by the engine when an
/// exemption rewrites a rule's event type at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatality,
    Exempt,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatality => "fatality",
            Severity::Exempt => "exempt",
        };
        f.write_str(s)
    }
}

/// A single testable condition: resolve a fact, apply an operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Fact name resolved through the almanac.
    pub fact: String,

    /// Operator name resolved through the engine's operator table.
    pub operator: String,

    /// Expected value passed to the operator as its right-hand side.
    pub value: Value,

    /// Optional parameters forwarded to the fact function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Optional JSON pointer applied to the fact value before comparison.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Scheduling priority. Facts for higher-priority leaves are computed
    /// first; this never affects the boolean outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

/// Boolean condition tree over facts and operators.
///
/// Serialized exactly as rules author it: `{"all": [...]}`, `{"any": [...]}`,
/// or a bare leaf object. An empty `all` is vacuously true; an empty `any`
/// is vacuously false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionTree {
    All { all: Vec<ConditionTree> },
    Any { any: Vec<ConditionTree> },
    Leaf(Condition),
}

impl ConditionTree {
    /// Visits every leaf condition in source-textual order.
    pub fn visit_leaves<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a Condition),
    {
        match self {
            ConditionTree::All { all } => {
                for child in all {
                    child.visit_leaves(f);
                }
            }
            ConditionTree::Any { any } => {
                for child in any {
                    child.visit_leaves(f);
                }
            }
            ConditionTree::Leaf(condition) => f(condition),
        }
    }

    /// Collects every leaf in source-textual order.
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.visit_leaves(&mut |c| out.push(c));
        out
    }

    /// Returns the first leaf that carries an operator and expected value,
    /// used to build the `conditionDetails` telemetry record.
    pub fn first_leaf(&self) -> Option<&Condition> {
        self.leaves().into_iter().next()
    }
}

/// Event emitted when a rule's conditions are satisfied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleEvent {
    /// Severity bucket for the resulting finding.
    #[serde(rename = "type")]
    pub event_type: Severity,

    /// Event parameters. String values of the form `$factName` are
    /// substituted with that fact's current value when the event fires.
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

/// A named condition tree plus the event emitted on match.
///
/// Unknown top-level fields are preserved so archetype authors can annotate
/// rules without the engine rejecting them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub name: String,
    pub conditions: ConditionTree,
    pub event: RuleEvent,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_severity_roundtrip() {
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"warning\"");
        assert_eq!(serde_json::to_string(&Severity::Fatality).unwrap(), "\"fatality\"");

        let parsed: Severity = serde_json::from_str("\"exempt\"").unwrap();
        assert_eq!(parsed, Severity::Exempt);
    }

    #[test]
    fn test_condition_tree_all() {
        let json = json!({
            "all": [
                { "fact": "fileContent", "operator": "contains", "value": "TODO" }
            ]
        });

        let tree: ConditionTree = serde_json::from_value(json).unwrap();
        match &tree {
            ConditionTree::All { all } => assert_eq!(all.len(), 1),
            _ => panic!("Expected All variant"),
        }
    }

    #[test]
    fn test_condition_tree_nested() {
        let json = json!({
            "any": [
                { "all": [
                    { "fact": "a", "operator": "equal", "value": 1 },
                    { "fact": "b", "operator": "equal", "value": 2 }
                ]},
                { "fact": "c", "operator": "equal", "value": 3 }
            ]
        });

        let tree: ConditionTree = serde_json::from_value(json).unwrap();
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0].fact, "a");
        assert_eq!(leaves[2].fact, "c");
    }

    #[test]
    fn test_condition_leaf_with_path_and_priority() {
        let json = json!({
            "fact": "dependencyVersions",
            "operator": "greaterThan",
            "value": 5,
            "path": "/major",
            "priority": 10
        });

        let tree: ConditionTree = serde_json::from_value(json).unwrap();
        match tree {
            ConditionTree::Leaf(condition) => {
                assert_eq!(condition.path.as_deref(), Some("/major"));
                assert_eq!(condition.priority, Some(10));
            }
            _ => panic!("Expected Leaf variant"),
        }
    }

    #[test]
    fn test_rule_preserves_unknown_fields() {
        let json = json!({
            "name": "no-todo",
            "conditions": { "all": [] },
            "event": { "type": "warning", "params": { "message": "found" } },
            "description": "authored annotation"
        });

        let rule: Rule = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(rule.extra["description"], "authored annotation");

        let back = serde_json::to_value(&rule).unwrap();
        assert_eq!(back["description"], json["description"]);
    }

    #[test]
    fn test_first_leaf_ordering() {
        let tree: ConditionTree = serde_json::from_value(json!({
            "all": [
                { "any": [ { "fact": "first", "operator": "equal", "value": 1 } ] },
                { "fact": "second", "operator": "equal", "value": 2 }
            ]
        }))
        .unwrap();

        assert_eq!(tree.first_leaf().unwrap().fact, "first");
    }
}
