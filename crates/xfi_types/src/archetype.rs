//! Archetype definition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a rule inside an archetype: either a name resolved against
/// the config source (`<dir>/rules/<name>-rule.json` or the config server)
/// or an embedded rule object.
///
/// Embedded rules stay raw here; the resolver validates them so a
/// malformed one is dropped without rejecting the whole archetype.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RuleRef {
    Name(String),
    Inline(serde_json::Map<String, Value>),
}

/// Archetype-level configuration parameters consumed by facts and the file
/// collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchetypeConfig {
    /// Dependency name to minimum acceptable semver string.
    #[serde(default)]
    pub minimum_dependency_versions: BTreeMap<String, String>,

    /// Expected repository layout, opaque to the engine.
    #[serde(default)]
    pub standard_structure: Value,

    /// Regex patterns for files excluded from analysis.
    #[serde(default)]
    pub blacklist_patterns: Vec<String>,

    /// Regex patterns for files included in analysis. Empty means all.
    #[serde(default)]
    pub whitelist_patterns: Vec<String>,
}

/// A named bundle of rules, exemptions, plugins, and configuration that
/// describes an expected repository shape. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Archetype {
    /// Archetype name; must match `[A-Za-z0-9_-]+`.
    pub name: String,

    /// Rules to attach, by name or inline.
    #[serde(default)]
    pub rules: Vec<RuleRef>,

    /// Operator names this archetype requires.
    #[serde(default)]
    pub operators: Vec<String>,

    /// Fact names this archetype requires.
    #[serde(default)]
    pub facts: Vec<String>,

    /// Plugins loaded before the engine is built.
    #[serde(default)]
    pub plugins: Vec<String>,

    #[serde(default)]
    pub config: ArchetypeConfig,
}

impl Archetype {
    /// Creates an empty archetype with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            operators: Vec::new(),
            facts: Vec::new(),
            plugins: Vec::new(),
            config: ArchetypeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_archetype_minimal() {
        let archetype: Archetype =
            serde_json::from_value(json!({ "name": "node-fullstack" })).unwrap();

        assert_eq!(archetype.name, "node-fullstack");
        assert!(archetype.rules.is_empty());
        assert!(archetype.config.blacklist_patterns.is_empty());
    }

    #[test]
    fn test_archetype_rule_refs() {
        let archetype: Archetype = serde_json::from_value(json!({
            "name": "java-microservice",
            "rules": [
                "outdatedFramework-global",
                {
                    "name": "inline-rule",
                    "conditions": { "all": [] },
                    "event": { "type": "warning", "params": {} }
                }
            ]
        }))
        .unwrap();

        assert_eq!(archetype.rules.len(), 2);
        match &archetype.rules[0] {
            RuleRef::Name(name) => assert_eq!(name, "outdatedFramework-global"),
            _ => panic!("Expected name reference"),
        }
        match &archetype.rules[1] {
            RuleRef::Inline(raw) => assert_eq!(raw["name"], "inline-rule"),
            _ => panic!("Expected inline rule"),
        }
    }

    #[test]
    fn test_archetype_config_camel_case() {
        let archetype: Archetype = serde_json::from_value(json!({
            "name": "node-fullstack",
            "config": {
                "minimumDependencyVersions": { "react": ">=17.0.0" },
                "blacklistPatterns": [".*node_modules.*"],
                "whitelistPatterns": [".*\\.ts$"]
            }
        }))
        .unwrap();

        assert_eq!(
            archetype.config.minimum_dependency_versions.get("react"),
            Some(&">=17.0.0".to_string())
        );
        assert_eq!(archetype.config.blacklist_patterns.len(), 1);
    }
}
