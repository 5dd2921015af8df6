//! Repository-local override configuration (`.xfi-config.json`).

use serde::{Deserialize, Serialize};

use crate::rule::Rule;

/// Optional per-repository configuration merged on top of the resolved
/// archetype. Lives at the analyzed repo's root as `.xfi-config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepoXfiConfig {
    /// Overrides the archetype selected by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archetype: Option<String>,

    /// Paths that sensitive-file facts should not report.
    #[serde(default)]
    pub sensitive_file_false_positives: Vec<String>,

    /// Extra rules attached after the archetype's own.
    #[serde(default)]
    pub additional_rules: Vec<Rule>,

    /// Extra fact names required from registered plugins.
    #[serde(default)]
    pub additional_facts: Vec<String>,

    /// Extra operator names required from registered plugins.
    #[serde(default)]
    pub additional_operators: Vec<String>,

    /// Extra plugins to register before the engine is built.
    #[serde(default)]
    pub additional_plugins: Vec<String>,
}
