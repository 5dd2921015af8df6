//! Exemption definition.

use serde::{Deserialize, Serialize};

/// A declaration that a specific rule should not fail for a specific
/// repository, optionally until an expiry date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Exemption {
    /// Repository URL the exemption applies to.
    pub repo_url: String,

    /// Name of the exempted rule.
    pub rule_name: String,

    /// Optional glob pattern matched against the current repo URL when
    /// `repo_url` is not an exact match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// ISO-8601 expiry. An expired exemption no longer matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,

    /// Free-form justification recorded for auditability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
