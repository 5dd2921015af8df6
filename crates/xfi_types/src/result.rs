//! Execution result document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::repo_config::RepoXfiConfig;
use crate::rule::Severity;

/// One finding produced by a satisfied rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleError {
    /// Name of the rule that matched.
    pub rule_failure: String,

    /// Severity bucket of the finding.
    pub level: Severity,

    /// Substituted event params (plus diagnostic context for synthetic
    /// engine-error findings).
    #[serde(default)]
    pub details: serde_json::Map<String, Value>,
}

/// Findings for a single file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleFailure {
    pub file_path: String,
    pub errors: Vec<RuleError>,
}

/// Snapshot of one fact's execution metrics over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FactMetric {
    pub execution_count: u64,
    /// Cumulative wall time, seconds, 4-decimal fixed.
    pub total_seconds: f64,
    pub max_seconds: f64,
    pub last_seconds: f64,
    pub average_seconds: f64,
}

/// Process memory snapshot taken at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Peak resident set size in kilobytes, where the platform reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rss_kb: Option<u64>,
}

/// Aggregate result of one analysis run: the `XFI_RESULT` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub archetype: String,
    pub repo_path: String,
    pub repo_url: String,
    pub xfi_version: String,

    pub file_count: usize,
    pub total_issues: usize,
    pub warning_count: usize,
    pub error_count: usize,
    pub fatality_count: usize,
    pub exempt_count: usize,

    /// Sorted by `file_path` ascending for reproducibility.
    pub issue_details: Vec<RuleFailure>,

    pub duration_seconds: f64,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds.
    pub finish_time: i64,

    pub memory_usage: MemoryUsage,
    pub fact_metrics: BTreeMap<String, FactMetric>,

    /// Echo of the options the run was invoked with.
    pub options: serde_json::Map<String, Value>,

    #[serde(default)]
    pub telemetry_data: Value,

    pub repo_xfi_config: RepoXfiConfig,

    /// True when the run was cancelled and the result is partial.
    #[serde(default)]
    pub cancelled: bool,
}

impl ExecutionResult {
    /// Sorts findings by file path and recomputes every severity counter
    /// from `issue_details`. The only place counts are derived, so
    /// `total_issues` always equals the sum of the four buckets.
    pub fn finalize_counts(&mut self) {
        self.issue_details.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        let mut warning = 0;
        let mut error = 0;
        let mut fatality = 0;
        let mut exempt = 0;
        for failure in &self.issue_details {
            for rule_error in &failure.errors {
                match rule_error.level {
                    Severity::Warning => warning += 1,
                    Severity::Error => error += 1,
                    Severity::Fatality => fatality += 1,
                    Severity::Exempt => exempt += 1,
                }
            }
        }

        self.warning_count = warning;
        self.error_count = error;
        self.fatality_count = fatality;
        self.exempt_count = exempt;
        self.total_issues = warning + error + fatality + exempt;
    }

    /// Wraps the payload under the `XFI_RESULT` key, the on-disk layout.
    pub fn to_document(&self) -> Value {
        serde_json::json!({ "XFI_RESULT": self })
    }

    /// Reads a payload back out of an `XFI_RESULT` document.
    pub fn from_document(document: &Value) -> Option<Self> {
        serde_json::from_value(document.get("XFI_RESULT")?.clone()).ok()
    }
}
