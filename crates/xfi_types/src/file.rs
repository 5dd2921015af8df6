//! Per-file analysis input.

use serde::{Deserialize, Serialize};

/// Synthetic pseudo-file appended once per run, after all real files. Rules
/// over whole-repository facts attach their findings to it.
pub const REPO_GLOBAL_CHECK: &str = "REPO_GLOBAL_CHECK";

/// One file handed to the rule evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub file_name: String,
    pub file_path: String,
    pub file_content: String,
}

impl FileData {
    pub fn new(
        file_name: impl Into<String>,
        file_path: impl Into<String>,
        file_content: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_path: file_path.into(),
            file_content: file_content.into(),
        }
    }

    /// The carrier entry for global rules.
    pub fn repo_global_check() -> Self {
        Self::new(REPO_GLOBAL_CHECK, REPO_GLOBAL_CHECK, "")
    }

    /// Returns true for the synthetic whole-repository entry.
    pub fn is_repo_global_check(&self) -> bool {
        self.file_path == REPO_GLOBAL_CHECK
    }
}
