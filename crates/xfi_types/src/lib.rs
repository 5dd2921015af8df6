//! # xfi_types
//!
//! Shared data model for the x-fidelity analysis engine.
//!
//! This crate provides:
//! - The archetype, rule, and exemption definitions
//! - The condition tree evaluated by the rule engine
//! - The execution result document (`XFI_RESULT`)
//! - JSON-schema validation for externally supplied documents
//!
//! ## Example
//!
//! ```rust,ignore
//! use xfi_types::{Archetype, validate_archetype};
//!
//! let raw: serde_json::Value = serde_json::from_str(&json)?;
//! validate_archetype(&raw)?;
//! let archetype: Archetype = serde_json::from_value(raw)?;
//! ```

mod archetype;
mod exemption;
mod file;
mod repo_config;
mod result;
mod rule;
mod schema;

pub use archetype::{Archetype, ArchetypeConfig, RuleRef};
pub use exemption::Exemption;
pub use file::{FileData, REPO_GLOBAL_CHECK};
pub use repo_config::RepoXfiConfig;
pub use result::{ExecutionResult, FactMetric, MemoryUsage, RuleError, RuleFailure};
pub use rule::{Condition, ConditionTree, Rule, RuleEvent, Severity};
pub use schema::{
    ValidationError, validate_archetype, validate_repo_config, validate_rule,
};
