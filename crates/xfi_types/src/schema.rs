//! JSON-schema validation for externally supplied documents.
//!
//! Schemas are embedded at compile time and compiled lazily; a document is
//! validated as a raw `serde_json::Value` before typed deserialization so
//! authors get a pointer to the offending element instead of a serde trace.

use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

const ARCHETYPE_SCHEMA: &str = include_str!("../../../schemas/archetype.json");
const RULE_SCHEMA: &str = include_str!("../../../schemas/rule.json");
const REPO_CONFIG_SCHEMA: &str = include_str!("../../../schemas/repo-xfi-config.json");

static ARCHETYPE_VALIDATOR: OnceLock<Validator> = OnceLock::new();
static RULE_VALIDATOR: OnceLock<Validator> = OnceLock::new();
static REPO_CONFIG_VALIDATOR: OnceLock<Validator> = OnceLock::new();

/// A document rejected by schema validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Archetype validation failed: {0}")]
    Archetype(String),

    #[error("Rule validation failed: {0}")]
    Rule(String),

    #[error("Repo config validation failed: {0}")]
    RepoConfig(String),
}

fn compiled(slot: &'static OnceLock<Validator>, schema_json: &str) -> &'static Validator {
    slot.get_or_init(|| {
        let schema: Value =
            serde_json::from_str(schema_json).expect("Invalid embedded schema JSON");
        Validator::new(&schema).expect("Invalid embedded schema compilation")
    })
}

fn check(validator: &Validator, value: &Value) -> Result<(), String> {
    if let Err(e) = validator.validate(value) {
        return Err(format!("{} at {}", e, e.instance_path()));
    }
    Ok(())
}

/// Validates a raw archetype document.
pub fn validate_archetype(value: &Value) -> Result<(), ValidationError> {
    check(compiled(&ARCHETYPE_VALIDATOR, ARCHETYPE_SCHEMA), value)
        .map_err(ValidationError::Archetype)
}

/// Validates a raw rule document.
///
/// A rule is valid iff it has a string `name`, a `conditions` object with
/// exactly one of `all`/`any`, and an `event` with a severity `type`.
pub fn validate_rule(value: &Value) -> Result<(), ValidationError> {
    check(compiled(&RULE_VALIDATOR, RULE_SCHEMA), value).map_err(ValidationError::Rule)
}

/// Validates a raw `.xfi-config.json` document.
pub fn validate_repo_config(value: &Value) -> Result<(), ValidationError> {
    check(compiled(&REPO_CONFIG_VALIDATOR, REPO_CONFIG_SCHEMA), value)
        .map_err(ValidationError::RepoConfig)
}
