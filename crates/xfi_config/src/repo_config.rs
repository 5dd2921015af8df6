//! Repository-local `.xfi-config.json` loading.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use xfi_types::{RepoXfiConfig, validate_repo_config};

use crate::error::ConfigError;

/// Loads `.xfi-config.json` from the analyzed repo root.
///
/// A missing file yields the default (empty) config. A malformed or
/// schema-invalid file is logged and ignored rather than failing the run;
/// repo-local overrides are a convenience, not a gate. Additional rules
/// whose condition paths contain `..` are dropped.
pub fn load_repo_config(repo_path: &Path) -> Result<RepoXfiConfig, ConfigError> {
    let config_path = repo_path.join(".xfi-config.json");
    if !config_path.exists() {
        debug!("No .xfi-config.json at {}", repo_path.display());
        return Ok(RepoXfiConfig::default());
    }

    let content = fs::read_to_string(&config_path)?;
    let raw: Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid JSON in {}: {}, ignoring", config_path.display(), e);
            return Ok(RepoXfiConfig::default());
        }
    };

    if let Err(e) = validate_repo_config(&raw) {
        warn!("{} rejected: {}, ignoring", config_path.display(), e);
        return Ok(RepoXfiConfig::default());
    }

    let mut config: RepoXfiConfig = match serde_json::from_value(raw) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to parse {}: {}, ignoring", config_path.display(), e);
            return Ok(RepoXfiConfig::default());
        }
    };

    config.additional_rules.retain(|rule| {
        let traversal = rule
            .conditions
            .leaves()
            .iter()
            .any(|leaf| leaf.path.as_deref().is_some_and(|p| p.contains("..")));
        if traversal {
            warn!(
                "Additional rule '{}' has a '..' path segment, dropping",
                rule.name
            );
        }
        !traversal
    });

    Ok(config)
}
