//! File collection for a run.

use regex::Regex;
use serde_json::{Value, json};
use tracing::{info, warn};

use xfi_plugin::{FactError, FactValueSource, PluginRegistry};
use xfi_types::{ArchetypeConfig, FileData};

use crate::error::AnalyzerError;

/// Almanac stand-in for the collection phase, which runs before the engine
/// exists. The filesystem fact only reads its params.
struct CollectionAlmanac;

impl FactValueSource for CollectionAlmanac {
    fn fact_value(
        &self,
        _name: &str,
        _params: Option<&Value>,
        _path: Option<&str>,
    ) -> Result<Value, FactError> {
        Ok(Value::Null)
    }

    fn add_runtime_fact(&self, _name: &str, _value: Value) {}
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Invalid file pattern '{}': {}, ignoring", pattern, e);
                None
            }
        })
        .collect()
}

/// Collects the analyzable files by invoking the `repoFilesystemFacts`
/// plugin fact, then applies the archetype's blacklist/whitelist and the
/// caller's `zap_files` restriction. The `REPO_GLOBAL_CHECK` pseudo-file
/// is appended by the analyzer, not here.
pub fn collect_files(
    registry: &PluginRegistry,
    repo_path: &str,
    config: &ArchetypeConfig,
    zap_files: Option<&[String]>,
) -> Result<Vec<FileData>, AnalyzerError> {
    let fact = registry
        .plugin_facts()
        .into_iter()
        .find(|fact| fact.name() == "repoFilesystemFacts")
        .ok_or_else(|| {
            AnalyzerError::internal("repoFilesystemFacts fact is not registered")
        })?;

    let params = json!({
        "repoPath": repo_path,
        "archetypeConfig": serde_json::to_value(config).unwrap_or(Value::Null),
    });
    let raw = fact
        .evaluate(&params, &CollectionAlmanac)
        .map_err(|e| AnalyzerError::internal(format!("File collection failed: {e}")))?;
    let mut files: Vec<FileData> = serde_json::from_value(raw)
        .map_err(|e| AnalyzerError::internal(format!("Malformed file list: {e}")))?;

    let blacklist = compile_patterns(&config.blacklist_patterns);
    let whitelist = compile_patterns(&config.whitelist_patterns);

    files.retain(|file| {
        if blacklist.iter().any(|p| p.is_match(&file.file_path)) {
            return false;
        }
        if !whitelist.is_empty() && !whitelist.iter().any(|p| p.is_match(&file.file_path)) {
            return false;
        }
        true
    });

    if let Some(zap) = zap_files {
        let mut zapped = Vec::new();
        for requested in zap {
            match files.iter().find(|file| {
                file.file_path == *requested || file.file_path.ends_with(requested.as_str())
            }) {
                Some(file) => zapped.push(file.clone()),
                None => {
                    warn!("Requested file '{}' not found in repo, skipping", requested);
                }
            }
        }
        files = zapped;
    }

    files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    files.dedup_by(|a, b| a.file_path == b.file_path);

    info!("Collected {} files for analysis", files.len());
    Ok(files)
}
