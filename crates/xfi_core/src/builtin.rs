//! Builtin filesystem plugin.
//!
//! Always registered before any archetype or CLI plugin; supplies the
//! `repoFilesystemFacts` fact the orchestrator collects files with, plus
//! the per-file convenience facts rules lean on.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use ignore::WalkBuilder;
use serde_json::{Value, json};
use tracing::{debug, warn};

use xfi_plugin::{FactError, FactScope, FactValueSource, FnFact, SimplePlugin, XfiPlugin};
use xfi_types::FileData;

pub const BUILTIN_PLUGIN_NAME: &str = "xfiPluginFilesystem";

/// Files larger than this are skipped rather than loaded into memory.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

fn walk_repo(repo_path: &Path) -> Vec<FileData> {
    let mut files = Vec::new();

    let walker = WalkBuilder::new(repo_path)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .build();

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Ok(metadata) = path.metadata()
            && metadata.len() > MAX_FILE_BYTES
        {
            debug!("Skipping large file {}", path.display());
            continue;
        }

        let relative = path.strip_prefix(repo_path).unwrap_or(path);
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                // Binary or unreadable; not analyzable as text.
                debug!("Skipping unreadable file {}", path.display());
                continue;
            }
        };

        files.push(FileData::new(
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            relative.to_string_lossy().to_string(),
            content,
        ));
    }

    files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    files
}

/// The filesystem plugin every run registers first.
///
/// Facts:
/// - `repoFilesystemFacts` (global-function): walks the repo given
///   `{"repoPath": ...}` params and returns the file list as JSON.
/// - `fileContent` / `fileName` (iterative): projections of the current
///   `fileData` runtime fact.
pub fn filesystem_plugin() -> Arc<dyn XfiPlugin> {
    let repo_facts = FnFact::new("repoFilesystemFacts", |params: &Value, _| {
        let repo_path = params
            .get("repoPath")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FactError::execution("repoFilesystemFacts", "missing repoPath param")
            })?;

        let path = Path::new(repo_path);
        if !path.is_dir() {
            warn!("Repo path {} is not a directory", repo_path);
            return Ok(json!([]));
        }

        let files = walk_repo(path);
        serde_json::to_value(files)
            .map_err(|e| FactError::execution("repoFilesystemFacts", e.to_string()))
    })
    .with_scope(FactScope::GlobalFunction);

    let file_content = FnFact::new("fileContent", |_, almanac| {
        almanac.fact_value("fileData", None, Some("/fileContent"))
    });

    let file_name = FnFact::new("fileName", |_, almanac| {
        almanac.fact_value("fileData", None, Some("/fileName"))
    });

    Arc::new(
        SimplePlugin::new(BUILTIN_PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
            .with_fact(Arc::new(repo_facts))
            .with_fact(Arc::new(file_content))
            .with_fact(Arc::new(file_name)),
    )
}
