//! Run context and options.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Caller-supplied inputs for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Root of the repository to analyze.
    pub repo_path: PathBuf,

    /// Archetype name. A repo-local `.xfi-config.json` archetype overrides
    /// this.
    pub archetype: String,

    /// Remote config server base URL, highest-precedence config source.
    pub config_server: Option<String>,

    /// Local config directory holding `<archetype>.json`.
    pub local_config_path: Option<PathBuf>,

    /// Restricts evaluation to these paths. Entries absent from the repo
    /// produce a warning and no findings.
    pub zap_files: Option<Vec<String>>,

    /// Extra plugin names requested on top of the archetype's own.
    pub extra_plugins: Vec<String>,

    /// Forwarded to the config server as `X-Log-Prefix`.
    pub log_prefix: Option<String>,

    /// Overrides repo URL detection from `.git/config`.
    pub repo_url: Option<String>,

    /// Whether unchanged files may reuse cached findings.
    pub use_fingerprint_cache: bool,

    /// Maximum age of reusable cached findings.
    pub fingerprint_cache_ttl: Duration,

    /// Whether to persist `XFI_RESULT.json` and the markdown report.
    pub write_reports: bool,

    /// Bypasses SSRF checks so tests can run loopback config servers.
    pub allow_local_config_server: bool,
}

impl AnalyzeOptions {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            archetype: "node-fullstack".to_string(),
            config_server: None,
            local_config_path: None,
            zap_files: None,
            extra_plugins: Vec::new(),
            log_prefix: None,
            repo_url: None,
            use_fingerprint_cache: true,
            fingerprint_cache_ttl: Duration::from_secs(60 * 60),
            write_reports: true,
            allow_local_config_server: false,
        }
    }

    /// Echo of the options for the result document.
    pub fn as_json(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("archetype".to_string(), self.archetype.clone().into());
        map.insert(
            "repoPath".to_string(),
            self.repo_path.to_string_lossy().to_string().into(),
        );
        if let Some(server) = &self.config_server {
            map.insert("configServer".to_string(), server.clone().into());
        }
        if let Some(dir) = &self.local_config_path {
            map.insert(
                "localConfigPath".to_string(),
                dir.to_string_lossy().to_string().into(),
            );
        }
        if let Some(zap) = &self.zap_files {
            map.insert("zapFiles".to_string(), zap.clone().into());
        }
        if !self.extra_plugins.is_empty() {
            map.insert("extraPlugins".to_string(), self.extra_plugins.clone().into());
        }
        if let Some(prefix) = &self.log_prefix {
            map.insert("logPrefix".to_string(), prefix.clone().into());
        }
        map
    }
}

/// Explicit per-run state. Every component that needs the execution ID,
/// the clock, or the cancellation signal receives this value instead of
/// reading process-global state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub execution_id: String,
    pub started: Instant,
    pub start_time: DateTime<Utc>,
    pub cancel: CancellationToken,
    pub options: AnalyzeOptions,
}

impl RunContext {
    pub fn new(options: AnalyzeOptions) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
            start_time: Utc::now(),
            cancel: CancellationToken::new(),
            options,
        }
    }

    pub fn with_cancel(options: AnalyzeOptions, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::new(options)
        }
    }
}

/// Reads the `origin` remote URL from `.git/config`, if the repo has one.
pub fn detect_repo_url(repo_path: &Path) -> Option<String> {
    let config = fs::read_to_string(repo_path.join(".git").join("config")).ok()?;

    let mut in_origin = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == "[remote \"origin\"]";
            continue;
        }
        if in_origin
            && let Some(url) = line.strip_prefix("url")
        {
            return Some(url.trim_start_matches([' ', '=']).trim().to_string());
        }
    }
    None
}
