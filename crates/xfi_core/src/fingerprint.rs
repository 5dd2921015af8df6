//! File fingerprint cache.
//!
//! Per-file findings keyed by a BLAKE3 content hash. A file whose hash
//! matches the cached entry within the TTL reuses its findings and skips
//! evaluation. The cache lives under `.xfiResults/` in the analyzed repo
//! and is single-writer per run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use xfi_types::RuleError;

const CACHE_FILE: &str = "xfi-file-cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    content_hash: String,
    /// Epoch seconds when the entry was written.
    cached_at: i64,
    errors: Vec<RuleError>,
}

/// On-disk cache of per-file findings.
pub struct FingerprintCache {
    path: PathBuf,
    ttl: Duration,
    enabled: bool,
    entries: HashMap<String, CacheEntry>,
}

impl FingerprintCache {
    /// Loads the cache for a repo. A missing or corrupt cache file starts
    /// empty.
    pub fn load(repo_path: &Path, ttl: Duration, enabled: bool) -> Self {
        let path = repo_path.join(crate::reports::RESULTS_DIR).join(CACHE_FILE);
        let entries = if enabled && path.exists() {
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Discarding corrupt fingerprint cache: {}", e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        if !entries.is_empty() {
            debug!("Loaded {} fingerprint cache entries", entries.len());
        }

        Self {
            path,
            ttl,
            enabled,
            entries,
        }
    }

    /// Computes the BLAKE3 hash of file content.
    pub fn hash_content(content: &str) -> String {
        blake3::hash(content.as_bytes()).to_hex().to_string()
    }

    /// Cached findings for the file, if its content hash matches and the
    /// entry is within the TTL.
    pub fn get_fresh(&self, file_path: &str, content_hash: &str) -> Option<Vec<RuleError>> {
        if !self.enabled {
            return None;
        }
        let entry = self.entries.get(file_path)?;
        if entry.content_hash != content_hash {
            return None;
        }
        let age = Utc::now().timestamp().saturating_sub(entry.cached_at);
        if age < 0 || age as u64 > self.ttl.as_secs() {
            return None;
        }
        Some(entry.errors.clone())
    }

    /// Records the findings computed for a file this run.
    pub fn store(&mut self, file_path: &str, content_hash: &str, errors: Vec<RuleError>) {
        if !self.enabled {
            return;
        }
        self.entries.insert(
            file_path.to_string(),
            CacheEntry {
                content_hash: content_hash.to_string(),
                cached_at: Utc::now().timestamp(),
                errors,
            },
        );
    }

    /// Persists the cache to disk.
    pub fn save(&self) -> std::io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(&self.entries)?;
        fs::write(&self.path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xfi_types::Severity;

    fn finding(rule: &str) -> RuleError {
        RuleError {
            rule_failure: rule.to_string(),
            level: Severity::Warning,
            details: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ttl = Duration::from_secs(600);
        let hash = FingerprintCache::hash_content("fn main() {}");

        let mut cache = FingerprintCache::load(dir.path(), ttl, true);
        cache.store("src/a.rs", &hash, vec![finding("no-todo")]);
        cache.save().unwrap();

        let reloaded = FingerprintCache::load(dir.path(), ttl, true);
        let cached = reloaded.get_fresh("src/a.rs", &hash).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].rule_failure, "no-todo");
    }

    #[test]
    fn test_hash_mismatch_misses() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FingerprintCache::load(dir.path(), Duration::from_secs(600), true);
        cache.store("src/a.rs", "old-hash", vec![finding("r")]);

        assert!(cache.get_fresh("src/a.rs", "new-hash").is_none());
        assert!(cache.get_fresh("src/b.rs", "old-hash").is_none());
    }

    #[test]
    fn test_expired_entry_misses() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FingerprintCache::load(dir.path(), Duration::from_secs(0), true);
        cache.store("src/a.rs", "h", vec![finding("r")]);

        // TTL of zero: anything stored even one second ago is stale; an
        // entry stored this instant may race the clock, so force the age.
        cache.entries.get_mut("src/a.rs").unwrap().cached_at -= 5;
        assert!(cache.get_fresh("src/a.rs", "h").is_none());
    }

    #[test]
    fn test_disabled_cache_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FingerprintCache::load(dir.path(), Duration::from_secs(600), false);
        cache.store("src/a.rs", "h", vec![finding("r")]);
        assert!(cache.get_fresh("src/a.rs", "h").is_none());
        cache.save().unwrap();
        assert!(!dir.path().join(crate::reports::RESULTS_DIR).exists());
    }

    #[test]
    fn test_corrupt_cache_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join(crate::reports::RESULTS_DIR);
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join(CACHE_FILE), "{ not json").unwrap();

        let cache = FingerprintCache::load(dir.path(), Duration::from_secs(600), true);
        assert!(cache.entries.is_empty());
    }
}
