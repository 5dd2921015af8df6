//! Archetype resolution.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use xfi_types::{Archetype, Exemption, Rule, RuleRef, validate_archetype, validate_rule};

use crate::error::ConfigError;
use crate::http::RemoteConfigClient;
use crate::security::validate_config_dir;

static ARCHETYPE_NAME: OnceLock<Regex> = OnceLock::new();

fn archetype_name_pattern() -> &'static Regex {
    ARCHETYPE_NAME
        .get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").expect("Invalid archetype name pattern"))
}

/// Where a resolved configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Remote(String),
    Local(PathBuf),
    Builtin,
}

/// An archetype plus its fully loaded rules and exemptions. Immutable
/// after resolution.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub archetype: Archetype,
    pub rules: Vec<Rule>,
    pub exemptions: Vec<Exemption>,
    pub source: ConfigSource,
}

/// Inputs for building a `ConfigResolver`.
#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    /// Remote config server base URL. Takes precedence over the local path.
    pub config_server: Option<String>,

    /// Local config directory holding `<name>.json` archetypes.
    pub local_config_path: Option<PathBuf>,

    /// Base directories local config may resolve under. Defaults to the
    /// local config path itself, which still normalizes symlinks; callers
    /// deriving the path from untrusted input supply tighter roots.
    pub allowed_config_roots: Vec<PathBuf>,

    /// Domains the config server host must match.
    pub allowed_server_domains: Vec<String>,

    /// Forwarded as the `X-Log-Prefix` header on server requests.
    pub log_prefix: Option<String>,

    /// Bypasses SSRF checks for loopback test servers.
    pub allow_local_server: bool,
}

/// Resolves archetypes, rules, and exemptions with per-name caching.
pub struct ConfigResolver {
    options: ResolverOptions,
    client: Option<RemoteConfigClient>,
    cache: Mutex<HashMap<String, Arc<ResolvedConfig>>>,
}

impl ConfigResolver {
    pub fn new(options: ResolverOptions) -> Result<Self, ConfigError> {
        let client = match &options.config_server {
            Some(server) => {
                let mut client = RemoteConfigClient::new(server.clone())?
                    .with_allowed_domains(options.allowed_server_domains.clone())
                    .allow_local(options.allow_local_server);
                if let Some(prefix) = &options.log_prefix {
                    client = client.with_log_prefix(prefix.clone());
                }
                Some(client)
            }
            None => None,
        };

        Ok(Self {
            options,
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves the named archetype, preferring the remote server, then the
    /// local config directory, then the built-in fallback. Results are
    /// cached for the lifetime of the resolver.
    pub async fn resolve(&self, name: &str) -> Result<Arc<ResolvedConfig>, ConfigError> {
        if !archetype_name_pattern().is_match(name) {
            return Err(ConfigError::BadArchetypeName(name.to_string()));
        }

        if let Some(cached) = self.cache.lock().get(name) {
            debug!("Using cached archetype '{}'", name);
            return Ok(Arc::clone(cached));
        }

        let mut resolved = if let Some(client) = &self.client {
            self.resolve_remote(client, name).await?
        } else if let Some(dir) = &self.options.local_config_path {
            self.resolve_local(dir, name)?
        } else {
            warn!(
                "No config server or local config path set, using empty builtin archetype '{}'",
                name
            );
            ResolvedConfig {
                archetype: Archetype::new(name),
                rules: Vec::new(),
                exemptions: Vec::new(),
                source: ConfigSource::Builtin,
            }
        };

        dedup_rules(&mut resolved.rules);
        info!(
            "Resolved archetype '{}' with {} rules and {} exemptions",
            name,
            resolved.rules.len(),
            resolved.exemptions.len()
        );

        let resolved = Arc::new(resolved);
        self.cache
            .lock()
            .insert(name.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    async fn resolve_remote(
        &self,
        client: &RemoteConfigClient,
        name: &str,
    ) -> Result<ResolvedConfig, ConfigError> {
        let raw = client.get_json(&format!("archetypes/{name}")).await?;
        validate_archetype(&raw).map_err(|e| ConfigError::fetch(e.to_string()))?;
        let archetype: Archetype = serde_json::from_value(raw)
            .map_err(|e| ConfigError::fetch(format!("Archetype '{name}': {e}")))?;

        let mut rules = Vec::new();
        for rule_ref in &archetype.rules {
            match rule_ref {
                RuleRef::Inline(raw) => {
                    if let Some(rule) = accept_rule(Value::Object(raw.clone())) {
                        rules.push(rule);
                    }
                }
                RuleRef::Name(rule_name) => {
                    match client
                        .get_json(&format!("archetype/{name}/rule/{rule_name}"))
                        .await
                    {
                        Ok(raw_rule) => {
                            if let Some(rule) = accept_rule(raw_rule) {
                                rules.push(rule);
                            }
                        }
                        Err(e) => {
                            error!("Failed to fetch rule '{}': {}, dropping", rule_name, e);
                        }
                    }
                }
            }
        }

        let exemptions = match client
            .get_json_optional(&format!("archetype/{name}/exemptions"))
            .await
        {
            Ok(Some(raw)) => parse_exemptions(raw),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to fetch exemptions for '{}': {}", name, e);
                Vec::new()
            }
        };

        Ok(ResolvedConfig {
            archetype,
            rules,
            exemptions,
            source: ConfigSource::Remote(
                self.options.config_server.clone().unwrap_or_default(),
            ),
        })
    }

    fn resolve_local(&self, dir: &Path, name: &str) -> Result<ResolvedConfig, ConfigError> {
        let allowed_roots = if self.options.allowed_config_roots.is_empty() {
            vec![dir.to_path_buf()]
        } else {
            self.options.allowed_config_roots.clone()
        };
        let dir = validate_config_dir(dir, &allowed_roots)
            .map_err(|e| ConfigError::PathOutsideAllowList(e.to_string()))?;

        let archetype_path = dir.join(format!("{name}.json"));
        let content = fs::read_to_string(&archetype_path).map_err(|e| {
            ConfigError::bad_config(format!(
                "Failed to read {}: {e}",
                archetype_path.display()
            ))
        })?;
        let raw: Value = serde_json::from_str(&content)
            .map_err(|e| ConfigError::bad_config(format!("Invalid archetype JSON: {e}")))?;
        validate_archetype(&raw).map_err(|e| ConfigError::bad_config(e.to_string()))?;
        let archetype: Archetype = serde_json::from_value(raw)
            .map_err(|e| ConfigError::bad_config(format!("Archetype '{name}': {e}")))?;

        let mut rules = Vec::new();
        for rule_ref in &archetype.rules {
            match rule_ref {
                RuleRef::Inline(raw) => {
                    if let Some(rule) = accept_rule(Value::Object(raw.clone())) {
                        rules.push(rule);
                    }
                }
                RuleRef::Name(rule_name) => {
                    let rule_path = dir.join("rules").join(format!("{rule_name}-rule.json"));
                    match fs::read_to_string(&rule_path) {
                        Ok(raw_rule) => match serde_json::from_str::<Value>(&raw_rule) {
                            Ok(value) => {
                                if let Some(rule) = accept_rule(value) {
                                    rules.push(rule);
                                }
                            }
                            Err(e) => {
                                error!(
                                    "Invalid JSON in {}: {}, dropping rule",
                                    rule_path.display(),
                                    e
                                );
                            }
                        },
                        Err(e) => {
                            error!(
                                "Failed to read rule '{}' from {}: {}, dropping",
                                rule_name,
                                rule_path.display(),
                                e
                            );
                        }
                    }
                }
            }
        }

        let exemptions_path = dir.join(format!("{name}-exemptions.json"));
        let exemptions = if exemptions_path.exists() {
            match fs::read_to_string(&exemptions_path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<Value>(&content).map_err(|e| e.to_string())
                }) {
                Ok(raw) => parse_exemptions(raw),
                Err(e) => {
                    warn!(
                        "Failed to load exemptions from {}: {}",
                        exemptions_path.display(),
                        e
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(ResolvedConfig {
            archetype,
            rules,
            exemptions,
            source: ConfigSource::Local(dir),
        })
    }
}

/// Validates and deserializes a raw rule document, logging and discarding
/// invalid ones so the run continues.
fn accept_rule(raw: Value) -> Option<Rule> {
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();
    if let Err(e) = validate_rule(&raw) {
        error!("Invalid rule '{}': {}, dropping", name, e);
        return None;
    }
    match serde_json::from_value::<Rule>(raw) {
        Ok(rule) => Some(rule),
        Err(e) => {
            error!("Invalid rule '{}': {}, dropping", name, e);
            None
        }
    }
}

fn parse_exemptions(raw: Value) -> Vec<Exemption> {
    let Value::Array(entries) = raw else {
        warn!("Exemptions document is not an array, ignoring");
        return Vec::new();
    };

    let mut exemptions = Vec::new();
    for entry in entries {
        match serde_json::from_value::<Exemption>(entry) {
            Ok(exemption) => exemptions.push(exemption),
            Err(e) => warn!("Invalid exemption entry: {}, dropping", e),
        }
    }
    exemptions
}

/// Rule names are unique within an execution; later duplicates lose.
fn dedup_rules(rules: &mut Vec<Rule>) {
    let mut seen = HashSet::new();
    rules.retain(|rule| {
        if seen.insert(rule.name.clone()) {
            true
        } else {
            warn!("Duplicate rule name '{}', keeping the first", rule.name);
            false
        }
    });
}
