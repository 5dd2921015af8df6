//! Analysis orchestration.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use xfi_config::{ConfigResolver, ConfigSource, ResolverOptions, load_repo_config};
use xfi_engine::{Engine, EngineBuilder, FactMetricsStore, RuleOutcome};
use xfi_plugin::{PluginContext, PluginError, PluginRegistry, XfiPlugin};
use xfi_types::{
    ExecutionResult, FileData, MemoryUsage, REPO_GLOBAL_CHECK, RuleError, RuleFailure,
};

use crate::builtin::{BUILTIN_PLUGIN_NAME, filesystem_plugin};
use crate::context::{AnalyzeOptions, RunContext, detect_repo_url};
use crate::error::AnalyzerError;
use crate::files::collect_files;
use crate::fingerprint::FingerprintCache;
use crate::reports::write_reports;
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetrySink};

/// Orchestrates one analysis run: config resolution, plugin readiness,
/// engine setup, the per-file evaluation loop, and result aggregation.
pub struct Analyzer {
    registry: Arc<PluginRegistry>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(PluginRegistry::new()),
            telemetry: Arc::new(TracingTelemetrySink),
        }
    }

    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Registers an embedding-provided plugin ahead of a run.
    pub fn register_plugin(&self, plugin: Arc<dyn XfiPlugin>) -> Result<(), PluginError> {
        self.registry.register(plugin, &PluginContext::default())
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Runs one analysis. Cooperative cancellation yields a partial result
    /// flagged `cancelled`; only resolver-phase and base-plugin failures
    /// error out.
    pub async fn analyze(&self, options: AnalyzeOptions) -> Result<ExecutionResult, AnalyzerError> {
        self.analyze_with_context(RunContext::new(options)).await
    }

    pub async fn analyze_with_context(
        &self,
        ctx: RunContext,
    ) -> Result<ExecutionResult, AnalyzerError> {
        let options = &ctx.options;
        let repo_path_str = options.repo_path.to_string_lossy().to_string();
        info!(
            "Starting analysis {} of {}",
            ctx.execution_id, repo_path_str
        );

        // Repo-local overrides participate in archetype selection.
        let repo_config = load_repo_config(&options.repo_path)?;
        let archetype_name = repo_config
            .archetype
            .clone()
            .unwrap_or_else(|| options.archetype.clone());

        let resolver = ConfigResolver::new(ResolverOptions {
            config_server: options.config_server.clone(),
            local_config_path: options.local_config_path.clone(),
            allowed_config_roots: Vec::new(),
            allowed_server_domains: Vec::new(),
            log_prefix: options.log_prefix.clone(),
            allow_local_server: options.allow_local_config_server,
        })?;
        let resolved = resolver.resolve(&archetype_name).await?;

        let repo_url = options
            .repo_url
            .clone()
            .or_else(|| detect_repo_url(&options.repo_path))
            .unwrap_or_default();

        self.telemetry.record(self.event(
            &ctx,
            "analysisStart",
            &archetype_name,
            json!({
                "ruleCount": resolved.rules.len(),
                "exemptionCount": resolved.exemptions.len(),
                "configSource": source_label(&resolved.source),
            }),
        ));

        // Base plugin first, then the requested names. Registration is
        // deduplicated by name, so the first source to claim a name wins.
        let plugin_ctx = PluginContext {
            archetype: Some(archetype_name.clone()),
            options: Value::Null,
        };
        self.registry.register(filesystem_plugin(), &plugin_ctx)?;
        for name in resolved
            .archetype
            .plugins
            .iter()
            .chain(options.extra_plugins.iter())
            .chain(repo_config.additional_plugins.iter())
        {
            if !self.registry.is_registered(name) {
                warn!(
                    "Plugin '{}' was requested but is not registered in this build, skipping",
                    name
                );
            }
        }

        // A base-plugin failure aborts the run; any other plugin that
        // fails to initialize is skipped along with its facts. Cancellation
        // is honored between waits.
        let mut failed_plugins: HashSet<String> = HashSet::new();
        for name in self.registry.plugin_names() {
            let waited = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                waited = self.registry.wait_for_plugin(&name) => waited,
            };
            if let Err(e) = waited {
                if name == BUILTIN_PLUGIN_NAME {
                    return Err(AnalyzerError::Plugin(e));
                }
                warn!("Plugin '{}' failed to initialize: {}, skipping", name, e);
                failed_plugins.insert(name);
            }
        }

        let files = collect_files(
            &self.registry,
            &repo_path_str,
            &resolved.archetype.config,
            options.zap_files.as_deref(),
        )?;

        let metrics = Arc::new(FactMetricsStore::new());
        let engine = self.build_engine(
            &repo_url,
            &repo_path_str,
            &resolved.rules,
            &resolved.exemptions,
            &resolved.archetype,
            &repo_config,
            &files,
            &failed_plugins,
            Arc::clone(&metrics),
        );

        let cache = Mutex::new(FingerprintCache::load(
            &options.repo_path,
            options.fingerprint_cache_ttl,
            options.use_fingerprint_cache,
        ));

        // Real files run in parallel; each worker owns its almanac so
        // per-file memoization needs no locking.
        let mut issue_details: Vec<RuleFailure> = files
            .par_iter()
            .filter_map(|file| {
                if ctx.cancel.is_cancelled() {
                    return None;
                }
                self.evaluate_one(&engine, &cache, file, &ctx, &archetype_name)
            })
            .collect();

        // The whole-repository pseudo-file always runs last, exactly once,
        // and never consults the fingerprint cache.
        if !ctx.cancel.is_cancelled() {
            let pseudo = FileData::repo_global_check();
            let outcomes = engine.evaluate_file(&pseudo);
            self.emit_rule_matches(&ctx, &engine, &archetype_name, &pseudo, &outcomes);
            if !outcomes.is_empty() {
                issue_details.push(RuleFailure {
                    file_path: REPO_GLOBAL_CHECK.to_string(),
                    errors: outcomes.into_iter().map(|o| o.error).collect(),
                });
            }
        }

        let cancelled = ctx.cancel.is_cancelled();
        if cancelled {
            warn!("Analysis {} cancelled, result is partial", ctx.execution_id);
        }

        let finish_time = Utc::now().timestamp_millis();
        let mut result = ExecutionResult {
            archetype: archetype_name.clone(),
            repo_path: repo_path_str,
            repo_url,
            xfi_version: env!("CARGO_PKG_VERSION").to_string(),
            file_count: files.len(),
            total_issues: 0,
            warning_count: 0,
            error_count: 0,
            fatality_count: 0,
            exempt_count: 0,
            issue_details,
            duration_seconds: ctx.started.elapsed().as_secs_f64(),
            start_time: ctx.start_time.timestamp_millis(),
            finish_time,
            memory_usage: memory_usage_snapshot(),
            fact_metrics: metrics.snapshot(),
            options: options.as_json(),
            telemetry_data: json!({
                "executionId": ctx.execution_id,
                "configSource": source_label(&resolved.source),
            }),
            repo_xfi_config: repo_config,
            cancelled,
        };
        result.finalize_counts();

        // Persistence failures are logged; the result is still returned.
        if options.write_reports
            && let Err(e) = write_reports(&options.repo_path, &result)
        {
            warn!("Failed to write reports: {}", e);
        }
        if let Err(e) = cache.lock().save() {
            warn!("Failed to save fingerprint cache: {}", e);
        }

        self.telemetry.record(self.event(
            &ctx,
            "analysisComplete",
            &archetype_name,
            json!({
                "fileCount": result.file_count,
                "totalIssues": result.total_issues,
                "fatalityCount": result.fatality_count,
                "durationSeconds": result.duration_seconds,
                "cancelled": result.cancelled,
            }),
        ));
        info!(
            "Analysis {} finished: {} issues across {} files in {:.2}s",
            ctx.execution_id, result.total_issues, result.file_count, result.duration_seconds
        );

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_engine(
        &self,
        repo_url: &str,
        repo_path: &str,
        rules: &[xfi_types::Rule],
        exemptions: &[xfi_types::Exemption],
        archetype: &xfi_types::Archetype,
        repo_config: &xfi_types::RepoXfiConfig,
        files: &[FileData],
        failed_plugins: &HashSet<String>,
        metrics: Arc<FactMetricsStore>,
    ) -> Engine {
        let mut builder = EngineBuilder::new(repo_url).with_metrics(metrics);

        let mut attached_facts: HashSet<String> = HashSet::new();
        let mut attached_operators: HashSet<String> = HashSet::new();
        for name in self.registry.plugin_names() {
            if failed_plugins.contains(&name) {
                continue;
            }
            let Some(plugin) = self.registry.get_plugin(&name) else {
                continue;
            };
            for fact in plugin.facts() {
                if fact.name().is_empty() {
                    continue;
                }
                attached_facts.insert(fact.name().to_string());
                builder.add_fact(fact);
            }
            for operator in plugin.operators() {
                if operator.name().is_empty() {
                    continue;
                }
                attached_operators.insert(operator.name().to_string());
                builder.add_operator(operator);
            }
        }

        // Required names from the archetype and repo config are advisory;
        // a missing one degrades to null facts / false conditions, so it
        // is surfaced early here.
        for fact_name in archetype.facts.iter().chain(&repo_config.additional_facts) {
            if !attached_facts.contains(fact_name) {
                warn!("Required fact '{}' is not provided by any plugin", fact_name);
            }
        }
        for operator_name in archetype
            .operators
            .iter()
            .chain(&repo_config.additional_operators)
        {
            if !attached_operators.contains(operator_name) {
                warn!(
                    "Required operator '{}' is not provided by any plugin or builtin",
                    operator_name
                );
            }
        }

        builder.add_static_fact(
            "archetypeConfig",
            serde_json::to_value(&archetype.config).unwrap_or(Value::Null),
        );
        builder.add_static_fact("repoUrl", json!(repo_url));
        builder.add_static_fact("repoPath", json!(repo_path));
        builder.add_static_fact(
            "repoXfiConfig",
            serde_json::to_value(repo_config).unwrap_or(Value::Null),
        );
        builder.add_static_fact(
            "globalFileMetadata",
            json!({
                "fileCount": files.len(),
                "filePaths": files.iter().map(|f| f.file_path.as_str()).collect::<Vec<_>>(),
            }),
        );

        builder.add_rules(rules.iter().cloned());
        builder.add_rules(repo_config.additional_rules.iter().cloned());
        builder.set_exemptions(exemptions.to_vec());

        builder.build()
    }

    fn evaluate_one(
        &self,
        engine: &Engine,
        cache: &Mutex<FingerprintCache>,
        file: &FileData,
        ctx: &RunContext,
        archetype: &str,
    ) -> Option<RuleFailure> {
        let content_hash = FingerprintCache::hash_content(&file.file_content);

        if let Some(cached) = cache.lock().get_fresh(&file.file_path, &content_hash) {
            debug!("Using cached findings for {}", file.file_path);
            return (!cached.is_empty()).then(|| RuleFailure {
                file_path: file.file_path.clone(),
                errors: cached,
            });
        }

        let outcomes = engine.evaluate_file(file);
        self.emit_rule_matches(ctx, engine, archetype, file, &outcomes);

        let errors: Vec<RuleError> = outcomes.into_iter().map(|o| o.error).collect();
        cache
            .lock()
            .store(&file.file_path, &content_hash, errors.clone());

        (!errors.is_empty()).then(|| RuleFailure {
            file_path: file.file_path.clone(),
            errors,
        })
    }

    /// Forwards each satisfied rule to telemetry with the operator detail
    /// of its first leaf plus the full stored condition tree.
    fn emit_rule_matches(
        &self,
        ctx: &RunContext,
        engine: &Engine,
        archetype: &str,
        file: &FileData,
        outcomes: &[RuleOutcome],
    ) {
        for outcome in outcomes {
            let conditions = engine.conditions_for(&outcome.rule_name);
            let condition_details = conditions.and_then(|tree| tree.first_leaf()).map(|leaf| {
                json!({
                    "fact": leaf.fact,
                    "operator": leaf.operator,
                    "value": leaf.value,
                    "params": leaf.params,
                })
            });

            self.telemetry.record(self.event(
                ctx,
                "ruleMatch",
                archetype,
                json!({
                    "rule": outcome.rule_name,
                    "filePath": file.file_path,
                    "level": outcome.error.level,
                    "conditionDetails": condition_details,
                    "allConditions": conditions
                        .map(|tree| serde_json::to_value(tree).unwrap_or(Value::Null)),
                }),
            ));
        }
    }

    fn event(
        &self,
        ctx: &RunContext,
        event_type: &str,
        archetype: &str,
        data: Value,
    ) -> TelemetryEvent {
        TelemetryEvent {
            event_type: event_type.to_string(),
            execution_id: ctx.execution_id.clone(),
            archetype: archetype.to_string(),
            repo_path: ctx.options.repo_path.to_string_lossy().to_string(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

fn source_label(source: &ConfigSource) -> String {
    match source {
        ConfigSource::Remote(url) => format!("remote:{url}"),
        ConfigSource::Local(path) => format!("local:{}", path.display()),
        ConfigSource::Builtin => "builtin".to_string(),
    }
}

#[cfg(unix)]
fn memory_usage_snapshot() -> MemoryUsage {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    MemoryUsage {
        max_rss_kb: (rc == 0).then_some(usage.ru_maxrss as u64),
    }
}

#[cfg(not(unix))]
fn memory_usage_snapshot() -> MemoryUsage {
    MemoryUsage::default()
}
