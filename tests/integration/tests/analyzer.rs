//! End-to-end analyzer scenarios driven through local config directories
//! and programmatically registered plugins.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use xfi_config::ConfigError;
use xfi_core::{AnalyzeOptions, Analyzer, AnalyzerError, Severity};
use xfi_plugin::{FactError, FactScope, FnFact, FnOperator, SimplePlugin};

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn repo_with_files(files: &[(&str, &str)]) -> tempfile::TempDir {
    let repo = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = repo.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
    repo
}

fn config_dir(archetype: &Value, rules: &[(&str, Value)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("rules")).unwrap();
    let name = archetype["name"].as_str().unwrap();
    write_json(&dir.path().join(format!("{name}.json")), archetype);
    for (rule_name, rule) in rules {
        write_json(
            &dir.path().join(format!("rules/{rule_name}-rule.json")),
            rule,
        );
    }
    dir
}

fn options(repo: &Path, config: &Path, archetype: &str) -> AnalyzeOptions {
    let mut options = AnalyzeOptions::new(repo);
    options.archetype = archetype.to_string();
    options.local_config_path = Some(config.to_path_buf());
    options.write_reports = false;
    options.use_fingerprint_cache = false;
    options
}

#[tokio::test]
async fn exempt_rewrite_produces_exempt_findings() {
    let repo_url = "git@x:owner/repo";
    let config = config_dir(
        &json!({ "name": "exempted", "rules": ["r1"] }),
        &[(
            "r1",
            json!({
                "name": "R1",
                "conditions": { "all": [] },
                "event": { "type": "warning", "params": { "message": "always fires" } }
            }),
        )],
    );
    write_json(
        &config.path().join("exempted-exemptions.json"),
        &json!([{ "repoUrl": repo_url, "ruleName": "R1" }]),
    );
    let repo = repo_with_files(&[("src/a.ts", "anything")]);

    let mut opts = options(repo.path(), config.path(), "exempted");
    opts.repo_url = Some(repo_url.to_string());

    let result = Analyzer::new().analyze(opts).await.unwrap();

    assert_eq!(result.exempt_count, 1);
    assert_eq!(result.warning_count, 0);
    assert_eq!(result.total_issues, 1);
    let finding = &result.issue_details[0].errors[0];
    assert_eq!(finding.rule_failure, "R1");
    assert_eq!(finding.level, Severity::Exempt);
}

#[tokio::test]
async fn plugin_fact_and_operator_dispatch_with_path() {
    let config = config_dir(
        &json!({ "name": "dispatch", "rules": ["gt"], "plugins": ["xfiPluginMetrics"] }),
        &[(
            "gt",
            json!({
                "name": "gt",
                "conditions": { "all": [
                    { "fact": "complexity", "operator": "strictlyAbove", "value": 5, "path": "$.v" }
                ]},
                "event": { "type": "error", "params": { "message": "too complex" } }
            }),
        )],
    );
    let repo = repo_with_files(&[("src/a.ts", "x")]);

    let analyzer = Analyzer::new();
    analyzer
        .register_plugin(Arc::new(
            SimplePlugin::new("xfiPluginMetrics", "1.0.0")
                .with_fact(Arc::new(FnFact::new("complexity", |_, _| {
                    Ok(json!({ "v": 7 }))
                })))
                .with_operator(Arc::new(FnOperator::new("strictlyAbove", |a, b| {
                    match (a.as_f64(), b.as_f64()) {
                        (Some(a), Some(b)) => a > b,
                        _ => false,
                    }
                }))),
        ))
        .unwrap();

    let result = analyzer
        .analyze(options(repo.path(), config.path(), "dispatch"))
        .await
        .unwrap();

    assert_eq!(result.error_count, 1);
    assert_eq!(result.total_issues, 1);
}

#[tokio::test]
async fn fact_memoized_once_per_file() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_inner = Arc::clone(&counter);

    let config = config_dir(
        &json!({ "name": "memo", "rules": ["double"] }),
        &[(
            "double",
            json!({
                "name": "double",
                "conditions": { "all": [
                    { "fact": "count", "operator": "greaterThanInclusive", "value": 0 },
                    { "fact": "count", "operator": "lessThanInclusive", "value": 100 }
                ]},
                "event": { "type": "warning", "params": {} }
            }),
        )],
    );
    let repo = repo_with_files(&[("only.ts", "x")]);

    let analyzer = Analyzer::new();
    analyzer
        .register_plugin(Arc::new(SimplePlugin::new("xfiPluginCount", "1.0.0").with_fact(
            Arc::new(FnFact::new("count", move |_, _| {
                counter_inner.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            })),
        )))
        .unwrap();

    let result = analyzer
        .analyze(options(repo.path(), config.path(), "memo"))
        .await
        .unwrap();

    assert_eq!(result.warning_count, 1);
    // Two leaves read the fact, one file was analyzed: exactly one call.
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn throwing_global_fact_still_lets_rules_run() {
    let config = config_dir(
        &json!({ "name": "globals", "rules": ["scan"] }),
        &[(
            "scan",
            json!({
                "name": "scan",
                "conditions": { "all": [
                    { "fact": "repoScan", "operator": "equal", "value": { "result": [] } }
                ]},
                "event": { "type": "warning", "params": { "message": "empty scan" } }
            }),
        )],
    );
    let repo = repo_with_files(&[("src/a.ts", "x")]);

    let analyzer = Analyzer::new();
    analyzer
        .register_plugin(Arc::new(SimplePlugin::new("xfiPluginScan", "1.0.0").with_fact(
            Arc::new(
                FnFact::new("repoScan", |_, _| {
                    Err(FactError::execution("repoScan", "scanner exploded"))
                })
                .with_scope(FactScope::Global),
            ),
        )))
        .unwrap();

    let result = analyzer
        .analyze(options(repo.path(), config.path(), "globals"))
        .await
        .unwrap();

    // The global fact failed, precomputed to an empty result set, and the
    // rule matched against it on the whole-repo pseudo-file.
    assert_eq!(result.warning_count, 1);
    assert_eq!(result.issue_details[0].file_path, "REPO_GLOBAL_CHECK");
}

#[tokio::test]
async fn duplicate_plugin_registration_attaches_facts_once() {
    let fact_calls = Arc::new(AtomicUsize::new(0));

    let make_plugin = |calls: Arc<AtomicUsize>, version: &str| {
        Arc::new(
            SimplePlugin::new("xfiPluginAst", version).with_fact(Arc::new(FnFact::new(
                "astNodeCount",
                move |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(3))
                },
            ))),
        )
    };

    let config = config_dir(
        &json!({ "name": "dedup", "rules": ["nodes"], "plugins": ["xfiPluginAst"] }),
        &[(
            "nodes",
            json!({
                "name": "nodes",
                "conditions": { "all": [
                    { "fact": "astNodeCount", "operator": "greaterThan", "value": 1 }
                ]},
                "event": { "type": "warning", "params": {} }
            }),
        )],
    );
    let repo = repo_with_files(&[("one.ts", "x")]);

    let analyzer = Analyzer::new();
    // Registered twice: once as a CLI extra would be, once more directly.
    analyzer
        .register_plugin(make_plugin(Arc::clone(&fact_calls), "1.0.0"))
        .unwrap();
    analyzer
        .register_plugin(make_plugin(Arc::clone(&fact_calls), "2.0.0"))
        .unwrap();

    assert_eq!(analyzer.registry().len(), 1);
    assert_eq!(
        analyzer
            .registry()
            .get_plugin("xfiPluginAst")
            .unwrap()
            .version(),
        "1.0.0"
    );

    let mut opts = options(repo.path(), config.path(), "dedup");
    opts.extra_plugins = vec!["xfiPluginAst".to_string()];

    let result = analyzer.analyze(opts).await.unwrap();

    assert_eq!(result.warning_count, 1);
    // One file, one attached copy of the fact: a single execution.
    assert_eq!(fact_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn loopback_config_server_is_refused() {
    let repo = repo_with_files(&[("a.ts", "x")]);

    let mut opts = AnalyzeOptions::new(repo.path());
    opts.config_server = Some("http://127.0.0.1/".to_string());
    opts.write_reports = false;

    let err = Analyzer::new().analyze(opts).await.unwrap_err();
    match err {
        AnalyzerError::Config(ConfigError::Security(_)) => {}
        other => panic!("Expected a security rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn vacuous_conditions_all_and_any() {
    let config = config_dir(
        &json!({ "name": "vacuous", "rules": ["always", "never"] }),
        &[
            (
                "always",
                json!({
                    "name": "always",
                    "conditions": { "all": [] },
                    "event": { "type": "warning", "params": {} }
                }),
            ),
            (
                "never",
                json!({
                    "name": "never",
                    "conditions": { "any": [] },
                    "event": { "type": "fatality", "params": {} }
                }),
            ),
        ],
    );
    let repo = repo_with_files(&[("a.ts", "x"), ("b.ts", "y")]);

    let result = Analyzer::new()
        .analyze(options(repo.path(), config.path(), "vacuous"))
        .await
        .unwrap();

    // `always` fires per file; `never` fires nowhere.
    assert_eq!(result.warning_count, 2);
    assert_eq!(result.fatality_count, 0);
    assert_eq!(result.total_issues, 2);
}

#[tokio::test]
async fn zap_files_restricts_and_ignores_missing() {
    let config = config_dir(
        &json!({ "name": "zap", "rules": ["always"] }),
        &[(
            "always",
            json!({
                "name": "always",
                "conditions": { "all": [] },
                "event": { "type": "warning", "params": {} }
            }),
        )],
    );
    let repo = repo_with_files(&[("a.ts", "x"), ("b.ts", "y")]);

    let mut opts = options(repo.path(), config.path(), "zap");
    opts.zap_files = Some(vec!["a.ts".to_string(), "ghost.ts".to_string()]);

    let result = Analyzer::new().analyze(opts).await.unwrap();

    // Only the existing zapped file was evaluated; the missing one only
    // warned.
    assert_eq!(result.file_count, 1);
    assert_eq!(result.warning_count, 1);
    assert_eq!(result.issue_details[0].file_path, "a.ts");
}

#[tokio::test]
async fn severity_counts_sum_to_total() {
    let config = config_dir(
        &json!({ "name": "mixed", "rules": ["warn", "err", "fatal"] }),
        &[
            (
                "warn",
                json!({
                    "name": "warn",
                    "conditions": { "all": [
                        { "fact": "fileContent", "operator": "contains", "value": "WARN" }
                    ]},
                    "event": { "type": "warning", "params": {} }
                }),
            ),
            (
                "err",
                json!({
                    "name": "err",
                    "conditions": { "all": [
                        { "fact": "fileContent", "operator": "contains", "value": "ERR" }
                    ]},
                    "event": { "type": "error", "params": {} }
                }),
            ),
            (
                "fatal",
                json!({
                    "name": "fatal",
                    "conditions": { "all": [
                        { "fact": "fileContent", "operator": "contains", "value": "FATAL" }
                    ]},
                    "event": { "type": "fatality", "params": {} }
                }),
            ),
        ],
    );
    let repo = repo_with_files(&[
        ("a.ts", "WARN and ERR"),
        ("b.ts", "FATAL"),
        ("c.ts", "clean"),
    ]);

    let result = Analyzer::new()
        .analyze(options(repo.path(), config.path(), "mixed"))
        .await
        .unwrap();

    assert_eq!(result.warning_count, 1);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.fatality_count, 1);
    assert_eq!(
        result.total_issues,
        result.warning_count + result.error_count + result.fatality_count + result.exempt_count
    );
    // Findings are sorted by file path.
    let paths: Vec<&str> = result
        .issue_details
        .iter()
        .map(|f| f.file_path.as_str())
        .collect();
    assert_eq!(paths, vec!["a.ts", "b.ts"]);
}

#[tokio::test]
async fn result_document_roundtrip_through_disk() {
    let config = config_dir(
        &json!({ "name": "roundtrip", "rules": ["always"] }),
        &[(
            "always",
            json!({
                "name": "always",
                "conditions": { "all": [] },
                "event": { "type": "warning", "params": { "message": "hi" } }
            }),
        )],
    );
    let repo = repo_with_files(&[("a.ts", "x")]);

    let mut opts = options(repo.path(), config.path(), "roundtrip");
    opts.write_reports = true;

    let result = Analyzer::new().analyze(opts).await.unwrap();

    let written = fs::read_to_string(
        repo.path()
            .join(xfi_core::RESULTS_DIR)
            .join("XFI_RESULT.json"),
    )
    .unwrap();
    let document: Value = serde_json::from_str(&written).unwrap();
    let reparsed = xfi_core::ExecutionResult::from_document(&document).unwrap();

    assert_eq!(reparsed, result);
}

#[tokio::test]
async fn event_params_substitute_fact_values() {
    let config = config_dir(
        &json!({ "name": "subst", "rules": ["echo"] }),
        &[(
            "echo",
            json!({
                "name": "echo",
                "conditions": { "all": [
                    { "fact": "fileContent", "operator": "contains", "value": "TODO" }
                ]},
                "event": { "type": "warning", "params": {
                    "where": "$fileName",
                    "static": "unchanged"
                }}
            }),
        )],
    );
    let repo = repo_with_files(&[("src/task.ts", "TODO later")]);

    let result = Analyzer::new()
        .analyze(options(repo.path(), config.path(), "subst"))
        .await
        .unwrap();

    let details = &result.issue_details[0].errors[0].details;
    assert_eq!(details["where"], json!("task.ts"));
    assert_eq!(details["static"], json!("unchanged"));
}
