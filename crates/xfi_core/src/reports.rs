//! Result persistence.
//!
//! Writes the timestamped `xfi-result-*.json` / `xfi-report-*.md` pair
//! under `<repo>/.xfiResults/`, mirrors the newest to `XFI_RESULT.json` /
//! `XFI_RESULT.md`, prunes old reports per prefix, and keeps the results
//! directory out of version control.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tracing::{debug, warn};

use xfi_types::ExecutionResult;

pub const RESULTS_DIR: &str = ".xfiResults";

/// Newest reports kept per file-name prefix.
const RETAIN_PER_PREFIX: usize = 10;

const LOCK_FILE: &str = ".lock";

/// Writes both report files and performs housekeeping. Timestamps are
/// embedded in the file names so concurrent runs in the same directory do
/// not collide.
pub fn write_reports(repo_path: &Path, result: &ExecutionResult) -> io::Result<()> {
    let dir = repo_path.join(RESULTS_DIR);
    fs::create_dir_all(&dir)?;

    let date = Utc
        .timestamp_millis_opt(result.finish_time)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d");
    let stamp = format!("{date}-{}", result.finish_time);

    let json_content = serde_json::to_string_pretty(&result.to_document())?;
    let md_content = render_markdown(result);

    fs::write(dir.join(format!("xfi-result-{stamp}.json")), &json_content)?;
    fs::write(dir.join(format!("xfi-report-{stamp}.md")), &md_content)?;

    // Mirror the newest pair under stable names.
    fs::write(dir.join("XFI_RESULT.json"), &json_content)?;
    fs::write(dir.join("XFI_RESULT.md"), &md_content)?;

    prune_reports(&dir);
    append_gitignore(repo_path)?;

    debug!("Reports written to {}", dir.display());
    Ok(())
}

fn render_markdown(result: &ExecutionResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# x-fidelity report: {}\n\n",
        result.archetype
    ));
    out.push_str(&format!("- Repository: `{}`\n", result.repo_path));
    if !result.repo_url.is_empty() {
        out.push_str(&format!("- Remote: `{}`\n", result.repo_url));
    }
    out.push_str(&format!("- Files analyzed: {}\n", result.file_count));
    out.push_str(&format!(
        "- Duration: {:.2}s\n",
        result.duration_seconds
    ));
    if result.cancelled {
        out.push_str("- **Run was cancelled; results are partial.**\n");
    }
    out.push('\n');

    out.push_str("| Severity | Count |\n|---|---|\n");
    out.push_str(&format!("| warning | {} |\n", result.warning_count));
    out.push_str(&format!("| error | {} |\n", result.error_count));
    out.push_str(&format!("| fatality | {} |\n", result.fatality_count));
    out.push_str(&format!("| exempt | {} |\n", result.exempt_count));
    out.push_str(&format!("| **total** | **{}** |\n\n", result.total_issues));

    if result.issue_details.is_empty() {
        out.push_str("No issues found.\n");
        return out;
    }

    out.push_str("## Findings\n\n");
    for failure in &result.issue_details {
        out.push_str(&format!("### `{}`\n\n", failure.file_path));
        for error in &failure.errors {
            let message = error
                .details
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            out.push_str(&format!(
                "- **{}** ({}): {}\n",
                error.rule_failure, error.level, message
            ));
        }
        out.push('\n');
    }
    out
}

/// Keeps the newest `RETAIN_PER_PREFIX` files per prefix, deleting older
/// ones. Serialized across processes via a directory-level lock file;
/// failure to prune never fails the run.
fn prune_reports(dir: &Path) {
    let Some(_lock) = DirLock::acquire(dir) else {
        warn!("Could not acquire prune lock in {}, skipping", dir.display());
        return;
    };

    for prefix in ["xfi-result-", "xfi-report-"] {
        if let Err(e) = prune_prefix(dir, prefix) {
            warn!("Failed to prune old '{}' reports: {}", prefix, e);
        }
    }
}

fn prune_prefix(dir: &Path, prefix: &str) -> io::Result<()> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix))
        .collect();

    if names.len() <= RETAIN_PER_PREFIX {
        return Ok(());
    }

    // The embedded timestamp sorts lexicographically within a day and the
    // date prefix sorts across days, so name order is age order.
    names.sort();
    let stale = names.len() - RETAIN_PER_PREFIX;
    for name in names.into_iter().take(stale) {
        let path = dir.join(&name);
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
    Ok(())
}

/// Adds `.xfiResults/` to the repo's `.gitignore` if missing.
fn append_gitignore(repo_path: &Path) -> io::Result<()> {
    let gitignore = repo_path.join(".gitignore");
    let entry = format!("{RESULTS_DIR}/");

    let existing = match fs::read_to_string(&gitignore) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&entry);
    updated.push('\n');
    fs::write(&gitignore, updated)
}

/// Advisory directory lock backed by an exclusively created file.
struct DirLock {
    path: std::path::PathBuf,
}

impl DirLock {
    fn acquire(dir: &Path) -> Option<Self> {
        let path = dir.join(LOCK_FILE);
        for _ in 0..10 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Some(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(_) => return None,
            }
        }
        None
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
