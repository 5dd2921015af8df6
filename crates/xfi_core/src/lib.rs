//! # xfi_core
//!
//! Analyzer orchestrator for x-fidelity.
//!
//! This crate provides:
//! - The `Analyzer` that wires config resolution, plugin loading, engine
//!   setup, and the per-file evaluation loop into one run
//! - The builtin filesystem plugin (`repoFilesystemFacts` and friends)
//! - The file fingerprint cache
//! - Report writing (`XFI_RESULT.json` plus a markdown companion)
//! - The telemetry sink contract
//!
//! ## Example
//!
//! ```rust,ignore
//! use xfi_core::{AnalyzeOptions, Analyzer};
//!
//! let analyzer = Analyzer::new();
//! let result = analyzer.analyze(AnalyzeOptions::new("/path/to/repo")).await?;
//! println!("{} issues in {} files", result.total_issues, result.file_count);
//! ```

mod analyzer;
mod builtin;
mod context;
mod error;
mod files;
mod fingerprint;
mod reports;
mod telemetry;

pub use analyzer::Analyzer;
pub use builtin::{BUILTIN_PLUGIN_NAME, filesystem_plugin};
pub use context::{AnalyzeOptions, RunContext, detect_repo_url};
pub use error::AnalyzerError;
pub use fingerprint::FingerprintCache;
pub use reports::{RESULTS_DIR, write_reports};
pub use telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetrySink};

pub use xfi_types::{ExecutionResult, FileData, RuleError, RuleFailure, Severity};
