//! Analyzer error types.

use miette::Diagnostic;
use thiserror::Error;

/// Errors that can abort an analysis run.
///
/// Per-fact, per-rule, and per-file failures never surface here; they are
/// isolated into findings or logs. Only resolver-phase errors and base
/// plugin failures escape to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum AnalyzerError {
    /// Configuration resolution failed.
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(xfi::analyzer::config),
        help("Check the archetype name, config server URL, and local config path.")
    )]
    Config(#[from] xfi_config::ConfigError),

    /// A base plugin failed to register or initialize.
    #[error("Plugin error: {0}")]
    #[diagnostic(
        code(xfi::analyzer::plugin),
        help("A required plugin could not be initialized.")
    )]
    Plugin(#[from] xfi_plugin::PluginError),

    /// The run was cancelled before any file was processed.
    #[error("Analysis cancelled")]
    #[diagnostic(code(xfi::analyzer::cancelled))]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(xfi::analyzer::io))]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    #[diagnostic(
        code(xfi::analyzer::internal),
        help("This is likely a bug in x-fidelity. Please report it.")
    )]
    Internal(String),
}

impl AnalyzerError {
    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
