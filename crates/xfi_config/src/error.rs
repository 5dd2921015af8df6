//! Resolver error types.

use miette::Diagnostic;
use thiserror::Error;

use crate::security::SecurityError;

/// Errors that can occur while resolving configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The archetype name contains characters outside `[A-Za-z0-9_-]`.
    #[error("Invalid archetype name: {0}")]
    #[diagnostic(
        code(xfi::config::archetype_name),
        help("Archetype names may only contain letters, digits, '_' and '-'.")
    )]
    BadArchetypeName(String),

    /// A configuration document failed to parse or validate.
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(xfi::config::bad_config),
        help("Check the archetype file syntax and structure.")
    )]
    BadConfig(String),

    /// The config server could not be reached or returned an unusable
    /// response after retries.
    #[error("Config fetch failed: {0}")]
    #[diagnostic(
        code(xfi::config::fetch),
        help("Verify the config server URL and that the archetype exists.")
    )]
    ConfigFetchFailed(String),

    /// The resolved local config directory escapes the allow-list.
    #[error("Config path outside allowed directories: {0}")]
    #[diagnostic(
        code(xfi::config::path),
        help("Local config must live under one of the allowed base directories.")
    )]
    PathOutsideAllowList(String),

    /// A rule document was rejected. Per-rule: the rule is dropped and the
    /// run continues.
    #[error("Invalid rule '{name}': {message}")]
    #[diagnostic(code(xfi::config::rule))]
    InvalidRule { name: String, message: String },

    /// Request refused by SSRF hardening.
    #[error("Security error: {0}")]
    #[diagnostic(code(xfi::config::security))]
    Security(#[from] SecurityError),

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(xfi::config::io))]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Creates a configuration error.
    pub fn bad_config(message: impl Into<String>) -> Self {
        Self::BadConfig(message.into())
    }

    /// Creates a fetch error.
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::ConfigFetchFailed(message.into())
    }
}
