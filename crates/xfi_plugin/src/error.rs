//! Plugin error types.

use thiserror::Error;

/// Errors raised by the plugin registry and plugin lifecycle hooks.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin descriptor is malformed (missing name or version).
    #[error("Invalid plugin: {0}")]
    InvalidPlugin(String),

    /// The plugin's asynchronous initializer rejected.
    #[error("Plugin '{plugin}' failed to initialize: {message}")]
    InitFailed { plugin: String, message: String },

    /// No plugin registered under this name.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// The plugin's cleanup hook failed. Logged, never fatal.
    #[error("Plugin '{plugin}' cleanup failed: {message}")]
    CleanupFailed { plugin: String, message: String },
}

impl PluginError {
    /// Creates an initialization failure for the given plugin.
    pub fn init_failed(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InitFailed {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}
