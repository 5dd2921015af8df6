//! # xfi_plugin
//!
//! Plugin system for the x-fidelity analysis engine.
//!
//! This crate provides:
//! - The `FactProvider` and `OperatorProvider` contracts plugins implement
//! - The `XfiPlugin` trait bundling facts and operators with a lifecycle
//! - The `PluginRegistry` with observable asynchronous initialization
//!
//! Facts are synchronous functions from `(params, almanac)` to a JSON
//! value; any blocking I/O they perform happens on the evaluation worker
//! that requested them. Plugin *initialization* is asynchronous and tracked
//! per plugin, so callers wait on readiness explicitly instead of relying
//! on timing.
//!
//! ## Example
//!
//! ```rust,ignore
//! use xfi_plugin::{PluginContext, PluginRegistry};
//!
//! let registry = PluginRegistry::new();
//! registry.register(Arc::new(MyPlugin), &PluginContext::default())?;
//! registry.wait_for_all().await?;
//!
//! let facts = registry.plugin_facts();
//! ```

mod error;
mod fact;
mod operator;
mod plugin;
mod registry;

pub use error::PluginError;
pub use fact::{FactError, FactProvider, FactScope, FactValueSource, FnFact};
pub use operator::{FnOperator, OperatorProvider};
pub use plugin::{PluginContext, SimplePlugin, XfiPlugin};
pub use registry::{InitState, PluginRegistry};
