//! Plugin trait and helpers.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::PluginError;
use crate::fact::FactProvider;
use crate::operator::OperatorProvider;

/// Context handed to plugin initializers.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// Archetype the run was invoked with, when known at registration time.
    pub archetype: Option<String>,

    /// Free-form options forwarded from the caller.
    pub options: Value,
}

/// A plugin: a named, versioned bundle of facts and operators with an
/// optional asynchronous initializer and a cleanup hook.
pub trait XfiPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn facts(&self) -> Vec<Arc<dyn FactProvider>> {
        Vec::new()
    }

    fn operators(&self) -> Vec<Arc<dyn OperatorProvider>> {
        Vec::new()
    }

    /// Deferred initialization work, if any. `None` means the plugin is
    /// ready as soon as it is registered. The registry spawns the returned
    /// future and tracks its completion in the plugin's state slot.
    fn initialize(
        &self,
        _ctx: &PluginContext,
    ) -> Option<BoxFuture<'static, Result<(), PluginError>>> {
        None
    }

    /// Invoked by `PluginRegistry::cleanup_all` at the end of a run.
    fn cleanup(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A plugin assembled from parts, for builtin plugins and tests.
pub struct SimplePlugin {
    name: String,
    version: String,
    facts: Vec<Arc<dyn FactProvider>>,
    operators: Vec<Arc<dyn OperatorProvider>>,
}

impl SimplePlugin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            facts: Vec::new(),
            operators: Vec::new(),
        }
    }

    pub fn with_fact(mut self, fact: Arc<dyn FactProvider>) -> Self {
        self.facts.push(fact);
        self
    }

    pub fn with_operator(mut self, operator: Arc<dyn OperatorProvider>) -> Self {
        self.operators.push(operator);
        self
    }
}

impl XfiPlugin for SimplePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn facts(&self) -> Vec<Arc<dyn FactProvider>> {
        self.facts.clone()
    }

    fn operators(&self) -> Vec<Arc<dyn OperatorProvider>> {
        self.operators.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FnFact;
    use crate::operator::FnOperator;
    use serde_json::json;

    #[test]
    fn test_simple_plugin() {
        let plugin = SimplePlugin::new("xfiPluginAst", "1.0.0")
            .with_fact(Arc::new(FnFact::new("astComplexity", |_, _| Ok(json!(1)))))
            .with_operator(Arc::new(FnOperator::new("astEqual", |a, b| a == b)));

        assert_eq!(plugin.name(), "xfiPluginAst");
        assert_eq!(plugin.version(), "1.0.0");
        assert_eq!(plugin.facts().len(), 1);
        assert_eq!(plugin.operators().len(), 1);
        assert!(plugin.initialize(&PluginContext::default()).is_none());
        assert!(plugin.cleanup().is_ok());
    }
}
