//! Plugin registry with observable asynchronous initialization.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::PluginError;
use crate::fact::FactProvider;
use crate::operator::OperatorProvider;
use crate::plugin::{PluginContext, XfiPlugin};

/// Initialization state of one registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Initializing,
    Completed,
    Failed(String),
}

struct PluginSlot {
    plugin: Arc<dyn XfiPlugin>,
    state_rx: watch::Receiver<InitState>,
}

#[derive(Default)]
struct RegistryInner {
    /// Registration order; aggregated views iterate in this order.
    order: Vec<String>,
    slots: HashMap<String, PluginSlot>,
}

/// Registry of plugins for one run.
///
/// `register` is synchronous; deferred initialization work is spawned onto
/// the ambient tokio runtime and its completion is published through a
/// per-plugin state slot. Registration and `reset` must not overlap with an
/// in-flight run; reads are safe from any thread.
#[derive(Default)]
pub struct PluginRegistry {
    inner: Mutex<RegistryInner>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin and kicks off its initializer.
    ///
    /// Fails with `InvalidPlugin` when name or version is empty. A
    /// duplicate name is a warning and a no-op, so whichever source
    /// registered the plugin first wins.
    pub fn register(
        &self,
        plugin: Arc<dyn XfiPlugin>,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        if name.is_empty() {
            return Err(PluginError::InvalidPlugin("missing plugin name".to_string()));
        }
        if plugin.version().is_empty() {
            return Err(PluginError::InvalidPlugin(format!(
                "plugin '{name}' is missing a version"
            )));
        }

        {
            let inner = self.inner.lock();
            if inner.slots.contains_key(&name) {
                warn!("Plugin '{}' already registered, skipping", name);
                return Ok(());
            }
        }

        let state_rx = match plugin.initialize(ctx) {
            None => {
                let (_tx, rx) = watch::channel(InitState::Completed);
                rx
            }
            Some(future) => {
                let (tx, rx) = watch::channel(InitState::Initializing);
                let task_name = name.clone();
                tokio::spawn(async move {
                    let state = match future.await {
                        Ok(()) => InitState::Completed,
                        Err(e) => {
                            warn!("Plugin '{}' initialization failed: {}", task_name, e);
                            InitState::Failed(e.to_string())
                        }
                    };
                    // Receivers outlive the registry entry; a closed channel
                    // just means nobody is waiting anymore.
                    let _ = tx.send(state);
                });
                rx
            }
        };

        debug!("Registered plugin '{}' v{}", name, plugin.version());
        let mut inner = self.inner.lock();
        if inner.slots.contains_key(&name) {
            warn!("Plugin '{}' already registered, skipping", name);
            return Ok(());
        }
        inner.order.push(name.clone());
        inner.slots.insert(name, PluginSlot { plugin, state_rx });
        Ok(())
    }

    /// Waits until the named plugin leaves `Initializing`, surfacing its
    /// initialization error if it failed.
    pub async fn wait_for_plugin(&self, name: &str) -> Result<(), PluginError> {
        let mut rx = {
            let inner = self.inner.lock();
            inner
                .slots
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?
                .state_rx
                .clone()
        };

        let settled = rx
            .wait_for(|state| !matches!(state, InitState::Initializing))
            .await
            .map_err(|_| PluginError::init_failed(name, "initializer dropped"))?
            .clone();

        match settled {
            InitState::Failed(message) => Err(PluginError::init_failed(name, message)),
            _ => Ok(()),
        }
    }

    /// Waits on every tracked initializer concurrently. All initializers
    /// settle before the first failure (in registration order) is
    /// surfaced. Safe to call repeatedly.
    pub async fn wait_for_all(&self) -> Result<(), PluginError> {
        let names: Vec<String> = self.inner.lock().order.clone();
        let waits = names.iter().map(|name| self.wait_for_plugin(name));
        let results = futures::future::join_all(waits).await;

        for result in results {
            result?;
        }
        Ok(())
    }

    /// Returns whether the plugin has left `Initializing`. `None` for an
    /// unknown name.
    pub fn is_ready(&self, name: &str) -> Option<bool> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(name)?;
        Some(!matches!(*slot.state_rx.borrow(), InitState::Initializing))
    }

    /// Current initialization state of the plugin.
    pub fn state(&self, name: &str) -> Option<InitState> {
        let inner = self.inner.lock();
        Some(inner.slots.get(name)?.state_rx.borrow().clone())
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn XfiPlugin>> {
        let inner = self.inner.lock();
        Some(Arc::clone(&inner.slots.get(name)?.plugin))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.lock().slots.contains_key(name)
    }

    /// Registered plugin names in insertion order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.inner.lock().order.clone()
    }

    /// All facts across registered plugins, in plugin insertion order.
    /// Entries without a name are skipped with a warning; the rest of the
    /// plugin is unaffected.
    pub fn plugin_facts(&self) -> Vec<Arc<dyn FactProvider>> {
        let inner = self.inner.lock();
        let mut facts = Vec::new();
        for name in &inner.order {
            let slot = &inner.slots[name];
            for fact in slot.plugin.facts() {
                if fact.name().is_empty() {
                    warn!("Plugin '{}' exposes a fact without a name, skipping", name);
                    continue;
                }
                facts.push(fact);
            }
        }
        facts
    }

    /// All operators across registered plugins, in plugin insertion order.
    pub fn plugin_operators(&self) -> Vec<Arc<dyn OperatorProvider>> {
        let inner = self.inner.lock();
        let mut operators = Vec::new();
        for name in &inner.order {
            let slot = &inner.slots[name];
            for operator in slot.plugin.operators() {
                if operator.name().is_empty() {
                    warn!(
                        "Plugin '{}' exposes an operator without a name, skipping",
                        name
                    );
                    continue;
                }
                operators.push(operator);
            }
        }
        operators
    }

    /// Invokes each plugin's cleanup hook. Failures are logged and do not
    /// abort cleanup of the remaining plugins.
    pub fn cleanup_all(&self) {
        let plugins: Vec<(String, Arc<dyn XfiPlugin>)> = {
            let inner = self.inner.lock();
            inner
                .order
                .iter()
                .map(|name| (name.clone(), Arc::clone(&inner.slots[name].plugin)))
                .collect()
        };

        for (name, plugin) in plugins {
            if let Err(e) = plugin.cleanup() {
                warn!("Plugin '{}' cleanup failed: {}", name, e);
            }
        }
    }

    /// Clears all registrations. Run boundaries only.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}
