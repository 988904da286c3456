//! Plugin registry: name → handler table.
//!
//! Registration happens exactly once at process start through the
//! builder; the built registry is published behind an `Arc` and never
//! mutated, so concurrent readers need no locks. The two synthetic
//! error handlers (bad plugin, missing collective manager) are NOT
//! registered here; the executor fabricates them per request so their
//! output is indistinguishable in shape from real per-node streams.

use crate::plugin::Plugin;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only mapping from plugin name (and aliases) to plugin.
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder {
            plugins: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered names, sorted for stable listings.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }
}

/// One-shot builder; consumed by [`PluginRegistryBuilder::build`].
pub struct PluginRegistryBuilder {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistryBuilder {
    /// Index the plugin under every name it advertises. A later
    /// registration of the same name wins, mirroring load order.
    pub fn register(mut self, plugin: Arc<dyn Plugin>) -> Self {
        for name in plugin.names() {
            if self.plugins.insert(name.clone(), plugin.clone()).is_some() {
                tracing::warn!(plugin = %name, "plugin name re-registered, later wins");
            }
        }
        self
    }

    pub fn build(self) -> Arc<PluginRegistry> {
        Arc::new(PluginRegistry {
            plugins: self.plugins,
        })
    }
}
