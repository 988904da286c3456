//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use muster_core::{Core, MemoryConfigManager};
use muster_plugin_sdk::{
    item_stream, ApiError, ConfigManager, Plugin, PluginRegistry, PluginRequest, ResponseItem,
    ResponseStream,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One recorded handler invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub nodes: Vec<String>,
    pub element: Vec<String>,
}

/// A hardware-management plugin double: answers retrieve with one
/// power-state attribute item per node and records every invocation.
pub struct FakeHwPlugin {
    name: &'static str,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl FakeHwPlugin {
    pub fn new(name: &'static str) -> (Arc<Self>, Arc<Mutex<Vec<Invocation>>>) {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(FakeHwPlugin {
                name,
                invocations: invocations.clone(),
            }),
            invocations,
        )
    }

    fn record(&self, request: &PluginRequest) {
        self.invocations
            .lock()
            .expect("invocation log poisoned")
            .push(Invocation {
                nodes: request.nodes().to_vec(),
                element: request.element.clone(),
            });
    }
}

#[async_trait]
impl Plugin for FakeHwPlugin {
    fn name(&self) -> &str {
        self.name
    }

    async fn retrieve(&self, request: PluginRequest) -> Result<ResponseStream, ApiError> {
        self.record(&request);
        let items = request
            .nodes()
            .iter()
            .map(|node| {
                let mut kv = Map::new();
                kv.insert("state".to_string(), json!("on"));
                ResponseItem::attributes(Some(node), kv)
            })
            .collect();
        Ok(item_stream(items))
    }
}

/// Seed one node with attribute key/value pairs.
pub async fn seed_node(store: &MemoryConfigManager, node: &str, attrs: &[(&str, Value)]) {
    let mut attribmap = HashMap::new();
    attribmap.insert(
        node.to_string(),
        attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<Map<String, Value>>(),
    );
    store.add_node_attributes(attribmap).await.unwrap();
}

/// Drain a stream, panicking on the first error item.
pub async fn collect_ok(stream: ResponseStream) -> Vec<ResponseItem> {
    use futures::StreamExt;
    stream.map(|item| item.unwrap()).collect().await
}

/// Drain a stream keeping errors.
pub async fn collect(stream: ResponseStream) -> Vec<Result<ResponseItem, ApiError>> {
    use futures::StreamExt;
    stream.collect().await
}

/// A core over a fresh store with ipmi/redfish doubles registered.
#[allow(clippy::type_complexity)]
pub fn hw_core() -> (
    Arc<Core>,
    Arc<MemoryConfigManager>,
    Arc<Mutex<Vec<Invocation>>>,
    Arc<Mutex<Vec<Invocation>>>,
) {
    let store = Arc::new(MemoryConfigManager::new());
    let (ipmi, ipmi_log) = FakeHwPlugin::new("ipmi");
    let (redfish, redfish_log) = FakeHwPlugin::new("redfish");
    let registry = PluginRegistry::builder()
        .register(ipmi)
        .register(redfish)
        .register(Arc::new(muster_core::plugins::AttributesPlugin))
        .build();
    let core = Core::builder(store.clone()).with_registry(registry).build();
    (core, store, ipmi_log, redfish_log)
}
