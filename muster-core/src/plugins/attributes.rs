//! The fixed `attributes` handler.
//!
//! Serves `attributes/{all,current,expression}` for nodes and
//! `attributes/{all,current}` for node groups: retrieval emits one
//! attribute view per target, update merges the input payload into the
//! store and returns the post-update view. Attribute expression
//! expansion is the store's concern; `expression` reads the same view
//! as `current`.

use async_trait::async_trait;
use muster_plugin_sdk::{
    item_stream, ApiError, AttrValue, Plugin, PluginRequest, ResponseItem, ResponseStream,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub struct AttributesPlugin;

fn attr_view(attributes: &HashMap<String, AttrValue>) -> Map<String, Value> {
    let mut kv = Map::new();
    for (name, attr) in attributes {
        kv.insert(name.clone(), attr.value.clone());
    }
    kv
}

/// The group name for a group-scoped invocation; the element there is
/// the full path, `nodegroups/<group>/attributes/<view>`.
fn group_from_element(element: &[String]) -> Result<&str, ApiError> {
    match element {
        [root, group, ..] if root == "nodegroups" => Ok(group),
        _ => Err(ApiError::InvalidArgument(
            "attribute handler invoked on an unrecognized element".to_string(),
        )),
    }
}

impl AttributesPlugin {
    async fn node_views(&self, request: &PluginRequest) -> Result<Vec<ResponseItem>, ApiError> {
        let nodes = request.nodes().to_vec();
        let snapshot = request
            .configmanager
            .get_node_attributes(&nodes, &[])
            .await?;
        let empty = HashMap::new();
        Ok(nodes
            .iter()
            .map(|node| {
                let attributes = snapshot.get(node).unwrap_or(&empty);
                ResponseItem::attributes(Some(node), attr_view(attributes))
            })
            .collect())
    }

    async fn group_view(&self, request: &PluginRequest) -> Result<Vec<ResponseItem>, ApiError> {
        let group = group_from_element(&request.element)?;
        let attributes = request.configmanager.get_group_attributes(group).await?;
        Ok(vec![ResponseItem::attributes(None, attr_view(&attributes))])
    }
}

#[async_trait]
impl Plugin for AttributesPlugin {
    fn name(&self) -> &str {
        "attributes"
    }

    async fn retrieve(&self, request: PluginRequest) -> Result<ResponseStream, ApiError> {
        let items = if request.nodes.is_some() {
            self.node_views(&request).await?
        } else {
            self.group_view(&request).await?
        };
        Ok(item_stream(items))
    }

    async fn update(&self, request: PluginRequest) -> Result<ResponseStream, ApiError> {
        let attribs = request.inputdata.require_object()?.clone();
        if request.nodes.is_some() {
            let mut attribmap = HashMap::new();
            for node in request.nodes() {
                attribmap.insert(node.clone(), attribs.clone());
            }
            request.configmanager.add_node_attributes(attribmap).await?;
            Ok(item_stream(self.node_views(&request).await?))
        } else {
            let group = group_from_element(&request.element)?.to_string();
            let mut attribmap = HashMap::new();
            attribmap.insert(group, attribs);
            request
                .configmanager
                .add_group_attributes(attribmap)
                .await?;
            Ok(item_stream(self.group_view(&request).await?))
        }
    }
}
