//! # Response Messages Module
//!
//! The response item sum type flowing through every result stream, and
//! the opaque input payload wrapper handed to handlers.
//!
//! ## Overview
//!
//! Every operation in the resource tree ultimately produces a lazy
//! sequence of [`ResponseItem`]s:
//! - **ChildCollection**: one entry of a collection listing
//! - **Attributes / CryptedAttributes**: attribute views; crypted values
//!   only ever carry a `{cryptvalue: true}` marker, never the stored hash
//! - **CreatedResource / DeletedResource**: lifecycle acknowledgements
//! - **KeyValueData**: free-form key/value results (e.g. range
//!   abbreviation)
//! - **Console**: a console session handle passed through untouched
//! - **NodeError / ResourceUnavailable**: per-node failures that flow as
//!   items so fan-out semantics survive partial failure
//!
//! Items carry an optional `node` tag. When a request addresses exactly
//! one node the executor strips the tag ([`ResponseItem::strip_node`]);
//! range requests keep it so callers can attribute interleaved items.
//!
//! All variants serialize with serde and cross the collective wire in
//! MessagePack framing, so the set here is the complete vocabulary a
//! peer may emit.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single element of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseItem {
    /// One child entry of a collection listing
    ChildCollection {
        name: String,
        #[serde(default)]
        deletable: bool,
    },
    /// Plain attribute key/value view
    Attributes {
        #[serde(default)]
        node: Option<String>,
        kv: Map<String, Value>,
        #[serde(default)]
        desc: Option<String>,
    },
    /// Attribute view whose values are stored encrypted; the payload
    /// only marks presence, it never reveals the stored secret
    CryptedAttributes {
        #[serde(default)]
        node: Option<String>,
        kv: Map<String, Value>,
        #[serde(default)]
        desc: Option<String>,
    },
    /// Acknowledgement that a resource was created
    CreatedResource { name: String },
    /// Acknowledgement that a resource was deleted
    DeletedResource { name: String },
    /// Free-form key/value payload
    KeyValueData {
        #[serde(default)]
        node: Option<String>,
        kv: Map<String, Value>,
    },
    /// A live console session handle; the front-end upgrades this to an
    /// interactive channel, so the executor must pass it through as-is
    Console { session: String },
    /// Per-node error, emitted as a stream item rather than raised
    NodeError {
        #[serde(default)]
        node: Option<String>,
        error: String,
    },
    /// Per-node unavailability (dead peer, unreachable BMC)
    ResourceUnavailable {
        #[serde(default)]
        node: Option<String>,
        error: String,
    },
}

impl ResponseItem {
    pub fn child_collection(name: impl Into<String>, deletable: bool) -> Self {
        ResponseItem::ChildCollection {
            name: name.into(),
            deletable,
        }
    }

    pub fn attributes(node: Option<&str>, kv: Map<String, Value>) -> Self {
        ResponseItem::Attributes {
            node: node.map(str::to_string),
            kv,
            desc: None,
        }
    }

    pub fn attributes_desc(node: Option<&str>, kv: Map<String, Value>, desc: &str) -> Self {
        ResponseItem::Attributes {
            node: node.map(str::to_string),
            kv,
            desc: Some(desc.to_string()),
        }
    }

    pub fn crypted_attributes(node: Option<&str>, kv: Map<String, Value>, desc: &str) -> Self {
        ResponseItem::CryptedAttributes {
            node: node.map(str::to_string),
            kv,
            desc: Some(desc.to_string()),
        }
    }

    pub fn created(name: impl Into<String>) -> Self {
        ResponseItem::CreatedResource { name: name.into() }
    }

    pub fn deleted(name: impl Into<String>) -> Self {
        ResponseItem::DeletedResource { name: name.into() }
    }

    pub fn key_value(node: Option<&str>, kv: Map<String, Value>) -> Self {
        ResponseItem::KeyValueData {
            node: node.map(str::to_string),
            kv,
        }
    }

    pub fn node_error(node: &str, error: impl Into<String>) -> Self {
        ResponseItem::NodeError {
            node: Some(node.to_string()),
            error: error.into(),
        }
    }

    pub fn resource_unavailable(node: &str, error: impl Into<String>) -> Self {
        ResponseItem::ResourceUnavailable {
            node: Some(node.to_string()),
            error: error.into(),
        }
    }

    /// The node this item is attributed to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            ResponseItem::Attributes { node, .. }
            | ResponseItem::CryptedAttributes { node, .. }
            | ResponseItem::KeyValueData { node, .. }
            | ResponseItem::NodeError { node, .. }
            | ResponseItem::ResourceUnavailable { node, .. } => node.as_deref(),
            _ => None,
        }
    }

    /// Remove per-node framing.
    ///
    /// Used when a request addressed a single specific node, so the
    /// caller already knows who every item belongs to. Console handles
    /// are exempt; they carry no node tag in the first place.
    pub fn strip_node(&mut self) {
        match self {
            ResponseItem::Attributes { node, .. }
            | ResponseItem::CryptedAttributes { node, .. }
            | ResponseItem::KeyValueData { node, .. }
            | ResponseItem::NodeError { node, .. }
            | ResponseItem::ResourceUnavailable { node, .. } => *node = None,
            _ => {}
        }
    }

    pub fn is_console(&self) -> bool {
        matches!(self, ResponseItem::Console { .. })
    }
}

/// Opaque structured payload accompanying a request.
///
/// The core treats input as a JSON document and only interprets the few
/// keys the routing layer itself consumes (`name` on creation, `nodes`
/// on range abbreviation). Everything else rides through to the plugin
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputData(Option<Value>);

impl InputData {
    pub fn new(data: Option<Value>) -> Self {
        InputData(data)
    }

    pub fn none() -> Self {
        InputData(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn raw(&self) -> Option<&Value> {
        self.0.as_ref()
    }

    /// The payload as an attribute map, or InvalidArgument when the
    /// operation required a body and none (or a non-object) was given.
    pub fn require_object(&self) -> Result<&Map<String, Value>, ApiError> {
        match &self.0 {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(ApiError::InvalidArgument(
                "Request requires a JSON object body".to_string(),
            )),
        }
    }

    /// Split a creation payload into the mandatory `name` and the
    /// remaining attribute map.
    pub fn take_name(&self) -> Result<(String, Map<String, Value>), ApiError> {
        let mut attribs = self.require_object()?.clone();
        match attribs.remove("name") {
            Some(Value::String(name)) if !name.is_empty() => Ok((name, attribs)),
            _ => Err(ApiError::InvalidArgument("name not specified".to_string())),
        }
    }

    /// The `nodes` key as a list, accepting either a JSON array of
    /// strings or a single comma-separated string.
    pub fn node_list(&self) -> Result<Vec<String>, ApiError> {
        let map = self.require_object()?;
        match map.get("nodes") {
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(ApiError::InvalidArgument(
                        "nodes entries must be strings".to_string(),
                    )),
                })
                .collect(),
            Some(Value::String(list)) => {
                Ok(list.split(',').map(str::to_string).collect())
            }
            _ => Err(ApiError::InvalidArgument(
                "Must be given list of nodes under key named nodes".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kv(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        map
    }

    #[test]
    fn test_strip_node_clears_attribution() {
        let mut item = ResponseItem::attributes(Some("n1"), kv("power", json!("on")));
        assert_eq!(item.node(), Some("n1"));
        item.strip_node();
        assert_eq!(item.node(), None);
    }

    #[test]
    fn test_strip_node_leaves_console_untouched() {
        let mut item = ResponseItem::Console {
            session: "console/n1".to_string(),
        };
        item.strip_node();
        assert!(item.is_console());
    }

    #[test]
    fn test_response_item_serde_round_trip() {
        let items = vec![
            ResponseItem::child_collection("nodes/", false),
            ResponseItem::attributes(Some("n1"), kv("state", json!("off"))),
            ResponseItem::node_error("n2", "frob is not a supported plugin"),
            ResponseItem::created("alice"),
        ];
        for item in items {
            let encoded = serde_json::to_string(&item).unwrap();
            let decoded: ResponseItem = serde_json::from_str(&encoded).unwrap();
            assert_eq!(item, decoded);
        }
    }

    #[test]
    fn test_take_name_splits_payload() {
        let input = InputData::new(Some(json!({"name": "n1", "groups": ["rack1"]})));
        let (name, rest) = input.take_name().unwrap();
        assert_eq!(name, "n1");
        assert!(rest.contains_key("groups"));
        assert!(!rest.contains_key("name"));
    }

    #[test]
    fn test_take_name_requires_name() {
        let input = InputData::new(Some(json!({"groups": []})));
        assert!(matches!(
            input.take_name(),
            Err(ApiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_node_list_accepts_string_or_array() {
        let arr = InputData::new(Some(json!({"nodes": ["n1", "n2"]})));
        assert_eq!(arr.node_list().unwrap(), vec!["n1", "n2"]);

        let csv = InputData::new(Some(json!({"nodes": "n1,n2"})));
        assert_eq!(csv.node_list().unwrap(), vec!["n1", "n2"]);
    }
}
