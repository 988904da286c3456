//! # Plugin Interface Module
//!
//! The hardware-management plugin abstraction.
//!
//! ## Overview
//!
//! A plugin is a pluggable backend (IPMI, Redfish, a shell wrapper)
//! selected per node from node attributes. Every plugin exposes the
//! same four verbs; a verb a plugin does not override answers
//! [`ApiError::NotImplemented`]: implement what you support, inherit
//! the rest.
//!
//! Results are lazy: each verb returns a [`ResponseStream`], a pinned
//! boxed stream of response items. Console sessions and long sensor
//! reads are naturally unbounded, so nothing in the pipeline may
//! materialize a stream into a list.
//!
//! ## Implementing a plugin
//!
//! ```rust
//! use muster_plugin_sdk::{item_stream, ApiError, Plugin, PluginRequest, ResponseItem, ResponseStream};
//!
//! struct PowerPlugin;
//!
//! #[async_trait::async_trait]
//! impl Plugin for PowerPlugin {
//!     fn name(&self) -> &str {
//!         "ipmi"
//!     }
//!
//!     async fn retrieve(&self, request: PluginRequest) -> Result<ResponseStream, ApiError> {
//!         let items = request
//!             .nodes()
//!             .iter()
//!             .map(|node| {
//!                 let mut kv = serde_json::Map::new();
//!                 kv.insert("state".into(), "on".into());
//!                 ResponseItem::attributes(Some(node), kv)
//!             })
//!             .collect();
//!         Ok(item_stream(items))
//!     }
//! }
//! ```

use crate::config::ConfigManager;
use crate::error::ApiError;
use crate::messages::{InputData, ResponseItem};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

/// Lazy sequence of response items; the universal result shape.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseItem, ApiError>> + Send>>;

/// The four verbs a route may be driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Retrieve,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Retrieve => "retrieve",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "retrieve" => Ok(Operation::Retrieve),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(ApiError::InvalidArgument(format!(
                "Unknown operation: {other}"
            ))),
        }
    }
}

/// Everything a plugin invocation receives.
#[derive(Clone)]
pub struct PluginRequest {
    /// Target nodes in input order; `None` for group-scoped invocations
    pub nodes: Option<Vec<String>>,
    /// Path components remaining after schema consumption
    pub element: Vec<String>,
    /// Opaque structured payload
    pub inputdata: InputData,
    /// Attribute-store handle, consistent for the request's duration
    pub configmanager: Arc<dyn ConfigManager>,
}

impl PluginRequest {
    /// Target nodes, empty when the invocation is not node-scoped.
    pub fn nodes(&self) -> &[String] {
        self.nodes.as_deref().unwrap_or(&[])
    }
}

/// A pluggable hardware-management backend.
///
/// Verbs default to NotImplemented; a plugin overrides the ones it
/// supports. `names` lets a plugin advertise alias names to be indexed
/// under in addition to its primary name.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Primary name the plugin registers under.
    fn name(&self) -> &str;

    /// All names this plugin should be indexed under.
    fn names(&self) -> Vec<String> {
        vec![self.name().to_string()]
    }

    async fn create(&self, _request: PluginRequest) -> Result<ResponseStream, ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn retrieve(&self, _request: PluginRequest) -> Result<ResponseStream, ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn update(&self, _request: PluginRequest) -> Result<ResponseStream, ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn delete(&self, _request: PluginRequest) -> Result<ResponseStream, ApiError> {
        Err(ApiError::NotImplemented)
    }

    /// Dispatch one of the four verbs by [`Operation`].
    async fn invoke(
        &self,
        operation: Operation,
        request: PluginRequest,
    ) -> Result<ResponseStream, ApiError> {
        match operation {
            Operation::Create => self.create(request).await,
            Operation::Retrieve => self.retrieve(request).await,
            Operation::Update => self.update(request).await,
            Operation::Delete => self.delete(request).await,
        }
    }
}

/// A ready-made stream over already-known items.
pub fn item_stream(items: Vec<ResponseItem>) -> ResponseStream {
    Box::pin(futures::stream::iter(items.into_iter().map(Ok)))
}

/// A stream of exactly one item.
pub fn once_stream(item: ResponseItem) -> ResponseStream {
    item_stream(vec![item])
}

/// A stream with nothing in it.
pub fn empty_stream() -> ResponseStream {
    item_stream(Vec::new())
}
