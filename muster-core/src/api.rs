//! # Request Entry Point
//!
//! [`Core`] owns everything a request needs: the plugin registry, the
//! attribute store, the optional collective identity, and the injected
//! collaborators for the resource roots this crate does not implement
//! itself (discovery, networking, alert decoding).
//!
//! ## Overview
//!
//! A request flows `handle_request` → path parse → resolver → executor
//! → lazy response stream. The builder mirrors the client construction
//! pattern used across the codebase: assemble collaborators, then
//! `build()` into an immutable facade that is cheap to share.
//!
//! Nothing here is global. Every handle a request touches travels
//! through `Core`, so two cores with different stores or registries can
//! coexist in one process (the tests lean on this heavily).

use crate::collective::CollectiveConfig;
use crate::schema::ROOT_COLLECTIONS;
use crate::users;
use async_trait::async_trait;
use muster_plugin_sdk::{
    item_stream, once_stream, ApiError, ConfigManager, InputData, Operation, PluginRegistry,
    ResponseItem, ResponseStream,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// A resource root serviced outside this crate (discovery, networking).
#[async_trait]
pub trait ApiCollaborator: Send + Sync {
    async fn handle_api_request(
        &self,
        configmanager: Arc<dyn ConfigManager>,
        inputdata: InputData,
        operation: Operation,
        pathcomponents: Vec<String>,
    ) -> Result<ResponseStream, ApiError>;
}

/// Decoder for `PUT /events/decode` payloads.
#[async_trait]
pub trait AlertDecoder: Send + Sync {
    async fn decode_alert(
        &self,
        inputdata: InputData,
        configmanager: Arc<dyn ConfigManager>,
    ) -> Result<ResponseStream, ApiError>;
}

/// Service-wide preconditions checked before any node dispatch.
pub trait HealthMonitor: Send + Sync {
    /// True when the log store is out of space; node requests abort
    /// with TargetResourceUnavailable until an operator intervenes.
    fn log_store_full(&self) -> bool;
}

/// The routing and dispatch core.
pub struct Core {
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) config: Arc<dyn ConfigManager>,
    pub(crate) collective: Option<CollectiveConfig>,
    pub(crate) discovery: Option<Arc<dyn ApiCollaborator>>,
    pub(crate) networking: Option<Arc<dyn ApiCollaborator>>,
    pub(crate) alert_decoder: Option<Arc<dyn AlertDecoder>>,
    pub(crate) health: Option<Arc<dyn HealthMonitor>>,
    pub(crate) version: String,
}

impl Core {
    pub fn builder(config: Arc<dyn ConfigManager>) -> CoreBuilder {
        CoreBuilder {
            registry: None,
            config,
            collective: None,
            discovery: None,
            networking: None,
            alert_decoder: None,
            health: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn config_manager(&self) -> Arc<dyn ConfigManager> {
        self.config.clone()
    }

    /// This member's name within the collective, when one is configured.
    pub(crate) fn local_member(&self) -> Option<&str> {
        self.collective.as_ref().map(|c| c.member_name.as_str())
    }

    /// Given a full path request, return a lazy response stream.
    ///
    /// `autostrip` removes per-node framing when the request addresses
    /// a single specific node; range requests always keep it.
    pub async fn handle_request(
        &self,
        path: &str,
        operation: Operation,
        inputdata: Option<Value>,
        autostrip: bool,
    ) -> Result<ResponseStream, ApiError> {
        let request_id = Uuid::new_v4();
        tracing::debug!(%request_id, %path, %operation, "handling api request");

        let mut pathcomponents: Vec<String> = path.split('/').map(str::to_string).collect();
        if pathcomponents.first().is_some_and(|s| s.is_empty()) {
            pathcomponents.remove(0);
        }
        if pathcomponents.last().is_some_and(|s| s.is_empty()) {
            pathcomponents.pop();
        }
        let inputdata = InputData::new(inputdata);

        if pathcomponents.is_empty() {
            // root collection list
            let items = ROOT_COLLECTIONS
                .iter()
                .map(|name| ResponseItem::child_collection(*name, false))
                .collect();
            return Ok(item_stream(items));
        }
        match pathcomponents[0].as_str() {
            "nodes" | "noderange" => {
                self.handle_node_request(pathcomponents, operation, inputdata, autostrip)
                    .await
            }
            "nodegroups" => {
                self.handle_nodegroup_request(pathcomponents, operation, inputdata)
                    .await
            }
            "users" => users::handle_user_request(self, pathcomponents, operation, inputdata).await,
            "events" => self.handle_event_request(pathcomponents, operation, inputdata).await,
            "discovery" => match &self.discovery {
                Some(collaborator) => {
                    collaborator
                        .handle_api_request(
                            self.config.clone(),
                            inputdata,
                            operation,
                            pathcomponents,
                        )
                        .await
                }
                None => Err(ApiError::NotFound("Invalid element requested".to_string())),
            },
            "networking" => match &self.networking {
                Some(collaborator) => {
                    collaborator
                        .handle_api_request(
                            self.config.clone(),
                            inputdata,
                            operation,
                            pathcomponents,
                        )
                        .await
                }
                None => Err(ApiError::NotFound("Invalid element requested".to_string())),
            },
            "version" => {
                let mut kv = Map::new();
                kv.insert("version".to_string(), Value::String(self.version.clone()));
                Ok(once_stream(ResponseItem::attributes(None, kv)))
            }
            _ => Err(ApiError::NotFound("Invalid element requested".to_string())),
        }
    }

    async fn handle_event_request(
        &self,
        pathcomponents: Vec<String>,
        operation: Operation,
        inputdata: InputData,
    ) -> Result<ResponseStream, ApiError> {
        let Some(element) = pathcomponents.get(1) else {
            if operation != Operation::Retrieve {
                return Err(ApiError::InvalidArgument("Target is read-only".to_string()));
            }
            return Ok(once_stream(ResponseItem::child_collection("decode", false)));
        };
        if element != "decode" {
            return Err(ApiError::NotFound("Invalid element requested".to_string()));
        }
        if operation != Operation::Update {
            return Err(ApiError::NotImplemented);
        }
        match &self.alert_decoder {
            Some(decoder) => decoder.decode_alert(inputdata, self.config.clone()).await,
            None => Err(ApiError::NotImplemented),
        }
    }
}

/// Assembles a [`Core`]; collaborators default to absent.
pub struct CoreBuilder {
    registry: Option<Arc<PluginRegistry>>,
    config: Arc<dyn ConfigManager>,
    collective: Option<CollectiveConfig>,
    discovery: Option<Arc<dyn ApiCollaborator>>,
    networking: Option<Arc<dyn ApiCollaborator>>,
    alert_decoder: Option<Arc<dyn AlertDecoder>>,
    health: Option<Arc<dyn HealthMonitor>>,
    version: String,
}

impl CoreBuilder {
    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_collective(mut self, collective: CollectiveConfig) -> Self {
        self.collective = Some(collective);
        self
    }

    pub fn with_discovery(mut self, collaborator: Arc<dyn ApiCollaborator>) -> Self {
        self.discovery = Some(collaborator);
        self
    }

    pub fn with_networking(mut self, collaborator: Arc<dyn ApiCollaborator>) -> Self {
        self.networking = Some(collaborator);
        self
    }

    pub fn with_alert_decoder(mut self, decoder: Arc<dyn AlertDecoder>) -> Self {
        self.alert_decoder = Some(decoder);
        self
    }

    pub fn with_health_monitor(mut self, health: Arc<dyn HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn build(self) -> Arc<Core> {
        Arc::new(Core {
            registry: self
                .registry
                .unwrap_or_else(|| PluginRegistry::builder().build()),
            config: self.config,
            collective: self.collective,
            discovery: self.discovery,
            networking: self.networking,
            alert_decoder: self.alert_decoder,
            health: self.health,
            version: self.version,
        })
    }
}
