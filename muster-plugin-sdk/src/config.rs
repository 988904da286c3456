//! # Attribute Store Interface
//!
//! The [`ConfigManager`] trait is the seam between the dispatch core and
//! the cluster's attribute store: node and group attributes, user
//! accounts, collective membership, and the quorum predicate.
//!
//! The store itself lives outside this crate; the core only ever talks
//! to it through this interface and receives the registry of collective
//! members explicitly rather than through process globals. Snapshot
//! semantics matter: the executor fetches every attribute it needs for a
//! request in a single [`ConfigManager::get_node_attributes`] batch so
//! handler selection stays consistent for the request's duration.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A single node attribute value.
///
/// Attributes are JSON-typed; plugin selection only ever reads the
/// string form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrValue {
    pub value: Value,
}

impl AttrValue {
    pub fn string(value: impl Into<String>) -> Self {
        AttrValue {
            value: Value::String(value.into()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// A stored user account.
///
/// The password never leaves the store in clear or hashed form through
/// the API; `cryptpass` presence is all retrieval may reveal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    pub cryptpass: Option<String>,
    pub attributes: Map<String, Value>,
}

/// One member of the trust-federated collective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectiveMember {
    pub name: String,
    pub address: String,
    /// Pinned certificate fingerprint, `sha256$<hex>`
    pub fingerprint: String,
}

/// Batch snapshot of node attributes: node → attribute name → value.
pub type AttributeSnapshot = HashMap<String, HashMap<String, AttrValue>>;

/// Interface to the cluster attribute store.
///
/// Implementations must be safe for concurrent use; the executor calls
/// into the store from many worker tasks of the same request.
#[async_trait]
pub trait ConfigManager: Send + Sync {
    /// Tenant this manager is scoped to, if multi-tenancy is active.
    fn tenant(&self) -> Option<String> {
        None
    }

    /// Fetch the given attributes for the given nodes in one batch.
    /// An empty `attrs` slice fetches every attribute of each node.
    async fn get_node_attributes(
        &self,
        nodes: &[String],
        attrs: &[String],
    ) -> Result<AttributeSnapshot, ApiError>;

    /// Merge attributes into nodes, creating nodes that do not exist.
    async fn add_node_attributes(
        &self,
        attribmap: HashMap<String, Map<String, Value>>,
    ) -> Result<(), ApiError>;

    async fn del_nodes(&self, nodes: &[String]) -> Result<(), ApiError>;

    async fn is_node(&self, node: &str) -> bool;

    async fn list_nodes(&self) -> Vec<String>;

    /// Merge attributes into groups, creating groups that do not exist.
    async fn add_group_attributes(
        &self,
        attribmap: HashMap<String, Map<String, Value>>,
    ) -> Result<(), ApiError>;

    async fn get_group_attributes(
        &self,
        group: &str,
    ) -> Result<HashMap<String, AttrValue>, ApiError>;

    async fn del_groups(&self, groups: &[String]) -> Result<(), ApiError>;

    async fn is_nodegroup(&self, group: &str) -> bool;

    async fn list_groups(&self) -> Vec<String>;

    /// Member nodes of a group, in stored order.
    async fn group_members(&self, group: &str) -> Vec<String>;

    async fn list_users(&self) -> Vec<String>;

    async fn get_user(&self, name: &str) -> Option<UserRecord>;

    async fn create_user(
        &self,
        name: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), ApiError>;

    async fn set_user(&self, name: &str, attributes: Map<String, Value>) -> Result<(), ApiError>;

    async fn del_user(&self, name: &str) -> Result<(), ApiError>;

    /// Look up a collective member record by name.
    async fn get_collective_member(&self, name: &str) -> Option<CollectiveMember>;

    /// Names of every configured collective member; empty when no
    /// collective is configured.
    async fn list_collective(&self) -> Vec<String>;

    /// Liveness predicate over the collective. Returns
    /// [`ApiError::TargetResourceUnavailable`] when quorum is lost;
    /// trivially succeeds outside collective mode.
    async fn check_quorum(&self) -> Result<(), ApiError>;
}
