//! Minimal in-crate test doubles.

use crate::config::{AttributeSnapshot, AttrValue, CollectiveMember, ConfigManager, UserRecord};
use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A config manager that knows nothing; every mutation is rejected.
pub fn unconfigured_manager() -> Arc<dyn ConfigManager> {
    Arc::new(Unconfigured)
}

struct Unconfigured;

#[async_trait]
impl ConfigManager for Unconfigured {
    async fn get_node_attributes(
        &self,
        _nodes: &[String],
        _attrs: &[String],
    ) -> Result<AttributeSnapshot, ApiError> {
        Ok(HashMap::new())
    }

    async fn add_node_attributes(
        &self,
        _attribmap: HashMap<String, Map<String, Value>>,
    ) -> Result<(), ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn del_nodes(&self, _nodes: &[String]) -> Result<(), ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn is_node(&self, _node: &str) -> bool {
        false
    }

    async fn list_nodes(&self) -> Vec<String> {
        Vec::new()
    }

    async fn add_group_attributes(
        &self,
        _attribmap: HashMap<String, Map<String, Value>>,
    ) -> Result<(), ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn get_group_attributes(
        &self,
        _group: &str,
    ) -> Result<HashMap<String, AttrValue>, ApiError> {
        Ok(HashMap::new())
    }

    async fn del_groups(&self, _groups: &[String]) -> Result<(), ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn is_nodegroup(&self, _group: &str) -> bool {
        false
    }

    async fn list_groups(&self) -> Vec<String> {
        Vec::new()
    }

    async fn group_members(&self, _group: &str) -> Vec<String> {
        Vec::new()
    }

    async fn list_users(&self) -> Vec<String> {
        Vec::new()
    }

    async fn get_user(&self, _name: &str) -> Option<UserRecord> {
        None
    }

    async fn create_user(
        &self,
        _name: &str,
        _attributes: Map<String, Value>,
    ) -> Result<(), ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn set_user(&self, _name: &str, _attributes: Map<String, Value>) -> Result<(), ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn del_user(&self, _name: &str) -> Result<(), ApiError> {
        Err(ApiError::NotImplemented)
    }

    async fn get_collective_member(&self, _name: &str) -> Option<CollectiveMember> {
        None
    }

    async fn list_collective(&self) -> Vec<String> {
        Vec::new()
    }

    async fn check_quorum(&self) -> Result<(), ApiError> {
        Ok(())
    }
}
