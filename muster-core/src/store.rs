//! In-memory attribute store.
//!
//! The reference [`ConfigManager`] implementation backing `musterd` and
//! the test suites. Tables are concurrent maps so worker tasks of one
//! request can read while another request mutates. Passwords are never
//! stored in clear: `create_user`/`set_user` pull the `password` key
//! out of the attribute map and keep only a salted SHA-256 hash.

use async_trait::async_trait;
use dashmap::DashMap;
use muster_plugin_sdk::{
    ApiError, AttrValue, AttributeSnapshot, CollectiveMember, ConfigManager, UserRecord,
};
use rand::Rng;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct GroupEntry {
    attributes: HashMap<String, AttrValue>,
    members: Vec<String>,
}

/// Concurrent in-memory implementation of [`ConfigManager`].
#[derive(Default)]
pub struct MemoryConfigManager {
    tenant: Option<String>,
    nodes: DashMap<String, HashMap<String, AttrValue>>,
    groups: DashMap<String, GroupEntry>,
    users: DashMap<String, UserRecord>,
    members: DashMap<String, CollectiveMember>,
    quorum_lost: AtomicBool,
}

impl MemoryConfigManager {
    pub fn new() -> Self {
        MemoryConfigManager::default()
    }

    pub fn with_tenant(tenant: impl Into<String>) -> Self {
        MemoryConfigManager {
            tenant: Some(tenant.into()),
            ..Default::default()
        }
    }

    /// Register a collective member record (the trust registry is
    /// seeded from service configuration, not mutated via the API).
    pub fn add_collective_member(&self, member: CollectiveMember) {
        self.members.insert(member.name.clone(), member);
    }

    /// Flip the quorum predicate; used when the membership layer
    /// observes the collective losing majority.
    pub fn set_quorum_lost(&self, lost: bool) {
        self.quorum_lost.store(lost, Ordering::SeqCst);
    }

    /// Group membership is kept alongside group attributes.
    pub fn set_group_members(&self, group: &str, members: Vec<String>) {
        self.groups.entry(group.to_string()).or_default().members = members;
    }
}

fn hash_password(password: &str) -> String {
    let salt: [u8; 8] = rand::thread_rng().gen();
    let salt = hex::encode(salt);
    let digest = Sha256::digest(format!("{salt}${password}").as_bytes());
    format!("sha256${salt}${}", hex::encode(digest))
}

fn fold_user_attributes(record: &mut UserRecord, mut attributes: Map<String, Value>) {
    if let Some(Value::String(password)) = attributes.remove("password") {
        record.cryptpass = Some(hash_password(&password));
    }
    for (key, value) in attributes {
        record.attributes.insert(key, value);
    }
}

#[async_trait]
impl ConfigManager for MemoryConfigManager {
    fn tenant(&self) -> Option<String> {
        self.tenant.clone()
    }

    async fn get_node_attributes(
        &self,
        nodes: &[String],
        attrs: &[String],
    ) -> Result<AttributeSnapshot, ApiError> {
        let mut snapshot = AttributeSnapshot::new();
        for node in nodes {
            let Some(stored) = self.nodes.get(node) else {
                continue;
            };
            let view: HashMap<String, AttrValue> = if attrs.is_empty() {
                stored.clone()
            } else {
                attrs
                    .iter()
                    .filter_map(|attr| {
                        stored.get(attr).map(|value| (attr.clone(), value.clone()))
                    })
                    .collect()
            };
            snapshot.insert(node.clone(), view);
        }
        Ok(snapshot)
    }

    async fn add_node_attributes(
        &self,
        attribmap: HashMap<String, Map<String, Value>>,
    ) -> Result<(), ApiError> {
        for (node, attributes) in attribmap {
            let mut entry = self.nodes.entry(node).or_default();
            for (key, value) in attributes {
                entry.insert(key, AttrValue { value });
            }
        }
        Ok(())
    }

    async fn del_nodes(&self, nodes: &[String]) -> Result<(), ApiError> {
        for node in nodes {
            self.nodes.remove(node);
            for mut group in self.groups.iter_mut() {
                group.members.retain(|member| member != node);
            }
        }
        Ok(())
    }

    async fn is_node(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    async fn list_nodes(&self) -> Vec<String> {
        self.nodes.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn add_group_attributes(
        &self,
        attribmap: HashMap<String, Map<String, Value>>,
    ) -> Result<(), ApiError> {
        for (group, mut attributes) in attribmap {
            let mut entry = self.groups.entry(group).or_default();
            if let Some(Value::Array(nodes)) = attributes.remove("nodes") {
                entry.members = nodes
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(node) => Some(node),
                        _ => None,
                    })
                    .collect();
            }
            for (key, value) in attributes {
                entry.attributes.insert(key, AttrValue { value });
            }
        }
        Ok(())
    }

    async fn get_group_attributes(
        &self,
        group: &str,
    ) -> Result<HashMap<String, AttrValue>, ApiError> {
        self.groups
            .get(group)
            .map(|entry| entry.attributes.clone())
            .ok_or_else(|| ApiError::NotFound(format!("Invalid nodegroup: {group} not found")))
    }

    async fn del_groups(&self, groups: &[String]) -> Result<(), ApiError> {
        for group in groups {
            self.groups.remove(group);
        }
        Ok(())
    }

    async fn is_nodegroup(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    async fn list_groups(&self) -> Vec<String> {
        self.groups.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn group_members(&self, group: &str) -> Vec<String> {
        self.groups
            .get(group)
            .map(|entry| entry.members.clone())
            .unwrap_or_default()
    }

    async fn list_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.users.iter().map(|entry| entry.key().clone()).collect();
        users.sort();
        users
    }

    async fn get_user(&self, name: &str) -> Option<UserRecord> {
        self.users.get(name).map(|entry| entry.clone())
    }

    async fn create_user(
        &self,
        name: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), ApiError> {
        if self.users.contains_key(name) {
            return Err(ApiError::InvalidArgument(format!(
                "User {name} already exists"
            )));
        }
        let mut record = UserRecord::default();
        fold_user_attributes(&mut record, attributes);
        self.users.insert(name.to_string(), record);
        Ok(())
    }

    async fn set_user(&self, name: &str, attributes: Map<String, Value>) -> Result<(), ApiError> {
        let mut record = self
            .users
            .get_mut(name)
            .ok_or_else(|| ApiError::NotFound(format!("Invalid user {name}")))?;
        fold_user_attributes(&mut record, attributes);
        Ok(())
    }

    async fn del_user(&self, name: &str) -> Result<(), ApiError> {
        self.users.remove(name);
        Ok(())
    }

    async fn get_collective_member(&self, name: &str) -> Option<CollectiveMember> {
        self.members.get(name).map(|entry| entry.clone())
    }

    async fn list_collective(&self) -> Vec<String> {
        self.members.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn check_quorum(&self) -> Result<(), ApiError> {
        if self.quorum_lost.load(Ordering::SeqCst) {
            return Err(ApiError::TargetResourceUnavailable(
                "Collective quorum lost".to_string(),
            ));
        }
        Ok(())
    }
}
