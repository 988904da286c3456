//! User account resource handling.
//!
//! Users live in the attribute store; this module only shapes the API
//! view. The one hard rule: the stored password hash never crosses the
//! API. Retrieval emits a `{cryptvalue: true}` marker when a password
//! is set and nothing more.

use crate::api::Core;
use muster_plugin_sdk::{
    item_stream, once_stream, ApiError, InputData, Operation, ResponseItem, ResponseStream,
};
use serde_json::{Map, Value};

/// The attribute schema of a user account, with display descriptions.
const USER_ATTRIBUTES: &[(&str, &str)] = &[
    ("password", "The password of the user"),
    ("role", "The role of the user"),
];

pub(crate) async fn handle_user_request(
    core: &Core,
    pathcomponents: Vec<String>,
    operation: Operation,
    inputdata: InputData,
) -> Result<ResponseStream, ApiError> {
    let config = core.config_manager();
    let Some(user) = pathcomponents.get(1) else {
        // it's just users/
        if operation == Operation::Create {
            let (name, attribs) = inputdata.take_name()?;
            config.create_user(&name, attribs).await?;
        }
        let users = config.list_users().await;
        // user listings are flat; no trailing slash
        return Ok(item_stream(
            users
                .into_iter()
                .map(|name| ResponseItem::child_collection(name, true))
                .collect(),
        ));
    };
    if !config.list_users().await.iter().any(|u| u == user) {
        return Err(ApiError::NotFound(format!("Invalid user {user}")));
    }
    match operation {
        Operation::Retrieve => show_user(core, user).await,
        Operation::Delete => {
            config.del_user(user).await?;
            Ok(once_stream(ResponseItem::deleted(user.clone())))
        }
        Operation::Update => {
            let attribs = inputdata.require_object()?.clone();
            config.set_user(user, attribs).await?;
            // return the post-update view
            show_user(core, user).await
        }
        Operation::Create => Err(ApiError::NotImplemented),
    }
}

/// Emit one item per schema attribute; the password only as a
/// crypt-presence marker.
async fn show_user(core: &Core, user: &str) -> Result<ResponseStream, ApiError> {
    let record = core
        .config_manager()
        .get_user(user)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Invalid user {user}")))?;
    let mut items = Vec::new();
    for (attr, desc) in USER_ATTRIBUTES {
        let mut kv = Map::new();
        if *attr == "password" {
            let marker = if record.cryptpass.is_some() {
                let mut crypt = Map::new();
                crypt.insert("cryptvalue".to_string(), Value::Bool(true));
                Value::Object(crypt)
            } else {
                Value::Null
            };
            kv.insert("password".to_string(), marker);
            items.push(ResponseItem::crypted_attributes(None, kv, desc));
        } else {
            let value = record.attributes.get(*attr).cloned().unwrap_or(Value::Null);
            kv.insert((*attr).to_string(), value);
            items.push(ResponseItem::attributes_desc(None, kv, desc));
        }
    }
    Ok(item_stream(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConfigManager;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    async fn collect(stream: ResponseStream) -> Vec<ResponseItem> {
        stream.map(|item| item.unwrap()).collect().await
    }

    fn core() -> Arc<Core> {
        Core::builder(Arc::new(MemoryConfigManager::new())).build()
    }

    #[tokio::test]
    async fn test_create_then_show_never_reveals_password() {
        let core = core();
        core.handle_request(
            "/users/",
            Operation::Create,
            Some(json!({"name": "alice", "password": "secret", "role": "admin"})),
            true,
        )
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;

        let items = collect(
            core.handle_request("/users/alice", Operation::Retrieve, None, true)
                .await
                .unwrap(),
        )
        .await;

        let password = items
            .iter()
            .find_map(|item| match item {
                ResponseItem::CryptedAttributes { kv, .. } => kv.get("password"),
                _ => None,
            })
            .unwrap();
        assert_eq!(password, &json!({"cryptvalue": true}));
        let dumped = serde_json::to_string(&items).unwrap();
        assert!(!dumped.contains("secret"));
    }

    #[tokio::test]
    async fn test_user_listing_is_flat() {
        let core = core();
        for name in ["bob", "alice"] {
            core.handle_request(
                "/users/",
                Operation::Create,
                Some(json!({"name": name})),
                true,
            )
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await;
        }
        let items = collect(
            core.handle_request("/users/", Operation::Retrieve, None, true)
                .await
                .unwrap(),
        )
        .await;
        for item in &items {
            match item {
                ResponseItem::ChildCollection { name, .. } => {
                    assert!(!name.ends_with('/'));
                }
                other => panic!("unexpected item: {other:?}"),
            }
        }
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let err = core()
            .handle_request("/users/nobody", Operation::Retrieve, None, true)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_returns_post_update_view() {
        let core = core();
        core.handle_request(
            "/users/",
            Operation::Create,
            Some(json!({"name": "carol", "role": "viewer"})),
            true,
        )
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;

        let items = collect(
            core.handle_request(
                "/users/carol",
                Operation::Update,
                Some(json!({"role": "operator"})),
                true,
            )
            .await
            .unwrap(),
        )
        .await;
        let role = items
            .iter()
            .find_map(|item| match item {
                ResponseItem::Attributes { kv, .. } => kv.get("role"),
                _ => None,
            })
            .unwrap();
        assert_eq!(role, &json!("operator"));
    }

    #[tokio::test]
    async fn test_delete_user() {
        let core = core();
        core.handle_request(
            "/users/",
            Operation::Create,
            Some(json!({"name": "dave"})),
            true,
        )
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;

        let items = collect(
            core.handle_request("/users/dave", Operation::Delete, None, true)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(items, vec![ResponseItem::deleted("dave")]);
        assert!(core.config_manager().get_user("dave").await.is_none());
    }
}
