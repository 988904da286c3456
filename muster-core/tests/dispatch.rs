//! Inbound dispatch protocol exercised over in-memory pipes.

mod common;

use common::{seed_node, FakeHwPlugin};
use muster_core::tls::certificate_fingerprint;
use muster_core::tlv;
use muster_core::{
    handle_dispatch, Core, DispatchEnvelope, DispatchItem, MemoryConfigManager,
};
use muster_plugin_sdk::{
    CollectiveMember, InputData, Operation, PluginRegistry, ResponseItem, WireErrorKind,
};
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const PEER_CERT: &[u8] = b"peer1 certificate bytes";

async fn dispatch_core() -> Arc<Core> {
    let store = Arc::new(MemoryConfigManager::new());
    store.add_collective_member(CollectiveMember {
        name: "peer1".to_string(),
        address: "10.0.0.1".to_string(),
        fingerprint: certificate_fingerprint(PEER_CERT),
    });
    seed_node(&store, "n1", &[("hardwaremanagement.method", json!("ipmi"))]).await;

    let (ipmi, _log) = FakeHwPlugin::new("ipmi");
    let registry = PluginRegistry::builder().register(ipmi).build();
    Core::builder(store).with_registry(registry).build()
}

fn envelope(path: &[&str], nodes: &[&str]) -> Vec<u8> {
    let envelope = DispatchEnvelope {
        name: "peer1".to_string(),
        nodes: nodes.iter().map(|s| s.to_string()).collect(),
        path: path.iter().map(|s| s.to_string()).collect(),
        tenant: None,
        operation: Operation::Retrieve,
        inputdata: InputData::none(),
    };
    rmp_serde::to_vec_named(&envelope).unwrap()
}

async fn read_items<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Vec<DispatchItem> {
    let mut items = Vec::new();
    while let Some(payload) = tlv::recv_frame(reader).await.unwrap() {
        items.push(rmp_serde::from_slice(&payload).unwrap());
    }
    items
}

#[tokio::test]
async fn test_dispatch_executes_and_frames_items() {
    let core = dispatch_core().await;
    let (mut near, mut far) = tokio::io::duplex(1 << 16);

    handle_dispatch(
        &core,
        &mut near,
        PEER_CERT,
        &envelope(&["power", "state"], &["n1"]),
        "peer1",
    )
    .await
    .unwrap();
    drop(near);

    let items = read_items(&mut far).await;
    assert_eq!(items.len(), 1);
    match &items[0] {
        DispatchItem::Item(item) => {
            // dispatched results keep node identification; the
            // initiating member decides about stripping
            assert_eq!(item.node(), Some("n1"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_dispatch_closes_silently_on_fingerprint_mismatch() {
    let core = dispatch_core().await;
    let (mut near, mut far) = tokio::io::duplex(1 << 16);

    handle_dispatch(
        &core,
        &mut near,
        b"some other certificate",
        &envelope(&["power", "state"], &["n1"]),
        "peer1",
    )
    .await
    .unwrap();
    drop(near);

    let mut leftover = Vec::new();
    far.read_to_end(&mut leftover).await.unwrap();
    assert!(leftover.is_empty());
}

#[tokio::test]
async fn test_dispatch_closes_silently_for_unknown_member() {
    let core = dispatch_core().await;
    let (mut near, mut far) = tokio::io::duplex(1 << 16);

    handle_dispatch(
        &core,
        &mut near,
        PEER_CERT,
        &envelope(&["power", "state"], &["n1"]),
        "stranger",
    )
    .await
    .unwrap();
    drop(near);

    let mut leftover = Vec::new();
    far.read_to_end(&mut leftover).await.unwrap();
    assert!(leftover.is_empty());
}

#[tokio::test]
async fn test_dispatch_frames_per_node_errors_like_items() {
    let core = dispatch_core().await;
    let (mut near, mut far) = tokio::io::duplex(1 << 16);

    // n1 selects ipmi; a node with an unsupported backend rides the
    // same stream as a node-scoped error item
    let store = core.config_manager();
    let mut attribmap = std::collections::HashMap::new();
    let mut attrs = serde_json::Map::new();
    attrs.insert("hardwaremanagement.method".to_string(), json!("frob"));
    attribmap.insert("n2".to_string(), attrs);
    store.add_node_attributes(attribmap).await.unwrap();

    handle_dispatch(
        &core,
        &mut near,
        PEER_CERT,
        &envelope(&["power", "state"], &["n1", "n2"]),
        "peer1",
    )
    .await
    .unwrap();
    drop(near);

    let items = read_items(&mut far).await;
    assert_eq!(items.len(), 2);
    assert!(items.iter().any(|item| matches!(
        item,
        DispatchItem::Item(ResponseItem::NodeError { .. })
    )));
}

#[tokio::test]
async fn test_dispatch_frames_request_errors_before_terminating() {
    let core = dispatch_core().await;
    let (mut near, mut far) = tokio::io::duplex(1 << 16);

    handle_dispatch(
        &core,
        &mut near,
        PEER_CERT,
        // resolves to a collection, not a route; the failure is framed
        // back instead of tearing the channel down
        &envelope(&["power"], &["n1"]),
        "peer1",
    )
    .await
    .unwrap();
    drop(near);

    let items = read_items(&mut far).await;
    assert_eq!(items.len(), 1);
    match &items[0] {
        DispatchItem::Error(err) => assert_eq!(err.kind, WireErrorKind::NotFound),
        other => panic!("unexpected frame: {other:?}"),
    }
}
