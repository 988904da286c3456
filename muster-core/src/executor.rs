//! # Fan-out Executor
//!
//! Turns a resolved route plus a node list into concurrent handler
//! invocations and merges their streams back into one ordered channel.
//!
//! ## Overview
//!
//! For a plugin-selected route the executor:
//! 1. Fetches, in one batch, the union of the route's selection
//!    attributes and `collective.manager` for every target node.
//! 2. Selects each node's handler: first populated selection attribute
//!    wins, else the route default, else the synthetic bad-plugin
//!    handler. Nodes resolving to the same handler coalesce into one
//!    worker invocation, input order preserved.
//! 3. For dispatchable handlers, checks quorum and diverts nodes whose
//!    `collective.manager` names another member into per-peer groups.
//! 4. Spawns one task per handler group and per peer group. Every task
//!    writes into one unbounded queue and enqueues an end-of-worker
//!    marker exactly once, success or failure.
//! 5. Returns a lazy stream that drains the queue until it has seen one
//!    marker per spawned worker.
//!
//! Ordering: items from one worker stay FIFO; across workers the
//! interleaving is arrival order. Synthetic error handlers are ordinary
//! workers, which keeps the merge loop free of special cases.

use crate::api::Core;
use crate::collective::DispatchEnvelope;
use crate::noderange;
use crate::resolver::{self, Resolution};
use crate::schema::{self, RouteRecord};
use async_stream::stream;
use futures::StreamExt;
use muster_plugin_sdk::{
    empty_stream, item_stream, once_stream, ApiError, InputData, Operation, PluginRequest,
    ResponseItem, ResponseStream,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Handlers that may participate in collective forwarding; only these
/// require quorum before dispatch.
pub const DISPATCH_PLUGINS: &[&str] = &["ipmi"];

/// What travels through the merge queue.
enum QueueItem {
    Item(ResponseItem),
    Failed(ApiError),
    Done,
}

/// Identity of one worker-to-be during handler selection.
#[derive(Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Plugin(String),
    BadPlugin(String),
    BadCollective,
}

/// Insertion-ordered node grouping; order of first appearance decides
/// spawn order, node order within a group is input order.
struct Groups {
    order: Vec<(GroupKey, Vec<String>)>,
    index: HashMap<GroupKey, usize>,
}

impl Groups {
    fn new() -> Self {
        Groups {
            order: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, key: GroupKey, node: &str) {
        match self.index.get(&key) {
            Some(&at) => self.order[at].1.push(node.to_string()),
            None => {
                self.index.insert(key.clone(), self.order.len());
                self.order.push((key, vec![node.to_string()]));
            }
        }
    }
}

impl Core {
    /// Node and node-range requests: everything under `/nodes/` and
    /// `/noderange/`.
    pub(crate) async fn handle_node_request(
        &self,
        mut pathcomponents: Vec<String>,
        operation: Operation,
        inputdata: InputData,
        autostrip: bool,
    ) -> Result<ResponseStream, ApiError> {
        if let Some(health) = &self.health {
            if health.log_store_full() {
                return Err(ApiError::TargetResourceUnavailable(
                    "Log store full, free up space and restart the muster service".to_string(),
                ));
            }
        }
        let mut isnoderange = false;
        if pathcomponents[0] == "noderange" {
            if pathcomponents.len() > 3 && pathcomponents[2] == "nodes" {
                // rewrite into a normal-looking node request; validity
                // of the child against the range is not checked, that
                // is not a goal of the noderange facility
                pathcomponents.drain(0..2);
            } else if pathcomponents.len() == 3 && pathcomponents[2] == "abbreviate" {
                return abbreviate_noderange(operation, &inputdata);
            } else {
                isnoderange = true;
            }
        }

        let Some(nodeorrange) = pathcomponents.get(1).cloned() else {
            return self.handle_node_root(isnoderange, operation, &inputdata).await;
        };
        if !isnoderange && !self.config.is_node(&nodeorrange).await {
            return Err(ApiError::NotFound("Invalid Node".to_string()));
        }
        let nodes: Vec<String> = if isnoderange {
            noderange::expand(&nodeorrange, &self.config)
                .await
                .map_err(|e| ApiError::NotFound(format!("Invalid Noderange: {e}")))?
        } else {
            vec![nodeorrange]
        };

        if isnoderange && pathcomponents.len() == 3 && pathcomponents[2] == "nodes" {
            // the list of nodes the range resolves to
            let mut members = nodes;
            noderange::human_sort(&mut members);
            return Ok(item_stream(resolver::iterate_collections(members, true)));
        }

        if pathcomponents.len() == 2 {
            return self
                .node_collection_request(nodes, isnoderange, operation)
                .await;
        }

        let element: Vec<String> = pathcomponents[2..].to_vec();
        let record = match resolver::resolve(schema::node_resources(), &element)? {
            Resolution::Collection(children) => {
                return match operation {
                    Operation::Retrieve => {
                        Ok(item_stream(resolver::iterate_resources(children).collect()))
                    }
                    _ => Err(ApiError::NotImplemented),
                };
            }
            Resolution::CustomInterface => {
                return Err(ApiError::InvalidArgument(
                    "Custom interface required for resource".to_string(),
                ));
            }
            Resolution::Route { record, .. } => record,
        };

        match record {
            RouteRecord::Fixed { handler } => {
                let plugin = self
                    .registry
                    .get(handler)
                    .ok_or(ApiError::NotImplemented)?;
                let request = PluginRequest {
                    nodes: Some(nodes),
                    element,
                    inputdata,
                    configmanager: self.config.clone(),
                };
                let stream = plugin.invoke(operation, request).await?;
                if isnoderange || !autostrip {
                    Ok(stream)
                } else {
                    Ok(strip_stream(stream))
                }
            }
            RouteRecord::Plugin {
                plugin_attrs,
                default,
            }
            | RouteRecord::PluginCollection {
                plugin_attrs,
                default,
            } => {
                self.fan_out(
                    nodes,
                    *plugin_attrs,
                    *default,
                    element,
                    operation,
                    inputdata,
                    isnoderange,
                    autostrip,
                    true,
                )
                .await
            }
            RouteRecord::Opaque => Err(ApiError::InvalidArgument(
                "Custom interface required for resource".to_string(),
            )),
        }
    }

    /// `/nodes/` or `/noderange/` with no node: enumeration or creation.
    async fn handle_node_root(
        &self,
        isnoderange: bool,
        operation: Operation,
        inputdata: &InputData,
    ) -> Result<ResponseStream, ApiError> {
        if isnoderange && operation == Operation::Retrieve {
            // an empty noderange resolves to an empty collection
            return Ok(empty_stream());
        }
        if isnoderange && operation == Operation::Create {
            return self.create_noderange(inputdata).await;
        }
        if isnoderange || operation == Operation::Delete {
            return Err(ApiError::InvalidArgument(
                "Target is not addressable".to_string(),
            ));
        }
        if operation == Operation::Create {
            return self.create_node(inputdata).await;
        }
        let mut allnodes = self.config.list_nodes().await;
        noderange::human_sort(&mut allnodes);
        Ok(item_stream(resolver::iterate_collections(allnodes, true)))
    }

    /// `/nodes/<n>` or `/noderange/<r>`: the node itself as a collection.
    async fn node_collection_request(
        &self,
        nodes: Vec<String>,
        isnoderange: bool,
        operation: Operation,
    ) -> Result<ResponseStream, ApiError> {
        match operation {
            Operation::Delete => {
                self.config.del_nodes(&nodes).await?;
                Ok(item_stream(
                    nodes.into_iter().map(ResponseItem::deleted).collect(),
                ))
            }
            Operation::Retrieve => {
                let mut items: Vec<ResponseItem> =
                    resolver::iterate_resources(schema::node_resources()).collect();
                if isnoderange {
                    // virtual children only a range carries; abbreviate
                    // lists without the collection suffix
                    items.push(ResponseItem::child_collection("abbreviate", false));
                    items.push(ResponseItem::child_collection("nodes/", false));
                }
                Ok(item_stream(items))
            }
            _ => Err(ApiError::NotImplemented),
        }
    }

    async fn create_node(&self, inputdata: &InputData) -> Result<ResponseStream, ApiError> {
        let (name, attribs) = inputdata.take_name()?;
        let mut attribmap = HashMap::new();
        attribmap.insert(name.clone(), attribs);
        self.config.add_node_attributes(attribmap).await?;
        Ok(once_stream(ResponseItem::created(name)))
    }

    async fn create_noderange(&self, inputdata: &InputData) -> Result<ResponseStream, ApiError> {
        let (expression, attribs) = inputdata.take_name()?;
        let nodes = noderange::expand(&expression, &self.config).await?;
        let mut attribmap = HashMap::new();
        for node in &nodes {
            attribmap.insert(node.clone(), attribs.clone());
        }
        self.config.add_node_attributes(attribmap).await?;
        Ok(item_stream(
            nodes.into_iter().map(ResponseItem::created).collect(),
        ))
    }

    /// Node-group requests: everything under `/nodegroups/`.
    pub(crate) async fn handle_nodegroup_request(
        &self,
        pathcomponents: Vec<String>,
        operation: Operation,
        inputdata: InputData,
    ) -> Result<ResponseStream, ApiError> {
        let Some(group) = pathcomponents.get(1).cloned() else {
            if operation == Operation::Create {
                let (name, attribs) = inputdata.take_name()?;
                let mut attribmap = HashMap::new();
                attribmap.insert(name.clone(), attribs);
                self.config.add_group_attributes(attribmap).await?;
                return Ok(once_stream(ResponseItem::created(name)));
            }
            let mut groups = self.config.list_groups().await;
            noderange::human_sort(&mut groups);
            return Ok(item_stream(resolver::iterate_collections(groups, true)));
        };

        if pathcomponents.len() == 2 {
            return match operation {
                Operation::Delete => {
                    self.config.del_groups(std::slice::from_ref(&group)).await?;
                    Ok(once_stream(ResponseItem::deleted(group)))
                }
                Operation::Retrieve => {
                    self.require_nodegroup(&group).await?;
                    Ok(item_stream(
                        resolver::iterate_resources(schema::nodegroup_resources()).collect(),
                    ))
                }
                _ => Err(ApiError::NotImplemented),
            };
        }

        let record = match resolver::resolve(schema::nodegroup_resources(), &pathcomponents[2..])? {
            Resolution::Collection(children) => {
                return match operation {
                    Operation::Retrieve => {
                        self.require_nodegroup(&group).await?;
                        Ok(item_stream(resolver::iterate_resources(children).collect()))
                    }
                    _ => Err(ApiError::NotImplemented),
                };
            }
            Resolution::CustomInterface => {
                return Err(ApiError::InvalidArgument(
                    "Custom interface required for resource".to_string(),
                ));
            }
            Resolution::Route { record, .. } => record,
        };

        match record {
            RouteRecord::Fixed { handler } => {
                let plugin = self
                    .registry
                    .get(handler)
                    .ok_or(ApiError::NotImplemented)?;
                let request = PluginRequest {
                    nodes: None,
                    element: pathcomponents,
                    inputdata,
                    configmanager: self.config.clone(),
                };
                plugin.invoke(operation, request).await
            }
            // the group tree only carries fixed handlers
            _ => Err(ApiError::NotImplemented),
        }
    }

    async fn require_nodegroup(&self, group: &str) -> Result<(), ApiError> {
        if self.config.is_nodegroup(group).await {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!(
                "Invalid nodegroup: {group} not found"
            )))
        }
    }

    /// Group nodes by handler, spawn workers, and merge their streams.
    ///
    /// `collective_checks` is off when executing a sub-request a peer
    /// dispatched to us: the owning member has already routed, so
    /// everything runs locally and no quorum gate applies.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn fan_out(
        &self,
        nodes: Vec<String>,
        plugin_attrs: &'static [&'static str],
        default: Option<&'static str>,
        element: Vec<String>,
        operation: Operation,
        inputdata: InputData,
        isnoderange: bool,
        autostrip: bool,
        collective_checks: bool,
    ) -> Result<ResponseStream, ApiError> {
        // one batched fetch keeps handler selection consistent for the
        // whole request
        let mut wanted: Vec<String> = plugin_attrs.iter().map(|s| s.to_string()).collect();
        wanted.push("collective.manager".to_string());
        let snapshot = self.config.get_node_attributes(&nodes, &wanted).await?;
        let no_attrs = HashMap::new();

        let mut groups = Groups::new();
        let mut peers = Groups::new();
        let mut collective_active: Option<bool> = None;

        for node in &nodes {
            let attrs = snapshot.get(node).unwrap_or(&no_attrs);
            let mut plugpath: Option<String> = None;
            for attr in plugin_attrs {
                if let Some(value) = attrs.get(*attr).and_then(|v| v.as_str()) {
                    plugpath = Some(value.to_string());
                    break;
                }
            }
            if plugpath.is_none() {
                plugpath = default.map(str::to_string);
            }
            let Some(plugpath) = plugpath else {
                groups.push(GroupKey::BadPlugin(String::new()), node);
                continue;
            };
            if collective_checks && DISPATCH_PLUGINS.contains(&plugpath.as_str()) {
                // quorum gates only the dispatchable plugin set, and it
                // must fail the request before any worker spawns
                self.config.check_quorum().await?;
                let manager = attrs.get("collective.manager").and_then(|v| v.as_str());
                match manager {
                    Some(manager) if self.local_member() != Some(manager) => {
                        peers.push(GroupKey::Plugin(manager.to_string()), node);
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        let active = match collective_active {
                            Some(active) => active,
                            None => {
                                let active = !self.config.list_collective().await.is_empty();
                                collective_active = Some(active);
                                active
                            }
                        };
                        if active {
                            groups.push(GroupKey::BadCollective, node);
                            continue;
                        }
                    }
                }
            }
            if self.registry.contains(&plugpath) {
                groups.push(GroupKey::Plugin(plugpath), node);
            } else {
                groups.push(GroupKey::BadPlugin(plugpath), node);
            }
        }

        let numworkers = groups.order.len() + peers.order.len();
        if numworkers == 0 {
            return if isnoderange || !autostrip {
                Ok(empty_stream())
            } else {
                Err(ApiError::NotImplemented)
            };
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for (key, group_nodes) in groups.order {
            let tx = tx.clone();
            match key {
                GroupKey::Plugin(name) => match self.registry.get(&name) {
                    Some(plugin) => {
                        tracing::debug!(plugin = %name, nodes = group_nodes.len(), "spawning handler worker");
                        let request = PluginRequest {
                            nodes: Some(group_nodes),
                            element: element.clone(),
                            inputdata: inputdata.clone(),
                            configmanager: self.config.clone(),
                        };
                        tokio::spawn(async move {
                            let result = plugin.invoke(operation, request).await;
                            forward_worker(tx, result).await;
                        });
                    }
                    None => spawn_error_worker(tx, group_nodes, bad_plugin_message(&name)),
                },
                GroupKey::BadPlugin(name) => {
                    spawn_error_worker(tx, group_nodes, bad_plugin_message(&name))
                }
                GroupKey::BadCollective => spawn_error_worker(
                    tx,
                    group_nodes,
                    "collective mode is active, but collective.manager is not set for this node"
                        .to_string(),
                ),
            }
        }
        for (key, peer_nodes) in peers.order {
            let GroupKey::Plugin(manager) = key else {
                continue;
            };
            let stream =
                self.peer_dispatch(manager, peer_nodes, element.clone(), operation, &inputdata);
            let tx = tx.clone();
            tokio::spawn(async move {
                forward_worker(tx, Ok(stream)).await;
            });
        }
        drop(tx);

        let strip = !isnoderange && autostrip;
        Ok(iterate_queue(rx, numworkers, strip))
    }

    /// Execute a sub-request a peer dispatched to this member, exactly
    /// as the executor would have run it locally.
    pub(crate) async fn execute_dispatch(
        &self,
        envelope: DispatchEnvelope,
    ) -> Result<ResponseStream, ApiError> {
        // callers only dispatch paths they have already resolved, so a
        // non-resolving path here is a programming error upstream
        let record = match resolver::resolve(schema::node_resources(), &envelope.path)? {
            Resolution::Route { record, .. } => record,
            _ => {
                return Err(ApiError::NotFound(
                    "Dispatched path does not resolve to a route".to_string(),
                ));
            }
        };
        match record {
            RouteRecord::Fixed { handler } => {
                let plugin = self
                    .registry
                    .get(handler)
                    .ok_or(ApiError::NotImplemented)?;
                let request = PluginRequest {
                    nodes: Some(envelope.nodes),
                    element: envelope.path,
                    inputdata: envelope.inputdata,
                    configmanager: self.config.clone(),
                };
                plugin.invoke(envelope.operation, request).await
            }
            RouteRecord::Plugin {
                plugin_attrs,
                default,
            }
            | RouteRecord::PluginCollection {
                plugin_attrs,
                default,
            } => {
                self.fan_out(
                    envelope.nodes,
                    *plugin_attrs,
                    *default,
                    envelope.path,
                    envelope.operation,
                    envelope.inputdata,
                    true,
                    false,
                    false,
                )
                .await
            }
            RouteRecord::Opaque => Err(ApiError::InvalidArgument(
                "Custom interface required for resource".to_string(),
            )),
        }
    }
}

fn bad_plugin_message(name: &str) -> String {
    if name.is_empty() {
        "no plugin is configured for this node".to_string()
    } else {
        format!("{name} is not a supported plugin")
    }
}

/// A synthetic worker that emits one per-node error item. Shaped like
/// every other worker so the merge loop needs no special cases.
fn spawn_error_worker(
    tx: mpsc::UnboundedSender<QueueItem>,
    nodes: Vec<String>,
    message: String,
) {
    tokio::spawn(async move {
        for node in &nodes {
            if tx
                .send(QueueItem::Item(ResponseItem::node_error(node, message.as_str())))
                .is_err()
            {
                break;
            }
        }
        let _ = tx.send(QueueItem::Done);
    });
}

/// Drain one handler's stream into the shared queue; the end marker is
/// enqueued exactly once, also on failure.
async fn forward_worker(
    tx: mpsc::UnboundedSender<QueueItem>,
    result: Result<ResponseStream, ApiError>,
) {
    match result {
        Ok(mut stream) => {
            while let Some(item) = stream.next().await {
                let sent = match item {
                    Ok(item) => tx.send(QueueItem::Item(item)),
                    Err(err) => {
                        let _ = tx.send(QueueItem::Failed(err));
                        break;
                    }
                };
                if sent.is_err() {
                    // consumer stopped draining; finish quietly
                    break;
                }
            }
        }
        Err(err) => {
            let _ = tx.send(QueueItem::Failed(err));
        }
    }
    let _ = tx.send(QueueItem::Done);
}

/// The caller-visible merged stream: yields until every spawned worker
/// has delivered its end marker; a failed item terminates by raising.
fn iterate_queue(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    numworkers: usize,
    strip: bool,
) -> ResponseStream {
    Box::pin(stream! {
        let mut completions = 0;
        while completions < numworkers {
            match rx.recv().await {
                Some(QueueItem::Done) => completions += 1,
                Some(QueueItem::Item(mut item)) => {
                    if strip && !item.is_console() {
                        item.strip_node();
                    }
                    yield Ok(item);
                }
                Some(QueueItem::Failed(err)) => {
                    yield Err(err);
                    break;
                }
                None => break,
            }
        }
    })
}

/// Remove per-node framing from every non-console item of a stream.
fn strip_stream(stream: ResponseStream) -> ResponseStream {
    Box::pin(stream.map(|item| {
        item.map(|mut item| {
            if !item.is_console() {
                item.strip_node();
            }
            item
        })
    }))
}

/// `noderange/<list>/abbreviate`: reverse-expand a node list into its
/// densest range expression. No fan-out occurs.
fn abbreviate_noderange(
    operation: Operation,
    inputdata: &InputData,
) -> Result<ResponseStream, ApiError> {
    if operation != Operation::Create {
        return Err(ApiError::InvalidArgument(
            "Must be a create with nodes in list".to_string(),
        ));
    }
    let nodes = inputdata.node_list()?;
    let mut kv = Map::new();
    kv.insert(
        "noderange".to_string(),
        Value::String(noderange::abbreviate(&nodes)),
    );
    Ok(once_stream(ResponseItem::key_value(None, kv)))
}
