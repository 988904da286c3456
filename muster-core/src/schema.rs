//! # Schema Registry
//!
//! The declarative resource trees: URL-like paths map here to either a
//! sub-collection or a route record telling the executor which handler
//! runs the request.
//!
//! Two trees exist, one rooted at node resources and one at node-group
//! resources. Both are plain data (a tagged union keyed by segment
//! name), constructed once on first use and read-only afterwards, so
//! concurrent readers need no synchronization.
//!
//! Segment names starting with `_` are hidden: they resolve normally
//! but are omitted from collection enumeration (the console scheme uses
//! this for its internal session entry).

use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Attribute list consulted for hardware-management plugin selection.
const HWMGMT: &[&str] = &["hardwaremanagement.method"];

/// Attribute list consulted for console plugin selection.
const CONSOLE: &[&str] = &["console.method"];

/// Top-level names recognized by the front-end, in enumeration order.
pub const ROOT_COLLECTIONS: [&str; 8] = [
    "discovery/",
    "events/",
    "networking/",
    "noderange/",
    "nodes/",
    "nodegroups/",
    "users/",
    "version",
];

/// A sub-mapping from segment name to child schema node.
pub type SchemaMap = BTreeMap<&'static str, SchemaNode>;

/// A node in a resource tree: a sub-mapping or a terminal route record.
#[derive(Debug)]
pub enum SchemaNode {
    Map(SchemaMap),
    Route(RouteRecord),
}

/// The terminal record telling the executor which handler to invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRecord {
    /// A statically chosen handler, regardless of node attributes
    Fixed { handler: &'static str },
    /// Handler is the first of `plugin_attrs` present in the node's
    /// attributes, else `default`
    Plugin {
        plugin_attrs: &'static [&'static str],
        default: Option<&'static str>,
    },
    /// Same selection rule, but the segment is a collection whose
    /// children are opaque to the schema and owned by the plugin
    PluginCollection {
        plugin_attrs: &'static [&'static str],
        default: Option<&'static str>,
    },
    /// Sentinel the front-end must handle specially (console upgrade)
    Opaque,
}

impl SchemaNode {
    /// The sub-mapping, when this node is a collection.
    pub fn as_map(&self) -> Option<&SchemaMap> {
        match self {
            SchemaNode::Map(map) => Some(map),
            SchemaNode::Route(_) => None,
        }
    }
}

fn entries<const N: usize>(entries: [(&'static str, SchemaNode); N]) -> SchemaMap {
    BTreeMap::from(entries)
}

fn map<const N: usize>(children: [(&'static str, SchemaNode); N]) -> SchemaNode {
    SchemaNode::Map(entries(children))
}

fn fixed(handler: &'static str) -> SchemaNode {
    SchemaNode::Route(RouteRecord::Fixed { handler })
}

/// Plugin route selected by `hardwaremanagement.method`, defaulting to ipmi.
fn hw_route() -> SchemaNode {
    SchemaNode::Route(RouteRecord::Plugin {
        plugin_attrs: HWMGMT,
        default: Some("ipmi"),
    })
}

/// Plugin-curated collection selected the same way.
fn hw_collection() -> SchemaNode {
    SchemaNode::Route(RouteRecord::PluginCollection {
        plugin_attrs: HWMGMT,
        default: Some("ipmi"),
    })
}

fn build_node_resources() -> SchemaMap {
    entries([
        (
            "attributes",
            map([
                ("all", fixed("attributes")),
                ("current", fixed("attributes")),
                ("expression", fixed("attributes")),
            ]),
        ),
        ("boot", map([("nextdevice", hw_route())])),
        (
            "configuration",
            map([
                (
                    "management_controller",
                    map([
                        ("alerts", map([("destinations", hw_collection())])),
                        ("users", hw_collection()),
                        ("licenses", hw_collection()),
                        ("net_interfaces", hw_collection()),
                        ("reset", hw_route()),
                        ("hostname", hw_route()),
                        ("identifier", hw_route()),
                        ("domain_name", hw_route()),
                        (
                            "ntp",
                            map([("enabled", hw_route()), ("servers", hw_collection())]),
                        ),
                    ]),
                ),
                (
                    "storage",
                    map([
                        ("all", hw_route()),
                        ("arrays", hw_collection()),
                        ("disks", hw_collection()),
                        ("volumes", hw_collection()),
                    ]),
                ),
                (
                    "system",
                    map([
                        ("all", hw_route()),
                        ("advanced", hw_route()),
                        ("clear", hw_route()),
                    ]),
                ),
            ]),
        ),
        (
            "_console",
            map([(
                "session",
                SchemaNode::Route(RouteRecord::Plugin {
                    plugin_attrs: CONSOLE,
                    default: None,
                }),
            )]),
        ),
        ("_shell", map([("session", fixed("ssh"))])),
        ("_enclosure", map([("reseat_bay", hw_route())])),
        (
            "shell",
            // special case similar to console; children are session ids
            map([(
                "sessions",
                SchemaNode::Route(RouteRecord::PluginCollection {
                    plugin_attrs: &[],
                    default: Some("shellserver"),
                }),
            )]),
        ),
        (
            "console",
            map([
                // front-end or socket layer must upgrade this itself
                ("session", SchemaNode::Route(RouteRecord::Opaque)),
                ("license", hw_route()),
            ]),
        ),
        ("description", hw_route()),
        (
            "events",
            map([(
                "hardware",
                map([("log", hw_route()), ("decode", hw_route())]),
            )]),
        ),
        ("health", map([("hardware", hw_route())])),
        ("identify", hw_route()),
        (
            "inventory",
            map([
                ("hardware", map([("all", hw_collection())])),
                (
                    "firmware",
                    map([
                        ("all", hw_collection()),
                        ("updates", map([("active", hw_collection())])),
                    ]),
                ),
            ]),
        ),
        (
            "media",
            map([
                ("uploads", hw_collection()),
                ("attach", hw_route()),
                ("detach", hw_route()),
                ("current", hw_route()),
            ]),
        ),
        (
            "power",
            map([("state", hw_route()), ("reseat", fixed("enclosure"))]),
        ),
        (
            "sensors",
            map([(
                "hardware",
                map([
                    ("all", hw_collection()),
                    ("energy", hw_collection()),
                    ("temperature", hw_collection()),
                    ("power", hw_collection()),
                    ("fans", hw_collection()),
                    ("leds", hw_collection()),
                ]),
            )]),
        ),
        ("support", map([("servicedata", hw_collection())])),
    ])
}

fn build_nodegroup_resources() -> SchemaMap {
    entries([(
        "attributes",
        map([("all", fixed("attributes")), ("current", fixed("attributes"))]),
    )])
}

/// The resource tree rooted at a single node.
pub fn node_resources() -> &'static SchemaMap {
    static TREE: OnceLock<SchemaMap> = OnceLock::new();
    TREE.get_or_init(build_node_resources)
}

/// The resource tree rooted at a node group.
pub fn nodegroup_resources() -> &'static SchemaMap {
    static TREE: OnceLock<SchemaMap> = OnceLock::new();
    TREE.get_or_init(build_nodegroup_resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trees_are_collections_at_the_root() {
        assert!(node_resources().contains_key("power"));
        assert!(nodegroup_resources().contains_key("attributes"));
    }

    #[test]
    fn test_power_state_is_plugin_selected() {
        let power = node_resources().get("power").unwrap();
        let state = power.as_map().unwrap().get("state").unwrap();
        match state {
            SchemaNode::Route(RouteRecord::Plugin {
                plugin_attrs,
                default,
            }) => {
                assert_eq!(*plugin_attrs, &["hardwaremanagement.method"]);
                assert_eq!(*default, Some("ipmi"));
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn test_console_session_is_opaque() {
        let console = node_resources().get("console").unwrap();
        let session = console.as_map().unwrap().get("session").unwrap();
        assert!(matches!(session, SchemaNode::Route(RouteRecord::Opaque)));
    }

    #[test]
    fn test_root_collection_order() {
        assert_eq!(ROOT_COLLECTIONS[0], "discovery/");
        assert_eq!(ROOT_COLLECTIONS[7], "version");
    }
}
