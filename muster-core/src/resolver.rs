//! # Path Resolver
//!
//! Walks a parsed path segment-by-segment through a schema tree and
//! classifies the target: a collection to enumerate, a route record to
//! execute, or a sentinel that requires a custom interface.
//!
//! A `PluginCollection` terminates resolution: every remaining segment
//! is preserved verbatim and becomes the selected plugin's problem.
//! Resolution of a given path is deterministic; the same segments
//! always produce the same outcome.

use crate::schema::{RouteRecord, SchemaMap, SchemaNode};
use muster_plugin_sdk::{ApiError, ResponseItem};

/// Outcome of resolving a path against a schema tree.
#[derive(Debug)]
pub enum Resolution<'a> {
    /// Segments consumed fully, landed on a sub-mapping
    Collection(&'a SchemaMap),
    /// Landed on a route record; `remaining` is empty unless the record
    /// is a plugin-curated collection
    Route {
        record: &'a RouteRecord,
        remaining: Vec<String>,
    },
    /// Landed on a registered sentinel the front-end must special-case
    CustomInterface,
}

fn invalid_element() -> ApiError {
    ApiError::NotFound("Invalid element requested".to_string())
}

/// Resolve `segments` against `root`. A segment missing from the
/// current sub-mapping, or descending into a terminal route, yields
/// NotFound.
pub fn resolve<'a, S: AsRef<str>>(
    root: &'a SchemaMap,
    segments: &[S],
) -> Result<Resolution<'a>, ApiError> {
    let mut children = root;
    for (depth, segment) in segments.iter().enumerate() {
        let child = children
            .get(segment.as_ref())
            .ok_or_else(invalid_element)?;
        let last = depth + 1 == segments.len();
        match child {
            SchemaNode::Map(map) => children = map,
            SchemaNode::Route(record @ RouteRecord::PluginCollection { .. }) => {
                // all remaining segments are up to the plugin to comprehend
                return Ok(Resolution::Route {
                    record,
                    remaining: segments[depth + 1..]
                        .iter()
                        .map(|s| s.as_ref().to_string())
                        .collect(),
                });
            }
            SchemaNode::Route(RouteRecord::Opaque) if last => {
                return Ok(Resolution::CustomInterface);
            }
            SchemaNode::Route(record) if last => {
                return Ok(Resolution::Route {
                    record,
                    remaining: Vec::new(),
                });
            }
            SchemaNode::Route(_) => return Err(invalid_element()),
        }
    }
    Ok(Resolution::Collection(children))
}

/// Enumerate a schema collection as child-collection items.
///
/// Hidden entries (leading `_`) are skipped; anything that is not a
/// terminal route gets a `/` suffix so clients can tell leaves from
/// collections.
pub fn iterate_resources(children: &SchemaMap) -> impl Iterator<Item = ResponseItem> + '_ {
    children.iter().filter_map(|(name, child)| {
        if name.starts_with('_') {
            return None;
        }
        let terminal = matches!(
            child,
            SchemaNode::Route(RouteRecord::Fixed { .. })
                | SchemaNode::Route(RouteRecord::Plugin { .. })
        );
        let listed = if terminal {
            (*name).to_string()
        } else {
            format!("{name}/")
        };
        Some(ResponseItem::child_collection(listed, false))
    })
}

/// Emit a list of resource names as child-collection items, optionally
/// forcing the trailing-slash collection form.
pub fn iterate_collections(names: Vec<String>, force_slash: bool) -> Vec<ResponseItem> {
    names
        .into_iter()
        .map(|mut name| {
            if force_slash && !name.ends_with('/') {
                name.push('/');
            }
            ResponseItem::child_collection(name, true)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{node_resources, nodegroup_resources};

    fn segs(path: &str) -> Vec<String> {
        path.split('/').map(str::to_string).collect()
    }

    fn listing(children: &SchemaMap) -> Vec<String> {
        iterate_resources(children)
            .map(|item| match item {
                ResponseItem::ChildCollection { name, .. } => name,
                other => panic!("unexpected item: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_resolve_plugin_route() {
        match resolve(node_resources(), &segs("power/state")).unwrap() {
            Resolution::Route { record, remaining } => {
                assert!(remaining.is_empty());
                assert!(matches!(record, RouteRecord::Plugin { .. }));
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_collection() {
        match resolve(node_resources(), &segs("power")).unwrap() {
            Resolution::Collection(children) => {
                assert!(children.contains_key("state"));
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn test_plugin_collection_preserves_suffix() {
        match resolve(
            node_resources(),
            &segs("sensors/hardware/temperature/cpu0/reading"),
        )
        .unwrap()
        {
            Resolution::Route { record, remaining } => {
                assert!(matches!(record, RouteRecord::PluginCollection { .. }));
                assert_eq!(remaining, vec!["cpu0", "reading"]);
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn test_plugin_collection_with_no_suffix() {
        match resolve(node_resources(), &segs("sensors/hardware/all")).unwrap() {
            Resolution::Route { record, remaining } => {
                assert!(matches!(record, RouteRecord::PluginCollection { .. }));
                assert!(remaining.is_empty());
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn test_opaque_requires_custom_interface() {
        assert!(matches!(
            resolve(node_resources(), &segs("console/session")).unwrap(),
            Resolution::CustomInterface
        ));
    }

    #[test]
    fn test_missing_segment_is_not_found() {
        assert!(matches!(
            resolve(node_resources(), &segs("power/flux")),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            resolve(nodegroup_resources(), &segs("power")),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_descending_into_route_is_not_found() {
        assert!(matches!(
            resolve(node_resources(), &segs("power/state/deeper")),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let first = format!(
            "{:?}",
            resolve(node_resources(), &segs("configuration/storage/all")).unwrap()
        );
        let second = format!(
            "{:?}",
            resolve(node_resources(), &segs("configuration/storage/all")).unwrap()
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_enumeration_hides_underscore_entries() {
        let names = listing(node_resources());
        assert!(names.contains(&"power/".to_string()));
        assert!(names.contains(&"identify".to_string()));
        assert!(!names.iter().any(|n| n.starts_with('_')));
    }

    #[test]
    fn test_enumeration_suffixes_collections() {
        let console = match resolve(node_resources(), &segs("console")).unwrap() {
            Resolution::Collection(children) => children,
            other => panic!("unexpected resolution: {other:?}"),
        };
        // the opaque session entry is not a plain route, so it lists as
        // a collection; license is a leaf
        assert_eq!(
            listing(console),
            vec!["license".to_string(), "session/".to_string()]
        );
    }

    #[test]
    fn test_iterate_collections_forces_slash() {
        let items = iterate_collections(vec!["n1".to_string(), "n2/".to_string()], true);
        let names: Vec<&str> = items
            .iter()
            .map(|item| match item {
                ResponseItem::ChildCollection { name, .. } => name.as_str(),
                other => panic!("unexpected item: {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["n1/", "n2/"]);
    }
}
