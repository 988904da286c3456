//! # Node Range Expansion
//!
//! The shorthand grammar turning `n1-n3,rack1` into an ordered node
//! list, the human-numeric collation used for every node listing, and
//! the reverse operation collapsing a node list back into its densest
//! range expression.
//!
//! Grammar accepted by [`expand`]:
//! - comma-separated terms, evaluated left to right
//! - a term naming a node group expands to the group's members
//! - `prefixN-prefixM` (or `prefixN:prefixM`) expands the numeric
//!   suffix range; the right side may abbreviate to a bare number
//!   (`n1-3`); zero padding is preserved when both bounds carry it
//! - anything else is a literal node name (ranges do not verify node
//!   existence, so a range can address nodes about to be created)
//!
//! Duplicates are dropped, first occurrence wins.

use muster_plugin_sdk::{ApiError, ConfigManager};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Expand a range expression into an ordered, de-duplicated node list.
pub async fn expand(
    expression: &str,
    configmanager: &Arc<dyn ConfigManager>,
) -> Result<Vec<String>, ApiError> {
    let mut nodes = Vec::new();
    let mut seen = HashSet::new();
    for term in expression.split(',') {
        let term = term.trim();
        if term.is_empty() {
            return Err(ApiError::InvalidArgument(format!(
                "Empty term in noderange: {expression}"
            )));
        }
        let expanded = if configmanager.is_nodegroup(term).await {
            configmanager.group_members(term).await
        } else if let Some(range) = parse_numeric_range(term) {
            range
        } else {
            vec![term.to_string()]
        };
        for node in expanded {
            if seen.insert(node.clone()) {
                nodes.push(node);
            }
        }
    }
    Ok(nodes)
}

/// Try to read `term` as `prefixN-prefixM` / `prefixN:prefixM` /
/// `prefixN-M` and expand it; `None` when the term is not a range.
fn parse_numeric_range(term: &str) -> Option<Vec<String>> {
    for sep in [':', '-'] {
        let Some((left, right)) = term.split_once(sep) else {
            continue;
        };
        let (prefix, start_digits) = split_suffix(left)?;
        let (right_prefix, end_digits) = if right.chars().all(|c| c.is_ascii_digit()) {
            (prefix, right)
        } else {
            split_suffix(right)?
        };
        if prefix != right_prefix || start_digits.is_empty() || end_digits.is_empty() {
            continue;
        }
        let start: u64 = start_digits.parse().ok()?;
        let end: u64 = end_digits.parse().ok()?;
        if end < start {
            return None;
        }
        let padded = start_digits.starts_with('0') && start_digits.len() == end_digits.len();
        let width = start_digits.len();
        return Some(
            (start..=end)
                .map(|n| {
                    if padded {
                        format!("{prefix}{n:0width$}")
                    } else {
                        format!("{prefix}{n}")
                    }
                })
                .collect(),
        );
    }
    None
}

/// Split a name into its non-numeric prefix and trailing digits.
fn split_suffix(name: &str) -> Option<(&str, &str)> {
    let boundary = name.rfind(|c: char| !c.is_ascii_digit()).map_or(0, |i| i + 1);
    if boundary == name.len() {
        // no digits at all; not range material
        return None;
    }
    Some(name.split_at(boundary))
}

/// Human-numeric comparison: digit runs compare by value, so `n2`
/// precedes `n10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(lc), Some(rc)) => {
                if lc.is_ascii_digit() && rc.is_ascii_digit() {
                    let lnum = take_digits(&mut left);
                    let rnum = take_digits(&mut right);
                    let ord = compare_digit_runs(&lnum, &rnum);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                } else {
                    let ord = lc.cmp(&rc);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    left.next();
                    right.next();
                }
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(*c);
        chars.next();
    }
    digits
}

/// Compare digit runs of arbitrary length without overflowing.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Sort names in place by human-numeric collation.
pub fn human_sort(names: &mut [String]) {
    names.sort_by(|a, b| natural_cmp(a, b));
}

/// Collapse a node list into the densest equivalent range expression.
///
/// The inverse of [`expand`] for its numeric-range subset: consecutive
/// numeric suffixes under one prefix fold into `first-last`, everything
/// else passes through literally. The output is sorted human-numerically
/// so the expression is stable regardless of input order.
pub fn abbreviate(nodes: &[String]) -> String {
    let mut sorted: Vec<String> = nodes.to_vec();
    human_sort(&mut sorted);
    sorted.dedup();

    let mut parts: Vec<String> = Vec::new();
    let mut run: Option<(String, Vec<String>, u64)> = None;

    let flush = |run: &mut Option<(String, Vec<String>, u64)>, parts: &mut Vec<String>| {
        if let Some((_, names, _)) = run.take() {
            if names.len() > 1 {
                parts.push(format!("{}-{}", names[0], names[names.len() - 1]));
            } else {
                parts.push(names[0].clone());
            }
        }
    };

    for node in sorted {
        let numeric = split_suffix(&node)
            .and_then(|(prefix, digits)| digits.parse::<u64>().ok().map(|n| (prefix.to_string(), n)));
        match numeric {
            Some((prefix, value)) => {
                let extends = matches!(
                    &run,
                    Some((run_prefix, _, last)) if *run_prefix == prefix && value == *last + 1
                );
                if extends {
                    if let Some((_, names, last)) = &mut run {
                        names.push(node);
                        *last = value;
                    }
                } else {
                    flush(&mut run, &mut parts);
                    run = Some((prefix, vec![node], value));
                }
            }
            None => {
                flush(&mut run, &mut parts);
                parts.push(node);
            }
        }
    }
    flush(&mut run, &mut parts);
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_plugin_sdk::ConfigManager;

    struct NoGroups;

    #[async_trait::async_trait]
    impl ConfigManager for NoGroups {
        async fn get_node_attributes(
            &self,
            _nodes: &[String],
            _attrs: &[String],
        ) -> Result<muster_plugin_sdk::AttributeSnapshot, ApiError> {
            Ok(Default::default())
        }
        async fn add_node_attributes(
            &self,
            _attribmap: std::collections::HashMap<String, serde_json::Map<String, serde_json::Value>>,
        ) -> Result<(), ApiError> {
            Ok(())
        }
        async fn del_nodes(&self, _nodes: &[String]) -> Result<(), ApiError> {
            Ok(())
        }
        async fn is_node(&self, _node: &str) -> bool {
            false
        }
        async fn list_nodes(&self) -> Vec<String> {
            Vec::new()
        }
        async fn add_group_attributes(
            &self,
            _attribmap: std::collections::HashMap<String, serde_json::Map<String, serde_json::Value>>,
        ) -> Result<(), ApiError> {
            Ok(())
        }
        async fn get_group_attributes(
            &self,
            _group: &str,
        ) -> Result<std::collections::HashMap<String, muster_plugin_sdk::AttrValue>, ApiError> {
            Ok(Default::default())
        }
        async fn del_groups(&self, _groups: &[String]) -> Result<(), ApiError> {
            Ok(())
        }
        async fn is_nodegroup(&self, group: &str) -> bool {
            group == "rack1"
        }
        async fn list_groups(&self) -> Vec<String> {
            vec!["rack1".to_string()]
        }
        async fn group_members(&self, _group: &str) -> Vec<String> {
            vec!["r1n1".to_string(), "r1n2".to_string()]
        }
        async fn list_users(&self) -> Vec<String> {
            Vec::new()
        }
        async fn get_user(&self, _name: &str) -> Option<muster_plugin_sdk::UserRecord> {
            None
        }
        async fn create_user(
            &self,
            _name: &str,
            _attributes: serde_json::Map<String, serde_json::Value>,
        ) -> Result<(), ApiError> {
            Ok(())
        }
        async fn set_user(
            &self,
            _name: &str,
            _attributes: serde_json::Map<String, serde_json::Value>,
        ) -> Result<(), ApiError> {
            Ok(())
        }
        async fn del_user(&self, _name: &str) -> Result<(), ApiError> {
            Ok(())
        }
        async fn get_collective_member(
            &self,
            _name: &str,
        ) -> Option<muster_plugin_sdk::CollectiveMember> {
            None
        }
        async fn list_collective(&self) -> Vec<String> {
            Vec::new()
        }
        async fn check_quorum(&self) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn cfg() -> Arc<dyn ConfigManager> {
        Arc::new(NoGroups)
    }

    #[tokio::test]
    async fn test_expand_numeric_range() {
        let nodes = expand("n1-n3", &cfg()).await.unwrap();
        assert_eq!(nodes, vec!["n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn test_expand_abbreviated_and_colon_forms() {
        assert_eq!(expand("n1-3", &cfg()).await.unwrap(), vec!["n1", "n2", "n3"]);
        assert_eq!(expand("n1:n2", &cfg()).await.unwrap(), vec!["n1", "n2"]);
    }

    #[tokio::test]
    async fn test_expand_preserves_zero_padding() {
        let nodes = expand("n008-n011", &cfg()).await.unwrap();
        assert_eq!(nodes, vec!["n008", "n009", "n010", "n011"]);
    }

    #[tokio::test]
    async fn test_expand_group_and_literals() {
        let nodes = expand("rack1,compute-1", &cfg()).await.unwrap();
        assert_eq!(nodes, vec!["r1n1", "r1n2", "compute-1"]);
    }

    #[tokio::test]
    async fn test_expand_drops_duplicates_keeping_order() {
        let nodes = expand("n2,n1-n3", &cfg()).await.unwrap();
        assert_eq!(nodes, vec!["n2", "n1", "n3"]);
    }

    #[tokio::test]
    async fn test_expand_rejects_empty_terms() {
        assert!(matches!(
            expand("n1,,n2", &cfg()).await,
            Err(ApiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_natural_sort_orders_numerically() {
        let mut names = vec![
            "n10".to_string(),
            "n2".to_string(),
            "n1".to_string(),
            "mgmt".to_string(),
        ];
        human_sort(&mut names);
        assert_eq!(names, vec!["mgmt", "n1", "n2", "n10"]);
    }

    #[test]
    fn test_abbreviate_collapses_runs() {
        let nodes: Vec<String> = ["n1", "n2", "n3", "n5", "mgmt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(abbreviate(&nodes), "mgmt,n1-n3,n5");
    }

    #[test]
    fn test_abbreviate_two_nodes() {
        let nodes: Vec<String> = ["n1", "n2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(abbreviate(&nodes), "n1-n2");
    }

    #[test]
    fn test_abbreviate_is_input_order_independent() {
        let a: Vec<String> = ["n3", "n1", "n2"].iter().map(|s| s.to_string()).collect();
        let b: Vec<String> = ["n1", "n2", "n3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(abbreviate(&a), abbreviate(&b));
    }
}
