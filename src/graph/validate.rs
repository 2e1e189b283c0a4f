//! Schema-level graph invariants.
//!
//! Enforced before any serialization: unique IDs, non-empty provenance,
//! edges with live endpoints, and a `contains` sub-graph that forms a tree
//! rooted at the single run node with every node reachable from it.
//! Violations produce an [`RunError::Invariant`] naming the offending IDs.

use super::types::{KnowledgeGraph, NodeKind, RelationshipKind};
use crate::error::RunError;
use std::collections::{BTreeMap, BTreeSet};

pub fn validate(graph: &KnowledgeGraph) -> Result<(), RunError> {
    if !graph.collisions.is_empty() {
        let mut ids = graph.collisions.clone();
        ids.sort();
        ids.dedup();
        return Err(RunError::Invariant(format!("duplicate node ids: {}", ids.join(", "))));
    }

    let mut missing_provenance: Vec<&str> = graph
        .nodes
        .values()
        .filter(|node| node.provenance.is_empty())
        .map(|node| node.id.as_str())
        .collect();
    if !missing_provenance.is_empty() {
        missing_provenance.sort();
        return Err(RunError::Invariant(format!(
            "nodes missing provenance: {}",
            missing_provenance.join(", ")
        )));
    }

    let mut dangling: BTreeSet<&str> = BTreeSet::new();
    for relationship in graph.relationships.values() {
        if !graph.nodes.contains_key(&relationship.source_id) {
            dangling.insert(relationship.source_id.as_str());
        }
        if !graph.nodes.contains_key(&relationship.target_id) {
            dangling.insert(relationship.target_id.as_str());
        }
    }
    if !dangling.is_empty() {
        let ids: Vec<&str> = dangling.into_iter().collect();
        return Err(RunError::Invariant(format!(
            "relationships reference unknown nodes: {}",
            ids.join(", ")
        )));
    }

    validate_containment(graph)
}

fn validate_containment(graph: &KnowledgeGraph) -> Result<(), RunError> {
    let roots: Vec<&str> = graph
        .nodes
        .values()
        .filter(|node| node.kind == NodeKind::Run)
        .map(|node| node.id.as_str())
        .collect();
    let root = match roots.as_slice() {
        [] => {
            // An empty graph is trivially valid; anything else needs a root.
            return if graph.nodes.is_empty() {
                Ok(())
            } else {
                Err(RunError::Invariant("no run root node".to_string()))
            };
        }
        [root] => *root,
        many => {
            return Err(RunError::Invariant(format!(
                "multiple run root nodes: {}",
                many.join(", ")
            )))
        }
    };

    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut parents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for relationship in graph.relationships_of_kind(RelationshipKind::Contains) {
        children
            .entry(relationship.source_id.as_str())
            .or_default()
            .push(relationship.target_id.as_str());
        parents
            .entry(relationship.target_id.as_str())
            .or_default()
            .push(relationship.source_id.as_str());
    }

    let mut multi_parent: Vec<&str> = parents
        .iter()
        .filter(|(_, sources)| sources.len() > 1)
        .map(|(target, _)| *target)
        .collect();
    if !multi_parent.is_empty() {
        multi_parent.sort();
        return Err(RunError::Invariant(format!(
            "containment is not single-parent for: {}",
            multi_parent.join(", ")
        )));
    }
    if parents.contains_key(root) {
        return Err(RunError::Invariant(format!(
            "run root {root} has a containment parent"
        )));
    }

    // Iterative DFS with an explicit on-path set for cycle detection.
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut on_path: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<(&str, bool)> = vec![(root, false)];
    while let Some((node_id, leaving)) = stack.pop() {
        if leaving {
            on_path.remove(node_id);
            continue;
        }
        if on_path.contains(node_id) {
            return Err(RunError::Invariant(format!(
                "containment cycle involving {node_id}"
            )));
        }
        if !visited.insert(node_id) {
            continue;
        }
        on_path.insert(node_id);
        stack.push((node_id, true));
        if let Some(kids) = children.get(node_id) {
            for kid in kids {
                if on_path.contains(kid) {
                    return Err(RunError::Invariant(format!(
                        "containment cycle involving {kid}"
                    )));
                }
                stack.push((kid, false));
            }
        }
    }

    let mut orphans: Vec<&str> = graph
        .nodes
        .keys()
        .map(String::as_str)
        .filter(|id| !visited.contains(id))
        .collect();
    if !orphans.is_empty() {
        orphans.sort();
        return Err(RunError::Invariant(format!(
            "nodes unreachable from run root via contains: {}",
            orphans.join(", ")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{AttrValue, Node, Relationship};
    use crate::util::hashing::{edge_id, node_id};
    use std::collections::{BTreeMap, BTreeSet};

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: id.to_string(),
            kind,
            label: id.to_string(),
            attributes: BTreeMap::new(),
            provenance: BTreeSet::from(["origin".to_string()]),
        }
    }

    fn contains(source: &str, target: &str) -> Relationship {
        Relationship {
            id: edge_id(source, "contains", target),
            kind: RelationshipKind::Contains,
            source_id: source.to_string(),
            target_id: target.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    fn rooted_graph() -> (KnowledgeGraph, String) {
        let root_id = node_id("run", "r1");
        let mut graph = KnowledgeGraph::default();
        graph.add_node(node(&root_id, NodeKind::Run));
        (graph, root_id)
    }

    #[test]
    fn empty_graph_is_valid() {
        validate(&KnowledgeGraph::default()).unwrap();
    }

    #[test]
    fn sole_run_node_is_valid() {
        let (graph, _) = rooted_graph();
        validate(&graph).unwrap();
    }

    #[test]
    fn orphan_node_is_rejected() {
        let (mut graph, _) = rooted_graph();
        graph.add_node(node("ffff00000000aaaa", NodeKind::File));
        let err = validate(&graph).unwrap_err();
        assert!(err.to_string().contains("unreachable"));
        assert!(err.to_string().contains("ffff00000000aaaa"));
    }

    #[test]
    fn missing_provenance_is_rejected() {
        let (mut graph, root) = rooted_graph();
        let mut bad = node("ffff00000000aaaa", NodeKind::File);
        bad.provenance.clear();
        graph.add_node(bad);
        graph.add_relationship(contains(&root, "ffff00000000aaaa"));
        let err = validate(&graph).unwrap_err();
        assert!(err.to_string().contains("provenance"));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let (mut graph, root) = rooted_graph();
        graph.add_relationship(contains(&root, "not-a-node"));
        let err = validate(&graph).unwrap_err();
        assert!(err.to_string().contains("unknown nodes"));
        assert!(err.to_string().contains("not-a-node"));
    }

    #[test]
    fn second_parent_is_rejected() {
        let (mut graph, root) = rooted_graph();
        graph.add_node(node("aaaa", NodeKind::File));
        graph.add_node(node("bbbb", NodeKind::File));
        graph.add_node(node("cccc", NodeKind::Module));
        graph.add_relationship(contains(&root, "aaaa"));
        graph.add_relationship(contains(&root, "bbbb"));
        graph.add_relationship(contains("aaaa", "cccc"));
        graph.add_relationship(contains("bbbb", "cccc"));
        let err = validate(&graph).unwrap_err();
        assert!(err.to_string().contains("single-parent"));
        assert!(err.to_string().contains("cccc"));
    }

    #[test]
    fn cycle_is_rejected() {
        let (mut graph, root) = rooted_graph();
        graph.add_node(node("aaaa", NodeKind::File));
        graph.add_relationship(contains(&root, "aaaa"));
        graph.add_relationship(contains("aaaa", &root));
        let err = validate(&graph).unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("cycle") || message.contains("parent"),
            "unexpected: {message}"
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let (mut graph, root) = rooted_graph();
        graph.add_node(node("aaaa", NodeKind::File));
        graph.add_node(node("aaaa", NodeKind::Module));
        graph.add_relationship(contains(&root, "aaaa"));
        let err = validate(&graph).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn attribute_merge_does_not_trip_validator() {
        let (mut graph, root) = rooted_graph();
        let mut a = node("aaaa", NodeKind::File);
        a.attributes.insert("x".to_string(), AttrValue::Int(1));
        graph.add_node(a.clone());
        graph.add_node(a);
        graph.add_relationship(contains(&root, "aaaa"));
        validate(&graph).unwrap();
    }
}
