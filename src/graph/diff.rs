//! Inter-run graph diffing.
//!
//! Compares the prior run's JSON-LD snapshot against the current in-memory
//! graph and reports added/removed/changed nodes and added/removed edges.
//! Both output forms are deterministic; the Markdown form groups entries by
//! kind and renders empty sections as `_none_` so consecutive diffs stay
//! line-comparable.

use super::types::{KnowledgeGraph, Relationship};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDiff {
    pub added_nodes: Vec<String>,
    pub removed_nodes: Vec<String>,
    pub changed_nodes: Vec<String>,
    pub added_edges: Vec<String>,
    pub removed_edges: Vec<String>,
}

impl GraphDiff {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.changed_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }
}

pub fn diff_graphs(previous: &KnowledgeGraph, current: &KnowledgeGraph) -> GraphDiff {
    let mut diff = GraphDiff::default();

    for (id, node) in &current.nodes {
        match previous.nodes.get(id) {
            None => diff.added_nodes.push(id.clone()),
            Some(prior) => {
                if prior.attributes != node.attributes || prior.provenance != node.provenance {
                    diff.changed_nodes.push(id.clone());
                }
            }
        }
    }
    for id in previous.nodes.keys() {
        if !current.nodes.contains_key(id) {
            diff.removed_nodes.push(id.clone());
        }
    }
    for (key, relationship) in &current.relationships {
        if !previous.relationships.contains_key(key) {
            diff.added_edges.push(relationship.id.clone());
        }
    }
    for (key, relationship) in &previous.relationships {
        if !current.relationships.contains_key(key) {
            diff.removed_edges.push(relationship.id.clone());
        }
    }

    // BTreeMap iteration already sorts node ids; edge ids follow triple
    // order, so re-sort them by id for a stable list.
    diff.added_edges.sort();
    diff.removed_edges.sort();
    diff
}

/// Machine form: sorted ID lists under fixed keys.
pub fn to_json(diff: &GraphDiff) -> String {
    let document = json!({
        "added_edges": diff.added_edges,
        "added_nodes": diff.added_nodes,
        "changed_nodes": diff.changed_nodes,
        "removed_edges": diff.removed_edges,
        "removed_nodes": diff.removed_nodes,
    });
    let mut text = serde_json::to_string_pretty(&document).expect("diff serializes");
    text.push('\n');
    text
}

/// Human form: Markdown grouped by kind, `_none_` for empty sections.
pub fn to_markdown(
    diff: &GraphDiff,
    previous: &KnowledgeGraph,
    current: &KnowledgeGraph,
) -> String {
    let mut lines = vec!["# Knowledge Graph Diff".to_string(), String::new()];

    node_section(&mut lines, "Added Nodes", &diff.added_nodes, current);
    node_section(&mut lines, "Removed Nodes", &diff.removed_nodes, previous);
    node_section(&mut lines, "Changed Nodes", &diff.changed_nodes, current);
    edge_section(&mut lines, "Added Edges", &diff.added_edges, current);
    edge_section(&mut lines, "Removed Edges", &diff.removed_edges, previous);

    lines.join("\n")
}

fn node_section(lines: &mut Vec<String>, title: &str, ids: &[String], graph: &KnowledgeGraph) {
    lines.push(format!("## {title}"));
    lines.push(String::new());
    if ids.is_empty() {
        lines.push("_none_".to_string());
        lines.push(String::new());
        return;
    }
    let mut by_kind: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for id in ids {
        let (kind, label) = match graph.nodes.get(id) {
            Some(node) => (node.kind.as_str(), node.label.clone()),
            None => ("unknown", id.clone()),
        };
        by_kind.entry(kind).or_default().push(format!("- {label} (`{id}`)"));
    }
    for (kind, entries) in by_kind {
        lines.push(format!("### {kind}"));
        lines.push(String::new());
        let mut entries = entries;
        entries.sort();
        lines.extend(entries);
        lines.push(String::new());
    }
}

fn edge_section(lines: &mut Vec<String>, title: &str, ids: &[String], graph: &KnowledgeGraph) {
    lines.push(format!("## {title}"));
    lines.push(String::new());
    if ids.is_empty() {
        lines.push("_none_".to_string());
        lines.push(String::new());
        return;
    }
    let by_id: BTreeMap<&str, &Relationship> =
        graph.relationships.values().map(|rel| (rel.id.as_str(), rel)).collect();
    let mut entries: Vec<String> = ids
        .iter()
        .map(|id| match by_id.get(id.as_str()) {
            Some(rel) => {
                let source = graph
                    .nodes
                    .get(&rel.source_id)
                    .map(|n| n.label.as_str())
                    .unwrap_or(rel.source_id.as_str());
                let target = graph
                    .nodes
                    .get(&rel.target_id)
                    .map(|n| n.label.as_str())
                    .unwrap_or(rel.target_id.as_str());
                format!("- {}: {source} -> {target} (`{id}`)", rel.kind.as_str())
            }
            None => format!("- `{id}`"),
        })
        .collect();
    entries.sort();
    lines.extend(entries);
    lines.push(String::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{AttrValue, Node, NodeKind, RelationshipKind};
    use crate::util::hashing::{edge_id, node_id};
    use std::collections::{BTreeMap, BTreeSet};

    fn graph_with(paths: &[&str]) -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::default();
        let run = node_id("run", "r1");
        graph.add_node(Node {
            id: run.clone(),
            kind: NodeKind::Run,
            label: "run r1".to_string(),
            attributes: BTreeMap::new(),
            provenance: BTreeSet::from(["r1".to_string()]),
        });
        for path in paths {
            let id = node_id("file", path);
            graph.add_node(Node {
                id: id.clone(),
                kind: NodeKind::File,
                label: path.to_string(),
                attributes: BTreeMap::from([(
                    "digest".to_string(),
                    AttrValue::from("d0"),
                )]),
                provenance: BTreeSet::from([path.to_string()]),
            });
            graph.add_relationship(Relationship {
                id: edge_id(&run, "contains", &id),
                kind: RelationshipKind::Contains,
                source_id: run.clone(),
                target_id: id,
                attributes: BTreeMap::new(),
            });
        }
        graph
    }

    #[test]
    fn identical_graphs_diff_empty() {
        let a = graph_with(&["a.py"]);
        let diff = diff_graphs(&a, &a.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn added_and_removed_nodes_and_edges_are_reported() {
        let previous = graph_with(&["a.py"]);
        let current = graph_with(&["b.py"]);
        let diff = diff_graphs(&previous, &current);
        assert_eq!(diff.added_nodes, vec![node_id("file", "b.py")]);
        assert_eq!(diff.removed_nodes, vec![node_id("file", "a.py")]);
        assert_eq!(diff.added_edges.len(), 1);
        assert_eq!(diff.removed_edges.len(), 1);
    }

    #[test]
    fn attribute_change_marks_node_changed() {
        let previous = graph_with(&["a.py"]);
        let mut current = graph_with(&["a.py"]);
        let id = node_id("file", "a.py");
        current
            .nodes
            .get_mut(&id)
            .unwrap()
            .attributes
            .insert("digest".to_string(), AttrValue::from("d1"));
        let diff = diff_graphs(&previous, &current);
        assert_eq!(diff.changed_nodes, vec![id]);
        assert!(diff.added_nodes.is_empty());
    }

    #[test]
    fn markdown_renders_empty_sections_as_none() {
        let a = graph_with(&["a.py"]);
        let markdown = to_markdown(&GraphDiff::default(), &a, &a);
        assert_eq!(markdown.matches("_none_").count(), 5);
    }

    #[test]
    fn markdown_groups_by_kind() {
        let previous = graph_with(&[]);
        let current = graph_with(&["a.py"]);
        let diff = diff_graphs(&previous, &current);
        let markdown = to_markdown(&diff, &previous, &current);
        assert!(markdown.contains("## Added Nodes"));
        assert!(markdown.contains("### file"));
        assert!(markdown.contains("- a.py"));
    }

    #[test]
    fn json_form_is_stable() {
        let previous = graph_with(&["a.py"]);
        let current = graph_with(&["b.py"]);
        let diff = diff_graphs(&previous, &current);
        assert_eq!(to_json(&diff), to_json(&diff));
        assert!(to_json(&diff).contains("added_nodes"));
    }
}
