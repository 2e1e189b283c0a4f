//! Deterministic graph serialization: JSON-LD and GraphML.
//!
//! Nodes serialize sorted by ID, relationships by `(source, kind, target)`,
//! and every map with sorted keys. Output is UTF-8 with LF line endings and
//! no trailing whitespace, so two identical graphs always produce identical
//! bytes. The JSON-LD form is also what the differ reads back from prior
//! runs.

use super::types::{AttrValue, KnowledgeGraph, Node, NodeKind, Relationship, RelationshipKind};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

pub fn to_jsonld(graph: &KnowledgeGraph) -> String {
    let nodes: Vec<Value> = graph.nodes.values().map(node_to_json).collect();
    let relationships: Vec<Value> =
        graph.relationships.values().map(relationship_to_json).collect();
    let document = json!({
        "@context": {
            "id": "@id",
            "kind": "@type",
            "nodes": {"@container": "@list", "@id": "#nodes"},
            "relationships": {"@container": "@list", "@id": "#relationships"},
        },
        "nodes": nodes,
        "relationships": relationships,
    });
    let mut text = serde_json::to_string_pretty(&document).expect("graph serializes");
    text.push('\n');
    text
}

fn node_to_json(node: &Node) -> Value {
    let attributes: BTreeMap<&str, Value> =
        node.attributes.iter().map(|(key, value)| (key.as_str(), value.to_json())).collect();
    json!({
        "attributes": attributes,
        "id": node.id,
        "kind": node.kind.as_str(),
        "label": node.label,
        "provenance": node.provenance.iter().collect::<Vec<_>>(),
    })
}

fn relationship_to_json(relationship: &Relationship) -> Value {
    let attributes: BTreeMap<&str, Value> = relationship
        .attributes
        .iter()
        .map(|(key, value)| (key.as_str(), value.to_json()))
        .collect();
    json!({
        "attributes": attributes,
        "id": relationship.id,
        "kind": relationship.kind.as_str(),
        "source": relationship.source_id,
        "target": relationship.target_id,
    })
}

/// Rebuild a graph from its JSON-LD form. Entries with unknown kinds are an
/// error: the kind sets are closed.
pub fn from_jsonld(text: &str) -> Result<KnowledgeGraph, String> {
    let document: Value = serde_json::from_str(text).map_err(|err| err.to_string())?;
    let mut graph = KnowledgeGraph::default();
    for raw in document.get("nodes").and_then(Value::as_array).unwrap_or(&Vec::new()) {
        let id = string_field(raw, "id")?;
        let kind_raw = string_field(raw, "kind")?;
        let kind = NodeKind::parse(&kind_raw).ok_or_else(|| format!("unknown node kind {kind_raw}"))?;
        let label = string_field(raw, "label")?;
        let mut attributes = BTreeMap::new();
        if let Some(map) = raw.get("attributes").and_then(Value::as_object) {
            for (key, value) in map {
                if let Some(attr) = AttrValue::from_json(value) {
                    attributes.insert(key.clone(), attr);
                }
            }
        }
        let provenance: BTreeSet<String> = raw
            .get("provenance")
            .and_then(Value::as_array)
            .map(|values| {
                values.iter().filter_map(Value::as_str).map(str::to_string).collect()
            })
            .unwrap_or_default();
        graph.add_node(Node { id, kind, label, attributes, provenance });
    }
    for raw in document.get("relationships").and_then(Value::as_array).unwrap_or(&Vec::new()) {
        let id = string_field(raw, "id")?;
        let kind_raw = string_field(raw, "kind")?;
        let kind = RelationshipKind::parse(&kind_raw)
            .ok_or_else(|| format!("unknown relationship kind {kind_raw}"))?;
        let source_id = string_field(raw, "source")?;
        let target_id = string_field(raw, "target")?;
        let mut attributes = BTreeMap::new();
        if let Some(map) = raw.get("attributes").and_then(Value::as_object) {
            for (key, value) in map {
                if let Some(attr) = AttrValue::from_json(value) {
                    attributes.insert(key.clone(), attr);
                }
            }
        }
        graph.add_relationship(Relationship { id, kind, source_id, target_id, attributes });
    }
    Ok(graph)
}

fn string_field(value: &Value, field: &str) -> Result<String, String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing field {field}"))
}

pub fn to_graphml(graph: &KnowledgeGraph) -> String {
    let mut node_attr_keys: BTreeSet<&str> = BTreeSet::new();
    for node in graph.nodes.values() {
        node_attr_keys.extend(node.attributes.keys().map(String::as_str));
    }
    let mut edge_attr_keys: BTreeSet<&str> = BTreeSet::new();
    for relationship in graph.relationships.values() {
        edge_attr_keys.extend(relationship.attributes.keys().map(String::as_str));
    }

    let mut lines: Vec<String> = vec![
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>".to_string(),
        "<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">".to_string(),
    ];
    // Attribute keys are declared before any node or edge data.
    for (key_id, name) in [("nk_kind", "kind"), ("nk_label", "label"), ("nk_provenance", "provenance")]
    {
        lines.push(format!(
            "  <key id=\"{key_id}\" for=\"node\" attr.name=\"{name}\" attr.type=\"string\"/>"
        ));
    }
    for name in &node_attr_keys {
        lines.push(format!(
            "  <key id=\"na_{name}\" for=\"node\" attr.name=\"{name}\" attr.type=\"string\"/>"
        ));
    }
    lines.push(
        "  <key id=\"ek_kind\" for=\"edge\" attr.name=\"kind\" attr.type=\"string\"/>".to_string(),
    );
    for name in &edge_attr_keys {
        lines.push(format!(
            "  <key id=\"ea_{name}\" for=\"edge\" attr.name=\"{name}\" attr.type=\"string\"/>"
        ));
    }
    lines.push("  <graph edgedefault=\"directed\">".to_string());

    for node in graph.nodes.values() {
        lines.push(format!("    <node id=\"{}\">", escape_xml(&node.id)));
        lines.push(format!("      <data key=\"nk_kind\">{}</data>", node.kind.as_str()));
        lines.push(format!(
            "      <data key=\"nk_label\">{}</data>",
            escape_xml(&node.label)
        ));
        let provenance: Vec<&str> = node.provenance.iter().map(String::as_str).collect();
        lines.push(format!(
            "      <data key=\"nk_provenance\">{}</data>",
            escape_xml(&provenance.join(","))
        ));
        for (key, value) in &node.attributes {
            lines.push(format!(
                "      <data key=\"na_{key}\">{}</data>",
                escape_xml(&value.render())
            ));
        }
        lines.push("    </node>".to_string());
    }
    for relationship in graph.relationships.values() {
        lines.push(format!(
            "    <edge id=\"{}\" source=\"{}\" target=\"{}\">",
            escape_xml(&relationship.id),
            escape_xml(&relationship.source_id),
            escape_xml(&relationship.target_id)
        ));
        lines.push(format!(
            "      <data key=\"ek_kind\">{}</data>",
            relationship.kind.as_str()
        ));
        for (key, value) in &relationship.attributes {
            lines.push(format!(
                "      <data key=\"ea_{key}\">{}</data>",
                escape_xml(&value.render())
            ));
        }
        lines.push("    </edge>".to_string());
    }
    lines.push("  </graph>".to_string());
    lines.push("</graphml>".to_string());
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
