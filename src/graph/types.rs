//! Graph data model.
//!
//! Node and relationship identifiers are content-derived 16-hex digests, so
//! the same entity gets the same ID in every run. Attribute maps and
//! provenance sets are ordered containers; iteration order is serialization
//! order, which is what keeps the artifacts byte-stable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    Run,
    File,
    Module,
    Function,
    Class,
    Test,
    Dependency,
    Artifact,
    Asset,
    AssetCard,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Run => "run",
            NodeKind::File => "file",
            NodeKind::Module => "module",
            NodeKind::Function => "function",
            NodeKind::Class => "class",
            NodeKind::Test => "test",
            NodeKind::Dependency => "dependency",
            NodeKind::Artifact => "artifact",
            NodeKind::Asset => "asset",
            NodeKind::AssetCard => "asset_card",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "run" => NodeKind::Run,
            "file" => NodeKind::File,
            "module" => NodeKind::Module,
            "function" => NodeKind::Function,
            "class" => NodeKind::Class,
            "test" => NodeKind::Test,
            "dependency" => NodeKind::Dependency,
            "artifact" => NodeKind::Artifact,
            "asset" => NodeKind::Asset,
            "asset_card" => NodeKind::AssetCard,
            _ => return None,
        })
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelationshipKind {
    Contains,
    Imports,
    DependsOn,
    Tests,
    Defines,
    Derives,
    Describes,
    Produces,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Contains => "contains",
            RelationshipKind::Imports => "imports",
            RelationshipKind::DependsOn => "depends_on",
            RelationshipKind::Tests => "tests",
            RelationshipKind::Defines => "defines",
            RelationshipKind::Derives => "derives",
            RelationshipKind::Describes => "describes",
            RelationshipKind::Produces => "produces",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "contains" => RelationshipKind::Contains,
            "imports" => RelationshipKind::Imports,
            "depends_on" => RelationshipKind::DependsOn,
            "tests" => RelationshipKind::Tests,
            "defines" => RelationshipKind::Defines,
            "derives" => RelationshipKind::Derives,
            "describes" => RelationshipKind::Describes,
            "produces" => RelationshipKind::Produces,
            _ => return None,
        })
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttrValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Bool(value) => serde_json::Value::Bool(*value),
            AttrValue::Int(value) => serde_json::Value::from(*value),
            AttrValue::Float(value) => serde_json::Value::from(*value),
            AttrValue::Str(value) => serde_json::Value::String(value.clone()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(AttrValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(AttrValue::Int(i))
                } else {
                    n.as_f64().map(AttrValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(AttrValue::Str(s.clone())),
            _ => None,
        }
    }

    /// Deterministic string form for GraphML data elements.
    pub fn render(&self) -> String {
        match self {
            AttrValue::Bool(value) => value.to_string(),
            AttrValue::Int(value) => value.to_string(),
            AttrValue::Float(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
            }
            AttrValue::Str(value) => value.clone(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub attributes: BTreeMap<String, AttrValue>,
    /// Canonical paths and/or run IDs justifying this node. Never empty in
    /// a valid graph.
    pub provenance: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: String,
    pub kind: RelationshipKind,
    pub source_id: String,
    pub target_id: String,
    pub attributes: BTreeMap<String, AttrValue>,
}

/// In-memory graph. Nodes are keyed by ID; relationships by the
/// `(source_id, kind, target_id)` triple, which is also their sort order
/// in every serialization.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    pub nodes: BTreeMap<String, Node>,
    pub relationships: BTreeMap<(String, String, String), Relationship>,
    /// IDs inserted twice with conflicting kinds; non-empty fails validation.
    pub collisions: Vec<String>,
}

impl KnowledgeGraph {
    /// Insert or merge a node. Re-adding the same ID with the same kind
    /// merges provenance and attributes (new values win per key); a kind
    /// conflict is recorded for the validator.
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.get_mut(&node.id) {
            Some(existing) if existing.kind == node.kind => {
                existing.provenance.extend(node.provenance);
                existing.attributes.extend(node.attributes);
            }
            Some(_) => self.collisions.push(node.id),
            None => {
                self.nodes.insert(node.id.clone(), node);
            }
        }
    }

    /// Insert a relationship; duplicates (same triple) are idempotent.
    pub fn add_relationship(&mut self, relationship: Relationship) {
        let key = (
            relationship.source_id.clone(),
            relationship.kind.as_str().to_string(),
            relationship.target_id.clone(),
        );
        self.relationships.entry(key).or_insert(relationship);
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |node| node.kind == kind)
    }

    pub fn relationships_of_kind(
        &self,
        kind: RelationshipKind,
    ) -> impl Iterator<Item = &Relationship> {
        self.relationships.values().filter(move |rel| rel.kind == kind)
    }

    /// Does this edge triple exist already?
    pub fn has_relationship(
        &self,
        source_id: &str,
        kind: RelationshipKind,
        target_id: &str,
    ) -> bool {
        self.relationships.contains_key(&(
            source_id.to_string(),
            kind.as_str().to_string(),
            target_id.to_string(),
        ))
    }

    /// The contains-parent of a node, if any.
    pub fn contains_parent(&self, node_id: &str) -> Option<&str> {
        self.relationships
            .values()
            .find(|rel| rel.kind == RelationshipKind::Contains && rel.target_id == node_id)
            .map(|rel| rel.source_id.as_str())
    }
}
