//! Graph-to-template projection.
//!
//! Each preset projects a sorted subgraph out of the knowledge graph; the
//! digest of that projection keys the template cache, so a diagram only
//! regenerates when the nodes or edges it actually shows have changed.

use super::theme::Theme;
use crate::graph::{KnowledgeGraph, NodeKind, RelationshipKind};
use crate::util::hashing::digest_bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DiagramPreset {
    /// Modules and the files declaring them.
    Architecture,
    /// Modules and the packages they depend on.
    Dependencies,
    /// Tests and the modules they exercise.
    Tests,
}

impl DiagramPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramPreset::Architecture => "architecture",
            DiagramPreset::Dependencies => "dependencies",
            DiagramPreset::Tests => "tests",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DiagramFormat {
    Mermaid,
    Plantuml,
    Graphviz,
}

impl DiagramFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramFormat::Mermaid => "mermaid",
            DiagramFormat::Plantuml => "plantuml",
            DiagramFormat::Graphviz => "graphviz",
        }
    }
}

/// Sorted projection of the nodes and edges a preset shows.
#[derive(Debug, Clone)]
pub struct Projection {
    /// `(node_id, label)` sorted by node id.
    pub nodes: Vec<(String, String)>,
    /// `(source_id, target_id, edge label)` sorted.
    pub edges: Vec<(String, String, &'static str)>,
}

impl Projection {
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (id, label) in &self.nodes {
            hasher.update(id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(label.as_bytes());
            hasher.update([0x0a]);
        }
        for (source, target, label) in &self.edges {
            hasher.update(source.as_bytes());
            hasher.update([0x1f]);
            hasher.update(target.as_bytes());
            hasher.update([0x1f]);
            hasher.update(label.as_bytes());
            hasher.update([0x0a]);
        }
        format!("{:x}", hasher.finalize())
    }
}

pub fn project(graph: &KnowledgeGraph, preset: DiagramPreset) -> Projection {
    let (node_kinds, edge_kind, edge_label): (&[NodeKind], RelationshipKind, &'static str) =
        match preset {
            DiagramPreset::Architecture => (
                &[NodeKind::File, NodeKind::Module],
                RelationshipKind::Imports,
                "imports",
            ),
            DiagramPreset::Dependencies => (
                &[NodeKind::Module, NodeKind::Dependency],
                RelationshipKind::DependsOn,
                "depends on",
            ),
            DiagramPreset::Tests => {
                (&[NodeKind::Test, NodeKind::Module], RelationshipKind::Tests, "tests")
            }
        };

    let mut nodes: Vec<(String, String)> = graph
        .nodes
        .values()
        .filter(|node| node_kinds.contains(&node.kind))
        .map(|node| (node.id.clone(), node.label.clone()))
        .collect();
    nodes.sort();

    let mut edges: Vec<(String, String, &'static str)> = graph
        .relationships_of_kind(edge_kind)
        .filter(|rel| {
            nodes.iter().any(|(id, _)| id == &rel.source_id)
                && nodes.iter().any(|(id, _)| id == &rel.target_id)
        })
        .map(|rel| (rel.source_id.clone(), rel.target_id.clone(), edge_label))
        .collect();

    // Architecture also shows which file declares which module.
    if preset == DiagramPreset::Architecture {
        edges.extend(
            graph
                .relationships_of_kind(RelationshipKind::Contains)
                .filter(|rel| {
                    nodes.iter().any(|(id, _)| id == &rel.source_id)
                        && nodes.iter().any(|(id, _)| id == &rel.target_id)
                })
                .map(|rel| (rel.source_id.clone(), rel.target_id.clone(), "declares")),
        );
    }
    edges.sort();
    Projection { nodes, edges }
}

#[derive(Debug, Clone)]
pub struct DiagramTemplate {
    pub preset: DiagramPreset,
    pub format: DiagramFormat,
    pub theme_id: String,
    pub subgraph_digest: String,
    pub cache_key: String,
    pub content: String,
}

impl DiagramTemplate {
    /// Source file name per the run-directory contract; the dark variant
    /// carries a `.dark` suffix so `auto` can emit both.
    pub fn source_file_name(&self) -> String {
        format!("{}.src", self.base_name())
    }

    pub fn rendered_file_name(&self, extension: &str) -> String {
        format!("{}.{extension}", self.base_name())
    }

    fn base_name(&self) -> String {
        if self.theme_id == "dark" {
            format!("{}.{}.dark", self.preset.as_str(), self.format.as_str())
        } else {
            format!("{}.{}", self.preset.as_str(), self.format.as_str())
        }
    }
}

/// Cache key over `(preset, format, theme, subgraph digest)`.
pub fn cache_key(
    preset: DiagramPreset,
    format: DiagramFormat,
    theme_id: &str,
    subgraph_digest: &str,
) -> String {
    let payload = format!(
        "{}\u{1f}{}\u{1f}{theme_id}\u{1f}{subgraph_digest}",
        preset.as_str(),
        format.as_str()
    );
    digest_bytes(payload.as_bytes())
}

/// Render the template content for one `(preset, format, theme)` cell.
pub fn build_template(
    projection: &Projection,
    preset: DiagramPreset,
    format: DiagramFormat,
    theme: &Theme,
) -> DiagramTemplate {
    let aliases: BTreeMap<&str, String> = projection
        .nodes
        .iter()
        .enumerate()
        .map(|(index, (id, _))| (id.as_str(), format!("n{index}")))
        .collect();
    let content = match format {
        DiagramFormat::Mermaid => mermaid(projection, &aliases, theme),
        DiagramFormat::Plantuml => plantuml(projection, &aliases, theme),
        DiagramFormat::Graphviz => graphviz(projection, theme),
    };
    let subgraph_digest = projection.digest();
    DiagramTemplate {
        preset,
        format,
        theme_id: theme.id.to_string(),
        cache_key: cache_key(preset, format, theme.id, &subgraph_digest),
        subgraph_digest,
        content,
    }
}

fn mermaid(projection: &Projection, aliases: &BTreeMap<&str, String>, theme: &Theme) -> String {
    let mut lines = vec![
        format!(
            "%%{{init: {{'theme': 'base', 'themeVariables': {{'primaryColor': '{}', 'primaryTextColor': '{}', 'lineColor': '{}', 'fontSize': '{}pt'}}}}}}%%",
            theme.accent, theme.foreground, theme.accent, theme.font_size_pt
        ),
        "graph TD".to_string(),
    ];
    for (id, label) in &projection.nodes {
        let alias = &aliases[id.as_str()];
        lines.push(format!("    {alias}[\"{}\"]", label.replace('"', "'")));
    }
    for (source, target, label) in &projection.edges {
        let from = &aliases[source.as_str()];
        let to = &aliases[target.as_str()];
        lines.push(format!("    {from} -->|{label}| {to}"));
    }
    if projection.nodes.is_empty() {
        lines.push("    empty[\"no matching nodes\"]".to_string());
    }
    lines.join("\n") + "\n"
}

fn plantuml(projection: &Projection, aliases: &BTreeMap<&str, String>, theme: &Theme) -> String {
    let mut lines = vec![
        "@startuml".to_string(),
        format!("skinparam backgroundColor {}", theme.background),
        format!("skinparam componentFontColor {}", theme.foreground),
        format!("skinparam componentFontSize {}", theme.font_size_pt),
        format!("skinparam componentBorderColor {}", theme.accent),
    ];
    for (id, label) in &projection.nodes {
        let alias = &aliases[id.as_str()];
        lines.push(format!("component \"{}\" as {alias}", label.replace('"', "'")));
    }
    for (source, target, label) in &projection.edges {
        let from = &aliases[source.as_str()];
        let to = &aliases[target.as_str()];
        lines.push(format!("{from} ..> {to} : {label}"));
    }
    if projection.nodes.is_empty() {
        lines.push("note as empty\n  no matching nodes\nend note".to_string());
    }
    lines.push("@enduml".to_string());
    lines.join("\n") + "\n"
}

fn graphviz(projection: &Projection, theme: &Theme) -> String {
    let mut lines = vec![
        "digraph atlas {".to_string(),
        "  rankdir=LR;".to_string(),
        format!(
            "  node [shape=box, style=filled, fontname=\"Helvetica\", fontsize={}, fillcolor=\"{}\", color=\"{}\", fontcolor=\"{}\"];",
            theme.font_size_pt, theme.background, theme.accent, theme.foreground
        ),
    ];
    for (id, label) in &projection.nodes {
        lines.push(format!("  \"{id}\" [label=\"{}\"];", label.replace('"', "'")));
    }
    for (source, target, label) in &projection.edges {
        lines.push(format!("  \"{source}\" -> \"{target}\" [label=\"{label}\"];"));
    }
    lines.push("}".to_string());
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::theme::LIGHT;
    use crate::graph::types::{Node, Relationship};
    use crate::util::hashing::{edge_id, node_id};
    use std::collections::{BTreeMap as Map, BTreeSet};

    fn graph_with_modules() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::default();
        for (kind, scope, label) in [
            (NodeKind::Run, "r1", "run r1"),
            (NodeKind::File, "a.py", "a.py"),
            (NodeKind::Module, "a", "a"),
            (NodeKind::Module, "b", "b"),
            (NodeKind::Dependency, "requests", "requests"),
            (NodeKind::Test, "tests.test_a.test_f", "test_f"),
        ] {
            graph.add_node(Node {
                id: node_id(kind.as_str(), scope),
                kind,
                label: label.to_string(),
                attributes: Map::new(),
                provenance: BTreeSet::from(["x".to_string()]),
            });
        }
        for (kind, source, target) in [
            (RelationshipKind::Imports, node_id("module", "a"), node_id("module", "b")),
            (
                RelationshipKind::DependsOn,
                node_id("module", "a"),
                node_id("dependency", "requests"),
            ),
            (
                RelationshipKind::Tests,
                node_id("test", "tests.test_a.test_f"),
                node_id("module", "a"),
            ),
            (RelationshipKind::Contains, node_id("file", "a.py"), node_id("module", "a")),
        ] {
            graph.add_relationship(Relationship {
                id: edge_id(&source, kind.as_str(), &target),
                kind,
                source_id: source,
                target_id: target,
                attributes: Map::new(),
            });
        }
        graph
    }

    #[test]
    fn projections_select_preset_slices() {
        let graph = graph_with_modules();
        let architecture = project(&graph, DiagramPreset::Architecture);
        assert_eq!(architecture.nodes.len(), 3); // file + two modules
        assert!(architecture.edges.iter().any(|(_, _, label)| *label == "imports"));
        assert!(architecture.edges.iter().any(|(_, _, label)| *label == "declares"));

        let dependencies = project(&graph, DiagramPreset::Dependencies);
        assert_eq!(dependencies.nodes.len(), 3); // two modules + dependency
        assert_eq!(dependencies.edges.len(), 1);

        let tests = project(&graph, DiagramPreset::Tests);
        assert_eq!(tests.nodes.len(), 3); // test + two modules
        assert_eq!(tests.edges.len(), 1);
    }

    #[test]
    fn projection_digest_tracks_content() {
        let graph = graph_with_modules();
        let a = project(&graph, DiagramPreset::Architecture);
        let b = project(&graph, DiagramPreset::Architecture);
        assert_eq!(a.digest(), b.digest());
        let deps = project(&graph, DiagramPreset::Dependencies);
        assert_ne!(a.digest(), deps.digest());
    }

    #[test]
    fn cache_key_varies_on_every_component() {
        let base = cache_key(DiagramPreset::Architecture, DiagramFormat::Mermaid, "light", "d0");
        assert_ne!(
            base,
            cache_key(DiagramPreset::Dependencies, DiagramFormat::Mermaid, "light", "d0")
        );
        assert_ne!(
            base,
            cache_key(DiagramPreset::Architecture, DiagramFormat::Graphviz, "light", "d0")
        );
        assert_ne!(
            base,
            cache_key(DiagramPreset::Architecture, DiagramFormat::Mermaid, "dark", "d0")
        );
        assert_ne!(
            base,
            cache_key(DiagramPreset::Architecture, DiagramFormat::Mermaid, "light", "d1")
        );
    }

    #[test]
    fn templates_are_byte_stable_and_themed() {
        let graph = graph_with_modules();
        let projection = project(&graph, DiagramPreset::Architecture);
        let a = build_template(&projection, DiagramPreset::Architecture, DiagramFormat::Mermaid, &LIGHT);
        let b = build_template(&projection, DiagramPreset::Architecture, DiagramFormat::Mermaid, &LIGHT);
        assert_eq!(a.content, b.content);
        assert!(a.content.contains("graph TD"));
        assert!(a.content.contains(LIGHT.accent));
        assert!(a.content.contains("14pt"));
    }

    #[test]
    fn all_formats_render_nonempty_sources() {
        let graph = graph_with_modules();
        let projection = project(&graph, DiagramPreset::Dependencies);
        for format in [DiagramFormat::Mermaid, DiagramFormat::Plantuml, DiagramFormat::Graphviz] {
            let template =
                build_template(&projection, DiagramPreset::Dependencies, format, &LIGHT);
            assert!(!template.content.trim().is_empty());
        }
    }

    #[test]
    fn empty_projection_renders_placeholder() {
        let graph = KnowledgeGraph::default();
        let projection = project(&graph, DiagramPreset::Tests);
        let template =
            build_template(&projection, DiagramPreset::Tests, DiagramFormat::Mermaid, &LIGHT);
        assert!(template.content.contains("no matching nodes"));
    }

    #[test]
    fn file_names_follow_the_layout() {
        let graph = graph_with_modules();
        let projection = project(&graph, DiagramPreset::Architecture);
        let light =
            build_template(&projection, DiagramPreset::Architecture, DiagramFormat::Mermaid, &LIGHT);
        assert_eq!(light.source_file_name(), "architecture.mermaid.src");
        assert_eq!(light.rendered_file_name("svg"), "architecture.mermaid.svg");
        let dark = build_template(
            &projection,
            DiagramPreset::Architecture,
            DiagramFormat::Mermaid,
            &crate::diagram::theme::DARK,
        );
        assert_eq!(dark.source_file_name(), "architecture.mermaid.dark.src");
    }
}
