//! Graph synthesis from walker records, extraction events, dependency
//! events, and registered artifacts.
//!
//! Containment is synthesized as a single-parent tree rooted at the run
//! node: `run contains file`, `file contains module`, `module contains
//! function|class|test`, and `run contains dependency|artifact`. Declaration
//! detail rides on `defines` edges so the tree stays pure. Imports resolve
//! locally first (module → module) and degrade to `depends_on` edges against
//! dependency nodes created on demand.

use super::types::{AttrValue, KnowledgeGraph, Node, NodeKind, Relationship, RelationshipKind};
use super::{validate, GraphScope};
use crate::cache::DeltaReport;
use crate::deps::DependencyEvent;
use crate::error::RunError;
use crate::extract::{EntityEvent, ExtractionBlob};
use crate::scan::FileRecord;
use crate::util::hashing::{edge_id, node_id};
use std::collections::{BTreeMap, BTreeSet};

pub struct GraphBuilder {
    graph: KnowledgeGraph,
    run_id: String,
    run_node_id: String,
    /// module name → node id
    module_ids: BTreeMap<String, String>,
    /// module name → declaring canonical path
    module_files: BTreeMap<String, String>,
    /// canonical path → file node id
    file_ids: BTreeMap<String, String>,
    /// deferred `(module, import target)` pairs, resolved once all modules exist
    pending_imports: Vec<(String, String)>,
    /// module name → test node ids declared in it
    module_test_nodes: BTreeMap<String, Vec<String>>,
    /// node ids that already have a contains-parent
    contained: BTreeSet<String>,
}

impl GraphBuilder {
    pub fn new(run_id: &str, config_version: &str, source_root: &str) -> Self {
        let run_node_id = node_id(NodeKind::Run.as_str(), run_id);
        let mut graph = KnowledgeGraph::default();
        graph.add_node(Node {
            id: run_node_id.clone(),
            kind: NodeKind::Run,
            label: format!("run {run_id}"),
            attributes: BTreeMap::from([
                ("config_version".to_string(), AttrValue::from(config_version)),
                ("source_root".to_string(), AttrValue::from(source_root)),
            ]),
            provenance: BTreeSet::from([run_id.to_string()]),
        });
        Self {
            graph,
            run_id: run_id.to_string(),
            run_node_id,
            module_ids: BTreeMap::new(),
            module_files: BTreeMap::new(),
            file_ids: BTreeMap::new(),
            pending_imports: Vec::new(),
            module_test_nodes: BTreeMap::new(),
            contained: BTreeSet::new(),
        }
    }

    pub fn run_node_id(&self) -> &str {
        &self.run_node_id
    }

    pub fn add_files(&mut self, records: &[FileRecord], delta: &DeltaReport) {
        for record in records {
            let id = node_id(NodeKind::File.as_str(), &record.canonical_path);
            self.graph.add_node(Node {
                id: id.clone(),
                kind: NodeKind::File,
                label: record.canonical_path.clone(),
                attributes: BTreeMap::from([
                    ("digest".to_string(), AttrValue::from(record.digest.clone())),
                    ("language".to_string(), AttrValue::from(record.language.clone())),
                    ("line_count".to_string(), AttrValue::from(record.line_count)),
                    ("size_bytes".to_string(), AttrValue::from(record.size_bytes)),
                    (
                        "status".to_string(),
                        AttrValue::from(format!(
                            "{:?}",
                            delta.state_for(&record.canonical_path)
                        )
                        .to_lowercase()),
                    ),
                ]),
                provenance: BTreeSet::from([record.canonical_path.clone()]),
            });
            let run_node_id = self.run_node_id.clone();
            self.contain(&run_node_id, &id);
            self.file_ids.insert(record.canonical_path.clone(), id);
        }
    }

    /// Add entity nodes from per-file extraction blobs. `blobs` pairs each
    /// canonical path with its blob, in walk order.
    pub fn add_entities(&mut self, blobs: &[(String, std::sync::Arc<ExtractionBlob>)]) {
        // Modules first: entity events reference them.
        for (path, blob) in blobs {
            for event in &blob.events {
                if let EntityEvent::ModuleDeclared { module, doc, .. } = event {
                    let id = node_id(NodeKind::Module.as_str(), module);
                    let mut attributes = BTreeMap::new();
                    if let Some(doc) = doc {
                        attributes.insert("doc".to_string(), AttrValue::from(doc.clone()));
                    }
                    self.graph.add_node(Node {
                        id: id.clone(),
                        kind: NodeKind::Module,
                        label: module.clone(),
                        attributes,
                        provenance: BTreeSet::from([path.clone()]),
                    });
                    if let Some(file_id) = self.file_ids.get(path).cloned() {
                        self.contain(&file_id, &id);
                        self.edge(
                            RelationshipKind::Defines,
                            &file_id,
                            &id,
                            BTreeMap::from([("line".to_string(), AttrValue::Int(1))]),
                        );
                    }
                    self.module_ids.insert(module.clone(), id);
                    self.module_files.insert(module.clone(), path.clone());
                }
            }
        }

        for (path, blob) in blobs {
            for event in &blob.events {
                match event {
                    EntityEvent::ModuleDeclared { .. } => {}
                    EntityEvent::ImportObserved { module, target, .. } => {
                        self.pending_imports.push((module.clone(), target.clone()));
                    }
                    EntityEvent::FunctionDeclared { module, name, line } => {
                        self.add_entity(path, module, name, *line, NodeKind::Function, false);
                    }
                    EntityEvent::FixtureDeclared { module, name, line } => {
                        self.add_entity(path, module, name, *line, NodeKind::Function, true);
                    }
                    EntityEvent::ClassDeclared { module, name, line } => {
                        self.add_entity(path, module, name, *line, NodeKind::Class, false);
                    }
                    EntityEvent::TestDeclared { module, name, line } => {
                        let id =
                            self.add_entity(path, module, name, *line, NodeKind::Test, false);
                        self.module_test_nodes.entry(module.clone()).or_default().push(id);
                    }
                }
            }
        }
    }

    fn add_entity(
        &mut self,
        path: &str,
        module: &str,
        name: &str,
        line: u64,
        kind: NodeKind,
        fixture: bool,
    ) -> String {
        let scope_path = format!("{module}.{name}");
        let id = node_id(kind.as_str(), &scope_path);
        let mut attributes = BTreeMap::from([
            ("line".to_string(), AttrValue::from(line)),
            ("module".to_string(), AttrValue::from(module)),
        ]);
        if fixture {
            attributes.insert("fixture".to_string(), AttrValue::Bool(true));
        }
        self.graph.add_node(Node {
            id: id.clone(),
            kind,
            label: name.to_string(),
            attributes,
            provenance: BTreeSet::from([path.to_string()]),
        });
        if let Some(module_id) = self.module_ids.get(module).cloned() {
            self.contain(&module_id, &id);
            self.edge(
                RelationshipKind::Defines,
                &module_id,
                &id,
                BTreeMap::from([("line".to_string(), AttrValue::from(line))]),
            );
        }
        id
    }

    pub fn add_dependency_events(&mut self, events: &[DependencyEvent]) {
        for event in events {
            let id = node_id(NodeKind::Dependency.as_str(), &event.package);
            let mut attributes = BTreeMap::from([
                ("scope".to_string(), AttrValue::from(event.scope.as_str())),
                ("source".to_string(), AttrValue::from(event.source.clone())),
            ]);
            if let Some(spec) = &event.version_spec {
                attributes.insert("version".to_string(), AttrValue::from(spec.clone()));
            }
            self.graph.add_node(Node {
                id: id.clone(),
                kind: NodeKind::Dependency,
                label: event.package.clone(),
                attributes,
                provenance: BTreeSet::from([event.source.clone()]),
            });
            let run_node_id = self.run_node_id.clone();
            self.contain(&run_node_id, &id);
            if let Some(owner) = &event.owner_module {
                if let Some(module_id) = self.module_ids.get(owner).cloned() {
                    self.edge(RelationshipKind::DependsOn, &module_id, &id, BTreeMap::new());
                }
            }
        }
    }

    /// Resolve deferred imports: local module match wins, anything else
    /// becomes a dependency edge. Also derives `test tests module` edges
    /// from the local imports of each test's containing module.
    pub fn resolve_imports(&mut self) {
        let mut local_imports: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let pending = std::mem::take(&mut self.pending_imports);
        for (module, target) in pending {
            let Some(module_id) = self.module_ids.get(&module).cloned() else {
                continue;
            };
            if let Some(target_id) = self.module_ids.get(&target).cloned() {
                if target_id != module_id {
                    self.edge(RelationshipKind::Imports, &module_id, &target_id, BTreeMap::new());
                    local_imports.entry(module.clone()).or_default().insert(target_id);
                }
                continue;
            }
            let package = crate::deps::canonical_package_name(
                target.split('.').next().unwrap_or(&target),
            );
            if package.is_empty() {
                continue;
            }
            let dependency_id = node_id(NodeKind::Dependency.as_str(), &package);
            if self.graph.node(&dependency_id).is_none() {
                let provenance = self
                    .module_files
                    .get(&module)
                    .cloned()
                    .unwrap_or_else(|| self.run_id.clone());
                self.graph.add_node(Node {
                    id: dependency_id.clone(),
                    kind: NodeKind::Dependency,
                    label: package.clone(),
                    attributes: BTreeMap::from([(
                        "scope".to_string(),
                        AttrValue::from("runtime"),
                    )]),
                    provenance: BTreeSet::from([provenance]),
                });
                let run_node_id = self.run_node_id.clone();
                self.contain(&run_node_id, &dependency_id);
            }
            self.edge(RelationshipKind::DependsOn, &module_id, &dependency_id, BTreeMap::new());
        }

        let module_test_nodes = self.module_test_nodes.clone();
        for (module, test_ids) in module_test_nodes {
            let Some(targets) = local_imports.get(&module) else {
                continue;
            };
            for test_id in test_ids {
                for target_id in targets {
                    self.edge(RelationshipKind::Tests, &test_id, target_id, BTreeMap::new());
                }
            }
        }
    }

    /// Register a produced artifact. Bundles pass the canonical paths of the
    /// files they include as `derives`.
    pub fn add_artifact(
        &mut self,
        kind: &str,
        relative_path: &str,
        digest: &str,
        derives: &[String],
    ) {
        let id = node_id(NodeKind::Artifact.as_str(), relative_path);
        self.graph.add_node(Node {
            id: id.clone(),
            kind: NodeKind::Artifact,
            label: relative_path.to_string(),
            attributes: BTreeMap::from([
                ("digest".to_string(), AttrValue::from(digest)),
                ("kind".to_string(), AttrValue::from(kind)),
            ]),
            provenance: BTreeSet::from([self.run_id.clone()]),
        });
        let run_node_id = self.run_node_id.clone();
        self.contain(&run_node_id, &id);
        self.edge(RelationshipKind::Produces, &run_node_id, &id, BTreeMap::new());
        for canonical_path in derives {
            if let Some(file_id) = self.file_ids.get(canonical_path).cloned() {
                self.edge(RelationshipKind::Derives, &id, &file_id, BTreeMap::new());
            }
        }
    }

    /// Inject a raw relationship. Exists for fault-injection in tests: the
    /// validator must reject cycles and dangling endpoints no matter how
    /// they got in.
    pub fn add_raw_relationship(
        &mut self,
        kind: RelationshipKind,
        source_id: &str,
        target_id: &str,
    ) {
        self.edge(kind, source_id, target_id, BTreeMap::new());
    }

    /// Read-only view of the graph under construction.
    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    /// Apply the scope projection, validate, and return the immutable graph.
    pub fn finish(
        self,
        scope: GraphScope,
        include_tests: bool,
    ) -> Result<KnowledgeGraph, RunError> {
        let mut filtered = KnowledgeGraph {
            collisions: self.graph.collisions.clone(),
            ..Default::default()
        };
        for node in self.graph.nodes.values() {
            let keep = scope.keeps(node.kind) && (include_tests || node.kind != NodeKind::Test);
            if keep {
                filtered.nodes.insert(node.id.clone(), node.clone());
            }
        }
        for relationship in self.graph.relationships.values() {
            if filtered.nodes.contains_key(&relationship.source_id)
                && filtered.nodes.contains_key(&relationship.target_id)
            {
                filtered.add_relationship(relationship.clone());
            }
        }
        validate::validate(&filtered)?;
        Ok(filtered)
    }

    fn contain(&mut self, parent: &str, child: &str) {
        // Single-parent containment: the first parent wins.
        if self.contained.insert(child.to_string()) {
            self.edge(RelationshipKind::Contains, parent, child, BTreeMap::new());
        }
    }

    fn edge(
        &mut self,
        kind: RelationshipKind,
        source_id: &str,
        target_id: &str,
        attributes: BTreeMap<String, AttrValue>,
    ) {
        self.graph.add_relationship(Relationship {
            id: edge_id(source_id, kind.as_str(), target_id),
            kind,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            attributes,
        });
    }
}
