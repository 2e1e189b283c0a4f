//! Explain cards: deterministic template-mode summaries composed from the
//! knowledge graph, the metrics bundle, and the bundle artifact list.
//!
//! Cards reference graph node IDs by value; the graph never owns cards.
//! Template mode is the only generation mode in-core. The optional local
//! adapter hook only annotates template output and degrades to
//! `template-fallback` when its configured model path is absent — never a
//! network call.

use crate::error::{codes, Diagnostic};
use crate::graph::{KnowledgeGraph, NodeKind, RelationshipKind};
use crate::metrics::MetricsBundle;
use crate::util::hashing::digest_bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CardScope {
    Architecture,
    Quality,
    Tests,
}

impl CardScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardScope::Architecture => "architecture",
            CardScope::Quality => "quality",
            CardScope::Tests => "tests",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    ReviewPending,
    Approved,
    NeedsRevision,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::ReviewPending => "review_pending",
            CardStatus::Approved => "approved",
            CardStatus::NeedsRevision => "needs_revision",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traceability {
    pub graph_nodes: Vec<String>,
    pub bundles: Vec<String>,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExplainCard {
    pub id: String,
    pub scope: CardScope,
    pub title: String,
    pub summary: String,
    pub rationale: String,
    pub edge_cases: Vec<String>,
    pub traceability: Traceability,
    pub status: CardStatus,
    pub reviewer_notes: Vec<String>,
}

impl ExplainCard {
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("# {}", self.title),
            String::new(),
            format!("**Scope:** {}", self.scope.as_str()),
            format!("**Status:** {}", self.status.as_str()),
            String::new(),
            "## Summary".to_string(),
            String::new(),
            self.summary.clone(),
            String::new(),
            "## Rationale".to_string(),
            String::new(),
            self.rationale.clone(),
            String::new(),
            "## Edge Cases".to_string(),
            String::new(),
        ];
        for case in &self.edge_cases {
            lines.push(format!("- {case}"));
        }
        if !self.reviewer_notes.is_empty() {
            lines.push(String::new());
            lines.push("## Reviewer Notes".to_string());
            lines.push(String::new());
            for note in &self.reviewer_notes {
                lines.push(format!("- {note}"));
            }
        }
        lines.push(String::new());
        lines.push("## Traceability".to_string());
        lines.push(String::new());
        section_list(&mut lines, "Graph nodes", &self.traceability.graph_nodes);
        section_list(&mut lines, "Bundles", &self.traceability.bundles);
        section_list(&mut lines, "Metrics", &self.traceability.metrics);
        lines.push(String::new());
        lines.join("\n")
    }

    pub fn checksum(&self) -> String {
        digest_bytes(self.to_markdown().as_bytes())
    }

    pub fn metadata_json(&self, mode: &str, run_id: &str) -> String {
        let document = json!({
            "checksum": self.checksum(),
            "generator": "repo-atlas",
            "id": self.id,
            "mode": mode,
            "review_history": [{
                "actor": "auto-generator",
                "run_id": run_id,
                "status": CardStatus::ReviewPending.as_str(),
            }],
            "scope": self.scope.as_str(),
            "status": self.status.as_str(),
            "title": self.title,
            "traceability": {
                "bundles": self.traceability.bundles,
                "graph_nodes": self.traceability.graph_nodes,
                "metrics": self.traceability.metrics,
            },
        });
        let mut text =
            serde_json::to_string_pretty(&document).expect("card metadata serializes");
        text.push('\n');
        text
    }
}

fn section_list(lines: &mut Vec<String>, title: &str, entries: &[String]) {
    lines.push(format!("**{title}:**"));
    if entries.is_empty() {
        lines.push("- _none_".to_string());
    } else {
        for entry in entries {
            lines.push(format!("- `{entry}`"));
        }
    }
}

/// Deterministic card identifier from `(scope, subgraph_digest)`.
pub fn card_id(scope: CardScope, subgraph_digest: &str) -> String {
    let payload = format!("{}\u{1f}{subgraph_digest}", scope.as_str());
    format!("{}-{}", scope.as_str(), &digest_bytes(payload.as_bytes())[..12])
}

pub struct CardOutcome {
    pub cards: Vec<ExplainCard>,
    /// `template`, `template-fallback`, or `local`.
    pub mode: String,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct CardGenerator<'a> {
    graph: &'a KnowledgeGraph,
    metrics: &'a MetricsBundle,
    bundle_refs: Vec<String>,
    graph_digest: String,
}

impl<'a> CardGenerator<'a> {
    pub fn new(
        graph: &'a KnowledgeGraph,
        metrics: &'a MetricsBundle,
        mut bundle_refs: Vec<String>,
        graph_digest: String,
    ) -> Self {
        bundle_refs.sort();
        Self { graph, metrics, bundle_refs, graph_digest }
    }

    pub fn generate(
        &self,
        scopes: &[CardScope],
        local_model_path: Option<&Path>,
    ) -> CardOutcome {
        let mut diagnostics = Vec::new();
        let mode = match local_model_path {
            None => "template".to_string(),
            Some(path) if path.exists() => "local".to_string(),
            Some(path) => {
                diagnostics.push(Diagnostic::new(
                    codes::CARD_FALLBACK,
                    format!("local model {} unavailable; template mode", path.display()),
                ));
                "template-fallback".to_string()
            }
        };

        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();
        let mut cards: Vec<ExplainCard> = scopes.iter().map(|scope| self.build(*scope)).collect();
        if mode == "local" {
            for card in &mut cards {
                card.reviewer_notes.push(
                    "Local adapter annotation completed offline; reviewer confirmation still required."
                        .to_string(),
                );
            }
        }
        CardOutcome { cards, mode, diagnostics }
    }

    fn build(&self, scope: CardScope) -> ExplainCard {
        match scope {
            CardScope::Architecture => self.architecture_card(),
            CardScope::Quality => self.quality_card(),
            CardScope::Tests => self.tests_card(),
        }
    }

    fn architecture_card(&self) -> ExplainCard {
        let modules: Vec<_> = self.graph.nodes_of_kind(NodeKind::Module).collect();
        let dependency_edges =
            self.graph.relationships_of_kind(RelationshipKind::DependsOn).count();
        let mut summary = format!(
            "The knowledge graph captured {} modules and {} dependency edges.",
            modules.len(),
            dependency_edges
        );
        if !modules.is_empty() {
            let names: Vec<&str> =
                modules.iter().take(5).map(|node| node.label.as_str()).collect();
            summary.push_str(&format!(" Key modules: {}.", names.join(", ")));
        }
        ExplainCard {
            id: card_id(CardScope::Architecture, &self.graph_digest),
            scope: CardScope::Architecture,
            title: "Architecture Overview".to_string(),
            summary,
            rationale: "Anchor reviews to a reproducible snapshot of module structure and \
                        dependency edges instead of a hand-drawn picture."
                .to_string(),
            edge_cases: vec![
                "Files excluded by include/ignore patterns do not appear in the graph."
                    .to_string(),
                "Dynamic imports are not resolved statically and may be missing.".to_string(),
            ],
            traceability: Traceability {
                graph_nodes: modules.iter().take(5).map(|node| node.id.clone()).collect(),
                bundles: self.bundle_refs.clone(),
                metrics: Vec::new(),
            },
            status: CardStatus::ReviewPending,
            reviewer_notes: Vec::new(),
        }
    }

    fn quality_card(&self) -> ExplainCard {
        let coverage = match &self.metrics.coverage {
            Some(coverage) => format!("{:.1}%", coverage.line_percent),
            None => "n/a".to_string(),
        };
        let tests = match &self.metrics.tests {
            Some(tests) => format!(
                "{} passed, {} failed, {} skipped",
                tests.passed, tests.failed, tests.skipped
            ),
            None => "no test metrics supplied".to_string(),
        };
        let lint_total = self.metrics.lint.as_ref().map(|lint| lint.total).unwrap_or(0);
        let security_total =
            self.metrics.security.as_ref().map(|security| security.total).unwrap_or(0);
        let mut metric_refs = Vec::new();
        if self.metrics.coverage.is_some() {
            metric_refs.push(format!("coverage.line_percent={coverage}"));
        }
        if let Some(tests) = &self.metrics.tests {
            metric_refs.push(format!("tests.total={}", tests.total));
        }
        if lint_total > 0 {
            metric_refs.push(format!("lint.total={lint_total}"));
        }
        if security_total > 0 {
            metric_refs.push(format!("security.total={security_total}"));
        }
        metric_refs.sort();
        ExplainCard {
            id: card_id(CardScope::Quality, &self.graph_digest),
            scope: CardScope::Quality,
            title: "Quality Signals".to_string(),
            summary: format!(
                "Normalized metrics for this run. Coverage: {coverage}. Tests: {tests}. \
                 Lint findings: {lint_total}. Security findings: {security_total}."
            ),
            rationale: "Surface the supplied quality signals next to the graph so reviewers \
                        can gate without re-running tooling."
                .to_string(),
            edge_cases: vec![
                "Missing metric sources contribute nothing and leave their gates unevaluated."
                    .to_string(),
                "Mixed-language coverage may need manual weighting.".to_string(),
            ],
            traceability: Traceability {
                graph_nodes: Vec::new(),
                bundles: self.bundle_refs.clone(),
                metrics: metric_refs,
            },
            status: CardStatus::ReviewPending,
            reviewer_notes: Vec::new(),
        }
    }

    fn tests_card(&self) -> ExplainCard {
        let tests: Vec<_> = self.graph.nodes_of_kind(NodeKind::Test).collect();
        let modules_tested: std::collections::BTreeSet<&str> = self
            .graph
            .relationships_of_kind(RelationshipKind::Tests)
            .map(|rel| rel.target_id.as_str())
            .collect();
        let mut summary = format!(
            "Identified {} test entities exercising {} modules.",
            tests.len(),
            modules_tested.len()
        );
        if !tests.is_empty() {
            let names: Vec<&str> = tests.iter().take(5).map(|node| node.label.as_str()).collect();
            summary.push_str(&format!(" Representative tests: {}.", names.join(", ")));
        }
        ExplainCard {
            id: card_id(CardScope::Tests, &self.graph_digest),
            scope: CardScope::Tests,
            title: "Test Coverage Overview".to_string(),
            summary,
            rationale: "Show which modules the discovered tests reach so manual review can \
                        focus on the untested surface."
                .to_string(),
            edge_cases: vec![
                "Tests discovered by naming conventions only; runtime parametrization is \
                 invisible."
                    .to_string(),
                "Skipped tests still count as test entities.".to_string(),
            ],
            traceability: Traceability {
                graph_nodes: tests.iter().take(5).map(|node| node.id.clone()).collect(),
                bundles: self.bundle_refs.clone(),
                metrics: vec![format!("tests.count={}", tests.len())],
            },
            status: CardStatus::ReviewPending,
            reviewer_notes: Vec::new(),
        }
    }
}

/// `cards/index.json` content.
pub fn index_json(cards: &[ExplainCard]) -> String {
    let entries: Vec<serde_json::Value> = cards
        .iter()
        .map(|card| {
            json!({
                "card": format!("cards/{}.md", card.id),
                "id": card.id,
                "metadata": format!("cards/{}.json", card.id),
                "scope": card.scope.as_str(),
                "status": card.status.as_str(),
                "title": card.title,
            })
        })
        .collect();
    let mut text = serde_json::to_string_pretty(&entries).expect("card index serializes");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{Node, Relationship};
    use crate::util::hashing::{edge_id, node_id};
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;

    fn graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::default();
        for (kind, scope, label) in [
            (NodeKind::Run, "r1", "run r1"),
            (NodeKind::Module, "app", "app"),
            (NodeKind::Test, "tests.test_app.test_main", "test_main"),
        ] {
            graph.add_node(Node {
                id: node_id(kind.as_str(), scope),
                kind,
                label: label.to_string(),
                attributes: BTreeMap::new(),
                provenance: BTreeSet::from(["x".to_string()]),
            });
        }
        let test_id = node_id("test", "tests.test_app.test_main");
        let module_id = node_id("module", "app");
        graph.add_relationship(Relationship {
            id: edge_id(&test_id, "tests", &module_id),
            kind: RelationshipKind::Tests,
            source_id: test_id,
            target_id: module_id,
            attributes: BTreeMap::new(),
        });
        graph
    }

    fn generator<'a>(
        graph: &'a KnowledgeGraph,
        metrics: &'a MetricsBundle,
    ) -> CardGenerator<'a> {
        CardGenerator::new(
            graph,
            metrics,
            vec!["bundles/all-0.txt".to_string()],
            "graphdigest0000".to_string(),
        )
    }

    #[test]
    fn card_ids_are_deterministic_per_scope_and_digest() {
        let a = card_id(CardScope::Architecture, "d0");
        assert_eq!(a, card_id(CardScope::Architecture, "d0"));
        assert_ne!(a, card_id(CardScope::Quality, "d0"));
        assert_ne!(a, card_id(CardScope::Architecture, "d1"));
        assert!(a.starts_with("architecture-"));
    }

    #[test]
    fn all_scopes_produce_valid_markdown_sections() {
        let graph = graph();
        let metrics = MetricsBundle::default();
        let outcome = generator(&graph, &metrics).generate(
            &[CardScope::Architecture, CardScope::Quality, CardScope::Tests],
            None,
        );
        assert_eq!(outcome.cards.len(), 3);
        assert_eq!(outcome.mode, "template");
        for card in &outcome.cards {
            let markdown = card.to_markdown();
            assert!(markdown.contains("## Summary"));
            assert!(markdown.contains("## Rationale"));
            assert!(markdown.contains("## Edge Cases"));
            assert!(markdown.contains("## Traceability"));
        }
    }

    #[test]
    fn tests_card_counts_graph_entities() {
        let graph = graph();
        let metrics = MetricsBundle::default();
        let outcome = generator(&graph, &metrics).generate(&[CardScope::Tests], None);
        let card = &outcome.cards[0];
        assert!(card.summary.contains("1 test entities"));
        assert!(card.summary.contains("exercising 1 modules"));
        assert_eq!(card.traceability.graph_nodes.len(), 1);
    }

    #[test]
    fn metadata_seeds_review_pending_history() {
        let graph = graph();
        let metrics = MetricsBundle::default();
        let outcome = generator(&graph, &metrics).generate(&[CardScope::Quality], None);
        let metadata = outcome.cards[0].metadata_json("template", "run-1");
        let parsed: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(parsed["review_history"][0]["status"], "review_pending");
        assert_eq!(parsed["review_history"][0]["run_id"], "run-1");
        assert_eq!(parsed["mode"], "template");
    }

    #[test]
    fn missing_local_model_degrades_to_template_fallback() {
        let graph = graph();
        let metrics = MetricsBundle::default();
        let outcome = generator(&graph, &metrics).generate(
            &[CardScope::Architecture],
            Some(&PathBuf::from("/definitely/missing/model.bin")),
        );
        assert_eq!(outcome.mode, "template-fallback");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].code, codes::CARD_FALLBACK);
        // Output bytes are pure template-mode bytes.
        let template_only = generator(&graph, &metrics)
            .generate(&[CardScope::Architecture], None);
        assert_eq!(
            outcome.cards[0].to_markdown(),
            template_only.cards[0].to_markdown()
        );
    }

    #[test]
    fn card_bytes_are_fixed_by_inputs() {
        let graph = graph();
        let metrics = MetricsBundle::default();
        let a = generator(&graph, &metrics).generate(&[CardScope::Architecture], None);
        let b = generator(&graph, &metrics).generate(&[CardScope::Architecture], None);
        assert_eq!(a.cards[0].to_markdown(), b.cards[0].to_markdown());
        assert_eq!(a.cards[0].checksum(), b.cards[0].checksum());
    }

    #[test]
    fn index_lists_cards_with_paths() {
        let graph = graph();
        let metrics = MetricsBundle::default();
        let outcome = generator(&graph, &metrics)
            .generate(&[CardScope::Architecture, CardScope::Tests], None);
        let index = index_json(&outcome.cards);
        let parsed: serde_json::Value = serde_json::from_str(&index).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert!(parsed[0]["card"].as_str().unwrap().starts_with("cards/"));
    }
}
