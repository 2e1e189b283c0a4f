//! Run orchestration.
//!
//! Drives the pipeline in dependency order: walk → delta → extraction →
//! dependencies → bundles → metrics → gates → graph (serialize + diff) →
//! diagrams → cards → manifest → summary → cache update → retention. Every
//! stage either registers artifacts in the manifest or records an explicit
//! skip. All writes stay under `runs/<run_id>/` until the manifest is
//! finalized; the cache is swapped last, so a failed run never poisons
//! cross-run state.

pub mod manifest;
pub mod storage;
pub mod summary;

use crate::bundle::BundleBuilder;
use crate::cache::{CacheService, CacheStore, DeltaReport};
use crate::cards::{index_json, CardGenerator};
use crate::config::{Config, CONFIG_VERSION, TOOL_VERSION};
use crate::diagram::DiagramGenerator;
use crate::error::{Diagnostic, RunError};
use crate::extract::{EntityExtractor, ExtractionBlob, ExtractorStats};
use crate::graph::{diff, serialize, GraphBuilder, KnowledgeGraph};
use crate::metrics::gates::{evaluate, GateReport};
use crate::metrics::{badge, collect as collect_metrics, MetricsBundle};
use crate::scan::SourceWalker;
use crate::util::hashing::{digest_bytes, digest_file, short_run_id};
use crate::util::license::detect_license_hint;
use chrono::{DateTime, Utc};
use manifest::{build_manifest_json, ArtifactRecord, ManifestContext, SkippedStage};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::RunStorage;
use tracing::{debug, info};

/// Cooperative cancellation: checked at every stage boundary.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub gate_report: GateReport,
    pub delta: DeltaReport,
    pub artifacts: Vec<ArtifactRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub extractor_stats: ExtractorStats,
}

pub struct RunService {
    config: Config,
}

impl RunService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn execute(&self, cancel: &CancelToken) -> Result<RunOutcome, RunError> {
        let config = &self.config;
        config.validate()?;
        let guard = StageGuard {
            cancel,
            limit: config.limits.stage_timeout_secs.map(Duration::from_secs),
        };

        let resolved_config_digest = config.resolved_digest();
        let now: DateTime<Utc> = match config.pinned_timestamp() {
            Some(secs) => DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| RunError::Config(format!("invalid timestamp override {secs}")))?,
            None => Utc::now(),
        };
        let timestamp_utc = now.to_rfc3339();
        let run_id = format!(
            "{}-{}",
            now.format("%Y%m%d-%H%M%S"),
            short_run_id(&resolved_config_digest, &timestamp_utc)
        );
        info!(run_id = %run_id, "starting run");

        let walker = SourceWalker::new(
            &config.sources,
            Some(config.output.base_directory.clone()),
        )?;
        let (cache, cache_diagnostic) = CacheService::init(
            &config.output.cache_directory(),
            &config.sources.root,
            config.sources.incremental,
        );
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        diagnostics.extend(cache_diagnostic);

        let storage = RunStorage::create(&config.output.runs_directory(), &run_id)?;
        let outcome = self.run_pipeline(
            &guard,
            &run_id,
            &timestamp_utc,
            &resolved_config_digest,
            &walker,
            cache,
            &storage,
            diagnostics,
        );
        if matches!(outcome, Err(RunError::Cancelled)) {
            // A cancelled run abandons its partial artifacts.
            let _ = std::fs::remove_dir_all(storage.run_dir());
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pipeline(
        &self,
        guard: &StageGuard<'_>,
        run_id: &str,
        timestamp_utc: &str,
        resolved_config_digest: &str,
        walker: &SourceWalker,
        cache: CacheService,
        storage: &RunStorage,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<RunOutcome, RunError> {
        let config = &self.config;
        let mut artifacts: Vec<ArtifactRecord> = Vec::new();
        let mut skipped: Vec<SkippedStage> = Vec::new();

        // Walk + delta.
        let mut records = guard.run("walk", || {
            let outcome = walker.walk(config.limits.digest_workers)?;
            diagnostics.extend(outcome.diagnostics.clone());
            Ok(outcome.records)
        })?;
        cache.mark_cached(&mut records, config.sources.force_rebuild);
        let delta = cache.classify_delta(&records);
        let delta_json = {
            let mut text =
                serde_json::to_string_pretty(&delta).expect("delta serializes");
            text.push('\n');
            text
        };
        storage.write_artifact("delta/delta.json", delta_json.as_bytes())?;
        artifacts.push(ArtifactRecord::new(
            "delta",
            "delta/delta.json",
            digest_bytes(delta_json.as_bytes()),
        ));

        // Extraction, reusing prior event blobs for cached records.
        let extractor = EntityExtractor::new();
        for record in &records {
            if record.cached {
                if let Some(blob) = cache.event_blob_for(&record.canonical_path) {
                    extractor.seed(&record.digest, blob.clone());
                }
            }
        }
        let blobs: Vec<Arc<ExtractionBlob>> = guard.run("extract", || {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.limits.extract_workers)
                .build()
                .map_err(|err| RunError::Input(format!("extract pool: {err}")))?;
            let results: Vec<(Arc<ExtractionBlob>, Option<Diagnostic>)> =
                pool.install(|| records.par_iter().map(|record| extractor.extract(record)).collect());
            let mut blobs = Vec::with_capacity(results.len());
            for (blob, diagnostic) in results {
                diagnostics.extend(diagnostic);
                blobs.push(blob);
            }
            Ok(blobs)
        })?;
        for (record, blob) in records.iter_mut().zip(&blobs) {
            record.synopsis = blob.synopsis.clone();
        }
        let file_blobs: Vec<(String, Arc<ExtractionBlob>)> = records
            .iter()
            .zip(&blobs)
            .map(|(record, blob)| (record.canonical_path.clone(), Arc::clone(blob)))
            .collect();
        debug!(files = records.len(), "extraction complete");

        // Dependency manifests.
        let (dependency_events, dependency_diagnostics) =
            guard.run("dependencies", || Ok(crate::deps::parse_dependencies(&records)))?;
        diagnostics.extend(dependency_diagnostics);

        // Bundles.
        let mut bundle_derives: Vec<(String, Vec<String>)> = Vec::new();
        if config.features.enable_bundles {
            guard.run("bundles", || {
                let license_hint = detect_license_hint(&config.sources.root);
                let builder = BundleBuilder::new(
                    config.bundles.max_bundle_bytes,
                    config.bundles.max_bundle_lines,
                    license_hint,
                );
                let mut presets = config.bundles.presets.clone();
                presets.sort();
                presets.dedup();
                for preset in presets {
                    let (bundles, bundle_diagnostics) = builder.build(preset, &records);
                    diagnostics.extend(bundle_diagnostics);
                    for bundle in bundles {
                        let relative = format!("bundles/{}", bundle.file_name());
                        storage.write_artifact(&relative, bundle.content.as_bytes())?;
                        artifacts.push(ArtifactRecord::new(
                            "bundle",
                            relative.clone(),
                            digest_bytes(bundle.content.as_bytes()),
                        ));
                        let index_relative = format!("bundles/{}", bundle.index_file_name());
                        let index_json = bundle.index_json();
                        storage.write_artifact(&index_relative, index_json.as_bytes())?;
                        artifacts.push(ArtifactRecord::new(
                            "bundle_index",
                            index_relative,
                            digest_bytes(index_json.as_bytes()),
                        ));
                        bundle_derives.push((relative, bundle.unit_paths()));
                    }
                }
                Ok(())
            })?;
        } else {
            skipped.push(SkippedStage {
                stage: "bundles".to_string(),
                reason: "disabled by configuration".to_string(),
            });
        }

        // Metrics.
        let mut metrics_bundle = MetricsBundle::default();
        if !config.features.enable_metrics {
            skipped.push(SkippedStage {
                stage: "metrics".to_string(),
                reason: "disabled by configuration".to_string(),
            });
        } else if config.metrics.inputs.is_empty() {
            skipped.push(SkippedStage {
                stage: "metrics".to_string(),
                reason: "no metric inputs supplied".to_string(),
            });
        } else {
            guard.run("metrics", || {
                let (bundle, metric_diagnostics) = collect_metrics(&config.metrics.inputs);
                diagnostics.extend(metric_diagnostics);
                let json = bundle.to_json();
                storage.write_artifact("metrics/metrics.json", json.as_bytes())?;
                artifacts.push(ArtifactRecord::new(
                    "metrics",
                    "metrics/metrics.json",
                    digest_bytes(json.as_bytes()),
                ));
                if config.features.enable_badges {
                    if let Some(coverage) = &bundle.coverage {
                        let svg = badge::generate_badge(
                            "coverage",
                            &format!("{:.1}%", coverage.line_percent),
                            "#2a7d2a",
                        );
                        storage.write_artifact("badges/coverage.svg", svg.as_bytes())?;
                        artifacts.push(ArtifactRecord::new(
                            "badge",
                            "badges/coverage.svg",
                            digest_bytes(svg.as_bytes()),
                        ));
                    }
                    if let Some(tests) = &bundle.tests {
                        let svg = badge::generate_badge(
                            "tests",
                            &format!("{}/{}", tests.passed, tests.total),
                            "#31659c",
                        );
                        storage.write_artifact("badges/tests.svg", svg.as_bytes())?;
                        artifacts.push(ArtifactRecord::new(
                            "badge",
                            "badges/tests.svg",
                            digest_bytes(svg.as_bytes()),
                        ));
                    }
                }
                metrics_bundle = bundle;
                Ok(())
            })?;
        }

        // Gates are always evaluated; absent thresholds yield an empty
        // passing report.
        let gate_report = evaluate(&config.thresholds, &metrics_bundle);
        let gate_json = gate_report.to_json();
        storage.write_artifact("gates/gate.json", gate_json.as_bytes())?;
        artifacts.push(ArtifactRecord::new(
            "gate",
            "gates/gate.json",
            digest_bytes(gate_json.as_bytes()),
        ));

        // Knowledge graph, serialization, diff.
        let mut graph_value: Option<KnowledgeGraph> = None;
        let mut graph_digest = String::new();
        if config.graph.enabled {
            let graph = guard.run("graph", || {
                let mut builder = GraphBuilder::new(
                    run_id,
                    CONFIG_VERSION,
                    &config.sources.root.to_string_lossy(),
                );
                builder.add_files(&records, &delta);
                builder.add_entities(&file_blobs);
                builder.add_dependency_events(&dependency_events);
                builder.resolve_imports();
                for artifact in &artifacts {
                    let derives = bundle_derives
                        .iter()
                        .find(|(path, _)| path == &artifact.relative_path)
                        .map(|(_, units)| units.clone())
                        .unwrap_or_default();
                    builder.add_artifact(
                        &artifact.kind,
                        &artifact.relative_path,
                        &artifact.digest,
                        &derives,
                    );
                }
                builder.finish(config.graph.scope, config.graph.include_tests)
            })?;

            let jsonld = serialize::to_jsonld(&graph);
            graph_digest = digest_bytes(jsonld.as_bytes());
            storage.write_artifact("graphs/knowledge_graph.json", jsonld.as_bytes())?;
            artifacts.push(ArtifactRecord::new(
                "graph",
                "graphs/knowledge_graph.json",
                graph_digest.clone(),
            ));
            let graphml = serialize::to_graphml(&graph);
            storage.write_artifact("graphs/knowledge_graph.graphml", graphml.as_bytes())?;
            artifacts.push(ArtifactRecord::new(
                "graph",
                "graphs/knowledge_graph.graphml",
                digest_bytes(graphml.as_bytes()),
            ));

            if config.graph.diff {
                match self.load_previous_graph(run_id) {
                    Some(previous) => {
                        let graph_diff = diff::diff_graphs(&previous, &graph);
                        let diff_json = diff::to_json(&graph_diff);
                        storage.write_artifact("graphs/diff.json", diff_json.as_bytes())?;
                        artifacts.push(ArtifactRecord::new(
                            "graph_diff",
                            "graphs/diff.json",
                            digest_bytes(diff_json.as_bytes()),
                        ));
                        let diff_markdown = diff::to_markdown(&graph_diff, &previous, &graph);
                        storage.write_artifact("graphs/diff.md", diff_markdown.as_bytes())?;
                        artifacts.push(ArtifactRecord::new(
                            "graph_diff",
                            "graphs/diff.md",
                            digest_bytes(diff_markdown.as_bytes()),
                        ));
                    }
                    None => skipped.push(SkippedStage {
                        stage: "graph_diff".to_string(),
                        reason: "no prior graph snapshot".to_string(),
                    }),
                }
            } else {
                skipped.push(SkippedStage {
                    stage: "graph_diff".to_string(),
                    reason: "disabled by flag".to_string(),
                });
            }
            graph_value = Some(graph);
        } else {
            skipped.push(SkippedStage {
                stage: "graph".to_string(),
                reason: "disabled by flag".to_string(),
            });
        }

        // Diagrams.
        let mut diagram_templates = cache.prior().diagram_templates.clone();
        match (&graph_value, config.diagrams.enabled) {
            (Some(graph), true) => {
                let outcome = guard.run("diagrams", || {
                    let generator = DiagramGenerator::new(
                        &config.diagrams,
                        &cache.prior().diagram_templates,
                    );
                    generator.generate(graph, &storage.subdirectory("diagrams"))
                })?;
                diagnostics.extend(outcome.diagnostics.clone());
                for name in &outcome.written_files {
                    let relative = format!("diagrams/{name}");
                    let digest = digest_file(&storage.run_dir().join(&relative))?;
                    artifacts.push(ArtifactRecord::new("diagram", relative, digest));
                }
                let metadata = outcome.metadata_json.clone();
                storage.write_artifact("diagrams/metadata.json", metadata.as_bytes())?;
                artifacts.push(ArtifactRecord::new(
                    "diagram_metadata",
                    "diagrams/metadata.json",
                    digest_bytes(metadata.as_bytes()),
                ));
                diagram_templates = outcome.templates_for_cache;
            }
            (None, true) => skipped.push(SkippedStage {
                stage: "diagrams".to_string(),
                reason: "graph disabled".to_string(),
            }),
            (_, false) => skipped.push(SkippedStage {
                stage: "diagrams".to_string(),
                reason: "disabled by flag".to_string(),
            }),
        }

        // Explain cards.
        match (&graph_value, config.cards.enabled) {
            (Some(graph), true) => {
                guard.run("cards", || {
                    let bundle_refs: Vec<String> = bundle_derives
                        .iter()
                        .map(|(path, _)| path.clone())
                        .collect();
                    let generator = CardGenerator::new(
                        graph,
                        &metrics_bundle,
                        bundle_refs,
                        graph_digest.clone(),
                    );
                    let outcome = generator.generate(
                        &config.cards.scopes,
                        config.cards.local_model_path.as_deref(),
                    );
                    diagnostics.extend(outcome.diagnostics.clone());
                    for card in &outcome.cards {
                        let markdown = card.to_markdown();
                        let card_path = format!("cards/{}.md", card.id);
                        storage.write_artifact(&card_path, markdown.as_bytes())?;
                        artifacts.push(ArtifactRecord::new(
                            "card",
                            card_path,
                            digest_bytes(markdown.as_bytes()),
                        ));
                        let metadata = card.metadata_json(&outcome.mode, run_id);
                        let metadata_path = format!("cards/{}.json", card.id);
                        storage.write_artifact(&metadata_path, metadata.as_bytes())?;
                        artifacts.push(ArtifactRecord::new(
                            "card_metadata",
                            metadata_path,
                            digest_bytes(metadata.as_bytes()),
                        ));
                    }
                    let index = index_json(&outcome.cards);
                    storage.write_artifact("cards/index.json", index.as_bytes())?;
                    artifacts.push(ArtifactRecord::new(
                        "card_index",
                        "cards/index.json",
                        digest_bytes(index.as_bytes()),
                    ));
                    Ok(())
                })?;
            }
            (None, true) => skipped.push(SkippedStage {
                stage: "cards".to_string(),
                reason: "graph disabled".to_string(),
            }),
            (_, false) => skipped.push(SkippedStage {
                stage: "cards".to_string(),
                reason: "disabled by configuration".to_string(),
            }),
        }

        if !config.features.enable_summary {
            skipped.push(SkippedStage {
                stage: "summary".to_string(),
                reason: "disabled by configuration".to_string(),
            });
        }

        // Run log: every recoverable diagnostic, machine-readable.
        let log_json = {
            let mut text =
                serde_json::to_string_pretty(&diagnostics).expect("diagnostics serialize");
            text.push('\n');
            text
        };
        storage.write_artifact("logs/run_log.json", log_json.as_bytes())?;
        artifacts.push(ArtifactRecord::new(
            "log",
            "logs/run_log.json",
            digest_bytes(log_json.as_bytes()),
        ));

        // Manifest finalization.
        let manifest_json = build_manifest_json(
            &ManifestContext {
                run_id,
                timestamp_utc,
                tool_version: TOOL_VERSION,
                config_version: &config.version,
                seed: config.seed,
                resolved_config_digest,
            },
            &records,
            &artifacts,
            &skipped,
        );
        storage.write_artifact("manifests/manifest.json", manifest_json.as_bytes())?;

        // Summary (after the manifest so it can be linked unconditionally).
        let extractor_stats = extractor.stats();
        if config.features.enable_summary {
            let summary_text = summary::build_summary(&summary::SummaryContext {
                run_id,
                timestamp_utc,
                tool_version: TOOL_VERSION,
                config_version: &config.version,
                seed: config.seed,
                allow_network: config.privacy.allow_network,
                record_count: records.len(),
                delta_counts: (
                    delta.added.len(),
                    delta.changed.len(),
                    delta.removed.len(),
                    delta.unchanged.len(),
                ),
                extractor: extractor_stats,
                gates: Some(&gate_report),
                artifacts: &artifacts,
                skipped: &skipped,
                diagnostics: &diagnostics,
            });
            storage.write_artifact("summary/summary.md", summary_text.as_bytes())?;
        }

        // Cache update: only now, with the manifest finalized.
        let mut store = CacheStore::default();
        for (record, blob) in records.iter().zip(&blobs) {
            let events_digest = blob.events_digest();
            store.event_blobs.entry(events_digest.clone()).or_insert_with(|| (**blob).clone());
            store.entries.insert(
                record.canonical_path.clone(),
                crate::cache::CacheEntry {
                    digest: record.digest.clone(),
                    size_bytes: record.size_bytes,
                    mtime_ns: record.mtime_ns,
                    last_seen_run_id: run_id.to_string(),
                    extraction_events_digest: events_digest,
                },
            );
        }
        store.diagram_templates = diagram_templates;
        cache.finalize(&store)?;

        // Retention, preserving the current run unconditionally.
        let removed = storage.prune_siblings(config.output.retention)?;
        if !removed.is_empty() {
            debug!(count = removed.len(), "pruned old runs");
        }

        info!(run_id = %run_id, gate_passed = gate_report.passed, "run complete");
        Ok(RunOutcome {
            run_id: run_id.to_string(),
            run_dir: storage.run_dir().to_path_buf(),
            gate_report,
            delta,
            artifacts,
            diagnostics,
            extractor_stats,
        })
    }

    /// Latest prior run directory carrying a graph snapshot.
    fn load_previous_graph(&self, current_run_id: &str) -> Option<KnowledgeGraph> {
        let runs_dir = self.config.output.runs_directory();
        let mut candidates: Vec<String> = std::fs::read_dir(&runs_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.as_str() < current_run_id)
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));
        for candidate in candidates {
            let snapshot = runs_dir.join(&candidate).join("graphs/knowledge_graph.json");
            let Ok(text) = std::fs::read_to_string(&snapshot) else {
                continue;
            };
            if let Ok(graph) = serialize::from_jsonld(&text) {
                return Some(graph);
            }
        }
        None
    }
}

struct StageGuard<'a> {
    cancel: &'a CancelToken,
    limit: Option<Duration>,
}

impl StageGuard<'_> {
    fn run<T>(
        &self,
        stage: &str,
        body: impl FnOnce() -> Result<T, RunError>,
    ) -> Result<T, RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let started = Instant::now();
        let value = body()?;
        if let Some(limit) = self.limit {
            if started.elapsed() > limit {
                return Err(RunError::Timeout {
                    stage: stage.to_string(),
                    limit_secs: limit.as_secs(),
                });
            }
        }
        Ok(value)
    }
}
