//! Diagram generation: graph projections rendered to Mermaid, PlantUML,
//! and Graphviz templates with cache-keyed regeneration.

pub mod render;
pub mod template;
pub mod theme;

pub use template::{DiagramFormat, DiagramPreset};
pub use theme::ThemeChoice;

use crate::config::DiagramOptions;
use crate::error::{codes, Diagnostic, RunError};
use crate::graph::KnowledgeGraph;
use rayon::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use template::{build_template, project, DiagramTemplate, Projection};

pub struct DiagramOutcome {
    /// `diagrams/metadata.json` content.
    pub metadata_json: String,
    /// Files written under the diagrams directory, relative names only.
    pub written_files: Vec<String>,
    /// Template bytes to persist in the cache, keyed by cache key.
    pub templates_for_cache: BTreeMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct DiagramGenerator<'a> {
    options: &'a DiagramOptions,
    prior_templates: &'a BTreeMap<String, String>,
}

struct PlannedDiagram {
    template: DiagramTemplate,
    cache_hit: bool,
}

impl<'a> DiagramGenerator<'a> {
    pub fn new(
        options: &'a DiagramOptions,
        prior_templates: &'a BTreeMap<String, String>,
    ) -> Self {
        Self { options, prior_templates }
    }

    pub fn generate(
        &self,
        graph: &KnowledgeGraph,
        diagrams_dir: &Path,
    ) -> Result<DiagramOutcome, RunError> {
        let themes = self.options.theme.resolve();
        let mut theme_issues: Vec<String> = Vec::new();
        for theme in &themes {
            theme_issues.extend(theme.validate());
        }
        if !theme_issues.is_empty() {
            return Err(RunError::Invariant(format!(
                "diagram accessibility validation failed: {}",
                theme_issues.join("; ")
            )));
        }

        std::fs::create_dir_all(diagrams_dir)?;
        let probes = render::probe_renderers();

        let mut presets = self.options.presets.clone();
        presets.sort();
        presets.dedup();
        let mut formats = self.options.formats.clone();
        formats.sort();
        formats.dedup();

        let projections: BTreeMap<DiagramPreset, Projection> =
            presets.iter().map(|preset| (*preset, project(graph, *preset))).collect();

        let mut planned: Vec<PlannedDiagram> = Vec::new();
        for preset in &presets {
            for format in &formats {
                for theme in &themes {
                    let projection = &projections[preset];
                    let mut template = build_template(projection, *preset, *format, theme);
                    let cache_hit = match self.prior_templates.get(&template.cache_key) {
                        Some(prior_bytes) => {
                            // Reuse the prior run's template bytes verbatim.
                            template.content = prior_bytes.clone();
                            true
                        }
                        None => false,
                    };
                    planned.push(PlannedDiagram { template, cache_hit });
                }
            }
        }

        // Render over a bounded pool; results are indexed, so completion
        // order never affects the metadata or the cache.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.resolved_concurrency())
            .build()
            .map_err(|err| RunError::Input(format!("render pool: {err}")))?;
        let render_png = self.options.render_png;
        let results: Vec<std::io::Result<RenderedDiagram>> = pool.install(|| {
            planned
                .par_iter()
                .map(|plan| render_one(plan, diagrams_dir, render_png))
                .collect()
        });

        let mut written_files = Vec::new();
        let mut templates_for_cache = BTreeMap::new();
        let mut diagnostics = Vec::new();
        let mut template_metadata = Vec::new();
        for (plan, result) in planned.iter().zip(results) {
            let rendered = result?;
            if let Some(error) = &rendered.svg.cli_error {
                diagnostics.push(Diagnostic::new(
                    codes::RENDER_FALLBACK,
                    format!("{}: {error}", plan.template.source_file_name()),
                ));
            }
            written_files.extend(rendered.files.clone());
            templates_for_cache
                .insert(plan.template.cache_key.clone(), plan.template.content.clone());
            template_metadata.push(json!({
                "cache_hit": plan.cache_hit,
                "cache_key": plan.template.cache_key,
                "format": plan.template.format.as_str(),
                "output": format!("diagrams/{}", plan.template.rendered_file_name("svg")),
                "preset": plan.template.preset.as_str(),
                "rendered_with": rendered.svg.rendered_with,
                "source": format!("diagrams/{}", plan.template.source_file_name()),
                "subgraph_digest": plan.template.subgraph_digest,
                "theme": plan.template.theme_id,
            }));
        }

        let metadata = json!({
            "probes": probes.iter().map(|probe| json!({
                "available": probe.available,
                "details": probe.details,
                "renderer": probe.renderer,
            })).collect::<Vec<_>>(),
            "templates": template_metadata,
        });
        let mut metadata_json =
            serde_json::to_string_pretty(&metadata).expect("metadata serializes");
        metadata_json.push('\n');

        Ok(DiagramOutcome { metadata_json, written_files, templates_for_cache, diagnostics })
    }
}

struct RenderedDiagram {
    svg: render::RenderResult,
    files: Vec<String>,
}

fn render_one(
    plan: &PlannedDiagram,
    diagrams_dir: &Path,
    render_png: bool,
) -> std::io::Result<RenderedDiagram> {
    let source_name = plan.template.source_file_name();
    let source_path: PathBuf = diagrams_dir.join(&source_name);
    std::fs::write(&source_path, &plan.template.content)?;
    let mut files = vec![source_name];

    let svg_name = plan.template.rendered_file_name("svg");
    let svg_path = diagrams_dir.join(&svg_name);
    let svg = render::render(&plan.template, &source_path, &svg_path, false);
    files.push(svg_name);

    if render_png {
        let png_name = plan.template.rendered_file_name("png");
        let png_path = diagrams_dir.join(&png_name);
        render::render(&plan.template, &source_path, &png_path, true);
        files.push(png_name);
    }
    Ok(RenderedDiagram { svg, files })
}
