//! Markdown run summary.
//!
//! Cross-links every artifact family in the run directory and closes with
//! the Diagnostics section; empty sections render `_none_` for diff
//! stability across runs.

use super::manifest::{ArtifactRecord, SkippedStage};
use crate::error::Diagnostic;
use crate::extract::ExtractorStats;
use crate::metrics::gates::GateReport;

pub struct SummaryContext<'a> {
    pub run_id: &'a str,
    pub timestamp_utc: &'a str,
    pub tool_version: &'a str,
    pub config_version: &'a str,
    pub seed: Option<u64>,
    pub allow_network: bool,
    pub record_count: usize,
    pub delta_counts: (usize, usize, usize, usize),
    pub extractor: ExtractorStats,
    pub gates: Option<&'a GateReport>,
    pub artifacts: &'a [ArtifactRecord],
    pub skipped: &'a [SkippedStage],
    pub diagnostics: &'a [Diagnostic],
}

pub fn build_summary(context: &SummaryContext<'_>) -> String {
    let (added, changed, removed, unchanged) = context.delta_counts;
    let mut lines = vec![
        format!("# Run {}", context.run_id),
        String::new(),
        "## Provenance".to_string(),
        String::new(),
        format!("- Tool version: {}", context.tool_version),
        format!("- Configuration version: {}", context.config_version),
        format!(
            "- Seed: {}",
            context.seed.map(|seed| seed.to_string()).unwrap_or_else(|| "not set".to_string())
        ),
        format!("- Generated at: {}", context.timestamp_utc),
        format!(
            "- Network: {}",
            if context.allow_network { "allowed (unused)" } else { "local only" }
        ),
        String::new(),
        "## Inputs".to_string(),
        String::new(),
        format!("- Files discovered: {}", context.record_count),
        format!(
            "- Delta: {added} added, {changed} changed, {removed} removed, {unchanged} unchanged"
        ),
        format!(
            "- Extractor cache: {} hits, {} misses",
            context.extractor.cache_hits, context.extractor.cache_misses
        ),
        String::new(),
        "## Artifacts".to_string(),
        String::new(),
        "- Manifest: [manifest.json](../manifests/manifest.json)".to_string(),
    ];
    if context.artifacts.is_empty() {
        lines.push("_none_".to_string());
    } else {
        for artifact in context.artifacts {
            lines.push(format!(
                "- {}: [{}](../{})",
                artifact.kind,
                artifact
                    .relative_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(artifact.relative_path.as_str()),
                artifact.relative_path
            ));
        }
    }

    lines.push(String::new());
    lines.push("## Quality Gates".to_string());
    lines.push(String::new());
    match context.gates {
        Some(report) => {
            lines.push(format!("- Passed: {}", if report.passed { "yes" } else { "no" }));
            for check in &report.checks {
                lines.push(format!("  - {} [{}]: {}", check.name, check.verdict.as_str(), check.reason));
            }
        }
        None => lines.push("_none_".to_string()),
    }

    lines.push(String::new());
    lines.push("## Skipped Stages".to_string());
    lines.push(String::new());
    if context.skipped.is_empty() {
        lines.push("_none_".to_string());
    } else {
        for skip in context.skipped {
            lines.push(format!("- {}: {}", skip.stage, skip.reason));
        }
    }

    lines.push(String::new());
    lines.push("## Diagnostics".to_string());
    lines.push(String::new());
    if context.diagnostics.is_empty() {
        lines.push("_none_".to_string());
    } else {
        for diagnostic in context.diagnostics {
            lines.push(format!("- `{}` {}", diagnostic.code, diagnostic.message));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}
