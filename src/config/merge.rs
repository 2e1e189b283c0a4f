//! CLI-over-config precedence.
//!
//! The CLI only ever narrows or overrides; anything it leaves unset falls
//! through to the config file and then the defaults.

use super::Config;
use crate::bundle::BundlePreset;
use crate::diagram::{DiagramFormat, DiagramPreset, ThemeChoice};
use crate::graph::GraphScope;
use std::path::PathBuf;

#[derive(Debug, Default)]
pub struct CliOverrides {
    pub input: Option<PathBuf>,
    pub include: Vec<String>,
    pub ignore: Vec<String>,
    pub presets: Vec<BundlePreset>,
    pub force_rebuild: bool,
    pub no_incremental: bool,
    pub min_coverage: Option<f64>,
    pub max_failed_tests: Option<u64>,
    pub max_lint_warnings: Option<u64>,
    pub max_critical_vulns: Option<u64>,
    pub no_graph: bool,
    pub graph_scope: Option<GraphScope>,
    pub graph_diff: Option<bool>,
    pub graph_no_tests: bool,
    pub no_diagrams: bool,
    pub diagram_presets: Vec<DiagramPreset>,
    pub diagram_formats: Vec<DiagramFormat>,
    pub diagram_theme: Option<ThemeChoice>,
    pub diagram_concurrency: Option<usize>,
    pub allow_network: bool,
    pub metrics_json: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub retention: Option<usize>,
    pub seed: Option<u64>,
}

pub fn apply_overrides(mut config: Config, overrides: CliOverrides) -> Config {
    if let Some(input) = overrides.input {
        config.sources.root = input;
    }
    if !overrides.include.is_empty() {
        config.sources.include = overrides.include;
    }
    if !overrides.ignore.is_empty() {
        config.sources.ignore = overrides.ignore;
    }
    if overrides.force_rebuild {
        config.sources.force_rebuild = true;
        config.sources.incremental = false;
    }
    if overrides.no_incremental {
        config.sources.incremental = false;
    }

    if !overrides.presets.is_empty() {
        config.bundles.presets = overrides.presets;
    }

    if overrides.min_coverage.is_some() {
        config.thresholds.min_coverage = overrides.min_coverage;
    }
    if overrides.max_failed_tests.is_some() {
        config.thresholds.max_failed_tests = overrides.max_failed_tests;
    }
    if overrides.max_lint_warnings.is_some() {
        config.thresholds.max_lint_warnings = overrides.max_lint_warnings;
    }
    if overrides.max_critical_vulns.is_some() {
        config.thresholds.max_critical_vulnerabilities = overrides.max_critical_vulns;
    }

    if overrides.no_graph {
        config.graph.enabled = false;
    }
    if let Some(scope) = overrides.graph_scope {
        config.graph.scope = scope;
    }
    if let Some(diff) = overrides.graph_diff {
        config.graph.diff = diff;
    }
    if overrides.graph_no_tests {
        config.graph.include_tests = false;
    }

    if overrides.no_diagrams {
        config.diagrams.enabled = false;
    }
    if !overrides.diagram_presets.is_empty() {
        config.diagrams.presets = overrides.diagram_presets;
    }
    if !overrides.diagram_formats.is_empty() {
        config.diagrams.formats = overrides.diagram_formats;
    }
    if let Some(theme) = overrides.diagram_theme {
        config.diagrams.theme = theme;
    }
    if let Some(concurrency) = overrides.diagram_concurrency {
        config.diagrams.concurrency = concurrency;
    }

    if overrides.allow_network {
        config.privacy.allow_network = true;
    }
    if !overrides.metrics_json.is_empty() {
        config.metrics.inputs = overrides.metrics_json;
    }
    if let Some(output) = overrides.output {
        config.output.base_directory = output;
    }
    if let Some(retention) = overrides.retention {
        config.output.retention = retention;
    }
    if overrides.seed.is_some() {
        config.seed = overrides.seed;
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overrides_keep_config() {
        let config = apply_overrides(Config::default(), CliOverrides::default());
        assert!(config.sources.incremental);
        assert!(config.graph.enabled);
    }

    #[test]
    fn force_rebuild_disables_incremental() {
        let overrides = CliOverrides { force_rebuild: true, ..Default::default() };
        let config = apply_overrides(Config::default(), overrides);
        assert!(config.sources.force_rebuild);
        assert!(!config.sources.incremental);
    }

    #[test]
    fn graph_no_tests_flag_wins() {
        let overrides = CliOverrides {
            graph_scope: Some(GraphScope::Full),
            graph_no_tests: true,
            ..Default::default()
        };
        let config = apply_overrides(Config::default(), overrides);
        assert_eq!(config.graph.scope, GraphScope::Full);
        assert!(!config.graph.include_tests);
    }

    #[test]
    fn thresholds_pass_through() {
        let overrides = CliOverrides {
            min_coverage: Some(80.0),
            max_failed_tests: Some(0),
            ..Default::default()
        };
        let config = apply_overrides(Config::default(), overrides);
        assert_eq!(config.thresholds.min_coverage, Some(80.0));
        assert_eq!(config.thresholds.max_failed_tests, Some(0));
        assert!(config.thresholds.any_set());
    }
}
