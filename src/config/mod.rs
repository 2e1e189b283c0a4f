//! Run configuration.
//!
//! One explicit record with every recognized field enumerated. Unknown
//! fields in a config file are a hard `ConfigError` rather than a silent
//! ignore, because the resolved configuration participates in the
//! reproducibility envelope: its digest is recorded in the manifest and
//! feeds the short run ID.

pub mod loader;
pub mod merge;

pub use loader::load_config;
pub use merge::{apply_overrides, CliOverrides};

use crate::bundle::BundlePreset;
use crate::cards::CardScope;
use crate::diagram::{DiagramFormat, DiagramPreset, ThemeChoice};
use crate::error::RunError;
use crate::graph::GraphScope;
use crate::util::hashing::digest_bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CONFIG_VERSION: &str = "1.0.0";
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Configuration schema version recorded in the manifest.
    pub version: String,
    pub privacy: PrivacyOptions,
    pub features: FeatureToggles,
    pub thresholds: Thresholds,
    pub sources: SourceOptions,
    pub output: OutputOptions,
    pub bundles: BundleOptions,
    pub graph: GraphOptions,
    pub diagrams: DiagramOptions,
    pub cards: CardOptions,
    pub metrics: MetricOptions,
    pub limits: LimitOptions,
    /// Seed recorded in the manifest for deterministic operations.
    pub seed: Option<u64>,
    /// Fixed run timestamp (seconds since epoch). `SOURCE_DATE_EPOCH` in the
    /// environment takes precedence the same way.
    pub timestamp_override: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            privacy: PrivacyOptions::default(),
            features: FeatureToggles::default(),
            thresholds: Thresholds::default(),
            sources: SourceOptions::default(),
            output: OutputOptions::default(),
            bundles: BundleOptions::default(),
            graph: GraphOptions::default(),
            diagrams: DiagramOptions::default(),
            cards: CardOptions::default(),
            metrics: MetricOptions::default(),
            limits: LimitOptions::default(),
            seed: None,
            timestamp_override: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PrivacyOptions {
    /// Recorded in the manifest; the core never opens sockets regardless.
    pub allow_network: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FeatureToggles {
    pub enable_metrics: bool,
    pub enable_badges: bool,
    pub enable_bundles: bool,
    pub enable_summary: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            enable_badges: true,
            enable_bundles: true,
            enable_summary: true,
        }
    }
}

/// Quality-gate thresholds. Absent thresholds are not evaluated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Thresholds {
    pub min_coverage: Option<f64>,
    pub max_failed_tests: Option<u64>,
    pub max_lint_warnings: Option<u64>,
    pub max_critical_vulnerabilities: Option<u64>,
}

impl Thresholds {
    pub fn any_set(&self) -> bool {
        self.min_coverage.is_some()
            || self.max_failed_tests.is_some()
            || self.max_lint_warnings.is_some()
            || self.max_critical_vulnerabilities.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SourceOptions {
    pub root: PathBuf,
    /// Include globs over canonical paths; empty means everything.
    pub include: Vec<String>,
    /// Ignore globs; these take precedence over includes.
    pub ignore: Vec<String>,
    pub incremental: bool,
    pub force_rebuild: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include: Vec::new(),
            ignore: Vec::new(),
            incremental: true,
            force_rebuild: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputOptions {
    /// Parent of the per-run directories.
    pub base_directory: PathBuf,
    /// Number of sibling runs kept after finalization; 0 disables pruning.
    pub retention: usize,
    /// Cache location; defaults to `<base_directory>/cache`.
    pub cache_directory: Option<PathBuf>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from("atlas_runs"),
            retention: 5,
            cache_directory: None,
        }
    }
}

impl OutputOptions {
    pub fn runs_directory(&self) -> PathBuf {
        self.base_directory.join("runs")
    }

    pub fn cache_directory(&self) -> PathBuf {
        self.cache_directory
            .clone()
            .unwrap_or_else(|| self.base_directory.join("cache"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BundleOptions {
    pub presets: Vec<BundlePreset>,
    pub max_bundle_bytes: u64,
    pub max_bundle_lines: u64,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            presets: vec![BundlePreset::All],
            max_bundle_bytes: 200_000,
            max_bundle_lines: 1_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GraphOptions {
    pub enabled: bool,
    pub scope: GraphScope,
    /// `false` strictly dominates the scope and drops test nodes everywhere.
    pub include_tests: bool,
    pub diff: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self { enabled: true, scope: GraphScope::Full, include_tests: true, diff: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DiagramOptions {
    pub enabled: bool,
    pub presets: Vec<DiagramPreset>,
    pub formats: Vec<DiagramFormat>,
    pub theme: ThemeChoice,
    /// Rendering worker count; 0 resolves to `min(4, cores)`.
    pub concurrency: usize,
    pub render_png: bool,
}

impl Default for DiagramOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            presets: vec![
                DiagramPreset::Architecture,
                DiagramPreset::Dependencies,
                DiagramPreset::Tests,
            ],
            formats: vec![DiagramFormat::Mermaid],
            theme: ThemeChoice::Light,
            concurrency: 0,
            render_png: false,
        }
    }
}

impl DiagramOptions {
    pub fn resolved_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(4)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CardOptions {
    pub enabled: bool,
    pub scopes: Vec<CardScope>,
    /// Optional local adapter; absence degrades to template mode.
    pub local_model_path: Option<PathBuf>,
}

impl Default for CardOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            scopes: vec![CardScope::Architecture, CardScope::Quality, CardScope::Tests],
            local_model_path: None,
        }
    }
}

/// Normalized metric documents supplied by external parsers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetricOptions {
    pub inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LimitOptions {
    /// Digest pool size; 0 resolves to the core count.
    pub digest_workers: usize,
    /// Extraction pool size; 0 resolves to the core count.
    pub extract_workers: usize,
    /// Per-stage wall-clock budget; exceeding it is fatal.
    pub stage_timeout_secs: Option<u64>,
}

impl Config {
    /// Digest of the fully resolved configuration, recorded in the manifest.
    pub fn resolved_digest(&self) -> String {
        let payload = serde_json::to_vec(self).expect("config serializes");
        digest_bytes(&payload)
    }

    /// Structural validation beyond what serde can express.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.bundles.max_bundle_bytes == 0 {
            return Err(RunError::Config("bundles.max_bundle_bytes must be positive".into()));
        }
        if self.bundles.max_bundle_lines == 0 {
            return Err(RunError::Config("bundles.max_bundle_lines must be positive".into()));
        }
        if self.bundles.presets.is_empty() {
            return Err(RunError::Config("bundles.presets must not be empty".into()));
        }
        if self.diagrams.enabled && self.diagrams.presets.is_empty() {
            return Err(RunError::Config("diagrams.presets must not be empty".into()));
        }
        if self.diagrams.enabled && self.diagrams.formats.is_empty() {
            return Err(RunError::Config("diagrams.formats must not be empty".into()));
        }
        if let Some(0) = self.limits.stage_timeout_secs {
            return Err(RunError::Config("limits.stage_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Effective pinned run timestamp in seconds since the epoch, if any.
    pub fn pinned_timestamp(&self) -> Option<i64> {
        if let Ok(raw) = std::env::var("SOURCE_DATE_EPOCH") {
            if let Ok(secs) = raw.parse::<i64>() {
                return Some(secs);
            }
        }
        self.timestamp_override
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().expect("default config is valid");
    }

    #[test]
    fn resolved_digest_is_stable_and_sensitive() {
        let a = Config::default();
        let b = Config::default();
        assert_eq!(a.resolved_digest(), b.resolved_digest());

        let mut c = Config::default();
        c.bundles.max_bundle_bytes = 1;
        assert_ne!(a.resolved_digest(), c.resolved_digest());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut config = Config::default();
        config.bundles.max_bundle_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn timestamp_override_pins_clock() {
        let mut config = Config::default();
        config.timestamp_override = Some(1_700_000_000);
        assert_eq!(config.pinned_timestamp(), Some(1_700_000_000));
    }
}
