//! Metrics facade.
//!
//! The core does not parse JUnit, LCOV, Cobertura, or SARIF. External
//! parsers hand over documents in the normalized inbound shape defined
//! here; this module validates them strictly, aggregates them into one
//! [`MetricsBundle`] with stable key order, and leaves threshold evaluation
//! to [`gates`]. A malformed document skips that source with a diagnostic —
//! the run keeps going and affected gates count as not evaluated.

pub mod badge;
pub mod gates;

use crate::error::{codes, Diagnostic};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

/// Inbound document shape: the contract external parsers deliver.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsInput {
    #[serde(default)]
    pub tests: Option<TestTotals>,
    #[serde(default)]
    pub coverage: Option<CoverageInput>,
    #[serde(default)]
    pub lint: Option<LintInput>,
    #[serde(default)]
    pub security: Option<SecurityInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestTotals {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverageInput {
    pub line_percent: f64,
    #[serde(default)]
    pub branch_percent: Option<f64>,
    #[serde(default)]
    pub files: Vec<FileCoverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCoverage {
    pub path: String,
    pub covered_lines: u64,
    pub total_lines: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LintInput {
    pub issues: Vec<LintIssue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LintIssue {
    pub rule: String,
    pub severity: LintSeverity,
    pub path: String,
    pub line: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    Error,
    Warning,
    Info,
}

impl LintSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LintSeverity::Error => "error",
            LintSeverity::Warning => "warning",
            LintSeverity::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityInput {
    pub issues: Vec<SecurityIssue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityIssue {
    pub id: String,
    pub severity: SecuritySeverity,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecuritySeverity::Critical => "critical",
            SecuritySeverity::High => "high",
            SecuritySeverity::Medium => "medium",
            SecuritySeverity::Low => "low",
        }
    }
}

/// Aggregated coverage across every supplied source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub line_percent: f64,
    pub branch_percent: Option<f64>,
    pub covered_lines: u64,
    pub total_lines: u64,
    pub files: Vec<FileCoverage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssueSummary {
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_key: BTreeMap<String, u64>,
}

/// The normalized bundle every downstream consumer reads.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsBundle {
    pub tests: Option<TestTotals>,
    pub coverage: Option<CoverageSummary>,
    pub lint: Option<IssueSummary>,
    pub security: Option<IssueSummary>,
}

impl MetricsBundle {
    pub fn is_empty(&self) -> bool {
        self.tests.is_none()
            && self.coverage.is_none()
            && self.lint.is_none()
            && self.security.is_none()
    }

    pub fn to_json(&self) -> String {
        let mut document = serde_json::Map::new();
        if let Some(tests) = &self.tests {
            document.insert(
                "tests".to_string(),
                json!({
                    "duration_ms": tests.duration_ms,
                    "failed": tests.failed,
                    "passed": tests.passed,
                    "skipped": tests.skipped,
                    "total": tests.total,
                }),
            );
        }
        if let Some(coverage) = &self.coverage {
            document.insert(
                "coverage".to_string(),
                json!({
                    "branch_percent": coverage.branch_percent,
                    "covered_lines": coverage.covered_lines,
                    "files": coverage.files.iter().map(|file| json!({
                        "covered_lines": file.covered_lines,
                        "path": file.path,
                        "total_lines": file.total_lines,
                    })).collect::<Vec<_>>(),
                    "line_percent": round2(coverage.line_percent),
                    "total_lines": coverage.total_lines,
                }),
            );
        }
        if let Some(lint) = &self.lint {
            document.insert(
                "lint".to_string(),
                json!({
                    "by_rule": lint.by_key,
                    "by_severity": lint.by_severity,
                    "total": lint.total,
                }),
            );
        }
        if let Some(security) = &self.security {
            document.insert(
                "security".to_string(),
                json!({
                    "by_package": security.by_key,
                    "by_severity": security.by_severity,
                    "total": security.total,
                }),
            );
        }
        let mut text = serde_json::to_string_pretty(&serde_json::Value::Object(document))
            .expect("metrics serialize");
        text.push('\n');
        text
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Load and aggregate every supplied metrics document.
pub fn collect(paths: &[std::path::PathBuf]) -> (MetricsBundle, Vec<Diagnostic>) {
    let mut inputs = Vec::new();
    let mut diagnostics = Vec::new();
    for path in paths {
        match load_input(path) {
            Ok(input) => inputs.push(input),
            Err(message) => {
                diagnostics.push(Diagnostic::new(codes::METRICS_REJECTED, message))
            }
        }
    }
    (aggregate(&inputs), diagnostics)
}

fn load_input(path: &Path) -> Result<MetricsInput, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("{}: {err}", path.display()))?;
    serde_json::from_str(&content).map_err(|err| format!("{}: {err}", path.display()))
}

pub fn aggregate(inputs: &[MetricsInput]) -> MetricsBundle {
    let mut bundle = MetricsBundle::default();

    let test_inputs: Vec<&TestTotals> = inputs.iter().filter_map(|i| i.tests.as_ref()).collect();
    if !test_inputs.is_empty() {
        bundle.tests = Some(TestTotals {
            total: test_inputs.iter().map(|t| t.total).sum(),
            passed: test_inputs.iter().map(|t| t.passed).sum(),
            failed: test_inputs.iter().map(|t| t.failed).sum(),
            skipped: test_inputs.iter().map(|t| t.skipped).sum(),
            duration_ms: test_inputs.iter().map(|t| t.duration_ms).sum(),
        });
    }

    let coverage_inputs: Vec<&CoverageInput> =
        inputs.iter().filter_map(|i| i.coverage.as_ref()).collect();
    if !coverage_inputs.is_empty() {
        let mut files: Vec<FileCoverage> =
            coverage_inputs.iter().flat_map(|c| c.files.iter().cloned()).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let covered: u64 = files.iter().map(|f| f.covered_lines).sum();
        let total: u64 = files.iter().map(|f| f.total_lines).sum();
        let line_percent = if total > 0 {
            covered as f64 / total as f64 * 100.0
        } else {
            let sum: f64 = coverage_inputs.iter().map(|c| c.line_percent).sum();
            sum / coverage_inputs.len() as f64
        };
        let branches: Vec<f64> =
            coverage_inputs.iter().filter_map(|c| c.branch_percent).collect();
        let branch_percent = if branches.is_empty() {
            None
        } else {
            Some(round2(branches.iter().sum::<f64>() / branches.len() as f64))
        };
        bundle.coverage = Some(CoverageSummary {
            line_percent,
            branch_percent,
            covered_lines: covered,
            total_lines: total,
            files,
        });
    }

    let lint_issues: Vec<&LintIssue> =
        inputs.iter().filter_map(|i| i.lint.as_ref()).flat_map(|l| l.issues.iter()).collect();
    if !lint_issues.is_empty() {
        let mut summary = IssueSummary::default();
        for issue in &lint_issues {
            summary.total += 1;
            *summary.by_severity.entry(issue.severity.as_str().to_string()).or_insert(0) += 1;
            *summary.by_key.entry(issue.rule.clone()).or_insert(0) += 1;
        }
        bundle.lint = Some(summary);
    }

    let security_issues: Vec<&SecurityIssue> = inputs
        .iter()
        .filter_map(|i| i.security.as_ref())
        .flat_map(|s| s.issues.iter())
        .collect();
    if !security_issues.is_empty() {
        let mut summary = IssueSummary::default();
        for issue in &security_issues {
            summary.total += 1;
            *summary.by_severity.entry(issue.severity.as_str().to_string()).or_insert(0) += 1;
            let package = issue.package.clone().unwrap_or_else(|| "unattributed".to_string());
            *summary.by_key.entry(package).or_insert(0) += 1;
        }
        bundle.security = Some(summary);
    }

    bundle
}
