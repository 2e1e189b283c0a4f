//! Quality-gate evaluation.
//!
//! Every configured threshold is enumerated in the report with its actual
//! value, verdict, and a human-readable reason. A threshold whose metric
//! source is missing (or was rejected as malformed) counts as not
//! evaluated and does not affect the overall verdict. Overall verdict:
//! pass iff every evaluated gate passes.

use super::MetricsBundle;
use crate::config::Thresholds;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    Pass,
    Fail,
    NotEvaluated,
}

impl GateVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::Pass => "pass",
            GateVerdict::Fail => "fail",
            GateVerdict::NotEvaluated => "not_evaluated",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateCheck {
    pub name: &'static str,
    pub threshold: serde_json::Value,
    pub actual: serde_json::Value,
    pub verdict: GateVerdict,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GateReport {
    pub checks: Vec<GateCheck>,
    pub passed: bool,
}

impl GateReport {
    pub fn to_json(&self) -> String {
        let document = json!({
            "checks": self.checks.iter().map(|check| json!({
                "actual": check.actual,
                "name": check.name,
                "reason": check.reason,
                "threshold": check.threshold,
                "verdict": check.verdict.as_str(),
            })).collect::<Vec<_>>(),
            "passed": self.passed,
        });
        let mut text =
            serde_json::to_string_pretty(&document).expect("gate report serializes");
        text.push('\n');
        text
    }

    pub fn failed_reasons(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|check| check.verdict == GateVerdict::Fail)
            .map(|check| check.reason.as_str())
            .collect()
    }
}

pub fn evaluate(thresholds: &Thresholds, metrics: &MetricsBundle) -> GateReport {
    let mut checks = Vec::new();

    if let Some(minimum) = thresholds.min_coverage {
        checks.push(match &metrics.coverage {
            Some(coverage) => {
                let actual = coverage.line_percent;
                if actual < minimum {
                    check(
                        "min_coverage",
                        json!(minimum),
                        json!(actual),
                        GateVerdict::Fail,
                        format!("line coverage {actual:.2}% below minimum {minimum:.2}%"),
                    )
                } else {
                    check(
                        "min_coverage",
                        json!(minimum),
                        json!(actual),
                        GateVerdict::Pass,
                        format!("line coverage {actual:.2}% meets minimum {minimum:.2}%"),
                    )
                }
            }
            None => not_evaluated("min_coverage", json!(minimum), "no coverage metrics supplied"),
        });
    }

    if let Some(maximum) = thresholds.max_failed_tests {
        checks.push(match &metrics.tests {
            Some(tests) => {
                if tests.failed > maximum {
                    check(
                        "max_failed_tests",
                        json!(maximum),
                        json!(tests.failed),
                        GateVerdict::Fail,
                        format!("{} failed tests exceed maximum {maximum}", tests.failed),
                    )
                } else {
                    check(
                        "max_failed_tests",
                        json!(maximum),
                        json!(tests.failed),
                        GateVerdict::Pass,
                        format!("{} failed tests within maximum {maximum}", tests.failed),
                    )
                }
            }
            None => not_evaluated("max_failed_tests", json!(maximum), "no test metrics supplied"),
        });
    }

    if let Some(maximum) = thresholds.max_lint_warnings {
        checks.push(match &metrics.lint {
            Some(lint) => {
                let warnings = lint.by_severity.get("warning").copied().unwrap_or(0);
                if warnings > maximum {
                    check(
                        "max_lint_warnings",
                        json!(maximum),
                        json!(warnings),
                        GateVerdict::Fail,
                        format!("{warnings} lint warnings exceed maximum {maximum}"),
                    )
                } else {
                    check(
                        "max_lint_warnings",
                        json!(maximum),
                        json!(warnings),
                        GateVerdict::Pass,
                        format!("{warnings} lint warnings within maximum {maximum}"),
                    )
                }
            }
            None => not_evaluated("max_lint_warnings", json!(maximum), "no lint metrics supplied"),
        });
    }

    if let Some(maximum) = thresholds.max_critical_vulnerabilities {
        checks.push(match &metrics.security {
            Some(security) => {
                let critical = security.by_severity.get("critical").copied().unwrap_or(0);
                if critical > maximum {
                    check(
                        "max_critical_vulnerabilities",
                        json!(maximum),
                        json!(critical),
                        GateVerdict::Fail,
                        format!("{critical} critical vulnerabilities exceed maximum {maximum}"),
                    )
                } else {
                    check(
                        "max_critical_vulnerabilities",
                        json!(maximum),
                        json!(critical),
                        GateVerdict::Pass,
                        format!("{critical} critical vulnerabilities within maximum {maximum}"),
                    )
                }
            }
            None => not_evaluated(
                "max_critical_vulnerabilities",
                json!(maximum),
                "no security metrics supplied",
            ),
        });
    }

    let passed = checks.iter().all(|check| check.verdict != GateVerdict::Fail);
    GateReport { checks, passed }
}

fn check(
    name: &'static str,
    threshold: serde_json::Value,
    actual: serde_json::Value,
    verdict: GateVerdict,
    reason: String,
) -> GateCheck {
    GateCheck { name, threshold, actual, verdict, reason }
}

fn not_evaluated(name: &'static str, threshold: serde_json::Value, reason: &str) -> GateCheck {
    GateCheck {
        name,
        threshold,
        actual: serde_json::Value::Null,
        verdict: GateVerdict::NotEvaluated,
        reason: reason.to_string(),
    }
}
