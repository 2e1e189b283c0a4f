//! Run-level error taxonomy and recoverable diagnostics.
//!
//! Fatal failures abort the run before the cache is mutated and map onto the
//! process exit codes: configuration/input/invariant problems exit 3, I/O and
//! internal failures exit 1. Quality-gate failures are not errors; the CLI
//! maps a failed gate verdict to exit 2 after all artifacts are written.
//! Recoverable conditions become [`Diagnostic`] records carried into the run
//! log and the summary instead of bubbling up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// Invalid flags, unreadable config file, unknown preset or field.
    #[error("configuration error: {0}")]
    Config(String),

    /// Scan root missing or not a directory.
    #[error("input error: {0}")]
    Input(String),

    /// Graph validator detected an orphan, cycle, missing provenance,
    /// duplicate ID, or an inaccessible diagram theme.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A stage exceeded its configured wall-clock budget.
    #[error("stage '{stage}' exceeded its {limit_secs}s timeout")]
    Timeout { stage: String, limit_secs: u64 },

    /// The cooperative cancellation signal fired.
    #[error("run cancelled")]
    Cancelled,

    /// Write failure under the run directory or any other I/O fault.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) | RunError::Input(_) | RunError::Invariant(_) => 3,
            RunError::Timeout { .. } | RunError::Cancelled | RunError::Io(_) => 1,
        }
    }
}

/// Stable diagnostic codes surfaced in the summary "Diagnostics" section.
pub mod codes {
    /// A discovered file could not be read; the walk continued without it.
    pub const READ_FAILED: &str = "E_READ";
    /// Entity extraction degraded to the minimal event set for one file.
    pub const EXTRACT_DEGRADED: &str = "E_EXTRACT";
    /// A supplied metrics document was malformed and was skipped.
    pub const METRICS_REJECTED: &str = "E_METRICS";
    /// An external renderer failed; the deterministic fallback was used.
    pub const RENDER_FALLBACK: &str = "W_RENDER";
    /// The persisted cache had an incompatible schema; a full rescan ran.
    pub const CACHE_SCHEMA: &str = "W_CACHE_SCHEMA";
    /// The configured local card model was absent; template mode was used.
    pub const CARD_FALLBACK: &str = "W_CARD_FALLBACK";
}

/// A recoverable condition recorded during the run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(RunError::Config("x".into()).exit_code(), 3);
        assert_eq!(RunError::Input("x".into()).exit_code(), 3);
        assert_eq!(RunError::Invariant("x".into()).exit_code(), 3);
        assert_eq!(RunError::Cancelled.exit_code(), 1);
        assert_eq!(
            RunError::Timeout { stage: "walk".into(), limit_secs: 1 }.exit_code(),
            1
        );
        let io = RunError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.exit_code(), 1);
    }
}
