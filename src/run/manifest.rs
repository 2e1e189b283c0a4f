//! Run manifest: the reproducibility envelope.
//!
//! Records the run identity, the resolved-config digest, the environment,
//! every input file with its digest, every produced artifact with its
//! digest, and the stages that were explicitly skipped. Key order is
//! stable; the manifest is finalized before the cache is touched.

use crate::scan::FileRecord;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    pub kind: String,
    pub relative_path: String,
    pub digest: String,
}

impl ArtifactRecord {
    pub fn new(kind: &str, relative_path: impl Into<String>, digest: impl Into<String>) -> Self {
        Self { kind: kind.to_string(), relative_path: relative_path.into(), digest: digest.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedStage {
    pub stage: String,
    pub reason: String,
}

pub struct ManifestContext<'a> {
    pub run_id: &'a str,
    pub timestamp_utc: &'a str,
    pub tool_version: &'a str,
    pub config_version: &'a str,
    pub seed: Option<u64>,
    pub resolved_config_digest: &'a str,
}

pub fn build_manifest_json(
    context: &ManifestContext<'_>,
    records: &[FileRecord],
    artifacts: &[ArtifactRecord],
    skipped: &[SkippedStage],
) -> String {
    let document = json!({
        "artifacts": artifacts.iter().map(|artifact| json!({
            "digest": artifact.digest,
            "kind": artifact.kind,
            "relative_path": artifact.relative_path,
        })).collect::<Vec<_>>(),
        "config_version": context.config_version,
        "environment": {
            "arch": std::env::consts::ARCH,
            "platform": std::env::consts::OS,
        },
        "file_records": records.iter().map(|record| json!({
            "digest": record.digest,
            "mtime_ns": record.mtime_ns,
            "path": record.canonical_path,
            "size": record.size_bytes,
        })).collect::<Vec<_>>(),
        "resolved_config_digest": context.resolved_config_digest,
        "run_id": context.run_id,
        "seed": context.seed,
        "skipped_stages": skipped.iter().map(|skip| json!({
            "reason": skip.reason,
            "stage": skip.stage,
        })).collect::<Vec<_>>(),
        "timestamp_utc": context.timestamp_utc,
        "tool_version": context.tool_version,
    });
    let mut text = serde_json::to_string_pretty(&document).expect("manifest serializes");
    text.push('\n');
    text
}
