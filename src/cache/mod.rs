//! Content-addressed cache and per-run delta classification.
//!
//! One JSON store per scan root, named by the digest of the canonical root
//! path and versioned by `schema_version`. An incompatible version forces a
//! full rescan instead of failing. The store owns three maps: file entries,
//! extraction event blobs (keyed by their own digest so cache hits skip
//! reparsing), and diagram template bytes (keyed by render cache key).
//!
//! During a run the store is a read-only snapshot. The updated store is
//! staged to a sibling temp file and swapped with a single rename only
//! after the manifest has been finalized, so a failed run can never corrupt
//! cross-run state.

use crate::error::{codes, Diagnostic};
use crate::extract::ExtractionBlob;
use crate::scan::FileRecord;
use crate::util::hashing::digest_bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub digest: String,
    pub size_bytes: u64,
    pub mtime_ns: u64,
    pub last_seen_run_id: String,
    pub extraction_events_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStore {
    pub schema_version: u32,
    pub entries: BTreeMap<String, CacheEntry>,
    /// Extraction blobs keyed by `extraction_events_digest`.
    pub event_blobs: BTreeMap<String, ExtractionBlob>,
    /// Diagram template bytes keyed by render cache key.
    pub diagram_templates: BTreeMap<String, String>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            entries: BTreeMap::new(),
            event_blobs: BTreeMap::new(),
            diagram_templates: BTreeMap::new(),
        }
    }
}

/// Per-file delta classification against the prior cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaState {
    Added,
    Changed,
    Removed,
    Unchanged,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeltaReport {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl DeltaReport {
    pub fn state_for(&self, canonical_path: &str) -> DeltaState {
        if self.added.iter().any(|p| p == canonical_path) {
            DeltaState::Added
        } else if self.changed.iter().any(|p| p == canonical_path) {
            DeltaState::Changed
        } else if self.removed.iter().any(|p| p == canonical_path) {
            DeltaState::Removed
        } else {
            DeltaState::Unchanged
        }
    }
}

pub struct CacheService {
    store_path: PathBuf,
    prior: CacheStore,
}

impl CacheService {
    /// Open the cache for a scan root. Missing or schema-incompatible
    /// stores yield an empty prior state; the latter also yields a
    /// diagnostic because it silently degrades to a full rescan.
    pub fn init(
        cache_dir: &Path,
        scan_root: &Path,
        incremental: bool,
    ) -> (Self, Option<Diagnostic>) {
        let store_path = cache_dir.join(store_name(scan_root));
        if !incremental {
            return (Self { store_path, prior: CacheStore::default() }, None);
        }
        match std::fs::read(&store_path) {
            Ok(bytes) => match serde_json::from_slice::<CacheStore>(&bytes) {
                Ok(store) if store.schema_version == CACHE_SCHEMA_VERSION => {
                    (Self { store_path, prior: store }, None)
                }
                Ok(store) => {
                    let diagnostic = Diagnostic::new(
                        codes::CACHE_SCHEMA,
                        format!(
                            "cache schema version {} != {}; forcing full rescan",
                            store.schema_version, CACHE_SCHEMA_VERSION
                        ),
                    );
                    (Self { store_path, prior: CacheStore::default() }, Some(diagnostic))
                }
                Err(err) => {
                    let diagnostic = Diagnostic::new(
                        codes::CACHE_SCHEMA,
                        format!("cache store unreadable ({err}); forcing full rescan"),
                    );
                    (Self { store_path, prior: CacheStore::default() }, Some(diagnostic))
                }
            },
            Err(_) => (Self { store_path, prior: CacheStore::default() }, None),
        }
    }

    pub fn prior(&self) -> &CacheStore {
        &self.prior
    }

    /// Fill the `cached` flag on freshly walked records. `force_rebuild`
    /// leaves every flag false so downstream stages reparse everything.
    pub fn mark_cached(&self, records: &mut [FileRecord], force_rebuild: bool) {
        if force_rebuild {
            return;
        }
        for record in records.iter_mut() {
            if let Some(entry) = self.prior.entries.get(&record.canonical_path) {
                record.cached =
                    entry.digest == record.digest && entry.size_bytes == record.size_bytes;
            }
        }
    }

    /// Classify the union of prior cache keys and current records.
    pub fn classify_delta(&self, records: &[FileRecord]) -> DeltaReport {
        let mut report = DeltaReport::default();
        for record in records {
            match self.prior.entries.get(&record.canonical_path) {
                None => report.added.push(record.canonical_path.clone()),
                Some(entry) if entry.digest != record.digest => {
                    report.changed.push(record.canonical_path.clone())
                }
                Some(_) => report.unchanged.push(record.canonical_path.clone()),
            }
        }
        for path in self.prior.entries.keys() {
            if !records.iter().any(|record| &record.canonical_path == path) {
                report.removed.push(path.clone());
            }
        }
        report.added.sort();
        report.changed.sort();
        report.removed.sort();
        report.unchanged.sort();
        report
    }

    /// Look up a prior extraction blob by its events digest.
    pub fn event_blob_for(&self, canonical_path: &str) -> Option<&ExtractionBlob> {
        let entry = self.prior.entries.get(canonical_path)?;
        self.prior.event_blobs.get(&entry.extraction_events_digest)
    }

    pub fn diagram_template(&self, cache_key: &str) -> Option<&str> {
        self.prior.diagram_templates.get(cache_key).map(String::as_str)
    }

    /// Atomically replace the on-disk store. Called only after the manifest
    /// has been finalized.
    pub fn finalize(self, store: &CacheStore) -> std::io::Result<()> {
        if let Some(parent) = self.store_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staged = self.store_path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(store).expect("cache store serializes");
        std::fs::write(&staged, payload)?;
        std::fs::rename(&staged, &self.store_path)
    }
}

fn store_name(scan_root: &Path) -> String {
    let canonical = scan_root
        .canonicalize()
        .unwrap_or_else(|_| scan_root.to_path_buf())
        .to_string_lossy()
        .replace('\\', "/");
    format!("{}.json", &digest_bytes(canonical.as_bytes())[..16])
}
