//! Deterministic context bundles.
//!
//! A bundle is the concatenation of selected file units in canonical-path
//! order, each prefixed by a key-sorted header block, split whenever adding
//! the next unit would exceed the byte or line budget. Sequence numbers
//! start at 0 and a sidecar index records the exact offsets of every unit,
//! so consumers can slice a bundle without reparsing headers.

use crate::error::{codes, Diagnostic};
use crate::scan::{is_code_language, FileRecord};
use crate::util::encoding::read_text;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BundlePreset {
    /// Every discovered file.
    All,
    /// Source files projected to declaration lines only.
    Api,
    /// Test files.
    Tests,
    /// Dependency manifests.
    Dependencies,
}

impl BundlePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundlePreset::All => "all",
            BundlePreset::Api => "api",
            BundlePreset::Tests => "tests",
            BundlePreset::Dependencies => "dependencies",
        }
    }

    /// Predicate over file records.
    pub fn selects(&self, record: &FileRecord) -> bool {
        match self {
            BundlePreset::All => true,
            BundlePreset::Api => is_code_language(&record.language),
            BundlePreset::Tests => is_test_path(&record.canonical_path),
            BundlePreset::Dependencies => {
                crate::deps::is_dependency_manifest(&record.canonical_path)
            }
        }
    }
}

fn is_test_path(canonical_path: &str) -> bool {
    let filename = canonical_path.rsplit('/').next().unwrap_or(canonical_path);
    let stem = filename.split_once('.').map(|(s, _)| s).unwrap_or(filename);
    canonical_path.starts_with("tests/")
        || canonical_path.contains("/tests/")
        || canonical_path.contains("__tests__/")
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem == "conftest"
        || filename.contains(".test.")
        || filename.contains(".spec.")
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexEntry {
    pub unit_path: String,
    pub byte_offset: u64,
    pub line_offset: u64,
    pub length_bytes: u64,
    pub length_lines: u64,
    /// The unit alone exceeded a budget and was placed in its own bundle.
    pub oversize: bool,
}

#[derive(Debug, Clone)]
pub struct BuiltBundle {
    pub preset: BundlePreset,
    pub sequence: u64,
    pub content: String,
    pub index: Vec<IndexEntry>,
}

impl BuiltBundle {
    pub fn file_name(&self) -> String {
        format!("{}-{}.txt", self.preset.as_str(), self.sequence)
    }

    pub fn index_file_name(&self) -> String {
        format!("{}-{}.index.json", self.preset.as_str(), self.sequence)
    }

    /// Canonical paths of the units this bundle includes.
    pub fn unit_paths(&self) -> Vec<String> {
        self.index.iter().map(|entry| entry.unit_path.clone()).collect()
    }

    pub fn index_json(&self) -> String {
        let entries: Vec<serde_json::Value> = self
            .index
            .iter()
            .map(|entry| {
                json!({
                    "byte_offset": entry.byte_offset,
                    "length_bytes": entry.length_bytes,
                    "length_lines": entry.length_lines,
                    "line_offset": entry.line_offset,
                    "oversize": entry.oversize,
                    "unit_path": entry.unit_path,
                })
            })
            .collect();
        let mut text =
            serde_json::to_string_pretty(&entries).expect("index serializes");
        text.push('\n');
        text
    }
}

pub struct BundleBuilder {
    max_bytes: u64,
    max_lines: u64,
    license_hint: Option<String>,
}

impl BundleBuilder {
    pub fn new(max_bytes: u64, max_lines: u64, license_hint: Option<String>) -> Self {
        Self { max_bytes, max_lines, license_hint }
    }

    /// Build all bundles for one preset. Selection order is canonical-path
    /// order; unreadable units degrade to diagnostics.
    pub fn build(
        &self,
        preset: BundlePreset,
        records: &[FileRecord],
    ) -> (Vec<BuiltBundle>, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let mut selected: Vec<&FileRecord> =
            records.iter().filter(|record| preset.selects(record)).collect();
        selected.sort_by(|a, b| a.canonical_path.cmp(&b.canonical_path));

        let mut bundles: Vec<BuiltBundle> = Vec::new();
        let mut current = BundleAccumulator::new(preset, 0);

        for record in selected {
            let body = match read_text(&record.absolute_path) {
                Ok((text, _)) => text,
                Err(err) => {
                    diagnostics.push(Diagnostic::new(
                        codes::READ_FAILED,
                        format!("{}: bundle read failed: {err}", record.canonical_path),
                    ));
                    continue;
                }
            };
            let body = match preset {
                BundlePreset::Api => project_declarations(&body, &record.language),
                _ => body,
            };
            let entry = render_unit(record, &body, self.license_hint.as_deref());
            let entry_bytes = entry.len() as u64;
            let entry_lines = count_lines(&entry);
            let oversize = entry_bytes > self.max_bytes || entry_lines > self.max_lines;

            if !current.is_empty()
                && (current.bytes + entry_bytes > self.max_bytes
                    || current.lines + entry_lines > self.max_lines)
            {
                bundles.push(current.finish());
                current = BundleAccumulator::new(preset, bundles.len() as u64);
            }
            current.push(&record.canonical_path, &entry, oversize);
            if oversize {
                // An oversized unit sits alone: close its bundle immediately.
                bundles.push(current.finish());
                current = BundleAccumulator::new(preset, bundles.len() as u64);
            }
        }

        // An empty selection still emits one bundle so every preset has a
        // stable artifact.
        if !current.is_empty() || bundles.is_empty() {
            bundles.push(current.finish());
        }
        (bundles, diagnostics)
    }
}

struct BundleAccumulator {
    preset: BundlePreset,
    sequence: u64,
    content: String,
    index: Vec<IndexEntry>,
    bytes: u64,
    lines: u64,
}

impl BundleAccumulator {
    fn new(preset: BundlePreset, sequence: u64) -> Self {
        let content = format!("# bundle: {}/{}\n\n", preset.as_str(), sequence);
        Self { preset, sequence, content, index: Vec::new(), bytes: 0, lines: 0 }
    }

    fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn push(&mut self, unit_path: &str, entry: &str, oversize: bool) {
        let byte_offset = self.content.len() as u64;
        let line_offset = count_lines(&self.content);
        self.content.push_str(entry);
        self.index.push(IndexEntry {
            unit_path: unit_path.to_string(),
            byte_offset,
            line_offset,
            length_bytes: entry.len() as u64,
            length_lines: count_lines(entry),
            oversize,
        });
        self.bytes += entry.len() as u64;
        self.lines += count_lines(entry);
    }

    fn finish(self) -> BuiltBundle {
        BuiltBundle {
            preset: self.preset,
            sequence: self.sequence,
            content: self.content,
            index: self.index,
        }
    }
}

/// Render one unit: key-sorted header block plus the (normalized) body.
fn render_unit(record: &FileRecord, body: &str, license_hint: Option<&str>) -> String {
    let mtime_utc = DateTime::<Utc>::from_timestamp(
        (record.mtime_ns / 1_000_000_000) as i64,
        (record.mtime_ns % 1_000_000_000) as u32,
    )
    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    .format("%Y-%m-%dT%H:%M:%SZ");
    let mut unit = String::new();
    unit.push_str("---\n");
    unit.push_str(&format!("digest: {}\n", record.digest));
    unit.push_str(&format!("language: {}\n", record.language));
    unit.push_str(&format!("license_hint: {}\n", license_hint.unwrap_or("none")));
    unit.push_str(&format!("lines: {}\n", record.line_count));
    unit.push_str(&format!("mtime_utc: {mtime_utc}\n"));
    unit.push_str(&format!("path: {}\n", record.canonical_path));
    unit.push_str(&format!("size: {}\n", record.size_bytes));
    unit.push_str(&format!("synopsis: {}\n", record.synopsis.as_deref().unwrap_or("")));
    unit.push_str("---\n");
    unit.push_str(body);
    if !body.ends_with('\n') {
        unit.push('\n');
    }
    unit
}

fn count_lines(text: &str) -> u64 {
    let newlines = text.bytes().filter(|&b| b == b'\n').count() as u64;
    if text.is_empty() || text.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}

static DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:pub(?:\(\w+\))?\s+)?(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:def |class |fn |struct |enum |trait |impl |function |interface |type |import |from |use |require|module |package )",
    )
    .unwrap()
});

/// Keep only declaration lines; the `api` preset ships signatures, not
/// bodies.
fn project_declarations(body: &str, _language: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in body.lines() {
        if DECLARATION.is_match(line) {
            lines.push(line.trim_end());
        }
    }
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_record(dir: &TempDir, path: &str, content: &str) -> FileRecord {
        let absolute = dir.path().join(path);
        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&absolute, content).unwrap();
        FileRecord {
            canonical_path: path.to_string(),
            absolute_path: absolute,
            digest: crate::util::hashing::digest_bytes(content.as_bytes()),
            size_bytes: content.len() as u64,
            mtime_ns: 1_700_000_000_000_000_000,
            line_count: count_lines(content),
            language: crate::scan::classify_language(path).to_string(),
            cached: false,
            synopsis: content.lines().find(|l| !l.trim().is_empty()).map(|l| l.to_string()),
        }
    }

    #[test]
    fn headers_are_key_sorted_and_stable() {
        let tmp = TempDir::new().unwrap();
        let record = write_record(&tmp, "a.py", "def f():\n    pass\n");
        let builder = BundleBuilder::new(10_000, 1_000, Some("MIT".to_string()));
        let (bundles, diagnostics) = builder.build(BundlePreset::All, &[record]);
        assert!(diagnostics.is_empty());
        assert_eq!(bundles.len(), 1);
        let content = &bundles[0].content;
        let digest_at = content.find("digest:").unwrap();
        let language_at = content.find("language:").unwrap();
        let license_at = content.find("license_hint:").unwrap();
        let lines_at = content.find("lines:").unwrap();
        let mtime_at = content.find("mtime_utc:").unwrap();
        let path_at = content.find("path:").unwrap();
        let size_at = content.find("size:").unwrap();
        let synopsis_at = content.find("synopsis:").unwrap();
        assert!(digest_at < language_at);
        assert!(language_at < license_at);
        assert!(license_at < lines_at);
        assert!(lines_at < mtime_at);
        assert!(mtime_at < path_at);
        assert!(path_at < size_at);
        assert!(size_at < synopsis_at);
        assert!(content.contains("license_hint: MIT"));
        // Byte-identical on rebuild.
        let record2 = write_record(&tmp, "a.py", "def f():\n    pass\n");
        let (again, _) = BundleBuilder::new(10_000, 1_000, Some("MIT".to_string()))
            .build(BundlePreset::All, &[record2]);
        assert_eq!(again[0].content, *content);
    }

    #[test]
    fn units_are_ordered_by_canonical_path() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            write_record(&tmp, "z.py", "z = 1\n"),
            write_record(&tmp, "a.py", "a = 1\n"),
        ];
        let builder = BundleBuilder::new(10_000, 1_000, None);
        let (bundles, _) = builder.build(BundlePreset::All, &records);
        assert_eq!(bundles[0].unit_paths(), vec!["a.py", "z.py"]);
    }

    #[test]
    fn byte_budget_splits_into_sequences_zero_and_one() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            write_record(&tmp, "a.py", "aaaa\n"),
            write_record(&tmp, "b.py", "bbbb\n"),
        ];
        let builder = BundleBuilder::new(10_000, 1_000, None);
        let (probe, _) = builder.build(BundlePreset::All, &records[..1]);
        let unit_bytes = probe[0].index[0].length_bytes;

        // Budget fits exactly one unit; the second must open sequence 1.
        let tight = BundleBuilder::new(unit_bytes, 1_000, None);
        let (bundles, _) = tight.build(BundlePreset::All, &records);
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].sequence, 0);
        assert_eq!(bundles[1].sequence, 1);
        assert_eq!(bundles[0].unit_paths(), vec!["a.py"]);
        assert_eq!(bundles[1].unit_paths(), vec!["b.py"]);
    }

    #[test]
    fn line_budget_splits_independently() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            write_record(&tmp, "a.txt", "1\n2\n3\n"),
            write_record(&tmp, "b.txt", "4\n5\n6\n"),
        ];
        let builder = BundleBuilder::new(1_000_000, 13, None);
        let (bundles, _) = builder.build(BundlePreset::All, &records);
        assert_eq!(bundles.len(), 2);
    }

    #[test]
    fn oversized_unit_is_alone_and_flagged() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            write_record(&tmp, "big.txt", &"x".repeat(500)),
            write_record(&tmp, "small.txt", "ok\n"),
        ];
        let builder = BundleBuilder::new(100, 1_000, None);
        let (bundles, _) = builder.build(BundlePreset::All, &records);
        let big = bundles
            .iter()
            .find(|b| b.unit_paths() == vec!["big.txt".to_string()])
            .expect("oversized unit in its own bundle");
        assert!(big.index[0].oversize);
        assert_eq!(big.index.len(), 1);
    }

    #[test]
    fn empty_selection_yields_header_only_bundle() {
        let builder = BundleBuilder::new(1_000, 100, None);
        let (bundles, _) = builder.build(BundlePreset::Tests, &[]);
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].sequence, 0);
        assert!(bundles[0].index.is_empty());
        assert!(bundles[0].content.starts_with("# bundle: tests/0\n"));
        assert_eq!(bundles[0].index_json(), "[]\n");
    }

    #[test]
    fn index_offsets_slice_the_bundle() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            write_record(&tmp, "a.txt", "alpha\n"),
            write_record(&tmp, "b.txt", "beta\n"),
        ];
        let builder = BundleBuilder::new(100_000, 1_000, None);
        let (bundles, _) = builder.build(BundlePreset::All, &records);
        let bundle = &bundles[0];
        for entry in &bundle.index {
            let start = entry.byte_offset as usize;
            let end = start + entry.length_bytes as usize;
            let slice = &bundle.content[start..end];
            assert!(slice.starts_with("---\n"));
            assert!(slice.contains(&format!("path: {}", entry.unit_path)));
        }
    }

    #[test]
    fn presets_select_their_slice() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            write_record(&tmp, "src/app.py", "def f():\n    pass\n"),
            write_record(&tmp, "tests/test_app.py", "def test_f():\n    pass\n"),
            write_record(&tmp, "requirements.txt", "flask\n"),
            write_record(&tmp, "README.md", "# readme\n"),
        ];
        let builder = BundleBuilder::new(100_000, 1_000, None);

        let (tests, _) = builder.build(BundlePreset::Tests, &records);
        assert_eq!(tests[0].unit_paths(), vec!["tests/test_app.py"]);

        let (deps, _) = builder.build(BundlePreset::Dependencies, &records);
        assert_eq!(deps[0].unit_paths(), vec!["requirements.txt"]);

        let (api, _) = builder.build(BundlePreset::Api, &records);
        assert_eq!(api[0].unit_paths(), vec!["src/app.py", "tests/test_app.py"]);

        let (all, _) = builder.build(BundlePreset::All, &records);
        assert_eq!(all[0].index.len(), 4);
    }

    #[test]
    fn api_preset_projects_to_declarations() {
        let tmp = TempDir::new().unwrap();
        let records = vec![write_record(
            &tmp,
            "src/app.py",
            "import os\n\nx = 1\n\ndef f():\n    body = 2\n    return body\n\nclass C:\n    pass\n",
        )];
        let builder = BundleBuilder::new(100_000, 1_000, None);
        let (bundles, _) = builder.build(BundlePreset::Api, &records);
        let content = &bundles[0].content;
        assert!(content.contains("import os"));
        assert!(content.contains("def f():"));
        assert!(content.contains("class C:"));
        assert!(!content.contains("body = 2"));
        assert!(!content.contains("x = 1"));
    }

    #[test]
    fn missing_file_degrades_to_diagnostic() {
        let record = FileRecord {
            canonical_path: "gone.py".to_string(),
            absolute_path: PathBuf::from("/definitely/missing/gone.py"),
            digest: "d".to_string(),
            size_bytes: 0,
            mtime_ns: 0,
            line_count: 0,
            language: "python".to_string(),
            cached: false,
            synopsis: None,
        };
        let builder = BundleBuilder::new(1_000, 100, None);
        let (bundles, diagnostics) = builder.build(BundlePreset::All, &[record]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, codes::READ_FAILED);
        assert!(bundles[0].index.is_empty());
    }
}
