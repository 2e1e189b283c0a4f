//! Heuristic entity extraction.
//!
//! A pure function of file bytes: the same content always yields the same
//! [`ExtractionBlob`], which makes the blob digest a sound memoization key.
//! Python gets the full treatment (functions, classes, tests, fixtures,
//! imports); Rust and JavaScript/TypeScript get declarations and imports;
//! Go and Java get imports; every other code language degrades to a bare
//! `ModuleDeclared`. Unreadable content degrades the same way and is
//! reported as a diagnostic, never as a run failure.

use crate::error::{codes, Diagnostic};
use crate::scan::{is_code_language, FileRecord};
use crate::util::encoding::decode_text;
use crate::util::hashing::digest_bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const SYNOPSIS_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EntityEvent {
    ModuleDeclared { module: String, line: u64, doc: Option<String> },
    FunctionDeclared { module: String, name: String, line: u64 },
    ClassDeclared { module: String, name: String, line: u64 },
    TestDeclared { module: String, name: String, line: u64 },
    FixtureDeclared { module: String, name: String, line: u64 },
    ImportObserved { module: String, target: String, line: u64 },
}

impl EntityEvent {
    pub fn module(&self) -> &str {
        match self {
            EntityEvent::ModuleDeclared { module, .. }
            | EntityEvent::FunctionDeclared { module, .. }
            | EntityEvent::ClassDeclared { module, .. }
            | EntityEvent::TestDeclared { module, .. }
            | EntityEvent::FixtureDeclared { module, .. }
            | EntityEvent::ImportObserved { module, .. } => module,
        }
    }
}

/// The memoized unit: events plus the synopsis, so a cache hit also reuses
/// the synopsis without re-reading content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionBlob {
    pub synopsis: Option<String>,
    pub events: Vec<EntityEvent>,
}

impl ExtractionBlob {
    pub fn events_digest(&self) -> String {
        let payload = serde_json::to_vec(self).expect("blob serializes");
        digest_bytes(&payload)
    }
}

/// Digest-memoized extractor with hit/miss instrumentation.
pub struct EntityExtractor {
    memo: Mutex<HashMap<String, Arc<ExtractionBlob>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractorStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self { memo: Mutex::new(HashMap::new()), hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    /// Seed the memo with a prior run's blob. Does not count as a hit.
    pub fn seed(&self, digest: &str, blob: ExtractionBlob) {
        self.memo.lock().expect("memo lock").insert(digest.to_string(), Arc::new(blob));
    }

    /// Extract events for one record, reusing the memoized blob when the
    /// digest has been seen.
    pub fn extract(&self, record: &FileRecord) -> (Arc<ExtractionBlob>, Option<Diagnostic>) {
        if let Some(blob) = self.memo.lock().expect("memo lock").get(&record.digest) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return (Arc::clone(blob), None);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let (blob, diagnostic) = extract_blob(record);
        let blob = Arc::new(blob);
        self.memo
            .lock()
            .expect("memo lock")
            .insert(record.digest.clone(), Arc::clone(&blob));
        (blob, diagnostic)
    }

    pub fn stats(&self) -> ExtractorStats {
        ExtractorStats {
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Dotted module name for a canonical path: `src/pkg/mod.py` → `src.pkg.mod`.
pub fn module_name(canonical_path: &str) -> String {
    let trimmed = match canonical_path.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => canonical_path,
    };
    trimmed.replace('/', ".")
}

fn extract_blob(record: &FileRecord) -> (ExtractionBlob, Option<Diagnostic>) {
    let bytes = match std::fs::read(&record.absolute_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            let module = module_name(&record.canonical_path);
            let blob = ExtractionBlob {
                synopsis: None,
                events: if is_code_language(&record.language) {
                    vec![EntityEvent::ModuleDeclared { module, line: 1, doc: None }]
                } else {
                    Vec::new()
                },
            };
            let diagnostic = Diagnostic::new(
                codes::EXTRACT_DEGRADED,
                format!("{}: content unreadable ({err}); minimal events", record.canonical_path),
            );
            return (blob, Some(diagnostic));
        }
    };
    let (text, _) = decode_text(&bytes);
    (extract_from_text(&record.canonical_path, &record.language, &text), None)
}

/// Pure extraction over decoded text. Exposed for tests.
pub fn extract_from_text(canonical_path: &str, language: &str, text: &str) -> ExtractionBlob {
    let synopsis = synopsis_of(text);
    if !is_code_language(language) {
        return ExtractionBlob { synopsis, events: Vec::new() };
    }
    let module = module_name(canonical_path);
    let mut events = vec![EntityEvent::ModuleDeclared {
        module: module.clone(),
        line: 1,
        doc: doc_line(language, text),
    }];
    match language {
        "python" => extract_python(canonical_path, &module, text, &mut events),
        "rust" => extract_rust(&module, text, &mut events),
        "javascript" | "typescript" => extract_javascript(canonical_path, &module, text, &mut events),
        "go" | "java" => extract_line_imports(&module, text, &mut events),
        _ => {}
    }
    ExtractionBlob { synopsis, events }
}

fn synopsis_of(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    Some(line.chars().take(SYNOPSIS_MAX_CHARS).collect())
}

fn doc_line(language: &str, text: &str) -> Option<String> {
    let first = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let doc = match language {
        "python" => first
            .strip_prefix("\"\"\"")
            .or_else(|| first.strip_prefix("'''"))?
            .trim_end_matches("\"\"\"")
            .trim_end_matches("'''"),
        "rust" => first.strip_prefix("//!")?,
        _ => return None,
    };
    let doc = doc.trim();
    if doc.is_empty() {
        None
    } else {
        Some(doc.chars().take(SYNOPSIS_MAX_CHARS).collect())
    }
}

static PY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_]\w*)").unwrap());
static PY_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^class\s+([A-Za-z_]\w*)").unwrap());
static PY_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^import\s+([\w.]+)").unwrap());
static PY_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^from\s+([\w.]+)\s+import").unwrap());
static PY_FIXTURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@(?:pytest\.)?fixture").unwrap());

fn python_module_is_test(canonical_path: &str) -> bool {
    let filename = canonical_path.rsplit('/').next().unwrap_or(canonical_path);
    let stem = filename.strip_suffix(".py").unwrap_or(filename);
    canonical_path.starts_with("tests/")
        || canonical_path.contains("/tests/")
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem == "conftest"
}

fn extract_python(
    canonical_path: &str,
    module: &str,
    text: &str,
    events: &mut Vec<EntityEvent>,
) {
    let module_is_test = python_module_is_test(canonical_path);
    let mut pending_fixture = false;
    for (index, line) in text.lines().enumerate() {
        let lineno = index as u64 + 1;
        if let Some(captures) = PY_IMPORT.captures(line) {
            events.push(EntityEvent::ImportObserved {
                module: module.to_string(),
                target: captures[1].to_string(),
                line: lineno,
            });
            continue;
        }
        if let Some(captures) = PY_FROM.captures(line) {
            events.push(EntityEvent::ImportObserved {
                module: module.to_string(),
                target: captures[1].to_string(),
                line: lineno,
            });
            continue;
        }
        if PY_FIXTURE.is_match(line.trim_start()) && !line.starts_with(char::is_whitespace) {
            pending_fixture = true;
            continue;
        }
        if let Some(captures) = PY_DEF.captures(line) {
            let name = captures[1].to_string();
            if pending_fixture {
                events.push(EntityEvent::FixtureDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            } else if name.starts_with("test_") || module_is_test {
                events.push(EntityEvent::TestDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            } else {
                events.push(EntityEvent::FunctionDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            }
            pending_fixture = false;
            continue;
        }
        if let Some(captures) = PY_CLASS.captures(line) {
            let name = captures[1].to_string();
            if name.starts_with("Test") || module_is_test {
                events.push(EntityEvent::TestDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            } else {
                events.push(EntityEvent::ClassDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            }
            pending_fixture = false;
        }
    }
}

static RS_USE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^use\s+([A-Za-z_]\w*)").unwrap());
static RS_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:pub(?:\(\w+\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)").unwrap()
});
static RS_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:pub(?:\(\w+\))?\s+)?(?:struct|enum|trait)\s+([A-Za-z_]\w*)").unwrap()
});

fn extract_rust(module: &str, text: &str, events: &mut Vec<EntityEvent>) {
    let mut pending_test_attr = false;
    for (index, line) in text.lines().enumerate() {
        let lineno = index as u64 + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[test]") || trimmed.starts_with("#[tokio::test]") {
            pending_test_attr = true;
            continue;
        }
        if let Some(captures) = RS_USE.captures(line) {
            let target = captures[1].to_string();
            if target != "crate" && target != "self" && target != "super" {
                events.push(EntityEvent::ImportObserved {
                    module: module.to_string(),
                    target,
                    line: lineno,
                });
            }
            continue;
        }
        if let Some(captures) = RS_FN.captures(trimmed) {
            let name = captures[1].to_string();
            // Only top-level declarations carry no indentation; nested test
            // functions still count when marked with the attribute.
            if pending_test_attr {
                events.push(EntityEvent::TestDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            } else if !line.starts_with(char::is_whitespace) {
                events.push(EntityEvent::FunctionDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            }
            pending_test_attr = false;
            continue;
        }
        if let Some(captures) = RS_TYPE.captures(line) {
            events.push(EntityEvent::ClassDeclared {
                module: module.to_string(),
                name: captures[1].to_string(),
                line: lineno,
            });
            pending_test_attr = false;
        }
    }
}

static JS_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+.*?from\s+['"]([^'"]+)['"]"#).unwrap());
static JS_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static JS_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+([A-Za-z_$]\w*)").unwrap()
});
static JS_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:export\s+)?(?:default\s+)?class\s+([A-Za-z_$]\w*)").unwrap());

fn javascript_module_is_test(canonical_path: &str) -> bool {
    canonical_path.contains(".test.")
        || canonical_path.contains(".spec.")
        || canonical_path.contains("__tests__/")
}

fn extract_javascript(
    canonical_path: &str,
    module: &str,
    text: &str,
    events: &mut Vec<EntityEvent>,
) {
    let module_is_test = javascript_module_is_test(canonical_path);
    for (index, line) in text.lines().enumerate() {
        let lineno = index as u64 + 1;
        if let Some(captures) = JS_IMPORT.captures(line).or_else(|| JS_REQUIRE.captures(line)) {
            events.push(EntityEvent::ImportObserved {
                module: module.to_string(),
                target: captures[1].to_string(),
                line: lineno,
            });
            continue;
        }
        if let Some(captures) = JS_FN.captures(line) {
            let name = captures[1].to_string();
            if module_is_test {
                events.push(EntityEvent::TestDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            } else {
                events.push(EntityEvent::FunctionDeclared {
                    module: module.to_string(),
                    name,
                    line: lineno,
                });
            }
            continue;
        }
        if let Some(captures) = JS_CLASS.captures(line) {
            events.push(EntityEvent::ClassDeclared {
                module: module.to_string(),
                name: captures[1].to_string(),
                line: lineno,
            });
        }
    }
}

static LINE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+(?:\(|"([^"]+)"|([\w.]+))"#).unwrap());

fn extract_line_imports(module: &str, text: &str, events: &mut Vec<EntityEvent>) {
    for (index, line) in text.lines().enumerate() {
        if let Some(captures) = LINE_IMPORT.captures(line) {
            let target = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|m| m.as_str().to_string());
            if let Some(target) = target {
                events.push(EntityEvent::ImportObserved {
                    module: module.to_string(),
                    target,
                    line: index as u64 + 1,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record_for(path: &str, digest: &str) -> FileRecord {
        FileRecord {
            canonical_path: path.to_string(),
            absolute_path: PathBuf::from("/definitely/missing").join(path),
            digest: digest.to_string(),
            size_bytes: 0,
            mtime_ns: 0,
            line_count: 0,
            language: crate::scan::classify_language(path).to_string(),
            cached: false,
            synopsis: None,
        }
    }

    #[test]
    fn python_extraction_covers_the_event_set() {
        let source = "\"\"\"Module doc.\"\"\"\nimport os\nfrom pkg.sub import thing\n\n@pytest.fixture\ndef db():\n    pass\n\ndef handler():\n    pass\n\ndef test_handler():\n    pass\n\nclass Shape:\n    pass\n";
        let blob = extract_from_text("src/app.py", "python", source);
        let module = "src.app";
        assert!(blob.events.iter().any(|e| matches!(
            e,
            EntityEvent::ModuleDeclared { module: m, doc: Some(doc), .. }
                if m == module && doc == "Module doc."
        )));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::ImportObserved { target, .. } if target == "os")
        ));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::ImportObserved { target, .. } if target == "pkg.sub")
        ));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::FixtureDeclared { name, .. } if name == "db")
        ));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::FunctionDeclared { name, .. } if name == "handler")
        ));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::TestDeclared { name, .. } if name == "test_handler")
        ));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::ClassDeclared { name, .. } if name == "Shape")
        ));
    }

    #[test]
    fn test_modules_mark_every_declaration_as_test() {
        let blob = extract_from_text(
            "tests/test_api.py",
            "python",
            "def helper():\n    pass\n\nclass TestApi:\n    pass\n",
        );
        let tests: Vec<_> = blob
            .events
            .iter()
            .filter(|e| matches!(e, EntityEvent::TestDeclared { .. }))
            .collect();
        assert_eq!(tests.len(), 2);
    }

    #[test]
    fn rust_extraction_sees_uses_fns_and_test_attrs() {
        let source = "//! Crate doc.\nuse serde::Serialize;\nuse crate::inner;\n\npub fn public_api() {}\n\nstruct Widget;\n\n#[test]\nfn checks_widget() {}\n";
        let blob = extract_from_text("src/lib.rs", "rust", source);
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::ImportObserved { target, .. } if target == "serde")
        ));
        // crate-relative uses are not imports
        assert!(!blob.events.iter().any(
            |e| matches!(e, EntityEvent::ImportObserved { target, .. } if target == "crate")
        ));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::FunctionDeclared { name, .. } if name == "public_api")
        ));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::ClassDeclared { name, .. } if name == "Widget")
        ));
        assert!(blob.events.iter().any(
            |e| matches!(e, EntityEvent::TestDeclared { name, .. } if name == "checks_widget")
        ));
    }

    #[test]
    fn non_code_files_yield_synopsis_only() {
        let blob = extract_from_text("README.md", "markdown", "# Title\n\nBody.\n");
        assert!(blob.events.is_empty());
        assert_eq!(blob.synopsis.as_deref(), Some("# Title"));
    }

    #[test]
    fn extraction_is_pure() {
        let source = "import os\n\ndef f():\n    pass\n";
        let a = extract_from_text("a.py", "python", source);
        let b = extract_from_text("a.py", "python", source);
        assert_eq!(a, b);
        assert_eq!(a.events_digest(), b.events_digest());
    }

    #[test]
    fn memoization_counts_hits_and_misses() {
        let extractor = EntityExtractor::new();
        // The path does not exist, so extraction degrades — still memoized.
        let record = record_for("gone.py", "digest-1");
        let (first, diagnostic) = extractor.extract(&record);
        assert!(diagnostic.is_some());
        let (second, _) = extractor.extract(&record);
        assert_eq!(first, second);
        let stats = extractor.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn seeded_blobs_count_as_hits() {
        let extractor = EntityExtractor::new();
        let blob = ExtractionBlob { synopsis: Some("seeded".into()), events: Vec::new() };
        extractor.seed("digest-2", blob.clone());
        let (out, diagnostic) = extractor.extract(&record_for("seeded.py", "digest-2"));
        assert!(diagnostic.is_none());
        assert_eq!(*out, blob);
        assert_eq!(extractor.stats().cache_hits, 1);
        assert_eq!(extractor.stats().cache_misses, 0);
    }

    #[test]
    fn unreadable_code_file_degrades_to_module_event() {
        let extractor = EntityExtractor::new();
        let (blob, diagnostic) = extractor.extract(&record_for("src/gone.py", "digest-3"));
        assert_eq!(blob.events.len(), 1);
        assert!(matches!(blob.events[0], EntityEvent::ModuleDeclared { .. }));
        assert_eq!(diagnostic.unwrap().code, codes::EXTRACT_DEGRADED);
    }

    #[test]
    fn module_names_are_dotted() {
        assert_eq!(module_name("src/pkg/mod.py"), "src.pkg.mod");
        assert_eq!(module_name("top.rs"), "top");
        assert_eq!(module_name("Makefile"), "Makefile");
    }
}
