//! Source discovery: file records and language classification.

pub mod walker;

pub use walker::{SourceWalker, WalkOutcome};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One discovered input file. Created by the walker, enriched with the
/// synopsis from the extraction blob, then immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Forward-slash path relative to the scan root; unique within a run.
    pub canonical_path: String,
    pub absolute_path: PathBuf,
    /// SHA-256 of the file content, 64 hex chars.
    pub digest: String,
    pub size_bytes: u64,
    pub mtime_ns: u64,
    pub line_count: u64,
    /// Extension-table classification; `"unknown"` when unclassified.
    pub language: String,
    /// True when the digest and size match the prior cache entry.
    pub cached: bool,
    /// First non-empty line, truncated to 120 characters.
    pub synopsis: Option<String>,
}

const LANGUAGE_TABLE: &[(&str, &str)] = &[
    ("c", "c"),
    ("cc", "cpp"),
    ("cfg", "config"),
    ("cjs", "javascript"),
    ("cpp", "cpp"),
    ("cs", "csharp"),
    ("css", "css"),
    ("go", "go"),
    ("h", "c"),
    ("hpp", "cpp"),
    ("html", "html"),
    ("ini", "config"),
    ("java", "java"),
    ("js", "javascript"),
    ("json", "json"),
    ("jsx", "javascript"),
    ("kt", "kotlin"),
    ("lock", "lockfile"),
    ("md", "markdown"),
    ("mjs", "javascript"),
    ("php", "php"),
    ("py", "python"),
    ("pyi", "python"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("rst", "restructuredtext"),
    ("scala", "scala"),
    ("sh", "shell"),
    ("sql", "sql"),
    ("swift", "swift"),
    ("toml", "toml"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("txt", "text"),
    ("xml", "xml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
];

/// Classify a file by extension (or well-known extensionless name).
/// No content sniffing: the table is the whole contract.
pub fn classify_language(canonical_path: &str) -> &'static str {
    let filename = canonical_path.rsplit('/').next().unwrap_or(canonical_path);
    let lowered = filename.to_ascii_lowercase();
    match lowered.as_str() {
        "makefile" => return "make",
        "dockerfile" => return "dockerfile",
        _ => {}
    }
    let Some((_, ext)) = lowered.rsplit_once('.') else {
        return "unknown";
    };
    LANGUAGE_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
        .unwrap_or("unknown")
}

/// Languages the entity extractor treats as code.
pub fn is_code_language(language: &str) -> bool {
    matches!(
        language,
        "python"
            | "rust"
            | "javascript"
            | "typescript"
            | "go"
            | "java"
            | "c"
            | "cpp"
            | "ruby"
            | "csharp"
            | "kotlin"
            | "php"
            | "scala"
            | "swift"
            | "shell"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_extensions() {
        assert_eq!(classify_language("src/app.py"), "python");
        assert_eq!(classify_language("src/lib.rs"), "rust");
        assert_eq!(classify_language("web/App.TSX"), "typescript");
        assert_eq!(classify_language("README.md"), "markdown");
    }

    #[test]
    fn extensionless_names_use_the_filename() {
        assert_eq!(classify_language("Makefile"), "make");
        assert_eq!(classify_language("deploy/Dockerfile"), "dockerfile");
        assert_eq!(classify_language("LICENSE"), "unknown");
    }

    #[test]
    fn unknown_extensions_are_unknown() {
        assert_eq!(classify_language("data/blob.xyz"), "unknown");
    }

    #[test]
    fn code_language_set_is_closed() {
        assert!(is_code_language("python"));
        assert!(is_code_language("rust"));
        assert!(!is_code_language("markdown"));
        assert!(!is_code_language("unknown"));
    }
}
