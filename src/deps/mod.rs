//! Dependency-manifest normalization.
//!
//! Reads the allow-listed manifests discovered by the walker and emits
//! [`DependencyEvent`]s with canonicalized package names (lowercase, runs of
//! `-`, `_`, `.` collapsed to a single `-`) and a scope classification.
//! Each event is associated with the module owning the manifest's directory.

use crate::error::{codes, Diagnostic};
use crate::scan::FileRecord;
use crate::util::encoding::decode_text;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyScope {
    Runtime,
    Dev,
    Optional,
}

impl DependencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyScope::Runtime => "runtime",
            DependencyScope::Dev => "dev",
            DependencyScope::Optional => "optional",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEvent {
    /// Canonicalized package name.
    pub package: String,
    /// Raw display name as written in the manifest.
    pub display_name: String,
    pub version_spec: Option<String>,
    pub scope: DependencyScope,
    /// Dotted module of the manifest's directory; `None` at the root.
    pub owner_module: Option<String>,
    /// Canonical path of the manifest the event came from.
    pub source: String,
}

/// Manifest filenames the parser understands.
pub fn is_dependency_manifest(canonical_path: &str) -> bool {
    let filename = canonical_path.rsplit('/').next().unwrap_or(canonical_path);
    filename == "pyproject.toml"
        || filename == "Cargo.toml"
        || filename == "package.json"
        || (filename.starts_with("requirements") && filename.ends_with(".txt"))
}

/// Canonicalize a package name: lowercase, `[-_.]+` collapses to `-`.
pub fn canonical_package_name(name: &str) -> String {
    static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_.]+").unwrap());
    SEPARATORS.replace_all(&name.to_lowercase(), "-").to_string()
}

/// Parse every manifest among the records, in canonical-path order.
pub fn parse_dependencies(records: &[FileRecord]) -> (Vec<DependencyEvent>, Vec<Diagnostic>) {
    let mut events = Vec::new();
    let mut diagnostics = Vec::new();
    for record in records {
        if !is_dependency_manifest(&record.canonical_path) {
            continue;
        }
        let bytes = match std::fs::read(&record.absolute_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                diagnostics.push(Diagnostic::new(
                    codes::READ_FAILED,
                    format!("{}: {err}", record.canonical_path),
                ));
                continue;
            }
        };
        let (text, _) = decode_text(&bytes);
        let filename = record.canonical_path.rsplit('/').next().unwrap_or("");
        let parsed = if filename == "pyproject.toml" {
            parse_pyproject(&record.canonical_path, &text)
        } else if filename == "Cargo.toml" {
            parse_cargo(&record.canonical_path, &text)
        } else if filename == "package.json" {
            parse_package_json(&record.canonical_path, &text)
        } else {
            Ok(parse_requirements(&record.canonical_path, &text))
        };
        match parsed {
            Ok(mut parsed_events) => events.append(&mut parsed_events),
            Err(message) => diagnostics.push(Diagnostic::new(codes::READ_FAILED, message)),
        }
    }
    events.sort_by(|a, b| (&a.package, &a.source).cmp(&(&b.package, &b.source)));
    (events, diagnostics)
}

fn owner_module(canonical_path: &str) -> Option<String> {
    let (dir, _) = canonical_path.rsplit_once('/')?;
    Some(dir.replace('/', "."))
}

fn event(
    source: &str,
    display_name: &str,
    version_spec: Option<String>,
    scope: DependencyScope,
) -> DependencyEvent {
    DependencyEvent {
        package: canonical_package_name(display_name),
        display_name: display_name.to_string(),
        version_spec: version_spec.filter(|spec| !spec.is_empty()),
        scope,
        owner_module: owner_module(source),
        source: source.to_string(),
    }
}

const REQUIREMENT_SEPARATORS: &[&str] = &["==", ">=", "<=", "~=", "!=", ">", "<"];

/// Split a PEP 508-ish requirement line into name and version spec.
fn split_requirement(entry: &str) -> (String, Option<String>) {
    let entry = entry.split(';').next().unwrap_or(entry).trim();
    for separator in REQUIREMENT_SEPARATORS {
        if let Some(position) = entry.find(separator) {
            let name = entry[..position].trim();
            let spec = entry[position..].trim();
            return (strip_extras(name), Some(spec.to_string()));
        }
    }
    (strip_extras(entry), None)
}

fn strip_extras(name: &str) -> String {
    name.split('[').next().unwrap_or(name).trim().to_string()
}

fn parse_requirements(source: &str, text: &str) -> Vec<DependencyEvent> {
    let scope = if source.contains("dev") || source.contains("test") {
        DependencyScope::Dev
    } else {
        DependencyScope::Runtime
    };
    let mut events = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
            continue;
        }
        let (name, spec) = split_requirement(line);
        if !name.is_empty() {
            events.push(event(source, &name, spec, scope));
        }
    }
    events
}

fn parse_pyproject(source: &str, text: &str) -> Result<Vec<DependencyEvent>, String> {
    let value: toml::Value =
        toml::from_str(text).map_err(|err| format!("{source}: invalid TOML: {err}"))?;
    let mut events = Vec::new();
    let project = value.get("project");
    if let Some(list) = project
        .and_then(|p| p.get("dependencies"))
        .and_then(|deps| deps.as_array())
    {
        for entry in list.iter().filter_map(|v| v.as_str()) {
            let (name, spec) = split_requirement(entry);
            events.push(event(source, &name, spec, DependencyScope::Runtime));
        }
    }
    if let Some(groups) = project
        .and_then(|p| p.get("optional-dependencies"))
        .and_then(|deps| deps.as_table())
    {
        for list in groups.values().filter_map(|v| v.as_array()) {
            for entry in list.iter().filter_map(|v| v.as_str()) {
                let (name, spec) = split_requirement(entry);
                events.push(event(source, &name, spec, DependencyScope::Optional));
            }
        }
    }
    Ok(events)
}

fn parse_cargo(source: &str, text: &str) -> Result<Vec<DependencyEvent>, String> {
    let value: toml::Value =
        toml::from_str(text).map_err(|err| format!("{source}: invalid TOML: {err}"))?;
    let mut events = Vec::new();
    let sections = [
        ("dependencies", DependencyScope::Runtime),
        ("dev-dependencies", DependencyScope::Dev),
        ("build-dependencies", DependencyScope::Dev),
    ];
    for (section, scope) in sections {
        let Some(table) = value.get(section).and_then(|v| v.as_table()) else {
            continue;
        };
        for (name, spec) in table {
            let version = match spec {
                toml::Value::String(version) => Some(version.clone()),
                toml::Value::Table(table) => table
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string()),
                _ => None,
            };
            let optional = spec
                .as_table()
                .and_then(|table| table.get("optional"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let scope = if optional { DependencyScope::Optional } else { scope };
            events.push(event(source, name, version, scope));
        }
    }
    Ok(events)
}

fn parse_package_json(source: &str, text: &str) -> Result<Vec<DependencyEvent>, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|err| format!("{source}: invalid JSON: {err}"))?;
    let mut events = Vec::new();
    let sections = [
        ("dependencies", DependencyScope::Runtime),
        ("devDependencies", DependencyScope::Dev),
        ("optionalDependencies", DependencyScope::Optional),
    ];
    for (section, scope) in sections {
        let Some(map) = value.get(section).and_then(|v| v.as_object()) else {
            continue;
        };
        for (name, spec) in map {
            events.push(event(source, name, spec.as_str().map(|s| s.to_string()), scope));
        }
    }
    Ok(events)
}
