//! Canonical path normalization.
//!
//! A canonical path is the identity of a file for the whole pipeline: cache
//! keys, delta classification, bundle ordering, and graph provenance all key
//! on it. The form is forward-slash, Unicode NFC, relative to the scan root.
//! Windows drive letters are lowercased; nothing else is case-folded.

use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Canonicalize a path already made relative to the scan root.
pub fn canonicalize_relative(relative: &Path) -> String {
    let raw = relative.to_string_lossy().replace('\\', "/");
    normalize_slashed(&raw)
}

/// Canonicalize a forward-slash path string.
pub fn normalize_slashed(path: &str) -> String {
    let mut normalized: String = path.nfc().collect();
    if let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    lowercase_drive_letter(&normalized)
}

fn lowercase_drive_letter(path: &str) -> String {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_uppercase() {
        let mut out = String::with_capacity(path.len());
        out.push(bytes[0].to_ascii_lowercase() as char);
        out.push_str(&path[1..]);
        return out;
    }
    path.to_string()
}
