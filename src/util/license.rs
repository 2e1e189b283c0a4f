//! License-hint detection for bundle headers.
//!
//! The rule is deliberately rigid because the hint participates in the
//! determinism contract: probe `LICENSE`, `LICENSE.md`, `LICENSE.txt`, then
//! `COPYING` at the scan root, in that order, and match the first 400 bytes
//! against a fixed phrase table. The first hit wins; no hit yields `None`.

use once_cell::sync::Lazy;
use std::path::Path;

const PROBE_FILES: &[&str] = &["LICENSE", "LICENSE.md", "LICENSE.txt", "COPYING"];
const PROBE_BYTES: usize = 400;

static PHRASES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("mit license", "MIT"),
        ("permission is hereby granted, free of charge", "MIT"),
        ("apache license", "Apache-2.0"),
        ("redistribution and use in source and binary forms", "BSD"),
        ("gnu general public license", "GPL"),
        ("mozilla public license", "MPL-2.0"),
        ("this is free and unencumbered software", "Unlicense"),
    ]
});

/// Detect the license hint for a scan root.
pub fn detect_license_hint(root: &Path) -> Option<String> {
    for name in PROBE_FILES {
        let candidate = root.join(name);
        let Ok(bytes) = std::fs::read(&candidate) else {
            continue;
        };
        let head: String = String::from_utf8_lossy(&bytes[..bytes.len().min(PROBE_BYTES)])
            .to_lowercase();
        for (phrase, hint) in PHRASES.iter() {
            if head.contains(phrase) {
                return Some((*hint).to_string());
            }
        }
        // A license file that matches no phrase still stops the probe: the
        // hint for this tree is unknown, not whatever COPYING might say.
        return None;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detects_mit_from_license_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("LICENSE"),
            "MIT License\n\nPermission is hereby granted, free of charge...",
        )
        .unwrap();
        assert_eq!(detect_license_hint(tmp.path()).as_deref(), Some("MIT"));
    }

    #[test]
    fn probe_order_prefers_license_over_copying() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("COPYING"), "GNU GENERAL PUBLIC LICENSE").unwrap();
        std::fs::write(tmp.path().join("LICENSE"), "Apache License, Version 2.0").unwrap();
        assert_eq!(detect_license_hint(tmp.path()).as_deref(), Some("Apache-2.0"));
    }

    #[test]
    fn unrecognized_license_file_yields_none() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("LICENSE"), "all rights reserved, bespoke terms").unwrap();
        assert_eq!(detect_license_hint(tmp.path()), None);
    }

    #[test]
    fn missing_files_yield_none() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(detect_license_hint(tmp.path()), None);
    }
}
