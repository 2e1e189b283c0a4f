//! Digest and identifier service.
//!
//! Everything that needs to be stable across runs flows through here:
//! content digests (SHA-256, streamed in bounded chunks), 16-hex node and
//! edge identifiers, and the short run-ID derivation. Identifiers separate
//! their components with the ASCII unit separator (0x1F) so concatenation
//! ambiguity cannot produce colliding inputs.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Unit separator between identifier components.
const SEP: u8 = 0x1f;

/// Chunk size for streamed file hashing.
const CHUNK_BYTES: usize = 64 * 1024;

/// Files up to this size are hashed from a single read.
pub const WHOLE_FILE_THRESHOLD: u64 = 8 * 1024 * 1024;

/// SHA-256 of a byte slice as 64 lowercase hex characters.
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of a file's content, streamed in bounded chunks above the
/// whole-file threshold.
pub fn digest_file(path: &Path) -> std::io::Result<String> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() <= WHOLE_FILE_THRESHOLD {
        return Ok(digest_bytes(&std::fs::read(path)?));
    }
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_BYTES];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Deterministic node identifier: SHA-256 over `kind 0x1F scope_path`,
/// truncated to 16 hex characters.
pub fn node_id(kind: &str, scope_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([SEP]);
    hasher.update(scope_path.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Deterministic edge identifier: SHA-256 over
/// `source_id 0x1F kind 0x1F target_id`, truncated to 16 hex characters.
pub fn edge_id(source_id: &str, kind: &str, target_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([SEP]);
    hasher.update(kind.as_bytes());
    hasher.update([SEP]);
    hasher.update(target_id.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Short run identifier derived from the resolved-config digest and the
/// run timestamp. Eight hex characters is enough to disambiguate runs that
/// share a timestamp second.
pub fn short_run_id(config_digest: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config_digest.as_bytes());
    hasher.update([SEP]);
    hasher.update(timestamp.as_bytes());
    format!("{:x}", hasher.finalize())[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn digest_bytes_is_sha256_hex() {
        // sha256("") is the well-known empty digest
        assert_eq!(
            digest_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(digest_bytes(b"hello").len(), 64);
    }

    #[test]
    fn digest_file_matches_digest_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"deterministic content").unwrap();
        file.flush().unwrap();
        assert_eq!(
            digest_file(file.path()).unwrap(),
            digest_bytes(b"deterministic content")
        );
    }

    #[test]
    fn node_ids_are_stable_and_separator_safe() {
        let a = node_id("module", "pkg.sub");
        assert_eq!(a.len(), 16);
        assert_eq!(a, node_id("module", "pkg.sub"));
        // The separator prevents "modulep" + "kg.sub" from colliding.
        assert_ne!(node_id("module", "pkg"), node_id("modul", "epkg"));
    }

    #[test]
    fn edge_ids_depend_on_all_three_components() {
        let base = edge_id("aaaa", "contains", "bbbb");
        assert_eq!(base.len(), 16);
        assert_ne!(base, edge_id("aaaa", "imports", "bbbb"));
        assert_ne!(base, edge_id("bbbb", "contains", "aaaa"));
    }
}
