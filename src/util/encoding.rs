//! Text decoding for bundle units and extraction input.
//!
//! UTF-8 is the fast path. Non-UTF-8 files go through BOM inspection and a
//! chardetng guess before decoding with replacement characters, so one odd
//! legacy file never aborts a run. Decoding is a pure function of the file
//! bytes, which keeps bundle contents byte-stable across runs.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use std::path::Path;

const SAMPLE_BYTES: usize = 8192;

/// Decode file bytes to text, with the encoding label that was used.
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    // BOM first: a UTF-8 BOM is valid UTF-8, so the fast path would keep it
    // as a ZWNBSP prefix; encoding_rs strips it.
    if bytes.starts_with(&[0xef, 0xbb, 0xbf]) {
        let (text, _, _) = UTF_8.decode(bytes);
        return (text.into_owned(), "utf-8-sig");
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), "utf-8");
    }
    let encoding = guess_encoding(bytes);
    let (text, _, _) = encoding.decode(bytes);
    (text.into_owned(), encoding.name())
}

/// Read and decode a file in one step.
pub fn read_text(path: &Path) -> std::io::Result<(String, &'static str)> {
    let bytes = std::fs::read(path)?;
    Ok(decode_text(&bytes))
}

fn guess_encoding(bytes: &[u8]) -> &'static Encoding {
    let sample = &bytes[..bytes.len().min(SAMPLE_BYTES)];
    let mut detector = EncodingDetector::new();
    detector.feed(sample, bytes.len() <= SAMPLE_BYTES);
    detector.guess(None, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_fast_path() {
        let (text, label) = decode_text("plain text \u{1f680}".as_bytes());
        assert_eq!(text, "plain text \u{1f680}");
        assert_eq!(label, "utf-8");
    }

    #[test]
    fn bom_is_stripped() {
        let mut bytes = vec![0xef, 0xbb, 0xbf];
        bytes.extend_from_slice(b"after bom");
        let (text, label) = decode_text(&bytes);
        assert_eq!(text, "after bom");
        assert_eq!(label, "utf-8-sig");
    }

    #[test]
    fn latin1_decodes_with_detection() {
        // "café" in ISO-8859-1
        let bytes = [0x63, 0x61, 0x66, 0xe9];
        let (text, label) = decode_text(&bytes);
        assert!(text.starts_with("caf"));
        assert_ne!(label, "utf-8");
    }

    #[test]
    fn decoding_is_pure() {
        let bytes = [0x63, 0x61, 0x66, 0xe9, 0x0a];
        assert_eq!(decode_text(&bytes), decode_text(&bytes));
    }
}
