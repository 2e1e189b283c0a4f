//! Directory traversal honoring include/ignore globs.
//!
//! The walk yields a sorted, duplicate-free sequence of [`FileRecord`]s.
//! Ignore patterns take precedence over includes, symlinks are never
//! followed, and an unreadable file turns into a diagnostic instead of
//! aborting the run. Digesting fans out over a bounded rayon pool; results
//! are reassembled in canonical-path order so worker scheduling can never
//! leak into the output.

use super::{classify_language, FileRecord};
use crate::config::SourceOptions;
use crate::error::{codes, Diagnostic, RunError};
use crate::util::paths::canonicalize_relative;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

#[derive(Debug)]
pub struct SourceWalker {
    root: PathBuf,
    include: GlobSet,
    include_empty: bool,
    ignore: GlobSet,
    /// Output tree to skip when it nests under the scan root.
    exclude_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct WalkOutcome {
    pub records: Vec<FileRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SourceWalker {
    pub fn new(options: &SourceOptions, exclude_dir: Option<PathBuf>) -> Result<Self, RunError> {
        let root = options.root.clone();
        if !root.is_dir() {
            return Err(RunError::Input(format!(
                "scan root {} is missing or not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            include: build_globset(&options.include)?,
            include_empty: options.include.is_empty(),
            ignore: build_globset(&options.ignore)?,
            exclude_dir: exclude_dir.and_then(|dir| dir.canonicalize().ok()),
        })
    }

    pub fn walk(&self, digest_workers: usize) -> Result<WalkOutcome, RunError> {
        let mut diagnostics = Vec::new();
        let mut candidates: Vec<(String, PathBuf, u64, u64)> = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    diagnostics.push(Diagnostic::new(
                        codes::READ_FAILED,
                        format!("walk error: {err}"),
                    ));
                    continue;
                }
            };
            if entry.file_type().is_symlink() || !entry.file_type().is_file() {
                continue;
            }
            if self.is_excluded_output(entry.path()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let canonical = canonicalize_relative(relative);
            if self.ignore.is_match(&canonical) {
                continue;
            }
            if !self.include_empty && !self.include.is_match(&canonical) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    diagnostics.push(Diagnostic::new(
                        codes::READ_FAILED,
                        format!("{canonical}: stat failed: {err}"),
                    ));
                    continue;
                }
            };
            let mtime_ns = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_nanos() as u64)
                .unwrap_or(0);
            candidates.push((canonical, entry.path().to_path_buf(), metadata.len(), mtime_ns));
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        candidates.dedup_by(|a, b| a.0 == b.0);

        // Digest pool: results are keyed by input index, so completion order
        // cannot reorder the output.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(digest_workers)
            .build()
            .map_err(|err| RunError::Input(format!("digest pool: {err}")))?;
        let digested: Vec<Result<(String, u64), String>> = pool.install(|| {
            candidates
                .par_iter()
                .map(|(_, path, _, _)| {
                    digest_and_count(path).map_err(|err| err.to_string())
                })
                .collect()
        });

        let mut records = Vec::with_capacity(candidates.len());
        for ((canonical, path, size, mtime_ns), digest_result) in
            candidates.into_iter().zip(digested)
        {
            match digest_result {
                Ok((digest, line_count)) => {
                    let language = classify_language(&canonical).to_string();
                    records.push(FileRecord {
                        canonical_path: canonical,
                        absolute_path: path,
                        digest,
                        size_bytes: size,
                        mtime_ns,
                        line_count,
                        language,
                        cached: false,
                        synopsis: None,
                    });
                }
                Err(err) => {
                    diagnostics.push(Diagnostic::new(
                        codes::READ_FAILED,
                        format!("{canonical}: {err}"),
                    ));
                }
            }
        }

        Ok(WalkOutcome { records, diagnostics })
    }

    fn is_excluded_output(&self, path: &Path) -> bool {
        let Some(exclude) = &self.exclude_dir else {
            return false;
        };
        path.canonicalize().map(|p| p.starts_with(exclude)).unwrap_or(false)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, RunError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|err| RunError::Config(format!("invalid glob '{pattern}': {err}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| RunError::Config(format!("glob set: {err}")))
}

/// Stream a file once, producing its SHA-256 digest and line count.
fn digest_and_count(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut lines: u64 = 0;
    let mut last_byte: Option<u8> = None;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        let chunk = &buffer[..read];
        hasher.update(chunk);
        lines += chunk.iter().filter(|&&b| b == b'\n').count() as u64;
        last_byte = Some(chunk[read - 1]);
    }
    // A trailing fragment without a newline still counts as a line.
    if let Some(byte) = last_byte {
        if byte != b'\n' {
            lines += 1;
        }
    }
    Ok((format!("{:x}", hasher.finalize()), lines))
}
