//! Run directory management.
//!
//! Each run owns `runs/<timestamp>-<short_run_id>/` with the full fixed
//! subdirectory layout created up front. Retention pruning runs only after
//! finalization and never touches the current run.

use std::io;
use std::path::{Path, PathBuf};

pub const SUBDIRECTORIES: &[&str] = &[
    "assets", "badges", "bundles", "cards", "delta", "diagrams", "gates", "graphs", "logs",
    "manifests", "metrics", "summary",
];

pub struct RunStorage {
    runs_dir: PathBuf,
    run_id: String,
    run_dir: PathBuf,
}

impl RunStorage {
    pub fn create(runs_dir: &Path, run_id: &str) -> io::Result<Self> {
        let run_dir = runs_dir.join(run_id);
        for name in SUBDIRECTORIES {
            std::fs::create_dir_all(run_dir.join(name))?;
        }
        Ok(Self {
            runs_dir: runs_dir.to_path_buf(),
            run_id: run_id.to_string(),
            run_dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn subdirectory(&self, name: &str) -> PathBuf {
        self.run_dir.join(name)
    }

    /// Write one artifact under the run directory, returning its path.
    pub fn write_artifact(&self, relative: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let target = self.run_dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, bytes)?;
        Ok(target)
    }

    /// Remove sibling run directories beyond the retention count, newest
    /// first, always preserving the current run. `0` disables pruning.
    pub fn prune_siblings(&self, retention: usize) -> io::Result<Vec<String>> {
        if retention == 0 {
            return Ok(Vec::new());
        }
        let mut siblings: Vec<String> = std::fs::read_dir(&self.runs_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        // Run IDs start with the timestamp, so name order is age order.
        siblings.sort_by(|a, b| b.cmp(a));
        let mut removed = Vec::new();
        for name in siblings.into_iter().skip(retention) {
            if name == self.run_id {
                continue;
            }
            std::fs::remove_dir_all(self.runs_dir.join(&name))?;
            removed.push(name);
        }
        Ok(removed)
    }
}
