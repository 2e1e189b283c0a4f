//! repo-atlas: deterministic, local-first code analysis runs
//!
//! Walks a source tree and emits a reproducible run artifact bundle: manifest,
//! delta report, context bundles, knowledge graph with diffs, diagram
//! templates, normalized metrics with quality gates, explain cards, and a
//! Markdown summary. Identical inputs produce byte-identical outputs.

use std::process::ExitCode;

mod bundle;
mod cache;
mod cards;
mod cli;
mod config;
mod deps;
mod diagram;
mod error;
mod extract;
mod graph;
mod metrics;
mod run;
mod scan;
mod util;

fn main() -> ExitCode {
    ExitCode::from(cli::run())
}
