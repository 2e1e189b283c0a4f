//! Command-line interface.
//!
//! A single command: point it at a source tree, get a run directory back.
//! Exit codes: 0 success, 2 quality-gate failure, 1 fatal internal error,
//! 3 configuration or invariant failure.

use crate::bundle::BundlePreset;
use crate::cards::CardScope;
use crate::config::{apply_overrides, load_config, CliOverrides};
use crate::diagram::{DiagramFormat, DiagramPreset, ThemeChoice};
use crate::error::RunError;
use crate::graph::GraphScope;
use crate::run::{CancelToken, RunService};
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Deterministic, local-first code analysis runs
#[derive(Parser)]
#[command(name = "repo-atlas")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Scan root directory
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bundle preset to build (repeatable)
    #[arg(long = "preset", value_enum, value_name = "NAME")]
    preset: Vec<BundlePreset>,

    /// Include glob over canonical paths (repeatable)
    #[arg(long = "include", value_name = "GLOB")]
    include: Vec<String>,

    /// Ignore glob over canonical paths; wins over includes (repeatable)
    #[arg(long = "ignore", value_name = "GLOB")]
    ignore: Vec<String>,

    /// Recompute everything, ignoring cached extraction results
    #[arg(long)]
    force_rebuild: bool,

    /// Run without reading the prior cache state
    #[arg(long)]
    no_incremental: bool,

    /// Minimum line coverage percentage gate
    #[arg(long, value_name = "PERCENT")]
    min_coverage: Option<f64>,

    /// Maximum failed tests gate
    #[arg(long, value_name = "N")]
    max_failed_tests: Option<u64>,

    /// Maximum lint warnings gate
    #[arg(long, value_name = "N")]
    max_lint_warnings: Option<u64>,

    /// Maximum critical vulnerabilities gate
    #[arg(long = "max-critical-vulns", value_name = "N")]
    max_critical_vulns: Option<u64>,

    /// Skip knowledge graph construction
    #[arg(long)]
    no_graph: bool,

    /// Graph projection applied before serialization
    #[arg(long, value_enum, value_name = "SCOPE")]
    graph_scope: Option<GraphScope>,

    /// Diff against the prior run's graph snapshot (default)
    #[arg(long, overrides_with = "no_graph_diff")]
    graph_diff: bool,

    /// Skip the inter-run graph diff
    #[arg(long)]
    no_graph_diff: bool,

    /// Drop test nodes from the graph regardless of scope
    #[arg(long)]
    graph_no_tests: bool,

    /// Skip diagram generation
    #[arg(long)]
    no_diagrams: bool,

    /// Diagram preset (repeatable)
    #[arg(long = "diagram-preset", value_enum, value_name = "NAME")]
    diagram_preset: Vec<DiagramPreset>,

    /// Diagram template format (repeatable)
    #[arg(long = "diagram-format", value_enum, value_name = "FORMAT")]
    diagram_format: Vec<DiagramFormat>,

    /// Diagram theme
    #[arg(long, value_enum, value_name = "THEME")]
    diagram_theme: Option<ThemeChoice>,

    /// Diagram rendering worker count
    #[arg(long, value_name = "N")]
    diagram_concurrency: Option<usize>,

    /// Explain-card scope (repeatable)
    #[arg(long = "card-scope", value_enum, value_name = "SCOPE")]
    card_scope: Vec<CardScope>,

    /// Record that outbound network was permitted (the core never uses it)
    #[arg(long)]
    allow_network: bool,

    /// Normalized metrics JSON document (repeatable)
    #[arg(long = "metrics-json", value_name = "FILE")]
    metrics_json: Vec<PathBuf>,

    /// Output base directory (runs/ and cache/ live under it)
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Sibling runs kept after finalization
    #[arg(long, value_name = "N")]
    retention: Option<usize>,

    /// Seed recorded in the manifest
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Enable verbose logging (sets log level to DEBUG)
    #[arg(short, long)]
    verbose: bool,
}

pub fn run() -> u8 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 3,
            };
            let _ = err.print();
            return code;
        }
    };

    // RUST_LOG always wins; --verbose falls back to DEBUG, default WARN.
    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    match execute(cli) {
        Ok(true) => 0,
        Ok(false) => 2,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

fn execute(cli: Cli) -> Result<bool, RunError> {
    let config = load_config(cli.config.as_deref())?;
    let graph_diff = if cli.no_graph_diff {
        Some(false)
    } else if cli.graph_diff {
        Some(true)
    } else {
        None
    };
    let mut config = apply_overrides(
        config,
        CliOverrides {
            input: Some(cli.input),
            include: cli.include,
            ignore: cli.ignore,
            presets: cli.preset,
            force_rebuild: cli.force_rebuild,
            no_incremental: cli.no_incremental,
            min_coverage: cli.min_coverage,
            max_failed_tests: cli.max_failed_tests,
            max_lint_warnings: cli.max_lint_warnings,
            max_critical_vulns: cli.max_critical_vulns,
            no_graph: cli.no_graph,
            graph_scope: cli.graph_scope,
            graph_diff,
            graph_no_tests: cli.graph_no_tests,
            no_diagrams: cli.no_diagrams,
            diagram_presets: cli.diagram_preset,
            diagram_formats: cli.diagram_format,
            diagram_theme: cli.diagram_theme,
            diagram_concurrency: cli.diagram_concurrency,
            allow_network: cli.allow_network,
            metrics_json: cli.metrics_json,
            output: cli.output,
            retention: cli.retention,
            seed: cli.seed,
        },
    );
    if !cli.card_scope.is_empty() {
        config.cards.scopes = cli.card_scope;
    }
    config.validate()?;

    let service = RunService::new(config);
    let outcome = service.execute(&CancelToken::new())?;
    println!(
        "run {} complete: {}",
        outcome.run_id,
        outcome.run_dir.display()
    );
    if !outcome.gate_report.passed {
        for reason in outcome.gate_report.failed_reasons() {
            eprintln!("gate failed: {reason}");
        }
    }
    Ok(outcome.gate_report.passed)
}
