//! Integration tests for the CLI surface and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn atlas() -> Command {
    Command::cargo_bin("repo-atlas").unwrap()
}

fn seed_tree(root: &std::path::Path) {
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("src/app.py"), "import os\n\ndef handler():\n    pass\n").unwrap();
    std::fs::write(root.join("requirements.txt"), "flask==3.0\n").unwrap();
}

#[test]
fn version_prints_name() {
    atlas()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("repo-atlas"));
}

#[test]
fn help_lists_core_options() {
    atlas()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--input"))
        .stdout(predicate::str::contains("--force-rebuild"))
        .stdout(predicate::str::contains("--graph-scope"))
        .stdout(predicate::str::contains("--diagram-theme"))
        .stdout(predicate::str::contains("--metrics-json"));
}

#[test]
fn missing_input_flag_exits_3() {
    atlas().assert().code(3);
}

#[test]
fn missing_input_directory_exits_3() {
    let out = TempDir::new().unwrap();
    atlas()
        .args(["--input", "/definitely/not/here"])
        .args(["--output", out.path().to_str().unwrap()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("input error"));
}

#[test]
fn unknown_preset_exits_3() {
    let tree = TempDir::new().unwrap();
    atlas()
        .args(["--input", tree.path().to_str().unwrap()])
        .args(["--preset", "everything"])
        .assert()
        .code(3);
}

#[test]
fn unknown_config_field_exits_3() {
    let tree = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let config = tree.path().join("atlas.toml");
    std::fs::write(&config, "mystery_knob = 1\n").unwrap();
    atlas()
        .args(["--input", tree.path().to_str().unwrap()])
        .args(["--output", out.path().to_str().unwrap()])
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn successful_run_reports_run_directory() {
    let tree = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    seed_tree(tree.path());
    atlas()
        .args(["--input", tree.path().to_str().unwrap()])
        .args(["--output", out.path().to_str().unwrap()])
        .env("SOURCE_DATE_EPOCH", "1750000000")
        .assert()
        .success()
        .stdout(predicate::str::contains("complete"));
}

#[test]
fn gate_failure_exits_2_but_produces_artifacts() {
    let tree = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    seed_tree(tree.path());
    let metrics = tree.path().join("metrics.json");
    std::fs::write(
        &metrics,
        r#"{"tests": {"total": 3, "passed": 2, "failed": 1, "skipped": 0, "duration_ms": 40}}"#,
    )
    .unwrap();

    atlas()
        .args(["--input", tree.path().to_str().unwrap()])
        .args(["--output", out.path().to_str().unwrap()])
        .args(["--metrics-json", metrics.to_str().unwrap()])
        .args(["--max-failed-tests", "0"])
        .env("SOURCE_DATE_EPOCH", "1750000000")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("1 failed tests exceed maximum 0"));

    let run_dir = only_run_dir(out.path());
    let gate = std::fs::read_to_string(run_dir.join("gates/gate.json")).unwrap();
    assert!(gate.contains("\"passed\": false"));
    assert!(gate.contains("max_failed_tests"));
    // Everything else was still produced.
    assert!(run_dir.join("manifests/manifest.json").is_file());
    assert!(run_dir.join("graphs/knowledge_graph.json").is_file());
    assert!(run_dir.join("summary/summary.md").is_file());
}

#[test]
fn malformed_metrics_document_is_skipped_not_fatal() {
    let tree = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    seed_tree(tree.path());
    let metrics = tree.path().join("metrics.json");
    std::fs::write(&metrics, "{not json").unwrap();

    atlas()
        .args(["--input", tree.path().to_str().unwrap()])
        .args(["--output", out.path().to_str().unwrap()])
        .args(["--metrics-json", metrics.to_str().unwrap()])
        .env("SOURCE_DATE_EPOCH", "1750000000")
        .assert()
        .success();

    let run_dir = only_run_dir(out.path());
    let summary = std::fs::read_to_string(run_dir.join("summary/summary.md")).unwrap();
    assert!(summary.contains("E_METRICS"));
}

#[test]
fn no_graph_skips_graph_diagrams_and_cards() {
    let tree = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    seed_tree(tree.path());
    atlas()
        .args(["--input", tree.path().to_str().unwrap()])
        .args(["--output", out.path().to_str().unwrap()])
        .arg("--no-graph")
        .env("SOURCE_DATE_EPOCH", "1750000000")
        .assert()
        .success();

    let run_dir = only_run_dir(out.path());
    assert!(!run_dir.join("graphs/knowledge_graph.json").exists());
    assert!(!run_dir.join("cards/index.json").exists());
    let manifest = std::fs::read_to_string(run_dir.join("manifests/manifest.json")).unwrap();
    assert!(manifest.contains("\"stage\": \"graph\""));
    assert!(manifest.contains("\"stage\": \"diagrams\""));
    assert!(manifest.contains("\"stage\": \"cards\""));
}

#[test]
fn ignore_pattern_wins_over_include() {
    let tree = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(tree.path().join("keep.py"), "x = 1\n").unwrap();
    std::fs::write(tree.path().join("drop.py"), "y = 1\n").unwrap();

    atlas()
        .args(["--input", tree.path().to_str().unwrap()])
        .args(["--output", out.path().to_str().unwrap()])
        .args(["--include", "*.py"])
        .args(["--ignore", "drop.py"])
        .env("SOURCE_DATE_EPOCH", "1750000000")
        .assert()
        .success();

    let run_dir = only_run_dir(out.path());
    let manifest = std::fs::read_to_string(run_dir.join("manifests/manifest.json")).unwrap();
    assert!(manifest.contains("keep.py"));
    assert!(!manifest.contains("drop.py"));
}

fn only_run_dir(base: &std::path::Path) -> std::path::PathBuf {
    let runs = base.join("runs");
    let mut dirs: Vec<_> = std::fs::read_dir(&runs)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    dirs.pop().expect("at least one run directory")
}
