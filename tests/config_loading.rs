// tests/config_loading.rs

use std::fs;

use syncpipe::config::{load_and_validate, parse_and_validate, ConfigFile, DEFAULT_MAX_CONCURRENT_OPERATIONS};
use syncpipe::errors::PipelineError;
use syncpipe::types::Algorithm;
use syncpipe_test_utils::builders::{OpBuilder, PlanBuilder};
use tempfile::tempdir;

const PLAN: &str = r#"
[pipeline]
name = "uploads"
algorithm = "flat_graph"
max_concurrent_operation_count = 2
previous_names = ["legacy-uploads"]

[worker]
duration_ms = 5
fail_first_attempts = 1

[[graph]]
snapshot = 10

  [[graph.operation]]
  name = "a1"
  priority = 3

  [[graph.operation]]
  name = "a2"
  after = ["a1"]
  payload = { path = "/photos/1.jpg" }

[[graph]]
snapshot = 11

  [[graph.operation]]
  name = "b1"
  after = ["a2"]
"#;

fn config_error(result: syncpipe::errors::Result<ConfigFile>) -> String {
    match result {
        Err(PipelineError::ConfigError(msg)) => msg,
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn loads_a_plan_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Syncpipe.toml");
    fs::write(&path, PLAN).unwrap();

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.pipeline.name, "uploads");
    assert_eq!(cfg.pipeline.algorithm, Algorithm::FlatGraph);
    assert_eq!(cfg.pipeline.max_concurrent_operation_count, 2);
    assert_eq!(cfg.pipeline.previous_names, vec!["legacy-uploads".to_string()]);
    assert_eq!(cfg.worker.duration_ms, 5);
    assert_eq!(cfg.worker.fail_first_attempts, 1);
    assert_eq!(cfg.worker.retry_delay_ms, 200);
    assert_eq!(cfg.graph.len(), 2);
    assert_eq!(cfg.operation_count(), 3);
    assert_eq!(cfg.graph[0].operation[0].priority, 3);
    assert_eq!(
        cfg.graph[0].operation[1].payload.as_ref().unwrap()["path"],
        "/photos/1.jpg"
    );
}

#[test]
fn defaults_apply_to_a_minimal_plan() {
    let cfg = parse_and_validate(
        r#"
        [pipeline]
        name = "minimal"

        [[graph]]
        snapshot = 1
        operation = [{ name = "only" }]
        "#,
    )
    .unwrap();

    assert_eq!(cfg.pipeline.algorithm, Algorithm::CommitGraph);
    assert_eq!(
        cfg.pipeline.max_concurrent_operation_count,
        DEFAULT_MAX_CONCURRENT_OPERATIONS
    );
    assert_eq!(cfg.worker.duration_ms, 50);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let result = load_and_validate(dir.path().join("nope.toml"));
    assert!(matches!(result, Err(PipelineError::IoError(_))));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let result = parse_and_validate("[pipeline\nname = ");
    assert!(matches!(result, Err(PipelineError::TomlError(_))));
}

#[test]
fn unknown_algorithm_is_rejected_by_the_parser() {
    let result = parse_and_validate(
        r#"
        [pipeline]
        name = "x"
        algorithm = "breadth_first"
        "#,
    );
    assert!(matches!(result, Err(PipelineError::TomlError(_))));
}

#[test]
fn snapshots_must_increase() {
    let raw = PlanBuilder::new("uploads")
        .graph(5, vec![OpBuilder::new("a").build()])
        .graph(5, vec![OpBuilder::new("b").build()])
        .build_raw();
    let msg = config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("strictly increasing"), "{msg}");
}

#[test]
fn plan_needs_a_graph_and_a_name() {
    let msg = config_error(ConfigFile::try_from(PlanBuilder::new("uploads").build_raw()));
    assert!(msg.contains("at least one [[graph]]"), "{msg}");

    let raw = PlanBuilder::new("  ")
        .graph(1, vec![OpBuilder::new("a").build()])
        .build_raw();
    let msg = config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("must not be empty"), "{msg}");

    let raw = PlanBuilder::new("uploads")
        .previous_name("uploads")
        .graph(1, vec![OpBuilder::new("a").build()])
        .build_raw();
    let msg = config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("previous_names"), "{msg}");
}

#[test]
fn operation_names_must_be_unique() {
    let raw = PlanBuilder::new("uploads")
        .graph(1, vec![OpBuilder::new("a").build()])
        .graph(2, vec![OpBuilder::new("a").build()])
        .build_raw();
    let msg = config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("used more than once"), "{msg}");
}

#[test]
fn dependency_references_are_checked() {
    let raw = PlanBuilder::new("uploads")
        .graph(1, vec![OpBuilder::new("a").after("ghost").build()])
        .build_raw();
    let msg = config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("unknown dependency 'ghost'"), "{msg}");

    let raw = PlanBuilder::new("uploads")
        .graph(1, vec![OpBuilder::new("a").after("a").build()])
        .build_raw();
    let msg = config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("cannot depend on itself"), "{msg}");

    let raw = PlanBuilder::new("uploads")
        .graph(
            1,
            vec![
                OpBuilder::new("a").build(),
                OpBuilder::new("b").after("a").after("a").build(),
            ],
        )
        .build_raw();
    let msg = config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("more than once"), "{msg}");
}

#[test]
fn commit_graph_plans_cannot_wait_on_later_commits() {
    let forward = |algorithm| {
        PlanBuilder::new("uploads")
            .algorithm(algorithm)
            .graph(1, vec![OpBuilder::new("a").after("b").build()])
            .graph(2, vec![OpBuilder::new("b").build()])
            .build_raw()
    };

    let msg = config_error(ConfigFile::try_from(forward(Algorithm::CommitGraph)));
    assert!(msg.contains("later snapshot"), "{msg}");

    assert!(ConfigFile::try_from(forward(Algorithm::FlatGraph)).is_ok());
}

#[test]
fn dependency_cycles_are_rejected() {
    let raw = PlanBuilder::new("uploads")
        .graph(
            1,
            vec![
                OpBuilder::new("a").after("c").build(),
                OpBuilder::new("b").after("a").build(),
                OpBuilder::new("c").after("b").build(),
            ],
        )
        .build_raw();
    let msg = config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("cycle detected"), "{msg}");
}
