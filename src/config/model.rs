// src/config/model.rs

use serde::Deserialize;

use crate::types::Algorithm;

/// Default `max_concurrent_operation_count` for a pipeline.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 8;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pipeline]
/// name = "uploads"
/// algorithm = "flat_graph"
/// max_concurrent_operation_count = 2
///
/// [worker]
/// duration_ms = 50
///
/// [[graph]]
/// snapshot = 10
///   [[graph.operation]]
///   name = "a1"
///   after = ["a0"]
/// ```
///
/// Everything except `pipeline.name` and the graphs has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub worker: WorkerSection,

    /// Commits to replay, from `[[graph]]` tables.
    #[serde(default)]
    pub graph: Vec<GraphConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `config::validate`),
/// so holders can rely on the plan being well-formed.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSection,
    pub worker: WorkerSection,
    pub graph: Vec<GraphConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        pipeline: PipelineSection,
        worker: WorkerSection,
        graph: Vec<GraphConfig>,
    ) -> Self {
        Self {
            pipeline,
            worker,
            graph,
        }
    }

    /// Total number of operations across every graph.
    pub fn operation_count(&self) -> usize {
        self.graph.iter().map(|g| g.operation.len()).sum()
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    pub name: String,

    /// `"commit_graph"` (default) or `"flat_graph"`.
    #[serde(default)]
    pub algorithm: Algorithm,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_operation_count: usize,

    /// Names this pipeline was previously registered under.
    #[serde(default)]
    pub previous_names: Vec<String>,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_OPERATIONS
}

/// `[worker]` section, driving the simulated worker used by the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// How long each simulated attempt takes.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    /// Number of attempts per operation that fail before one succeeds.
    #[serde(default)]
    pub fail_first_attempts: u32,

    /// Hold applied to an operation after a failed attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_duration_ms() -> u64 {
    50
}

fn default_retry_delay_ms() -> u64 {
    200
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            fail_first_attempts: 0,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// One `[[graph]]` table: the operations of a single commit.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub snapshot: u64,

    #[serde(default)]
    pub operation: Vec<OperationConfig>,
}

/// One `[[graph.operation]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationConfig {
    /// Plan-local name, used by `after` references.
    pub name: String,

    #[serde(default)]
    pub priority: i32,

    /// Names of operations (in this or another graph) that must finish first.
    #[serde(default)]
    pub after: Vec<String>,

    /// Opaque data handed to the worker.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}
