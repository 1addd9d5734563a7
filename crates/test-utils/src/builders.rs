#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use syncpipe::config::{
    ConfigFile, GraphConfig, OperationConfig, PipelineSection, RawConfigFile, WorkerSection,
    DEFAULT_MAX_CONCURRENT_OPERATIONS,
};
use syncpipe::engine::{PipelineCore, PipelineNames};
use syncpipe::graph::Operation;
use syncpipe::store::{MemoryStore, OperationStore};
use syncpipe::types::Algorithm;

/// Fixed instant used as "now" by core tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

/// `n` independent operations with default priority.
pub fn ops(n: usize) -> Vec<Operation> {
    (0..n).map(|_| Operation::new()).collect()
}

/// Builder for a `PipelineCore` backed by a `MemoryStore` the test can
/// inspect.
pub struct CoreBuilder {
    name: String,
    previous: Vec<String>,
    algorithm: Algorithm,
    max_concurrent: usize,
}

impl CoreBuilder {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            name: "uploads".to_string(),
            previous: Vec::new(),
            algorithm,
            max_concurrent: DEFAULT_MAX_CONCURRENT_OPERATIONS,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn previous_name(mut self, name: &str) -> Self {
        self.previous.push(name.to_string());
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn build(self) -> (PipelineCore, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let core = self.build_with_store(store.clone());
        (core, store)
    }

    /// Build over a store the test supplies, e.g. a `FlakyStore`.
    pub fn build_with_store(self, store: Arc<dyn OperationStore>) -> PipelineCore {
        let mut core = PipelineCore::new(
            PipelineNames::new(self.name, self.previous),
            self.algorithm,
            store,
        );
        core.set_max_concurrent_operation_count(self.max_concurrent, t0());
        core
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct PlanBuilder {
    config: RawConfigFile,
}

impl PlanBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection {
                    name: name.to_string(),
                    algorithm: Algorithm::CommitGraph,
                    max_concurrent_operation_count: DEFAULT_MAX_CONCURRENT_OPERATIONS,
                    previous_names: Vec::new(),
                },
                worker: WorkerSection::default(),
                graph: Vec::new(),
            },
        }
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.config.pipeline.algorithm = algorithm;
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.pipeline.max_concurrent_operation_count = max;
        self
    }

    pub fn previous_name(mut self, name: &str) -> Self {
        self.config.pipeline.previous_names.push(name.to_string());
        self
    }

    pub fn graph(mut self, snapshot: u64, operations: Vec<OperationConfig>) -> Self {
        self.config.graph.push(GraphConfig {
            snapshot,
            operation: operations,
        });
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `OperationConfig`.
pub struct OpBuilder {
    op: OperationConfig,
}

impl OpBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            op: OperationConfig {
                name: name.to_string(),
                priority: 0,
                after: vec![],
                payload: None,
            },
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.op.priority = priority;
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.op.after.push(dep.to_string());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.op.payload = Some(payload);
        self
    }

    pub fn build(self) -> OperationConfig {
        self.op
    }
}
