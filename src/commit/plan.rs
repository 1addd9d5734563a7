// src/commit/plan.rs

//! A `CommitSource` that replays the commits described in a plan file.

use std::collections::HashMap;

use serde_json::json;
use tracing::debug;

use crate::commit::{CommitSource, RestoredGraph};
use crate::config::ConfigFile;
use crate::engine::PipelineNames;
use crate::errors::Result;
use crate::graph::{Operation, OperationId};

/// Graphs built from a validated [`ConfigFile`].
///
/// Each `[[graph.operation]]` gets a fresh [`OperationId`]; `after` names are
/// resolved to those identifiers. The payload handed to the worker is
/// `{"name": <plan name>, "data": <payload or null>}`.
#[derive(Debug, Clone)]
pub struct PlanSource {
    graphs: Vec<RestoredGraph>,
    ids: HashMap<String, OperationId>,
    names: HashMap<OperationId, String>,
}

impl PlanSource {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let ids: HashMap<String, OperationId> = cfg
            .graph
            .iter()
            .flat_map(|g| g.operation.iter())
            .map(|op| (op.name.clone(), OperationId::new()))
            .collect();

        let graphs = cfg
            .graph
            .iter()
            .map(|g| RestoredGraph {
                snapshot: g.snapshot,
                operations: g
                    .operation
                    .iter()
                    .map(|op| {
                        let deps = op.after.iter().filter_map(|dep| ids.get(dep).copied());
                        Operation::with_id(ids[&op.name])
                            .with_pipeline(cfg.pipeline.name.clone())
                            .with_priority(op.priority)
                            .with_dependencies(deps)
                            .with_payload(json!({
                                "name": op.name,
                                "data": op.payload.clone().unwrap_or_default(),
                            }))
                    })
                    .collect(),
            })
            .collect();

        let names = ids.iter().map(|(name, id)| (*id, name.clone())).collect();

        Self { graphs, ids, names }
    }

    /// Identifier assigned to the plan operation `name`.
    pub fn id_of(&self, name: &str) -> Option<OperationId> {
        self.ids.get(name).copied()
    }

    /// Plan name of an operation identifier.
    pub fn name_of(&self, id: OperationId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn graphs(&self) -> &[RestoredGraph] {
        &self.graphs
    }
}

impl CommitSource for PlanSource {
    fn restore_graphs(&self, names: &PipelineNames) -> Result<Vec<RestoredGraph>> {
        let graphs: Vec<RestoredGraph> = self
            .graphs
            .iter()
            .filter_map(|g| {
                let operations: Vec<Operation> = g
                    .operations
                    .iter()
                    .filter(|op| names.matches(op.pipeline()))
                    .cloned()
                    .collect();
                (!operations.is_empty()).then_some(RestoredGraph {
                    snapshot: g.snapshot,
                    operations,
                })
            })
            .collect();
        debug!(pipeline = %names.name(), graphs = graphs.len(), "plan source restored graphs");
        Ok(graphs)
    }
}
