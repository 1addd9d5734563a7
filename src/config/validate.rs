// src/config/validate.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{PipelineError, Result};
use crate::types::Algorithm;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PipelineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.pipeline, raw.worker, raw.graph))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_pipeline_section(cfg)?;
    ensure_has_graphs(cfg)?;
    validate_snapshot_order(cfg)?;
    let snapshot_of = validate_operation_names(cfg)?;
    validate_dependencies(cfg, &snapshot_of)?;
    validate_acyclic(cfg)?;
    Ok(())
}

fn validate_pipeline_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.name.trim().is_empty() {
        return Err(PipelineError::ConfigError(
            "[pipeline].name must not be empty".to_string(),
        ));
    }
    if cfg.pipeline.previous_names.iter().any(|n| n == &cfg.pipeline.name) {
        return Err(PipelineError::ConfigError(format!(
            "[pipeline].previous_names must not contain the current name '{}'",
            cfg.pipeline.name
        )));
    }
    Ok(())
}

fn ensure_has_graphs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.graph.is_empty() {
        return Err(PipelineError::ConfigError(
            "config must contain at least one [[graph]] table".to_string(),
        ));
    }
    Ok(())
}

fn validate_snapshot_order(cfg: &RawConfigFile) -> Result<()> {
    for pair in cfg.graph.windows(2) {
        if pair[1].snapshot <= pair[0].snapshot {
            return Err(PipelineError::ConfigError(format!(
                "graph snapshots must be strictly increasing (got {} after {})",
                pair[1].snapshot, pair[0].snapshot
            )));
        }
    }
    Ok(())
}

/// Check name uniqueness and return `name -> snapshot`.
fn validate_operation_names(cfg: &RawConfigFile) -> Result<HashMap<&str, u64>> {
    let mut snapshot_of = HashMap::new();
    for graph in cfg.graph.iter() {
        for op in graph.operation.iter() {
            if snapshot_of.insert(op.name.as_str(), graph.snapshot).is_some() {
                return Err(PipelineError::ConfigError(format!(
                    "operation name '{}' is used more than once",
                    op.name
                )));
            }
        }
    }
    Ok(snapshot_of)
}

fn validate_dependencies(cfg: &RawConfigFile, snapshot_of: &HashMap<&str, u64>) -> Result<()> {
    for graph in cfg.graph.iter() {
        for op in graph.operation.iter() {
            let mut seen = HashSet::new();
            for dep in op.after.iter() {
                let Some(&dep_snapshot) = snapshot_of.get(dep.as_str()) else {
                    return Err(PipelineError::ConfigError(format!(
                        "operation '{}' has unknown dependency '{}' in `after`",
                        op.name, dep
                    )));
                };
                if dep == &op.name {
                    return Err(PipelineError::ConfigError(format!(
                        "operation '{}' cannot depend on itself in `after`",
                        op.name
                    )));
                }
                if !seen.insert(dep.as_str()) {
                    return Err(PipelineError::ConfigError(format!(
                        "operation '{}' lists dependency '{}' more than once",
                        op.name, dep
                    )));
                }
                // Commit graphs run strictly in order, so waiting on a later
                // commit would stall forever.
                if cfg.pipeline.algorithm == Algorithm::CommitGraph && dep_snapshot > graph.snapshot {
                    return Err(PipelineError::ConfigError(format!(
                        "operation '{}' (snapshot {}) depends on '{}' from later snapshot {}; \
                         only flat_graph pipelines allow that",
                        op.name, graph.snapshot, dep, dep_snapshot
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_acyclic(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> operation.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for op in cfg.graph.iter().flat_map(|g| g.operation.iter()) {
        graph.add_node(op.name.as_str());
    }
    for op in cfg.graph.iter().flat_map(|g| g.operation.iter()) {
        for dep in op.after.iter() {
            graph.add_edge(dep.as_str(), op.name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(PipelineError::ConfigError(format!(
            "cycle detected in operation dependencies involving '{}'",
            cycle.node_id()
        ))),
    }
}
